#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use prompty_core::{standard_builder, Engine, ErrorStrategy};
use serde_json::{json, Value};

static ENGINE: Lazy<Engine> = Lazy::new(|| {
    let mut builder = standard_builder();
    builder
        .error_strategy(ErrorStrategy::Remove)
        .template("header", "{~prompty.var name=\"title\" default=\"\" /~}");
    builder.build().unwrap_or_default()
});

static DATA: Lazy<Value> = Lazy::new(|| {
    json!({
        "title": "fuzz",
        "items": [1, "two", {"three": 3}],
        "user": {"name": "Ada", "admin": true},
    })
});

fuzz_target!(|data: &[u8]| {
    let source = match std::str::from_utf8(data) {
        Ok(src) => src,
        Err(_) => return,
    };

    if let Ok(template) = ENGINE.parse("fuzz-template-render", source) {
        let _ = ENGINE.execute(&template, &DATA);
        let _ = ENGINE.execute_messages(&template, &DATA);
    }
});
