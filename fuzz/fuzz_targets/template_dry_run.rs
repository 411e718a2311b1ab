#![no_main]

use libfuzzer_sys::fuzz_target;
use prompty_core::standard_engine;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let source = match std::str::from_utf8(data) {
        Ok(src) => src,
        Err(_) => return,
    };

    let engine = standard_engine();
    if let Ok(template) = engine.parse("fuzz-template-dry-run", source) {
        let _ = engine.dry_run(&template, &Value::Null);
    }
    let _ = engine.explain("fuzz-template-explain", source, &Value::Null);
});
