// SPDX-License-Identifier: Apache-2.0 OR MIT
use prompty_core::{
    standard_builder, value_to_string, Attributes, Context, Error, ExecContext, Func, Resolver,
};
use serde_json::{json, Value};

/// `{~demo.quote from="path" /~}` renders the value wrapped in quote marks.
struct Quote;

impl Resolver for Quote {
    fn tag_name(&self) -> &str {
        "demo.quote"
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), Error> {
        if attrs.has("from") {
            Ok(())
        } else {
            Err(Error::parse("demo.quote requires a \"from\" attribute", None))
        }
    }

    fn resolve(
        &self,
        ctx: &Context<'_>,
        _exec: &ExecContext<'_>,
        attrs: &Attributes,
    ) -> Result<String, Error> {
        let path = attrs.get_default("from", "");
        let value = ctx
            .lookup(path)
            .ok_or_else(|| Error::render(format!("nothing to quote at \"{path}\""), None))?;
        Ok(format!("\u{201c}{}\u{201d}", value_to_string(value)))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = standard_builder();
    builder.resolver(Quote)?;
    builder.function(Func::new("shout", 1, Some(1), |args| {
        Ok(Value::String(format!(
            "{}!",
            value_to_string(&args[0]).to_uppercase()
        )))
    }))?;
    let engine = builder.build()?;

    let template = engine.parse(
        "custom",
        "{~demo.quote from=\"motto\" /~}{~prompty.if eval='shout(tone) == \"LOUD!\"'~} (loud){~/prompty.if~}",
    )?;
    let output = engine.execute(&template, &json!({"motto": "ship it", "tone": "loud"}))?;

    println!("{output}");
    assert_eq!(output, "\u{201c}ship it\u{201d} (loud)");
    Ok(())
}
