// SPDX-License-Identifier: Apache-2.0 OR MIT
use prompty_core::standard_engine;
use serde_json::json;

const SOURCE: &str = r#"{~prompty.message role="system"~}You are helping {~prompty.var name="user.name" /~}.{~/prompty.message~}
{~prompty.message role="user"~}{~prompty.for item="q" in="questions" limit="3"~}- {~prompty.var name="q" /~}
{~/prompty.for~}Tone: {~prompty.var name="tone" default="neutral" /~}{~/prompty.message~}"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = standard_engine();
    let template = engine.parse("support", SOURCE)?;

    let data = json!({"user": {"nickname": "ada"}, "questions": ["why?", "how?"]});
    let report = engine.dry_run(&template, &data)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    assert!(report.missing_variables.contains(&"user.name".to_string()));
    assert!(report.unused_data.contains(&"user.nickname".to_string()));

    let data = json!({"user": {"name": "Ada"}, "questions": ["why?", "how?"]});
    for message in engine.execute_messages(&template, &data)? {
        println!("[{}] {}", message.role, message.content);
    }
    Ok(())
}
