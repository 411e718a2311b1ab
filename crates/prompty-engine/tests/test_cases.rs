// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use prompty_engine::{Engine, ErrorStrategy};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct EngineCase {
    name: String,
    template: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    templates: BTreeMap<String, String>,
    #[serde(default)]
    error_strategy: Option<ErrorStrategy>,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn load_cases() -> Vec<EngineCase> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir
        .parent()
        .expect("workspace root missing")
        .parent()
        .expect("workspace root missing");
    let path = root.join("test-cases/prompty-engine.json");
    let bytes = fs::read(&path).expect("missing engine test cases");
    serde_json::from_slice(&bytes).expect("invalid engine test cases")
}

fn engine_for(case: &EngineCase) -> Engine {
    let mut builder = Engine::builder();
    if let Some(strategy) = case.error_strategy {
        builder.error_strategy(strategy);
    }
    for (name, source) in &case.templates {
        builder.template(name.clone(), source.clone());
    }
    builder
        .build()
        .unwrap_or_else(|err| panic!("{}: engine setup failed: {err}", case.name))
}

#[test]
fn engine_test_cases() {
    let cases = load_cases();
    assert!(!cases.is_empty());

    for case in cases {
        let engine = engine_for(&case);
        let template = match engine.parse(&case.name, &case.template) {
            Ok(template) => template,
            Err(err) => {
                let expected_err = case
                    .error
                    .as_ref()
                    .unwrap_or_else(|| panic!("parse {} failed: {err}", case.name));
                let msg = err.to_string();
                assert!(
                    msg.contains(expected_err.as_str()),
                    "{} expected parse error containing '{}', got '{}'",
                    case.name,
                    expected_err,
                    msg
                );
                continue;
            }
        };

        let result = engine.execute(&template, &case.data);
        match (&case.error, result) {
            (Some(expected_err), Ok(output)) => panic!(
                "{} expected error '{}' but rendered '{}'",
                case.name, expected_err, output
            ),
            (Some(expected_err), Err(err)) => {
                let msg = err.to_string();
                assert!(
                    msg.contains(expected_err.as_str()),
                    "{} expected error containing '{}', got '{}'",
                    case.name,
                    expected_err,
                    msg
                );
            }
            (None, Err(err)) => panic!("render {} failed: {err}", case.name),
            (None, Ok(output)) => {
                let expected = case
                    .expected
                    .as_ref()
                    .unwrap_or_else(|| panic!("{} has neither expected nor error", case.name));
                assert_eq!(&output, expected, "{} output mismatch", case.name);
            }
        }
    }
}

#[test]
fn rendering_is_idempotent() {
    for case in load_cases().into_iter().filter(|case| case.expected.is_some()) {
        let engine = engine_for(&case);
        let template = engine.parse(&case.name, &case.template).expect("parse");
        let first = engine.execute(&template, &case.data).expect("first render");
        let second = engine.execute(&template, &case.data).expect("second render");
        assert_eq!(first, second, "{} is not idempotent", case.name);
    }
}
