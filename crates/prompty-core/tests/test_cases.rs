// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::fs;
use std::path::PathBuf;

use prompty_core::standard_engine;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Fixture {
    name: String,
    template: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[test]
fn standard_functions_behave_as_documented() {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir
        .parent()
        .expect("workspace root missing")
        .parent()
        .expect("workspace root missing again");
    let path = root.join("test-cases/prompty-core.json");
    let bytes = fs::read(&path).expect("test cases file missing");
    let cases: Vec<Fixture> = serde_json::from_slice(&bytes).expect("invalid test cases json");

    let engine = standard_engine();
    for case in cases {
        let template = engine
            .parse(&case.name, &case.template)
            .unwrap_or_else(|err| panic!("parse {} failed: {}", case.name, err));

        match case.error {
            Some(expected_error) => {
                let result = engine.execute(&template, &case.data);
                let err = match result {
                    Ok(output) => panic!(
                        "{} expected error '{}' but rendered '{}'",
                        case.name, expected_error, output
                    ),
                    Err(err) => err,
                };
                assert!(
                    err.to_string().contains(&expected_error),
                    "{} expected error containing '{}', got '{}'",
                    case.name,
                    expected_error,
                    err
                );
            }
            None => {
                let rendered = engine
                    .execute(&template, &case.data)
                    .unwrap_or_else(|err| panic!("render {} failed: {}", case.name, err));
                assert_eq!(
                    Some(rendered.as_str()),
                    case.expected.as_deref(),
                    "{} output mismatch",
                    case.name
                );
            }
        }
    }
}
