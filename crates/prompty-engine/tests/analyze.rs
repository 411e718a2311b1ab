// SPDX-License-Identifier: Apache-2.0 OR MIT
use prompty_engine::{
    Attributes, Context, Engine, Error, ExecContext, Resolution, Resolver, TagShape,
};
use serde_json::json;

struct Exploding;

impl Resolver for Exploding {
    fn tag_name(&self) -> &str {
        "demo.explode"
    }

    fn resolve(
        &self,
        _ctx: &Context<'_>,
        _exec: &ExecContext<'_>,
        _attrs: &Attributes,
    ) -> Result<String, Error> {
        panic!("dry runs must not resolve tags");
    }
}

struct ExplodingBlock;

impl Resolver for ExplodingBlock {
    fn tag_name(&self) -> &str {
        "demo.wrap"
    }

    fn shape(&self) -> TagShape {
        TagShape::Block
    }

    fn resolve(
        &self,
        _ctx: &Context<'_>,
        _exec: &ExecContext<'_>,
        _attrs: &Attributes,
    ) -> Result<String, Error> {
        panic!("dry runs must not resolve block tags");
    }
}

fn engine() -> Engine {
    let mut builder = Engine::builder();
    builder.resolver(Exploding).unwrap();
    builder.resolver(ExplodingBlock).unwrap();
    builder.template("footer", "bye");
    builder.build().unwrap()
}

#[test]
fn dry_run_never_invokes_resolvers() {
    let engine = engine();
    let template = engine
        .parse(
            "t",
            "a{~demo.explode /~}{~demo.wrap~}inner{~/demo.wrap~}{~prompty.env name=\"HOME\" /~}",
        )
        .unwrap();
    let report = engine.dry_run(&template, &json!({})).unwrap();
    assert!(report.valid);
    assert_eq!(report.output, "a[demo.explode][demo.wrap]inner[prompty.env]");
    let names: Vec<_> = report.resolvers.iter().map(|usage| usage.name.as_str()).collect();
    assert_eq!(names, vec!["demo.explode", "demo.wrap", "prompty.env"]);
    assert!(report.resolvers.iter().all(|usage| usage.known));
}

#[test]
fn nested_path_missing_even_when_parent_exists() {
    let engine = Engine::new();
    let template = engine
        .parse("t", "Hi {~prompty.var name=\"user.name\" /~}")
        .unwrap();
    let report = engine.dry_run(&template, &json!({"user": {}})).unwrap();
    assert!(!report.valid);
    assert_eq!(report.variables.len(), 1);
    let usage = &report.variables[0];
    assert_eq!(usage.name, "user.name");
    assert!(!usage.in_data);
    assert_eq!((usage.line, usage.column), (1, 4));
    assert_eq!(report.missing_variables, vec!["user.name"]);
    assert_eq!(report.output, "Hi [missing:user.name]");
}

#[test]
fn defaults_are_not_missing() {
    let engine = Engine::new();
    let template = engine
        .parse("t", "{~prompty.var name=\"title\" default=\"Untitled\" /~}")
        .unwrap();
    let report = engine.dry_run(&template, &json!({})).unwrap();
    assert!(report.valid);
    assert!(report.missing_variables.is_empty());
    assert_eq!(report.variables[0].default.as_deref(), Some("Untitled"));
    assert_eq!(report.output, "Untitled");
}

#[test]
fn loop_variables_are_reported_as_not_in_data() {
    let engine = Engine::new();
    let template = engine
        .parse(
            "t",
            "{~prompty.for item=\"x\" index=\"i\" in=\"items\" limit=\"2\"~}{~prompty.var name=\"x\" /~}{~/prompty.for~}",
        )
        .unwrap();
    let report = engine.dry_run(&template, &json!({"items": [1, 2, 3]})).unwrap();
    assert_eq!(report.loops.len(), 1);
    let usage = &report.loops[0];
    assert_eq!(usage.item, "x");
    assert_eq!(usage.index.as_deref(), Some("i"));
    assert_eq!(usage.source, "items");
    assert_eq!(usage.limit, Some(2));
    assert!(usage.in_data);
    assert!(!report.variables[0].in_data);
    assert_eq!(report.missing_variables, vec!["x"]);
    assert!(report.unused_data.is_empty());
}

#[test]
fn suggestions_and_unused_data() {
    let engine = Engine::new();
    let template = engine
        .parse("t", "{~prompty.var name=\"user.nmae\" /~}")
        .unwrap();
    let data = json!({"user": {"name": "Ada", "age": 3}, "extra": true});
    let report = engine.dry_run(&template, &data).unwrap();
    assert!(report.variables[0]
        .suggestions
        .contains(&"user.name".to_string()));
    assert!(report.variables[0].suggestions.len() <= 3);

    let mut unused = report.unused_data.clone();
    unused.sort();
    assert_eq!(unused, vec!["extra", "user.age", "user.name"]);
}

#[test]
fn includes_and_unknown_tags_are_inventoried() {
    let engine = engine();
    let template = engine
        .parse(
            "t",
            "{~prompty.include template=\"footer\" /~}{~prompty.include template=\"ghost\" /~}{~custom.thing /~}",
        )
        .unwrap();
    let report = engine.dry_run(&template, &json!({})).unwrap();
    assert!(!report.valid);
    assert_eq!(report.output, "[include:footer][include:ghost][custom.thing]");
    let exists: Vec<_> = report
        .includes
        .iter()
        .map(|usage| (usage.template.as_str(), usage.exists))
        .collect();
    assert_eq!(exists, vec![("footer", true), ("ghost", false)]);
    assert!(!report.resolvers[0].known);
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("included template \"ghost\" not found")));
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("custom.thing")));
}

#[test]
fn conditionals_are_listed_and_selected_branch_rendered() {
    let engine = Engine::new();
    let template = engine
        .parse(
            "t",
            "{~prompty.if eval=\"admin\"~}A{~prompty.var name=\"secret\" /~}{~prompty.elseif eval=\"nope(1)\"~}B{~prompty.else~}C{~/prompty.if~}",
        )
        .unwrap();
    let report = engine
        .dry_run(&template, &json!({"admin": false, "secret": "s"}))
        .unwrap();
    let evals: Vec<_> = report
        .conditionals
        .iter()
        .map(|usage| usage.eval.as_str())
        .collect();
    assert_eq!(evals, vec!["admin", "nope(1)"]);
    // the unrendered branch is still inventoried
    assert_eq!(report.variables.len(), 1);
    assert_eq!(report.output, "C");
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("could not be evaluated")));
    assert_eq!(report.conditionals[1].functions, vec!["nope"]);
}

#[test]
fn short_circuited_calls_to_unknown_functions_are_flagged() {
    let engine = Engine::new();
    let template = engine
        .parse(
            "t",
            "{~prompty.if eval='ready || missingFn(x)'~}yes{~/prompty.if~}",
        )
        .unwrap();
    let report = engine.dry_run(&template, &json!({"ready": true})).unwrap();

    assert_eq!(report.output, "yes");
    assert_eq!(report.conditionals[0].functions, vec!["missingFn"]);
    let flagged: Vec<_> = report
        .warnings
        .iter()
        .filter(|warning| warning.contains("unknown function \"missingFn\""))
        .collect();
    assert_eq!(flagged.len(), 1, "{:?}", report.warnings);
    assert!(flagged[0].contains("line 1, column 1"));
}

#[test]
fn parse_warnings_surface_in_the_report() {
    let engine = Engine::new();
    let template = engine
        .parse(
            "t",
            "{~prompty.for item=\"x\" in=\"xs\"~}x{~/prompty.for~}",
        )
        .unwrap();
    let report = engine.dry_run(&template, &json!({"xs": []})).unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("without a limit")));
}

#[test]
fn dry_run_report_serialises() {
    let engine = Engine::new();
    let template = engine.parse("t", "{~prompty.var name=\"a\" /~}").unwrap();
    let report = engine.dry_run(&template, &json!({"a": 1})).unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["valid"], json!(true));
    assert_eq!(value["variables"][0]["name"], json!("a"));
    assert_eq!(value["output"], json!("1"));
}

#[test]
fn explain_traces_every_variable() {
    let engine = Engine::new();
    let report = engine.explain(
        "t",
        "{~prompty.for item=\"x\" in=\"xs\" limit=\"5\"~}{~prompty.var name=\"x\" /~}{~/prompty.for~}|{~prompty.var name=\"y\" default=\"Y\" /~}",
        &json!({"xs": ["a", "b"]}),
    );
    assert!(report.succeeded());
    assert_eq!(report.output.as_deref(), Some("ab|Y"));
    let trace: Vec<_> = report
        .variables
        .iter()
        .map(|trace| (trace.path.as_str(), trace.found, trace.resolution.clone()))
        .collect();
    assert_eq!(
        trace,
        vec![
            ("x", true, Resolution::Value("a".into())),
            ("x", true, Resolution::Value("b".into())),
            ("y", false, Resolution::Default("Y".into())),
        ]
    );
    assert!(report.ast_dump.contains("For(x in xs, limit=5)"));
    assert!(report.ast_dump.contains("Var(y) default=\"Y\""));
}

#[test]
fn explain_keeps_partial_trace_on_failure() {
    let engine = Engine::new();
    let report = engine.explain(
        "t",
        "{~prompty.var name=\"a\" /~}{~prompty.var name=\"missing\" /~}{~prompty.var name=\"b\" /~}",
        &json!({"a": 1, "b": 2}),
    );
    assert!(!report.succeeded());
    assert!(report.output.is_none());
    assert_eq!(report.variables.len(), 2);
    assert_eq!(report.variables[1].resolution, Resolution::NotFound);
    let value = serde_json::to_value(&report).unwrap();
    assert!(value["error"]
        .as_str()
        .unwrap()
        .contains("variable \"missing\" not found"));
}
