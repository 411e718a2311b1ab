#![forbid(unsafe_code)]
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Standard expression functions for prompty `eval` attributes, plus an engine
//! pre-wired with them.
//!
//! ```text
//! {~prompty.if eval="len(items) > 0 && hasPrefix(lower(role), \"admin\")"~}...{~/prompty.if~}
//! ```
pub use prompty_engine::{
    as_number, coerce_number, is_empty, is_truthy, lookup_path, parse_expression,
    value_to_string, Ast, Attributes, Context, Delimiters, DryRunReport, Engine, EngineBuilder,
    EngineOptions, Error, ErrorStrategy, ExecContext, ExplainReport, Func, FunctionRegistry,
    FunctionRegistryBuilder, MemoryProvider, Message, Resolver, ResolverRegistry, Severity,
    TagShape, Template, TemplateProvider, ValidationIssue, ValidationReport,
};

use heck::ToTitleCase;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

static STANDARD: Lazy<FunctionRegistry> = Lazy::new(|| {
    let mut builder = FunctionRegistryBuilder::new();
    install_standard_functions(&mut builder);
    builder.build()
});

/// Registry holding the standard function set.
pub fn standard_functions() -> FunctionRegistry {
    STANDARD.clone()
}

/// Installs the standard functions into an existing builder, replacing any
/// same-named entries.
pub fn install_standard_functions(builder: &mut FunctionRegistryBuilder) {
    builder
        .insert(Func::new("len", 1, Some(1), builtin_len))
        .insert(Func::new("upper", 1, Some(1), |args| {
            Ok(Value::String(text(&args[0]).to_uppercase()))
        }))
        .insert(Func::new("lower", 1, Some(1), |args| {
            Ok(Value::String(text(&args[0]).to_lowercase()))
        }))
        .insert(Func::new("title", 1, Some(1), |args| {
            Ok(Value::String(text(&args[0]).to_title_case()))
        }))
        .insert(Func::new("trim", 1, Some(1), |args| {
            Ok(Value::String(text(&args[0]).trim().to_string()))
        }))
        .insert(Func::new("contains", 2, Some(2), builtin_contains))
        .insert(Func::new("hasPrefix", 2, Some(2), |args| {
            Ok(Value::Bool(text(&args[0]).starts_with(&text(&args[1]))))
        }))
        .insert(Func::new("hasSuffix", 2, Some(2), |args| {
            Ok(Value::Bool(text(&args[0]).ends_with(&text(&args[1]))))
        }))
        .insert(Func::new("join", 1, Some(2), builtin_join))
        .insert(Func::new("split", 2, Some(2), builtin_split))
        .insert(Func::new("default", 2, Some(2), |args| {
            Ok(if is_empty(&args[0]) {
                args[1].clone()
            } else {
                args[0].clone()
            })
        }))
        .insert(Func::new("not", 1, Some(1), |args| {
            Ok(Value::Bool(!is_truthy(&args[0])))
        }))
        .insert(Func::new("empty", 1, Some(1), |args| {
            Ok(Value::Bool(is_empty(&args[0])))
        }))
        .insert(Func::new("keys", 1, Some(1), builtin_keys))
        .insert(Func::new("first", 1, Some(1), |args| edge(&args[0], Edge::First)))
        .insert(Func::new("last", 1, Some(1), |args| edge(&args[0], Edge::Last)))
        .insert(Func::new("toString", 1, Some(1), |args| {
            Ok(Value::String(text(&args[0])))
        }))
        .insert(Func::new("toNumber", 1, Some(1), builtin_to_number));
}

/// Builder for an engine that already knows the standard functions.
pub fn standard_builder() -> EngineBuilder {
    let mut builder = Engine::builder();
    builder.functions(&STANDARD);
    builder
}

/// Engine with default options, built-in resolvers and the standard functions.
pub fn standard_engine() -> Engine {
    Engine::with_functions(standard_functions())
}

fn text(value: &Value) -> String {
    value_to_string(value)
}

fn builtin_len(args: &[Value]) -> Result<Value, Error> {
    let len = match &args[0] {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return Err(Error::eval(
                format!("len of {} is undefined", type_name(other)),
                None,
            ))
        }
    };
    Ok(Value::from(len))
}

fn builtin_contains(args: &[Value]) -> Result<Value, Error> {
    let found = match &args[0] {
        Value::Array(items) => items.iter().any(|item| item == &args[1]),
        Value::Object(map) => map.contains_key(&text(&args[1])),
        Value::Null => false,
        other => text(other).contains(&text(&args[1])),
    };
    Ok(Value::Bool(found))
}

fn builtin_join(args: &[Value]) -> Result<Value, Error> {
    let separator = args.get(1).map(text).unwrap_or_default();
    let joined = match &args[0] {
        Value::Array(items) => items.iter().map(text).collect::<Vec<_>>().join(&separator),
        Value::Null => String::new(),
        other => {
            return Err(Error::eval(
                format!("join expects a list, got {}", type_name(other)),
                None,
            ))
        }
    };
    Ok(Value::String(joined))
}

fn builtin_split(args: &[Value]) -> Result<Value, Error> {
    let source = text(&args[0]);
    let separator = text(&args[1]);
    if source.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let parts = if separator.is_empty() {
        source.chars().map(|ch| Value::String(ch.to_string())).collect()
    } else {
        source
            .split(separator.as_str())
            .map(|part| Value::String(part.to_string()))
            .collect()
    };
    Ok(Value::Array(parts))
}

fn builtin_keys(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Object(map) => Ok(Value::Array(sorted_keys(map))),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(Error::eval(
            format!("keys expects a map, got {}", type_name(other)),
            None,
        )),
    }
}

fn sorted_keys(map: &Map<String, Value>) -> Vec<Value> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter().map(|key| Value::String(key.clone())).collect()
}

enum Edge {
    First,
    Last,
}

fn edge(value: &Value, which: Edge) -> Result<Value, Error> {
    match value {
        Value::Array(items) => {
            let item = match which {
                Edge::First => items.first(),
                Edge::Last => items.last(),
            };
            Ok(item.cloned().unwrap_or(Value::Null))
        }
        Value::String(s) => {
            let ch = match which {
                Edge::First => s.chars().next(),
                Edge::Last => s.chars().next_back(),
            };
            Ok(ch.map_or(Value::Null, |ch| Value::String(ch.to_string())))
        }
        Value::Null => Ok(Value::Null),
        other => Err(Error::eval(
            format!("first/last expect a list or string, got {}", type_name(other)),
            None,
        )),
    }
}

fn builtin_to_number(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::Number(_) => Ok(args[0].clone()),
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        Value::String(s) => prompty_engine::functions::parse_number(s.trim())
            .map(Value::Number)
            .ok_or_else(|| Error::eval(format!("\"{s}\" is not a number"), None)),
        other => Err(Error::eval(
            format!("cannot convert {} to a number", type_name(other)),
            None,
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, Error> {
        standard_functions().call(name, args)
    }

    #[test]
    fn registers_every_standard_function() {
        let names = standard_functions().function_names();
        for expected in [
            "len", "upper", "lower", "title", "trim", "contains", "hasPrefix", "hasSuffix", "join",
            "split", "default", "not", "empty", "keys", "first", "last", "toString", "toNumber",
        ] {
            assert!(names.iter().any(|name| name == expected), "{expected}");
        }
    }

    #[test]
    fn len_counts_chars_items_and_keys() {
        assert_eq!(call("len", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("len", &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(call("len", &[json!({"a": 1})]).unwrap(), json!(1));
        assert_eq!(call("len", &[Value::Null]).unwrap(), json!(0));
        assert!(call("len", &[json!(true)]).is_err());
    }

    #[test]
    fn string_helpers() {
        assert_eq!(call("upper", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("lower", &[json!("ABC")]).unwrap(), json!("abc"));
        assert_eq!(call("title", &[json!("hello world")]).unwrap(), json!("Hello World"));
        assert_eq!(call("trim", &[json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(
            call("hasPrefix", &[json!("prompty"), json!("pro")]).unwrap(),
            json!(true)
        );
        assert_eq!(
            call("hasSuffix", &[json!("prompty"), json!("pro")]).unwrap(),
            json!(false)
        );
        assert_eq!(call("toString", &[json!(4.0)]).unwrap(), json!("4"));
    }

    #[test]
    fn contains_handles_strings_lists_and_maps() {
        assert_eq!(call("contains", &[json!("team"), json!("ea")]).unwrap(), json!(true));
        assert_eq!(call("contains", &[json!([1, 2]), json!(2)]).unwrap(), json!(true));
        assert_eq!(call("contains", &[json!({"k": 1}), json!("k")]).unwrap(), json!(true));
        assert_eq!(call("contains", &[Value::Null, json!("k")]).unwrap(), json!(false));
    }

    #[test]
    fn join_and_split() {
        assert_eq!(
            call("join", &[json!(["a", 1, true]), json!(", ")]).unwrap(),
            json!("a, 1, true")
        );
        assert_eq!(call("join", &[json!(["a", "b"])]).unwrap(), json!("ab"));
        assert!(call("join", &[json!("ab"), json!(",")]).is_err());
        assert_eq!(call("split", &[json!("a,b"), json!(",")]).unwrap(), json!(["a", "b"]));
        assert_eq!(call("split", &[json!(""), json!(",")]).unwrap(), json!([]));
    }

    #[test]
    fn collection_helpers() {
        assert_eq!(call("keys", &[json!({"b": 1, "a": 2})]).unwrap(), json!(["a", "b"]));
        assert_eq!(call("first", &[json!([1, 2])]).unwrap(), json!(1));
        assert_eq!(call("last", &[json!("xyz")]).unwrap(), json!("z"));
        assert_eq!(call("first", &[json!([])]).unwrap(), Value::Null);
        assert!(call("keys", &[json!(3)]).is_err());
    }

    #[test]
    fn default_not_and_empty() {
        assert_eq!(call("default", &[json!(""), json!("x")]).unwrap(), json!("x"));
        assert_eq!(call("default", &[json!("y"), json!("x")]).unwrap(), json!("y"));
        assert_eq!(call("not", &[json!(0)]).unwrap(), json!(true));
        assert_eq!(call("empty", &[json!([])]).unwrap(), json!(true));
    }

    #[test]
    fn to_number_parses_strings() {
        assert_eq!(call("toNumber", &[json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(call("toNumber", &[json!("2.5")]).unwrap(), json!(2.5));
        assert_eq!(call("toNumber", &[json!(true)]).unwrap(), json!(1));
        assert!(call("toNumber", &[json!("many")]).is_err());
    }

    #[test]
    fn standard_engine_carries_the_full_function_set() {
        let engine = standard_engine();
        assert_eq!(engine.functions().len(), standard_functions().len());
        assert_eq!(engine.functions().len(), 18);
        assert!(engine.resolvers().lookup("prompty.env").is_some());
        assert_eq!(engine.options(), &EngineOptions::default());
    }

    #[test]
    fn standard_engine_evaluates_function_calls() {
        let engine = standard_engine();
        let source = "{~prompty.if eval='len(items) > 1 && hasPrefix(lower(role), \"adm\")'~}yes{~prompty.else~}no{~/prompty.if~}";
        assert_eq!(
            engine
                .render(source, &json!({"items": [1, 2], "role": "ADMIN"}))
                .unwrap(),
            "yes"
        );
        assert_eq!(
            engine
                .render(source, &json!({"items": [1], "role": "ADMIN"}))
                .unwrap(),
            "no"
        );
    }

    #[test]
    fn standard_builder_accepts_more_registrations() {
        let mut builder = standard_builder();
        builder
            .function(Func::new("shout", 1, Some(1), |args| {
                Ok(Value::String(format!("{}!", text(&args[0]).to_uppercase())))
            }))
            .unwrap();
        let engine = builder.build().unwrap();
        let source = "{~prompty.if eval='shout(trim(word)) == \"HI!\"'~}ok{~/prompty.if~}";
        assert_eq!(engine.render(source, &json!({"word": " hi "})).unwrap(), "ok");
    }

    #[test]
    fn arity_is_checked_before_invocation() {
        let engine = standard_engine();
        let err = engine
            .render("{~prompty.if eval=\"upper()\"~}x{~/prompty.if~}", &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("function upper expects 1 arguments, got 0"));
    }
}
