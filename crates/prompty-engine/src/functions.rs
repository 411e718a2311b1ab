// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

use crate::error::Error;

/// Signature implemented by host functions callable from `eval` expressions.
pub type FuncImpl = dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync;

/// A host function together with its accepted argument count.
#[derive(Clone)]
pub struct Func {
    pub name: String,
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
    call: Arc<FuncImpl>,
}

impl Func {
    pub fn new<F>(name: impl Into<String>, min_args: usize, max_args: Option<usize>, call: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            min_args,
            max_args,
            call: Arc::new(call),
        }
    }

    /// Checks the argument count, then invokes the function.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, Error> {
        if args.len() < self.min_args || self.max_args.is_some_and(|max| args.len() > max) {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => format!("{max}"),
                Some(max) => format!("{}..={max}", self.min_args),
                None => format!("at least {}", self.min_args),
            };
            return Err(Error::eval(
                format!(
                    "function {} expects {expected} arguments, got {}",
                    self.name,
                    args.len()
                ),
                None,
            ));
        }
        (self.call)(args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

/// Registry that maps function names to host functions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    map: Arc<HashMap<String, Func>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.function_names())
            .finish()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new builder for constructing registries.
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::new()
    }

    /// Fetches a function by name.
    pub fn get(&self, name: &str) -> Option<&Func> {
        self.map.get(name)
    }

    /// Invokes a function by name; unknown names are evaluation errors.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        let func = self
            .get(name)
            .ok_or_else(|| Error::eval(format!("unknown function \"{name}\""), None))?;
        func.invoke(args)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns a sorted list of the registered function names.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Helper for constructing registries before freezing them into an immutable map.
#[derive(Default)]
pub struct FunctionRegistryBuilder {
    map: HashMap<String, Func>,
}

impl FunctionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function; a name that is already taken is rejected.
    pub fn register(&mut self, func: Func) -> Result<&mut Self, Error> {
        if self.map.contains_key(&func.name) {
            return Err(Error::registration(format!(
                "function \"{}\" is already registered",
                func.name
            )));
        }
        self.map.insert(func.name.clone(), func);
        Ok(self)
    }

    /// Shorthand for `register(Func::new(..))`.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        min_args: usize,
        max_args: Option<usize>,
        call: F,
    ) -> Result<&mut Self, Error>
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.register(Func::new(name, min_args, max_args, call))
    }

    /// Adds a function, replacing any previous one with the same name.
    pub fn insert(&mut self, func: Func) -> &mut Self {
        self.map.insert(func.name.clone(), func);
        self
    }

    /// Copies every function from another registry, replacing same-named entries.
    pub fn extend(&mut self, other: &FunctionRegistry) -> &mut Self {
        for (key, value) in other.map.iter() {
            self.map.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Finalises the builder into an immutable registry.
    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            map: Arc::new(self.map),
        }
    }
}

/// Renders a value the way it appears in template output: strings verbatim,
/// null as nothing, numbers in their shortest form (`4.0` prints as `4`),
/// collections as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Parses text into a JSON number; integral text stays an exact integer.
pub fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    text.parse::<i64>()
        .map(Number::from)
        .or_else(|_| text.parse::<u64>().map(Number::from))
        .ok()
        .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64))
}

pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !*b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    !is_empty(value)
}

/// Converts numbers and numeric strings to `f64`.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn coerce_number(value: &Value) -> Result<f64, Error> {
    as_number(value).ok_or_else(|| {
        Error::eval(
            format!("expected numeric value, got {}", value_to_string(value)),
            None,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_echo() -> FunctionRegistry {
        let mut builder = FunctionRegistry::builder();
        builder
            .register_fn("echo", 1, Some(1), |args| Ok(args[0].clone()))
            .unwrap();
        builder.build()
    }

    #[test]
    fn call_checks_arity() {
        let registry = registry_with_echo();
        assert_eq!(registry.call("echo", &[json!(7)]).unwrap(), json!(7));
        let err = registry.call("echo", &[]).unwrap_err();
        assert!(err.to_string().contains("expects 1 arguments, got 0"));
        let err = registry.call("echo", &[json!(1), json!(2)]).unwrap_err();
        assert!(err.to_string().contains("got 2"));
    }

    #[test]
    fn unbounded_max_accepts_many() {
        let mut builder = FunctionRegistry::builder();
        builder
            .register_fn("count", 0, None, |args| Ok(json!(args.len())))
            .unwrap();
        let registry = builder.build();
        let args = vec![Value::Null; 9];
        assert_eq!(registry.call("count", &args).unwrap(), json!(9));
    }

    #[test]
    fn unknown_function_is_error() {
        let err = FunctionRegistry::empty().call("nope", &[]).unwrap_err();
        assert!(err.to_string().contains("unknown function"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut builder = FunctionRegistry::builder();
        builder.register_fn("f", 0, Some(0), |_| Ok(Value::Null)).unwrap();
        let err = builder
            .register_fn("f", 0, Some(0), |_| Ok(Value::Null))
            .err()
            .expect("duplicate should fail");
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[test]
    fn stringifies_values() {
        assert_eq!(value_to_string(&json!(null)), "");
        assert_eq!(value_to_string(&json!(2.50)), "2.5");
        assert_eq!(value_to_string(&json!(4.0)), "4");
        assert_eq!(value_to_string(&json!(-0.125)), "-0.125");
        assert_eq!(value_to_string(&json!(u64::MAX)), "18446744073709551615");
        assert_eq!(value_to_string(&json!(["a"])), "[\"a\"]");
        assert_eq!(value_to_string(&json!("x")), "x");
    }

    #[test]
    fn parses_numbers_keeping_integers_exact() {
        assert_eq!(parse_number("42"), Some(Number::from(42)));
        assert_eq!(parse_number(" -7 "), Some(Number::from(-7)));
        assert_eq!(parse_number("18446744073709551615"), Some(Number::from(u64::MAX)));
        assert_eq!(parse_number("2.5").and_then(|n| n.as_f64()), Some(2.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("old"), None);
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([0])));
        assert!(is_truthy(&json!({"a": 1})));
    }
}
