// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Boolean expressions used by `prompty.if` and `prompty.elseif`.

use std::cmp::Ordering;

use serde_json::Value;
use smallvec::SmallVec;

use crate::context::Context;
use crate::error::Error;
use crate::functions::{as_number, is_truthy, value_to_string, FunctionRegistry};

pub mod lexer;
mod parser;

pub use lexer::Operator;
pub use parser::parse_expression;

/// Parsed `eval` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted variable path resolved through the active context.
    Path(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: Operator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Result of evaluating an expression. `Absent` stands for a path that did not
/// resolve; it is falsy and equal only to another `Absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Absent,
    Value(Value),
}

impl Operand {
    pub fn is_truthy(&self) -> bool {
        match self {
            Operand::Absent => false,
            Operand::Value(value) => is_truthy(value),
        }
    }

    /// Converts to a plain value; `Absent` becomes `null`.
    pub fn into_value(self) -> Value {
        match self {
            Operand::Absent => Value::Null,
            Operand::Value(value) => value,
        }
    }
}

impl Expr {
    pub fn evaluate(&self, ctx: &Context<'_>, functions: &FunctionRegistry) -> Result<Operand, Error> {
        match self {
            Expr::Literal(value) => Ok(Operand::Value(value.clone())),
            Expr::Path(path) => Ok(ctx
                .lookup(path)
                .map_or(Operand::Absent, |value| Operand::Value(value.clone()))),
            Expr::Call { name, args } => {
                let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(ctx, functions)?.into_value());
                }
                functions.call(name, &values).map(Operand::Value)
            }
            Expr::Not(inner) => {
                let truthy = inner.evaluate_bool(ctx, functions)?;
                Ok(Operand::Value(Value::Bool(!truthy)))
            }
            Expr::And(lhs, rhs) => {
                let result =
                    lhs.evaluate_bool(ctx, functions)? && rhs.evaluate_bool(ctx, functions)?;
                Ok(Operand::Value(Value::Bool(result)))
            }
            Expr::Or(lhs, rhs) => {
                let result =
                    lhs.evaluate_bool(ctx, functions)? || rhs.evaluate_bool(ctx, functions)?;
                Ok(Operand::Value(Value::Bool(result)))
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.evaluate(ctx, functions)?;
                let rhs = rhs.evaluate(ctx, functions)?;
                compare(*op, &lhs, &rhs).map(|result| Operand::Value(Value::Bool(result)))
            }
        }
    }

    pub fn evaluate_bool(&self, ctx: &Context<'_>, functions: &FunctionRegistry) -> Result<bool, Error> {
        self.evaluate(ctx, functions).map(|operand| operand.is_truthy())
    }

    /// Every variable path referenced by the expression, in source order.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut out, &mut Vec::new());
        out
    }

    /// Every function name called by the expression, in source order.
    pub fn function_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut Vec::new(), &mut out);
        out
    }

    fn collect<'e>(&'e self, paths: &mut Vec<&'e str>, calls: &mut Vec<&'e str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(path) => paths.push(path),
            Expr::Call { name, args } => {
                calls.push(name);
                for arg in args {
                    arg.collect(paths, calls);
                }
            }
            Expr::Not(inner) => inner.collect(paths, calls),
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) | Expr::Compare { lhs, rhs, .. } => {
                lhs.collect(paths, calls);
                rhs.collect(paths, calls);
            }
        }
    }
}

fn compare(op: Operator, lhs: &Operand, rhs: &Operand) -> Result<bool, Error> {
    let (lhs, rhs) = match (lhs, rhs) {
        (Operand::Absent, Operand::Absent) => return Ok(op == Operator::Equal),
        (Operand::Absent, _) | (_, Operand::Absent) => return Ok(op == Operator::NotEqual),
        (Operand::Value(lhs), Operand::Value(rhs)) => (lhs, rhs),
    };

    let result = match op {
        Operator::Equal => values_equal(lhs, rhs),
        Operator::NotEqual => !values_equal(lhs, rhs),
        Operator::Less => order(lhs, rhs)? == Ordering::Less,
        Operator::LessOrEqual => order(lhs, rhs)? != Ordering::Greater,
        Operator::Greater => order(lhs, rhs)? == Ordering::Greater,
        Operator::GreaterOrEqual => order(lhs, rhs)? != Ordering::Less,
    };
    Ok(result)
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_number() || rhs.is_number() {
        return match (as_number(lhs), as_number(rhs)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
    }
    lhs == rhs
}

fn order(lhs: &Value, rhs: &Value) -> Result<Ordering, Error> {
    if lhs.is_number() || rhs.is_number() {
        let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) else {
            return Err(Error::eval(
                format!(
                    "cannot compare {} with {} numerically",
                    describe(lhs),
                    describe(rhs)
                ),
                None,
            ));
        };
        return a
            .partial_cmp(&b)
            .ok_or_else(|| Error::eval("comparison with NaN", None));
    }
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(Error::eval(
            format!("cannot order {} and {}", describe(lhs), describe(rhs)),
            None,
        )),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(_) => format!("number {}", value_to_string(value)),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
