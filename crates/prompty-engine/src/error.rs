// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::ast::Position;
use crate::validate::ValidationIssue;
use thiserror::Error;

/// Unified error type for the prompty engine.
///
/// Errors carry the message, optional source error and, when available, the
/// `Position` of the offending tag. Lexical and structural problems surface as
/// `Parse`/`Validation`; everything raised while walking a tree is `Eval`,
/// `Render` or `Inheritance` and is subject to the owning node's error strategy
/// (inheritance failures excepted, those always escape).
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {message}{}", at(position))]
    Parse {
        message: String,
        position: Option<Position>,
    },
    #[error("template is invalid: {}", summarize(issues))]
    Validation { issues: Vec<ValidationIssue> },
    #[error("evaluation error: {message}{}", at(position))]
    Eval {
        message: String,
        position: Option<Position>,
    },
    #[error("render error: {message}{}", at(position))]
    Render {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        position: Option<Position>,
    },
    #[error("inheritance error: {message}")]
    Inheritance { message: String },
    #[error("registration error: {message}")]
    Registration { message: String },
}

impl Error {
    pub fn parse(message: impl Into<String>, position: Option<Position>) -> Self {
        Error::Parse {
            message: message.into(),
            position,
        }
    }

    pub fn parse_at(message: impl Into<String>, position: Position) -> Self {
        Self::parse(message, Some(position))
    }

    pub fn eval(message: impl Into<String>, position: Option<Position>) -> Self {
        Error::Eval {
            message: message.into(),
            position,
        }
    }

    pub fn render(message: impl Into<String>, position: Option<Position>) -> Self {
        Error::Render {
            message: message.into(),
            source: None,
            position,
        }
    }

    pub fn render_at(message: impl Into<String>, position: Position) -> Self {
        Self::render(message, Some(position))
    }

    /// Wraps a foreign error raised by a resolver or host function.
    pub fn render_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
        position: Option<Position>,
    ) -> Self {
        Error::Render {
            message: message.into(),
            source: Some(Box::new(source)),
            position,
        }
    }

    pub fn inheritance(message: impl Into<String>) -> Self {
        Error::Inheritance {
            message: message.into(),
        }
    }

    pub fn registration(message: impl Into<String>) -> Self {
        Error::Registration {
            message: message.into(),
        }
    }

    /// Position attached to the error, if any.
    pub fn position(&self) -> Option<Position> {
        match self {
            Error::Parse { position, .. }
            | Error::Eval { position, .. }
            | Error::Render { position, .. } => *position,
            Error::Validation { issues } => issues
                .first()
                .map(|issue| Position::new(issue.line, issue.column, 0)),
            Error::Inheritance { .. } | Error::Registration { .. } => None,
        }
    }

    /// Attaches a position to errors that were raised without one.
    pub(crate) fn or_at(self, fallback: Position) -> Self {
        match self {
            Error::Eval {
                message,
                position: None,
            } => Error::Eval {
                message,
                position: Some(fallback),
            },
            Error::Render {
                message,
                source,
                position: None,
            } => Error::Render {
                message,
                source,
                position: Some(fallback),
            },
            other => other,
        }
    }

    /// The bare message, without category prefix or position.
    pub fn message(&self) -> String {
        match self {
            Error::Parse { message, .. }
            | Error::Eval { message, .. }
            | Error::Render { message, .. }
            | Error::Inheritance { message }
            | Error::Registration { message } => message.clone(),
            Error::Validation { issues } => summarize(issues),
        }
    }

    /// Reports whether the error must escape regardless of the node's error strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. } | Error::Validation { .. } | Error::Inheritance { .. }
        )
    }
}

fn at(position: &Option<Position>) -> String {
    match position {
        Some(pos) => format!(" at line {}, column {}", pos.line, pos.column),
        None => String::new(),
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    let mut errors = issues.iter().filter(|issue| issue.is_error());
    match (errors.next(), errors.count()) {
        (Some(first), 0) => first.to_string(),
        (Some(first), more) => format!("{first} (and {more} more)"),
        (None, _) => "no errors reported".to_string(),
    }
}
