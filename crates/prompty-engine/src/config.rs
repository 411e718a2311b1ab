// SPDX-License-Identifier: Apache-2.0 OR MIT
use serde::{Deserialize, Serialize};

use crate::ast::ErrorStrategy;
use crate::error::Error;

pub const DEFAULT_OPEN_DELIMITER: &str = "{~";
pub const DEFAULT_CLOSE_DELIMITER: &str = "~}";
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Tag delimiter pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Result<Self, Error> {
        let delimiters = Self {
            open: open.into(),
            close: close.into(),
        };
        delimiters.check()?;
        Ok(delimiters)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.open.is_empty() || self.close.is_empty() {
            return Err(Error::registration("delimiters must not be empty"));
        }
        if self.open == self.close {
            return Err(Error::registration(
                "open and close delimiters must differ",
            ));
        }
        if self.open.contains('/') || self.close.contains('/') {
            return Err(Error::registration("delimiters must not contain '/'"));
        }
        Ok(())
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: DEFAULT_OPEN_DELIMITER.to_string(),
            close: DEFAULT_CLOSE_DELIMITER.to_string(),
        }
    }
}

/// Engine-wide settings. Deserialisable so front-matter blocks can carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Strategy used by nodes without an explicit `onerror`; `None` means throw.
    pub error_strategy: Option<ErrorStrategy>,
    pub delimiters: Delimiters,
    /// Maximum include/inheritance nesting.
    pub max_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            error_strategy: None,
            delimiters: Delimiters::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineOptions {
    /// Resolves the strategy for a node: explicit attribute, then engine default, then throw.
    pub fn strategy_for(&self, node: Option<ErrorStrategy>) -> ErrorStrategy {
        node.or(self.error_strategy).unwrap_or_default()
    }
}
