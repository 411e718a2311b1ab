// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Reports produced by dry-run and explain walks.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::context::{flatten_leaves, flatten_paths};
use crate::error::Error;

const MAX_SUGGESTIONS: usize = 3;
const MAX_EDIT_DISTANCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableUsage {
    pub name: String,
    pub line: usize,
    pub column: usize,
    /// Whether the path resolves against the supplied data. Loop bindings do
    /// not exist before iteration, so loop variables are always `false`.
    pub in_data: bool,
    pub default: Option<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverUsage {
    pub name: String,
    pub line: usize,
    pub column: usize,
    pub known: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludeUsage {
    pub template: String,
    pub line: usize,
    pub column: usize,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopUsage {
    pub item: String,
    pub index: Option<String>,
    pub source: String,
    pub line: usize,
    pub column: usize,
    pub in_data: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionalUsage {
    pub eval: String,
    pub line: usize,
    pub column: usize,
    /// Functions the condition calls, in source order.
    pub functions: Vec<String>,
}

/// Inventory collected by a dry run, plus a placeholder rendering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub valid: bool,
    pub variables: Vec<VariableUsage>,
    pub resolvers: Vec<ResolverUsage>,
    pub includes: Vec<IncludeUsage>,
    pub loops: Vec<LoopUsage>,
    pub conditionals: Vec<ConditionalUsage>,
    pub missing_variables: Vec<String>,
    pub unused_data: Vec<String>,
    pub warnings: Vec<String>,
    pub output: String,
}

/// Raw events recorded while walking in dry-run mode.
#[derive(Debug, Default)]
pub(crate) struct DryRunState {
    pub variables: Vec<VariableUsage>,
    pub resolvers: Vec<ResolverUsage>,
    pub includes: Vec<IncludeUsage>,
    pub loops: Vec<LoopUsage>,
    pub conditionals: Vec<ConditionalUsage>,
    pub warnings: Vec<String>,
    /// Every data path the template reads: variables, loop sources, condition operands.
    pub referenced: Vec<String>,
}

impl DryRunState {
    pub(crate) fn into_report(self, data: &Value, output: String) -> DryRunReport {
        let DryRunState {
            mut variables,
            resolvers,
            includes,
            loops,
            conditionals,
            mut warnings,
            referenced,
        } = self;

        let candidates = flatten_paths(data);
        let mut missing_variables: Vec<String> = Vec::new();
        for var in variables.iter_mut().filter(|var| !var.in_data) {
            var.suggestions = suggest(&var.name, &candidates);
            if var.default.is_none() && !missing_variables.contains(&var.name) {
                missing_variables.push(var.name.clone());
            }
        }

        for include in includes.iter().filter(|include| !include.exists) {
            warnings.push(format!(
                "included template \"{}\" not found (line {}, column {})",
                include.template, include.line, include.column
            ));
        }
        for resolver in resolvers.iter().filter(|resolver| !resolver.known) {
            warnings.push(format!(
                "no resolver registered for {} (line {}, column {})",
                resolver.name, resolver.line, resolver.column
            ));
        }
        for usage in loops.iter().filter(|usage| !usage.in_data) {
            warnings.push(format!(
                "loop source \"{}\" not found in data (line {}, column {})",
                usage.source, usage.line, usage.column
            ));
        }

        let unused_data = flatten_leaves(data)
            .into_iter()
            .filter(|leaf| !referenced.iter().any(|path| paths_overlap(path, leaf)))
            .collect();

        let valid = missing_variables.is_empty()
            && includes.iter().all(|include| include.exists)
            && resolvers.iter().all(|resolver| resolver.known);

        DryRunReport {
            valid,
            variables,
            resolvers,
            includes,
            loops,
            conditionals,
            missing_variables,
            unused_data,
            warnings,
            output,
        }
    }
}

/// A reference uses a data leaf when either path is the other or a dotted prefix of it.
fn paths_overlap(reference: &str, leaf: &str) -> bool {
    fn is_prefix(prefix: &str, path: &str) -> bool {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }
    is_prefix(reference, leaf) || is_prefix(leaf, reference)
}

/// Proposes up to three data paths close to `missing`: case-insensitive
/// substring matches in either direction, or an edit distance of at most two.
pub(crate) fn suggest(missing: &str, candidates: &[String]) -> Vec<String> {
    let needle = missing.to_lowercase();
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .filter(|candidate| candidate.as_str() != missing)
        .filter_map(|candidate| {
            let hay = candidate.to_lowercase();
            let distance = strsim::levenshtein(&needle, &hay);
            let substring = hay.contains(&needle) || needle.contains(&hay);
            (substring || distance <= MAX_EDIT_DISTANCE).then_some((distance, candidate))
        })
        .collect();
    scored.sort();
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, candidate)| candidate.clone())
        .collect()
}

/// How a variable reference resolved during an explain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Resolution {
    Value(String),
    Default(String),
    NotFound,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.write_str(value),
            Resolution::Default(default) => write!(f, "{default} (default)"),
            Resolution::NotFound => f.write_str("NOT_FOUND"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarTrace {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub found: bool,
    pub resolution: Resolution,
}

/// Instrumented execution: AST dump, variable trace and timings. A failed
/// render still returns whatever was traced before the failure.
#[derive(Debug, Serialize)]
pub struct ExplainReport {
    pub ast_dump: String,
    pub variables: Vec<VarTrace>,
    pub parse_time: Duration,
    pub execute_time: Duration,
    pub output: Option<String>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<Error>,
}

impl ExplainReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_error<S: Serializer>(error: &Option<Error>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usage(name: &str, in_data: bool, default: Option<&str>) -> VariableUsage {
        VariableUsage {
            name: name.to_string(),
            line: 1,
            column: 1,
            in_data,
            default: default.map(str::to_string),
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn suggestions_by_substring_and_distance() {
        let candidates = vec![
            "user".to_string(),
            "user.name".to_string(),
            "username".to_string(),
            "items".to_string(),
        ];
        assert_eq!(suggest("user.nmae", &candidates), vec!["user.name", "user"]);
        assert_eq!(suggest("Items", &candidates), vec!["items"]);
        assert!(suggest("zzz", &candidates).is_empty());
    }

    #[test]
    fn overlap_respects_segment_boundaries() {
        assert!(paths_overlap("user", "user.name"));
        assert!(paths_overlap("user.name.first", "user.name"));
        assert!(paths_overlap("a", "a"));
        assert!(!paths_overlap("user", "username"));
    }

    #[test]
    fn report_collects_missing_and_unused() {
        let data = json!({"user": {"name": "Ada", "age": 3}, "extra": true});
        let state = DryRunState {
            variables: vec![
                usage("user.name", true, None),
                usage("user.nam", false, None),
                usage("title", false, Some("Untitled")),
                usage("user.nam", false, None),
            ],
            referenced: vec!["user.name".into(), "user.nam".into(), "title".into()],
            ..DryRunState::default()
        };
        let report = state.into_report(&data, String::new());
        assert!(!report.valid);
        assert_eq!(report.missing_variables, vec!["user.nam"]);
        assert_eq!(report.variables[1].suggestions[0], "user.name");
        let mut unused = report.unused_data.clone();
        unused.sort();
        assert_eq!(unused, vec!["extra", "user.age"]);
    }

    #[test]
    fn resolution_display() {
        assert_eq!(Resolution::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(Resolution::Default("x".into()).to_string(), "x (default)");
    }
}
