// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::collections::HashMap;

use serde_json::Value;
use smallvec::SmallVec;

type Scope = HashMap<String, Value>;

/// Variable scopes visible to a render: the supplied data at the bottom, loop
/// bindings stacked above it. Lookups never fail, they return `None`.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    root: &'a Value,
    scopes: SmallVec<[Scope; 4]>,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            scopes: SmallVec::new(),
        }
    }

    /// The data map supplied by the caller, without loop bindings.
    pub fn root(&self) -> &'a Value {
        self.root
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Binds a name in the innermost scope; a no-op when no scope is pushed.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Resolves a dotted path, innermost scope first, then the root data.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        if head.is_empty() {
            return None;
        }
        let start = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(head))
            .or_else(|| project(self.root, head))?;
        segments.try_fold(start, project)
    }
}

/// Resolves a dotted path against a bare value, ignoring any scopes.
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(value, project)
}

fn project<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}

/// Flattens every object key into dotted paths, intermediate objects included.
pub fn flatten_paths(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk_paths(value, None, &mut out, false);
    out
}

/// Flattens to leaf paths only: scalars, arrays and empty objects.
pub fn flatten_leaves(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk_paths(value, None, &mut out, true);
    out
}

fn walk_paths(value: &Value, prefix: Option<&str>, out: &mut Vec<String>, leaves_only: bool) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, child) in map {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        let is_branch = matches!(child, Value::Object(inner) if !inner.is_empty());
        if !leaves_only || !is_branch {
            out.push(path.clone());
        }
        if is_branch {
            walk_paths(child, Some(path.as_str()), out, leaves_only);
        }
    }
}
