// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Tag resolvers and the registry that dispatches to them.
//!
//! Structural tags (`prompty.var`, `prompty.if`, `prompty.for`, ...) are
//! interpreted by the engine itself and their names are reserved. Everything
//! else goes through a [`Resolver`] looked up by its full tag name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::Attributes;
use crate::context::{lookup_path, Context};
use crate::error::Error;
use crate::functions::{value_to_string, FunctionRegistry};
use crate::lexer::{COMMENT_TAG, RAW_TAG};

pub const VAR_TAG: &str = "prompty.var";
pub const IF_TAG: &str = "prompty.if";
pub const ELSEIF_TAG: &str = "prompty.elseif";
pub const ELSE_TAG: &str = "prompty.else";
pub const FOR_TAG: &str = "prompty.for";
pub const INCLUDE_TAG: &str = "prompty.include";
pub const EXTENDS_TAG: &str = "prompty.extends";
pub const BLOCK_TAG: &str = "prompty.block";
pub const PARENT_TAG: &str = "prompty.parent";
pub const MESSAGE_TAG: &str = "prompty.message";
pub const ENV_TAG: &str = "prompty.env";
pub const CONFIG_TAG: &str = "prompty.config";

/// Tags interpreted by the engine; resolvers may not claim these names.
pub const STRUCTURAL_TAGS: &[&str] = &[
    VAR_TAG,
    IF_TAG,
    ELSEIF_TAG,
    ELSE_TAG,
    FOR_TAG,
    INCLUDE_TAG,
    EXTENDS_TAG,
    BLOCK_TAG,
    PARENT_TAG,
    MESSAGE_TAG,
    RAW_TAG,
    COMMENT_TAG,
];

pub fn is_structural(name: &str) -> bool {
    STRUCTURAL_TAGS.contains(&name)
}

/// Whether a tag takes children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagShape {
    SelfClosing,
    Block,
}

impl fmt::Display for TagShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagShape::SelfClosing => f.write_str("self-closing"),
            TagShape::Block => f.write_str("block"),
        }
    }
}

/// Per-render state handed to resolvers next to the variable context.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    /// Name of the template being rendered (the included one, inside an include).
    pub template_name: &'a str,
    /// Front-matter configuration attached to the template, if any.
    pub config: Option<&'a Value>,
    pub functions: &'a FunctionRegistry,
}

/// Pluggable handler producing text for a tag.
///
/// Leaf resolvers return the final text. Block resolvers return a prefix that
/// the engine writes before the rendered children; they never see the
/// children's output.
pub trait Resolver: Send + Sync {
    fn tag_name(&self) -> &str;

    fn shape(&self) -> TagShape {
        TagShape::SelfClosing
    }

    /// Checks attributes at parse time; failures are reported as validation errors.
    fn validate(&self, _attrs: &Attributes) -> Result<(), Error> {
        Ok(())
    }

    fn resolve(
        &self,
        ctx: &Context<'_>,
        exec: &ExecContext<'_>,
        attrs: &Attributes,
    ) -> Result<String, Error>;
}

/// Frozen name-to-resolver table.
#[derive(Clone)]
pub struct ResolverRegistry {
    map: Arc<HashMap<String, Arc<dyn Resolver>>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("tags", &self.tag_names())
            .finish()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        ResolverRegistryBuilder::new().build()
    }
}

impl ResolverRegistry {
    /// Returns a builder pre-populated with the built-in resolvers.
    pub fn builder() -> ResolverRegistryBuilder {
        ResolverRegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Resolver> {
        self.map.get(name).map(|resolver| resolver.as_ref())
    }

    /// Reports whether `name` is structural or has a resolver.
    pub fn is_known(&self, name: &str) -> bool {
        is_structural(name) || self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sorted names of the dispatchable resolvers.
    pub fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct ResolverRegistryBuilder {
    map: HashMap<String, Arc<dyn Resolver>>,
}

impl Default for ResolverRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverRegistryBuilder {
    pub fn new() -> Self {
        let mut map: HashMap<String, Arc<dyn Resolver>> = HashMap::new();
        map.insert(ENV_TAG.to_string(), Arc::new(EnvResolver));
        map.insert(CONFIG_TAG.to_string(), Arc::new(ConfigResolver));
        Self { map }
    }

    /// Adds a resolver. Duplicate and reserved names are rejected.
    pub fn register<R>(&mut self, resolver: R) -> Result<&mut Self, Error>
    where
        R: Resolver + 'static,
    {
        self.register_arc(Arc::new(resolver))
    }

    pub fn register_arc(&mut self, resolver: Arc<dyn Resolver>) -> Result<&mut Self, Error> {
        let name = resolver.tag_name().to_string();
        if name.trim().is_empty() {
            return Err(Error::registration("resolver tag name must not be empty"));
        }
        if is_structural(&name) {
            return Err(Error::registration(format!(
                "tag \"{name}\" is reserved by the engine"
            )));
        }
        if self.map.contains_key(&name) {
            return Err(Error::registration(format!(
                "resolver for \"{name}\" is already registered"
            )));
        }
        self.map.insert(name, resolver);
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn build(self) -> ResolverRegistry {
        ResolverRegistry {
            map: Arc::new(self.map),
        }
    }
}

/// `{~prompty.env name="HOME" default="/tmp" /~}`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvResolver;

impl Resolver for EnvResolver {
    fn tag_name(&self) -> &str {
        ENV_TAG
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), Error> {
        require(attrs, ENV_TAG, "name")
    }

    fn resolve(
        &self,
        _ctx: &Context<'_>,
        _exec: &ExecContext<'_>,
        attrs: &Attributes,
    ) -> Result<String, Error> {
        let name = attrs.get("name").unwrap_or_default();
        match std::env::var(name) {
            Ok(value) => Ok(value),
            Err(_) => attrs.get("default").map(str::to_string).ok_or_else(|| {
                Error::render(format!("environment variable \"{name}\" is not set"), None)
            }),
        }
    }
}

/// `{~prompty.config key="model.name" default="gpt" /~}`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigResolver;

impl Resolver for ConfigResolver {
    fn tag_name(&self) -> &str {
        CONFIG_TAG
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), Error> {
        require(attrs, CONFIG_TAG, "key")
    }

    fn resolve(
        &self,
        _ctx: &Context<'_>,
        exec: &ExecContext<'_>,
        attrs: &Attributes,
    ) -> Result<String, Error> {
        let key = attrs.get("key").unwrap_or_default();
        let found = exec.config.and_then(|config| lookup_path(config, key));
        match (found, attrs.get("default")) {
            (Some(value), _) => Ok(value_to_string(value)),
            (None, Some(default)) => Ok(default.to_string()),
            (None, None) => Err(Error::render(
                format!("configuration key \"{key}\" not found"),
                None,
            )),
        }
    }
}

fn require(attrs: &Attributes, tag: &str, name: &str) -> Result<(), Error> {
    match attrs.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(()),
        _ => Err(Error::parse(
            format!("{tag} requires a \"{name}\" attribute"),
            None,
        )),
    }
}
