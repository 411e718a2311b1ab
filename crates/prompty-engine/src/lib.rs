#![forbid(unsafe_code)]
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Parser, evaluator and static analyser for prompty, a tag-based templating
//! language for building LLM prompts.
//!
//! ```text
//! Hello {~prompty.var name="user" default="Guest" /~}!
//! {~prompty.for item="x" in="items" limit="2"~}{~prompty.var name="x" /~},{~/prompty.for~}
//! ```
//!
//! Templates are parsed once into an immutable [`Ast`]. An [`Engine`] merges
//! inheritance chains and then walks the tree in one of three modes:
//! [`Engine::execute`], [`Engine::dry_run`] or [`Engine::explain`].

pub mod analyze;
pub mod ast;
pub mod config;
pub mod context;
mod error;
pub mod expr;
pub mod functions;
mod inherit;
pub mod lexer;
mod parser;
pub mod registry;
mod runtime;
mod store;
pub mod telemetry;
pub mod validate;

pub use analyze::{
    ConditionalUsage, DryRunReport, ExplainReport, IncludeUsage, LoopUsage, Resolution,
    ResolverUsage, VarTrace, VariableUsage,
};
pub use ast::{Ast, Attributes, Block, ErrorStrategy, Node, NodeMeta, Position, Span};
pub use config::{Delimiters, EngineOptions};
pub use context::{lookup_path, Context};
pub use error::Error;
pub use expr::{parse_expression, Expr, Operand};
pub use functions::{
    as_number, coerce_number, is_empty, is_truthy, value_to_string, Func, FunctionRegistry,
    FunctionRegistryBuilder,
};
pub use parser::MESSAGE_ROLES;
pub use registry::{
    ConfigResolver, EnvResolver, ExecContext, Resolver, ResolverRegistry, ResolverRegistryBuilder,
    TagShape,
};
pub use store::{MemoryProvider, TemplateProvider};
pub use validate::{Severity, ValidationIssue, ValidationReport};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analyze::DryRunState;
use crate::runtime::{Mode, Renderer};
use crate::store::TemplateStore;

/// Name given to sources rendered through [`Engine::render`].
pub const INLINE_TEMPLATE: &str = "inline";

/// Parsed template with its source, structural warnings and optional
/// front-matter configuration.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    ast: Ast,
    issues: Vec<ValidationIssue>,
    config: Option<Value>,
}

impl Template {
    /// Parses template source with the default delimiters and built-in resolvers.
    ///
    /// Any Error-severity issue rejects the template with [`Error::Validation`];
    /// warnings are kept and available through [`Template::issues`].
    pub fn parse_str(name: &str, source: &str) -> Result<Self, Error> {
        Self::parse_with(
            name,
            source,
            &Delimiters::default(),
            &ResolverRegistry::default(),
        )
    }

    fn parse_with(
        name: &str,
        source: &str,
        delimiters: &Delimiters,
        resolvers: &ResolverRegistry,
    ) -> Result<Self, Error> {
        let parsed = parser::parse_template(name, source, delimiters, resolvers)?;
        if parsed.issues.iter().any(ValidationIssue::is_error) {
            return Err(Error::Validation {
                issues: parsed.issues,
            });
        }
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            ast: parsed.ast,
            issues: parsed.issues,
            config: None,
        })
    }

    /// Attaches a configuration value, read by `prompty.config`.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Non-fatal issues (warnings and info) found while parsing.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }
}

/// One conversational turn extracted by [`Engine::execute_messages`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Template engine: options, frozen resolver and function registries, and the
/// named-template table used by includes and inheritance.
///
/// Rendering only needs `&self`, so one engine can serve concurrent renders.
#[derive(Debug)]
pub struct Engine {
    options: EngineOptions,
    resolvers: ResolverRegistry,
    functions: FunctionRegistry,
    store: TemplateStore,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with default options, the built-in resolvers and no functions.
    pub fn new() -> Self {
        Self {
            options: EngineOptions::default(),
            resolvers: ResolverRegistry::default(),
            functions: FunctionRegistry::empty(),
            store: TemplateStore::new(None),
        }
    }

    /// Engine with default options, the built-in resolvers and `functions`.
    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self {
            functions,
            ..Self::new()
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Parses source with this engine's delimiters and resolvers.
    pub fn parse(&self, name: &str, source: &str) -> Result<Template, Error> {
        tracing::debug!(template = name, bytes = source.len(), "parsing template");
        Template::parse_with(name, source, &self.options.delimiters, &self.resolvers)
    }

    /// Collects every structural issue in `source`. A lexical failure, which
    /// stops parsing, is reported as a single Error issue.
    pub fn validate(&self, source: &str) -> ValidationReport {
        match parser::parse_template(
            INLINE_TEMPLATE,
            source,
            &self.options.delimiters,
            &self.resolvers,
        ) {
            Ok(parsed) => ValidationReport::new(parsed.issues),
            Err(err) => {
                let position = err.position().unwrap_or_default();
                ValidationReport::new(vec![ValidationIssue::error(err.message(), position)])
            }
        }
    }

    /// Parses and registers a named template for includes and inheritance.
    pub fn register_template(&self, name: &str, source: &str) -> Result<(), Error> {
        let template = self.parse(name, source)?;
        self.add_template(template)
    }

    /// Registers an already parsed template (for example one carrying a config).
    pub fn add_template(&self, template: Template) -> Result<(), Error> {
        self.store.insert(template).map(|_| ())
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    /// Names of the registered (and provider-loaded) templates, sorted.
    pub fn template_names(&self) -> Vec<String> {
        self.store.names()
    }

    /// Renders a parsed template against `data`.
    pub fn execute(&self, template: &Template, data: &Value) -> Result<String, Error> {
        let started = Instant::now();
        let mut renderer = Renderer::new(self, Mode::Execute);
        let result = renderer.render(template, data);
        telemetry::record_render(
            template.name(),
            template.source().len(),
            started.elapsed(),
            result.is_ok(),
        );
        result
    }

    /// Parses `source` as an anonymous template and renders it.
    pub fn render(&self, source: &str, data: &Value) -> Result<String, Error> {
        let template = self.parse(INLINE_TEMPLATE, source)?;
        self.execute(&template, data)
    }

    /// Renders a registered (or provider-backed) template by name.
    pub fn execute_named(&self, name: &str, data: &Value) -> Result<String, Error> {
        let template = self
            .load_template(name)?
            .ok_or_else(|| Error::render(format!("template \"{name}\" not found"), None))?;
        self.execute(&template, data)
    }

    /// Renders `template` and splits the output into conversational turns.
    ///
    /// Each `prompty.message` region becomes one message with trimmed content;
    /// text outside message regions is dropped. Without message tags the whole
    /// output is a single `user` message, or nothing when it is blank.
    pub fn execute_messages(&self, template: &Template, data: &Value) -> Result<Vec<Message>, Error> {
        let mut renderer = Renderer::new(self, Mode::Execute);
        let output = renderer.render(template, data)?;
        let (_, segments) = renderer.into_parts();

        if segments.is_empty() {
            let content = output.trim();
            if content.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Message {
                role: "user".to_string(),
                content: content.to_string(),
            }]);
        }

        Ok(segments
            .into_iter()
            .map(|segment| Message {
                content: output
                    .get(segment.start..segment.end)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                role: segment.role,
            })
            .collect())
    }

    /// Static analysis: inventories variables, resolvers, includes, loops and
    /// conditionals without invoking any resolver.
    ///
    /// Only inheritance failures are returned as errors; everything else is
    /// reported inside the [`DryRunReport`].
    pub fn dry_run(&self, template: &Template, data: &Value) -> Result<DryRunReport, Error> {
        let started = Instant::now();
        let mut renderer = Renderer::new(self, Mode::DryRun(DryRunState::default()));
        let result = renderer.render(template, data);
        telemetry::record_dry_run(
            template.name(),
            template.source().len(),
            started.elapsed(),
            result.is_ok(),
        );
        let output = result?;

        let state = match renderer.into_parts().0 {
            Mode::DryRun(state) => state,
            Mode::Execute | Mode::Explain(_) => DryRunState::default(),
        };
        let mut report = state.into_report(data, output);
        report.warnings.extend(
            template
                .issues()
                .iter()
                .filter(|issue| !issue.is_error())
                .map(ToString::to_string),
        );
        Ok(report)
    }

    /// Parses and executes `source`, recording an AST dump, the resolution of
    /// every variable and the parse/execute timings. Failures are captured in
    /// the report rather than returned.
    pub fn explain(&self, name: &str, source: &str, data: &Value) -> ExplainReport {
        let parse_started = Instant::now();
        let parsed = self.parse(name, source);
        let parse_time = parse_started.elapsed();

        let template = match parsed {
            Ok(template) => template,
            Err(err) => {
                return ExplainReport {
                    ast_dump: String::new(),
                    variables: Vec::new(),
                    parse_time,
                    execute_time: Duration::ZERO,
                    output: None,
                    error: Some(err),
                }
            }
        };
        let ast_dump = match self.effective_ast(&template) {
            Ok(ast) => ast.dump(),
            Err(_) => template.ast().dump(),
        };

        let execute_started = Instant::now();
        let mut renderer = Renderer::new(self, Mode::Explain(Vec::new()));
        let result = renderer.render(&template, data);
        let execute_time = execute_started.elapsed();

        let variables = match renderer.into_parts().0 {
            Mode::Explain(trace) => trace,
            Mode::Execute | Mode::DryRun(_) => Vec::new(),
        };
        let (output, error) = match result {
            Ok(output) => (Some(output), None),
            Err(err) => (None, Some(err)),
        };
        ExplainReport {
            ast_dump,
            variables,
            parse_time,
            execute_time,
            output,
            error,
        }
    }

    pub(crate) fn effective_ast(&self, template: &Template) -> Result<Ast, Error> {
        inherit::resolve_inheritance(template.ast(), self.options.max_depth, |name| {
            self.load_template(name)
        })
    }

    pub(crate) fn load_template(&self, name: &str) -> Result<Option<Arc<Template>>, Error> {
        self.store.load(name, |name, source| self.parse(name, source))
    }
}

/// Mutable builder that freezes into an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    options: EngineOptions,
    resolvers: ResolverRegistryBuilder,
    functions: FunctionRegistryBuilder,
    templates: Vec<(String, String)>,
    provider: Option<Arc<dyn TemplateProvider>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("options", &self.options)
            .field("templates", &self.templates.len())
            .field("provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&mut self, options: EngineOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Sets the strategy used by nodes without an `onerror` attribute.
    pub fn error_strategy(&mut self, strategy: ErrorStrategy) -> &mut Self {
        self.options.error_strategy = Some(strategy);
        self
    }

    pub fn delimiters(&mut self, delimiters: Delimiters) -> &mut Self {
        self.options.delimiters = delimiters;
        self
    }

    pub fn max_depth(&mut self, max_depth: usize) -> &mut Self {
        self.options.max_depth = max_depth;
        self
    }

    /// Registers a resolver; duplicate and reserved tag names fail immediately.
    pub fn resolver<R>(&mut self, resolver: R) -> Result<&mut Self, Error>
    where
        R: Resolver + 'static,
    {
        self.resolvers.register(resolver)?;
        Ok(self)
    }

    pub fn function(&mut self, func: Func) -> Result<&mut Self, Error> {
        self.functions.register(func)?;
        Ok(self)
    }

    /// Adds every function of `registry`, replacing same-named entries.
    pub fn functions(&mut self, registry: &FunctionRegistry) -> &mut Self {
        self.functions.extend(registry);
        self
    }

    /// Queues a named template; it is parsed when the engine is built.
    pub fn template(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.templates.push((name.into(), source.into()));
        self
    }

    /// Fallback source for template names that were never registered.
    pub fn provider<P>(&mut self, provider: P) -> &mut Self
    where
        P: TemplateProvider + 'static,
    {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Freezes the registries and parses queued templates.
    pub fn build(self) -> Result<Engine, Error> {
        self.options.delimiters.check()?;
        let engine = Engine {
            options: self.options,
            resolvers: self.resolvers.build(),
            functions: self.functions.build(),
            store: TemplateStore::new(self.provider),
        };
        for (name, source) in &self.templates {
            engine.register_template(name, source)?;
        }
        Ok(engine)
    }
}
