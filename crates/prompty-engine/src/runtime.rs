// SPDX-License-Identifier: Apache-2.0 OR MIT
//! One depth-first walk over an effective AST, shared by execution, dry runs
//! and explain runs. The [`Mode`] only changes what happens at variable,
//! resolver, include and condition leaves; control flow is written once.

use serde_json::Value;

use crate::analyze::{
    ConditionalUsage, DryRunState, IncludeUsage, LoopUsage, Resolution, ResolverUsage, VarTrace,
    VariableUsage,
};
use crate::ast::{
    Attributes, Block, ErrorStrategy, ForNode, IfNode, IncludeNode, MessageNode, Node, NodeMeta,
    VarNode,
};
use crate::context::{lookup_path, Context};
use crate::error::Error;
use crate::functions::value_to_string;
use crate::registry::{ExecContext, FOR_TAG, IF_TAG, INCLUDE_TAG, VAR_TAG};
use crate::telemetry;
use crate::{Engine, Template};

pub(crate) enum Mode {
    Execute,
    DryRun(DryRunState),
    Explain(Vec<VarTrace>),
}

/// Byte range of the rendered output produced inside a `prompty.message`.
#[derive(Debug, Clone)]
pub(crate) struct MessageSegment {
    pub role: String,
    pub start: usize,
    pub end: usize,
}

/// The template whose nodes are being walked; changes inside includes.
#[derive(Clone, Copy)]
struct Frame<'t> {
    name: &'t str,
    config: Option<&'t Value>,
}

pub(crate) struct Renderer<'e> {
    engine: &'e Engine,
    mode: Mode,
    include_depth: usize,
    messages: Vec<MessageSegment>,
    in_message: bool,
}

impl<'e> Renderer<'e> {
    pub(crate) fn new(engine: &'e Engine, mode: Mode) -> Self {
        Self {
            engine,
            mode,
            include_depth: 0,
            messages: Vec::new(),
            in_message: false,
        }
    }

    /// Renders `template` after merging its inheritance chain.
    pub(crate) fn render(&mut self, template: &Template, data: &Value) -> Result<String, Error> {
        let ast = self.engine.effective_ast(template)?;
        let frame = Frame {
            name: template.name(),
            config: template.config(),
        };
        let mut ctx = Context::new(data);
        let mut out = String::new();
        self.render_block(&ast.root, &mut ctx, frame, &mut out)?;
        Ok(out)
    }

    pub(crate) fn into_parts(self) -> (Mode, Vec<MessageSegment>) {
        (self.mode, self.messages)
    }

    fn dry_run(&mut self) -> Option<&mut DryRunState> {
        match &mut self.mode {
            Mode::DryRun(state) => Some(state),
            _ => None,
        }
    }

    fn render_block(
        &mut self,
        block: &Block,
        ctx: &mut Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        for node in &block.nodes {
            match node {
                Node::Text(text) => out.push_str(&text.text),
                Node::Comment(_) | Node::Extends(_) | Node::Parent(_) => {}
                Node::Var(var) => self.render_var(var, ctx, frame, out)?,
                Node::Tag(tag) => {
                    match self.dispatch(&tag.meta, &tag.name, &tag.attrs, ctx, frame) {
                        Ok(text) => out.push_str(&text),
                        Err(err) => self.recover(&tag.meta, &tag.name, err, frame, out)?,
                    }
                }
                Node::BlockTag(tag) => {
                    match self.dispatch(&tag.meta, &tag.name, &tag.attrs, ctx, frame) {
                        Ok(prefix) => {
                            out.push_str(&prefix);
                            self.render_block(&tag.children, ctx, frame, out)?;
                        }
                        Err(err) => self.recover(&tag.meta, &tag.name, err, frame, out)?,
                    }
                }
                Node::If(if_node) => self.render_if(if_node, ctx, frame, out)?,
                Node::For(for_node) => self.render_for(for_node, ctx, frame, out)?,
                Node::Include(include) => self.render_include(include, ctx, frame, out)?,
                Node::BlockDef(def) => self.render_block(&def.body, ctx, frame, out)?,
                Node::Message(message) => self.render_message(message, ctx, frame, out)?,
            }
        }
        Ok(())
    }

    fn render_var(
        &mut self,
        node: &VarNode,
        ctx: &Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        let position = node.meta.position;
        if let Some(state) = self.dry_run() {
            let in_data = lookup_path(ctx.root(), &node.path);
            state.variables.push(VariableUsage {
                name: node.path.clone(),
                line: position.line,
                column: position.column,
                in_data: in_data.is_some(),
                default: node.meta.default.clone(),
                suggestions: Vec::new(),
            });
            state.referenced.push(node.path.clone());
            let placeholder = match (in_data, &node.meta.default) {
                (Some(value), _) => value_to_string(value),
                (None, Some(default)) => default.clone(),
                (None, None) => format!("[missing:{}]", node.path),
            };
            out.push_str(&placeholder);
            return Ok(());
        }

        let found = ctx.lookup(&node.path);
        let resolution = match (found, &node.meta.default) {
            (Some(value), _) => Resolution::Value(value_to_string(value)),
            (None, Some(default)) => Resolution::Default(default.clone()),
            (None, None) => Resolution::NotFound,
        };
        if let Mode::Explain(trace) = &mut self.mode {
            trace.push(VarTrace {
                path: node.path.clone(),
                line: position.line,
                column: position.column,
                found: found.is_some(),
                resolution: resolution.clone(),
            });
        }

        match resolution {
            Resolution::Value(text) | Resolution::Default(text) => {
                out.push_str(&text);
                Ok(())
            }
            Resolution::NotFound => {
                let err = Error::render_at(format!("variable \"{}\" not found", node.path), position);
                self.recover(&node.meta, VAR_TAG, err, frame, out)
            }
        }
    }

    /// Calls the resolver for a tag. Dry runs never invoke resolvers; they
    /// record the usage and emit `[name]`.
    fn dispatch(
        &mut self,
        meta: &NodeMeta,
        name: &str,
        attrs: &Attributes,
        ctx: &Context<'_>,
        frame: Frame<'_>,
    ) -> Result<String, Error> {
        let engine = self.engine;
        let resolver = engine.resolvers.lookup(name);
        if let Some(state) = self.dry_run() {
            state.resolvers.push(ResolverUsage {
                name: name.to_string(),
                line: meta.position.line,
                column: meta.position.column,
                known: resolver.is_some(),
            });
            return Ok(format!("[{name}]"));
        }

        let resolver = resolver.ok_or_else(|| {
            Error::render_at(format!("no resolver registered for tag {name}"), meta.position)
        })?;
        let exec = ExecContext {
            template_name: frame.name,
            config: frame.config,
            functions: &engine.functions,
        };
        let result = resolver.resolve(ctx, &exec, attrs);
        telemetry::record_resolver_invocation(name, result.is_ok());
        result.map_err(|err| node_failure(err, name, meta))
    }

    fn render_if(
        &mut self,
        node: &IfNode,
        ctx: &mut Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        if self.dry_run().is_some() {
            return self.dry_run_if(node, ctx, frame, out);
        }

        let mut chosen = node.else_block.as_ref();
        for branch in &node.branches {
            match branch
                .condition
                .evaluate_bool(ctx, &self.engine.functions)
            {
                Ok(true) => {
                    chosen = Some(&branch.block);
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    let err = node_failure(err, IF_TAG, &node.meta).or_at(branch.position);
                    return self.recover(&node.meta, IF_TAG, err, frame, out);
                }
            }
        }
        match chosen {
            Some(block) => self.render_block(block, ctx, frame, out),
            None => Ok(()),
        }
    }

    /// Walks every branch so the inventory is complete, but only the branch the
    /// supplied data selects contributes to the placeholder output.
    fn dry_run_if(
        &mut self,
        node: &IfNode,
        ctx: &mut Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        let engine = self.engine;
        let mut selected: Option<usize> = None;
        for (idx, branch) in node.branches.iter().enumerate() {
            let outcome = branch.condition.evaluate_bool(ctx, &engine.functions);
            let functions: Vec<String> = branch
                .condition
                .function_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            if let Some(state) = self.dry_run() {
                state
                    .referenced
                    .extend(branch.condition.paths().into_iter().map(str::to_string));
                if outcome.is_ok() {
                    // calls skipped by short-circuiting are not evaluated
                    for name in &functions {
                        if engine.functions.get(name).is_none() {
                            state.warnings.push(format!(
                                "condition \"{}\" at line {}, column {} calls unknown function \"{name}\"",
                                branch.source, branch.position.line, branch.position.column,
                            ));
                        }
                    }
                }
                state.conditionals.push(ConditionalUsage {
                    eval: branch.source.clone(),
                    line: branch.position.line,
                    column: branch.position.column,
                    functions,
                });
                match outcome {
                    Ok(true) if selected.is_none() => selected = Some(idx),
                    Ok(_) => {}
                    Err(err) => state.warnings.push(format!(
                        "condition \"{}\" at line {}, column {} could not be evaluated: {}",
                        branch.source,
                        branch.position.line,
                        branch.position.column,
                        err.message()
                    )),
                }
            }
        }

        let mut scratch = String::new();
        for (idx, branch) in node.branches.iter().enumerate() {
            let target = if selected == Some(idx) {
                &mut *out
            } else {
                &mut scratch
            };
            self.render_block(&branch.block, ctx, frame, target)?;
        }
        if let Some(else_block) = &node.else_block {
            let target = if selected.is_none() {
                &mut *out
            } else {
                &mut scratch
            };
            self.render_block(else_block, ctx, frame, target)?;
        }
        Ok(())
    }

    fn render_for(
        &mut self,
        node: &ForNode,
        ctx: &mut Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        let position = node.meta.position;
        if let Some(state) = self.dry_run() {
            state.loops.push(LoopUsage {
                item: node.item.clone(),
                index: node.index.clone(),
                source: node.source.clone(),
                line: position.line,
                column: position.column,
                in_data: lookup_path(ctx.root(), &node.source).is_some(),
                limit: node.limit,
            });
            state.referenced.push(node.source.clone());
            return self.render_block(&node.body, ctx, frame, out);
        }

        let limit = node.limit.unwrap_or(usize::MAX);
        // (index binding, item) pairs: positions for arrays, keys for mappings
        let items: Vec<(Value, Value)> = match ctx.lookup(&node.source) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .take(limit)
                .enumerate()
                .map(|(index, item)| (Value::from(index), item.clone()))
                .collect(),
            Some(Value::Object(map)) => map
                .iter()
                .take(limit)
                .map(|(key, item)| (Value::String(key.clone()), item.clone()))
                .collect(),
            Some(other) => {
                let kind = match other {
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    _ => "a string",
                };
                let err = Error::render_at(
                    format!("cannot iterate over \"{}\": it is {kind}", node.source),
                    position,
                );
                return self.recover(&node.meta, FOR_TAG, err, frame, out);
            }
        };

        for (index, item) in items {
            ctx.push_scope();
            ctx.bind(node.item.clone(), item);
            if let Some(index_var) = &node.index {
                ctx.bind(index_var.clone(), index);
            }
            let result = self.render_block(&node.body, ctx, frame, out);
            ctx.pop_scope();
            result?;
        }
        Ok(())
    }

    fn render_include(
        &mut self,
        node: &IncludeNode,
        ctx: &mut Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        let position = node.meta.position;
        if self.dry_run().is_some() {
            let exists = self.engine.store.contains(&node.template);
            if let Some(state) = self.dry_run() {
                state.includes.push(IncludeUsage {
                    template: node.template.clone(),
                    line: position.line,
                    column: position.column,
                    exists,
                });
                if let Some(with) = &node.with {
                    state.referenced.push(with.clone());
                }
            }
            out.push_str(&format!("[include:{}]", node.template));
            return Ok(());
        }

        if self.include_depth >= self.engine.options.max_depth {
            let err = Error::render_at(
                format!(
                    "include depth exceeds the maximum of {} at \"{}\"",
                    self.engine.options.max_depth, node.template
                ),
                position,
            );
            return self.recover(&node.meta, INCLUDE_TAG, err, frame, out);
        }

        let template = match self.engine.load_template(&node.template)? {
            Some(template) => template,
            None => {
                let err = Error::render_at(
                    format!("included template \"{}\" not found", node.template),
                    position,
                );
                return self.recover(&node.meta, INCLUDE_TAG, err, frame, out);
            }
        };
        let ast = self.engine.effective_ast(&template)?;
        tracing::debug!(
            template = frame.name,
            include = %node.template,
            depth = self.include_depth + 1,
            "rendering include"
        );

        let inner_frame = Frame {
            name: template.name(),
            config: template.config(),
        };
        self.include_depth += 1;
        let result = match &node.with {
            Some(path) => match ctx.lookup(path).cloned() {
                Some(data) => {
                    let mut inner = Context::new(&data);
                    self.render_block(&ast.root, &mut inner, inner_frame, out)
                }
                None => {
                    self.include_depth -= 1;
                    let err = Error::render_at(
                        format!("include data \"{path}\" not found"),
                        position,
                    );
                    return self.recover(&node.meta, INCLUDE_TAG, err, frame, out);
                }
            },
            None => self.render_block(&ast.root, ctx, inner_frame, out),
        };
        self.include_depth -= 1;
        result
    }

    fn render_message(
        &mut self,
        node: &MessageNode,
        ctx: &mut Context<'_>,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        if self.in_message {
            return Err(Error::render_at(
                "prompty.message cannot be nested",
                node.position,
            ));
        }
        self.in_message = true;
        let start = out.len();
        let result = self.render_block(&node.body, ctx, frame, out);
        self.in_message = false;
        result?;
        self.messages.push(MessageSegment {
            role: node.role.clone(),
            start,
            end: out.len(),
        });
        Ok(())
    }

    /// Applies the node's error strategy to a failure raised by the node itself.
    fn recover(
        &mut self,
        meta: &NodeMeta,
        tag: &str,
        err: Error,
        frame: Frame<'_>,
        out: &mut String,
    ) -> Result<(), Error> {
        if err.is_fatal() {
            return Err(err);
        }
        let err = err.or_at(meta.position);
        match self.engine.options.strategy_for(meta.onerror) {
            ErrorStrategy::Throw => Err(err),
            ErrorStrategy::Default => {
                out.push_str(meta.default.as_deref().unwrap_or_default());
                Ok(())
            }
            ErrorStrategy::Remove => Ok(()),
            ErrorStrategy::KeepRaw => {
                out.push_str(&meta.raw);
                Ok(())
            }
            ErrorStrategy::Log => {
                tracing::warn!(
                    template = frame.name,
                    tag,
                    line = meta.position.line,
                    column = meta.position.column,
                    error = %err,
                    "tag failed to render"
                );
                Ok(())
            }
        }
    }
}

/// Keeps failures raised by resolvers and host functions node-local: anything
/// that is not already an evaluation or render error is wrapped as one.
fn node_failure(err: Error, tag: &str, meta: &NodeMeta) -> Error {
    match err {
        Error::Eval { .. } | Error::Render { .. } => err.or_at(meta.position),
        other => Error::render_source(
            format!("{tag} failed: {}", other.message()),
            other,
            Some(meta.position),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_meta() -> NodeMeta {
        NodeMeta {
            raw: "{~x /~}".to_string(),
            default: Some("fallback".to_string()),
            ..NodeMeta::default()
        }
    }

    #[test]
    fn foreign_errors_become_render_failures() {
        let err = node_failure(Error::inheritance("boom"), "demo.tag", &node_meta());
        assert!(matches!(err, Error::Render { .. }));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("demo.tag failed: boom"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn strategies_substitute_expected_text() {
        let engine = Engine::new();
        let frame = Frame {
            name: "t",
            config: None,
        };
        let mut renderer = Renderer::new(&engine, Mode::Execute);
        let cases = [
            (ErrorStrategy::Default, "fallback"),
            (ErrorStrategy::Remove, ""),
            (ErrorStrategy::KeepRaw, "{~x /~}"),
            (ErrorStrategy::Log, ""),
        ];
        for (strategy, expected) in cases {
            let meta = NodeMeta {
                onerror: Some(strategy),
                ..node_meta()
            };
            let mut out = String::new();
            renderer
                .recover(&meta, "x", Error::render("nope", None), frame, &mut out)
                .unwrap();
            assert_eq!(out, expected, "{strategy}");
        }
        let mut out = String::new();
        let err = renderer
            .recover(&node_meta(), "x", Error::render("nope", None), frame, &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(out.is_empty());
    }
}
