// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::collections::HashSet;

use serde_json::Value;

use crate::ast::{
    Ast, Attributes, Block, BlockDefNode, BlockTagNode, CommentNode, ErrorStrategy, ExtendsNode,
    ForNode, IfBranch, IfNode, IncludeNode, MessageNode, Node, NodeMeta, ParentNode, Position,
    Span, TagNode, TextNode, VarNode,
};
use crate::config::Delimiters;
use crate::error::Error;
use crate::expr::{parse_expression, Expr};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::registry::{
    ResolverRegistry, TagShape, BLOCK_TAG, ELSEIF_TAG, ELSE_TAG, EXTENDS_TAG, FOR_TAG, IF_TAG,
    INCLUDE_TAG, MESSAGE_TAG, PARENT_TAG, VAR_TAG,
};
use crate::validate::{Severity, ValidationIssue};

/// Roles accepted by `prompty.message`.
pub const MESSAGE_ROLES: &[&str] = &["system", "user", "assistant", "tool"];

pub(crate) struct Parsed {
    pub ast: Ast,
    pub issues: Vec<ValidationIssue>,
}

/// Parses template source into an AST plus every structural issue found.
///
/// Lexical errors abort immediately. Everything else is collected: the parser
/// keeps a stack of open block frames, reports a problem, repairs the tree as
/// best it can (dropping the offending tag, auto-closing frames, substituting
/// `false` for an unparsable condition) and carries on, so one pass reports
/// as many problems as possible.
pub(crate) fn parse_template(
    name: &str,
    source: &str,
    delimiters: &Delimiters,
    resolvers: &ResolverRegistry,
) -> Result<Parsed, Error> {
    let tokens = tokenize(source, delimiters)?;
    let mut parser = Parser::new(source, resolvers);
    for token in tokens {
        parser.accept(token);
    }
    let parsed = parser.finish(name);
    tracing::debug!(
        template = name,
        issues = parsed.issues.len(),
        "parsed template"
    );
    Ok(parsed)
}

struct Parser<'a> {
    source: &'a str,
    resolvers: &'a ResolverRegistry,
    root: Block,
    stack: Vec<Frame>,
    issues: Vec<ValidationIssue>,
    extends: bool,
    root_has_content: bool,
    ignored_content: Option<Position>,
    block_names: HashSet<String>,
}

struct Frame {
    tag: String,
    start: usize,
    position: Position,
    meta: NodeMeta,
    kind: FrameKind,
    children: Block,
}

enum FrameKind {
    If(IfFrame),
    For {
        item: String,
        index: Option<String>,
        source: String,
        limit: Option<usize>,
    },
    BlockDef {
        name: String,
    },
    Message {
        role: String,
    },
    Tag {
        attrs: Attributes,
    },
    /// A broken block whose children are parsed but dropped.
    Discard,
}

struct IfFrame {
    branches: Vec<IfBranch>,
    /// Branch collecting children; `None` once `else` was seen.
    current: Option<PendingBranch>,
}

struct PendingBranch {
    position: Position,
    source: String,
    condition: Expr,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, resolvers: &'a ResolverRegistry) -> Self {
        Self {
            source,
            resolvers,
            root: Block::default(),
            stack: Vec::new(),
            issues: Vec::new(),
            extends: false,
            root_has_content: false,
            ignored_content: None,
            block_names: HashSet::new(),
        }
    }

    fn accept(&mut self, token: Token) {
        let Token {
            kind,
            span,
            position,
        } = token;
        match kind {
            TokenKind::Text(text) => self.push_node(Node::Text(TextNode::new(span, text)), position),
            TokenKind::Comment(text) => {
                self.push_node(Node::Comment(CommentNode { span, text }), position);
            }
            TokenKind::OpenSelfClosing { name, attrs } => {
                self.open_tag(name, attrs, span, position, TagShape::SelfClosing);
            }
            TokenKind::OpenBlock { name, attrs } => {
                self.open_tag(name, attrs, span, position, TagShape::Block);
            }
            TokenKind::Close { name } => self.close_tag(&name, span, position),
        }
    }

    fn finish(mut self, name: &str) -> Parsed {
        let end = self.source.len();
        while let Some(frame) = self.stack.pop() {
            self.unclosed(&frame);
            self.finish_frame(frame, end);
        }
        if let Some(position) = self.ignored_content {
            self.issues.push(ValidationIssue::new(
                Severity::Info,
                "content outside prompty.block is ignored in a template that extends another",
                position,
            ));
        }
        Parsed {
            ast: Ast::new(name, self.root),
            issues: self.issues,
        }
    }

    fn open_tag(
        &mut self,
        tag: String,
        attrs: Attributes,
        span: Span,
        position: Position,
        shape: TagShape,
    ) {
        match tag.as_str() {
            VAR_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::SelfClosing, span, position) {
                    return;
                }
                let meta = self.meta(&tag, &attrs, span, position);
                if let Some(path) = self.required(&attrs, &tag, "name", position) {
                    self.push_node(Node::Var(VarNode { meta, path }), position);
                }
            }
            IF_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::Block, span, position) {
                    return;
                }
                let meta = self.meta(&tag, &attrs, span, position);
                let pending = self.branch_condition(&tag, &attrs, position);
                self.push_frame(
                    tag,
                    span,
                    position,
                    meta,
                    FrameKind::If(IfFrame {
                        branches: Vec::new(),
                        current: Some(pending),
                    }),
                );
            }
            ELSEIF_TAG | ELSE_TAG => self.branch(&tag, &attrs, position),
            FOR_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::Block, span, position) {
                    return;
                }
                let meta = self.meta(&tag, &attrs, span, position);
                let item = self.required(&attrs, &tag, "item", position);
                let source = self.required(&attrs, &tag, "in", position);
                let limit = match attrs.get("limit") {
                    None => {
                        self.warning(
                            "prompty.for without a limit iterates the whole collection",
                            position,
                            &tag,
                        );
                        None
                    }
                    Some(raw) => match raw.trim().parse::<usize>() {
                        Ok(limit) => Some(limit),
                        Err(_) => {
                            self.error(format!("invalid limit \"{raw}\""), position, &tag);
                            None
                        }
                    },
                };
                let kind = match (item, source) {
                    (Some(item), Some(source)) => FrameKind::For {
                        item,
                        index: attrs.get("index").map(str::to_string),
                        source,
                        limit,
                    },
                    _ => FrameKind::Discard,
                };
                self.push_frame(tag, span, position, meta, kind);
            }
            INCLUDE_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::SelfClosing, span, position) {
                    return;
                }
                let meta = self.meta(&tag, &attrs, span, position);
                if let Some(template) = self.required(&attrs, &tag, "template", position) {
                    let with = attrs.get("with").map(str::to_string);
                    self.push_node(
                        Node::Include(IncludeNode {
                            meta,
                            template,
                            with,
                        }),
                        position,
                    );
                }
            }
            EXTENDS_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::SelfClosing, span, position) {
                    return;
                }
                let Some(template) = self.required(&attrs, &tag, "template", position) else {
                    return;
                };
                if self.extends {
                    self.error("a template can extend only one parent", position, &tag);
                    return;
                }
                if !self.stack.is_empty() || self.root_has_content {
                    self.error(
                        "prompty.extends must be the first tag in the template",
                        position,
                        &tag,
                    );
                    return;
                }
                self.extends = true;
                self.root.push(Node::Extends(ExtendsNode {
                    span,
                    position,
                    template,
                }));
            }
            BLOCK_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::Block, span, position) {
                    return;
                }
                let meta = self.meta(&tag, &attrs, span, position);
                let kind = match self.required(&attrs, &tag, "name", position) {
                    Some(name) if !self.block_names.insert(name.clone()) => {
                        self.error(format!("duplicate block \"{name}\""), position, &tag);
                        FrameKind::Discard
                    }
                    Some(name) => FrameKind::BlockDef { name },
                    None => FrameKind::Discard,
                };
                self.push_frame(tag, span, position, meta, kind);
            }
            PARENT_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::SelfClosing, span, position) {
                    return;
                }
                let in_block = self
                    .stack
                    .iter()
                    .any(|frame| matches!(frame.kind, FrameKind::BlockDef { .. }));
                if !in_block {
                    self.error("prompty.parent must appear inside a prompty.block", position, &tag);
                } else if !self.extends {
                    self.error(
                        "prompty.parent is only valid in a template that extends another",
                        position,
                        &tag,
                    );
                } else {
                    self.push_node(Node::Parent(ParentNode { span, position }), position);
                }
            }
            MESSAGE_TAG => {
                if !self.expect_shape(&tag, shape, TagShape::Block, span, position) {
                    return;
                }
                let meta = self.meta(&tag, &attrs, span, position);
                if self
                    .stack
                    .iter()
                    .any(|frame| matches!(frame.kind, FrameKind::Message { .. }))
                {
                    self.error("prompty.message cannot be nested", position, &tag);
                }
                let kind = match self.required(&attrs, &tag, "role", position) {
                    Some(role) if MESSAGE_ROLES.contains(&role.as_str()) => {
                        FrameKind::Message { role }
                    }
                    Some(role) => {
                        self.error(
                            format!(
                                "invalid message role \"{role}\", expected one of {}",
                                MESSAGE_ROLES.join(", ")
                            ),
                            position,
                            &tag,
                        );
                        FrameKind::Discard
                    }
                    None => FrameKind::Discard,
                };
                self.push_frame(tag, span, position, meta, kind);
            }
            _ => self.open_resolver_tag(tag, attrs, span, position, shape),
        }
    }

    fn open_resolver_tag(
        &mut self,
        tag: String,
        attrs: Attributes,
        span: Span,
        position: Position,
        shape: TagShape,
    ) {
        match self.resolvers.lookup(&tag) {
            Some(resolver) => {
                let expected = resolver.shape();
                if expected != shape {
                    self.error(
                        format!("{tag} is a {expected} tag but was written as {shape}"),
                        position,
                        &tag,
                    );
                }
                if let Err(err) = resolver.validate(&attrs) {
                    self.error(err.message(), position, &tag);
                }
            }
            None => self.warning(format!("unknown tag {tag}"), position, &tag),
        }

        let meta = self.meta(&tag, &attrs, span, position);
        match shape {
            TagShape::SelfClosing => {
                self.push_node(
                    Node::Tag(TagNode {
                        meta,
                        name: tag,
                        attrs,
                    }),
                    position,
                );
            }
            TagShape::Block => {
                self.push_frame(tag, span, position, meta, FrameKind::Tag { attrs });
            }
        }
    }

    /// Handles `elseif`/`else`, which split the innermost `if` frame into branches.
    fn branch(&mut self, tag: &str, attrs: &Attributes, position: Position) {
        let in_if = matches!(
            self.stack.last().map(|frame| &frame.kind),
            Some(FrameKind::If(_))
        );
        if !in_if {
            self.error(format!("{tag} outside prompty.if"), position, tag);
            return;
        }
        let pending = (tag == ELSEIF_TAG).then(|| self.branch_condition(tag, attrs, position));

        let after_else = match self.stack.last_mut() {
            Some(frame) => match &mut frame.kind {
                FrameKind::If(if_frame) => match if_frame.current.take() {
                    Some(current) => {
                        if_frame.branches.push(IfBranch {
                            position: current.position,
                            source: current.source,
                            condition: current.condition,
                            block: std::mem::take(&mut frame.children),
                        });
                        if_frame.current = pending;
                        false
                    }
                    None => true,
                },
                _ => false,
            },
            None => false,
        };
        if after_else {
            self.error(format!("{tag} after prompty.else"), position, tag);
        }
    }

    fn branch_condition(&mut self, tag: &str, attrs: &Attributes, position: Position) -> PendingBranch {
        let placeholder = || Expr::Literal(Value::Bool(false));
        let Some(source) = self.required(attrs, tag, "eval", position) else {
            return PendingBranch {
                position,
                source: String::new(),
                condition: placeholder(),
            };
        };
        let condition = match parse_expression(&source) {
            Ok(expr) => expr,
            Err(err) => {
                self.error(
                    format!("invalid expression \"{source}\": {}", err.message()),
                    position,
                    tag,
                );
                placeholder()
            }
        };
        PendingBranch {
            position,
            source,
            condition,
        }
    }

    fn close_tag(&mut self, tag: &str, span: Span, position: Position) {
        if let Some(idx) = self.stack.iter().rposition(|frame| frame.tag == tag) {
            if idx + 1 < self.stack.len() {
                self.error(format!("unmatched closing tag for {tag}"), position, tag);
            }
            while self.stack.len() > idx + 1 {
                if let Some(frame) = self.stack.pop() {
                    self.unclosed(&frame);
                    self.finish_frame(frame, span.start);
                }
            }
            if let Some(frame) = self.stack.pop() {
                self.finish_frame(frame, span.end);
            }
            return;
        }

        let closes_branch = (tag == ELSE_TAG || tag == ELSEIF_TAG)
            && matches!(
                self.stack.last().map(|frame| &frame.kind),
                Some(FrameKind::If(_))
            );
        if !closes_branch {
            self.error(format!("unmatched closing tag for {tag}"), position, tag);
        }
    }

    fn finish_frame(&mut self, frame: Frame, end: usize) {
        let Frame {
            tag,
            start,
            position,
            mut meta,
            kind,
            children,
        } = frame;
        let span = Span::new(start, end);
        meta.span = span;
        meta.raw = self.source.get(start..end).unwrap_or_default().to_string();

        let node = match kind {
            FrameKind::If(mut if_frame) => {
                let else_block = match if_frame.current.take() {
                    Some(current) => {
                        if_frame.branches.push(IfBranch {
                            position: current.position,
                            source: current.source,
                            condition: current.condition,
                            block: children,
                        });
                        None
                    }
                    None => Some(children),
                };
                Node::If(IfNode {
                    meta,
                    branches: if_frame.branches,
                    else_block,
                })
            }
            FrameKind::For {
                item,
                index,
                source,
                limit,
            } => Node::For(ForNode {
                meta,
                item,
                index,
                source,
                limit,
                body: children,
            }),
            FrameKind::BlockDef { name } => Node::BlockDef(BlockDefNode {
                span,
                position,
                name,
                body: children,
            }),
            FrameKind::Message { role } => Node::Message(MessageNode {
                span,
                position,
                role,
                body: children,
            }),
            FrameKind::Tag { attrs } => Node::BlockTag(BlockTagNode {
                meta,
                name: tag,
                attrs,
                children,
            }),
            FrameKind::Discard => return,
        };
        self.push_node(node, position);
    }

    fn push_frame(
        &mut self,
        tag: String,
        span: Span,
        position: Position,
        meta: NodeMeta,
        kind: FrameKind,
    ) {
        self.stack.push(Frame {
            tag,
            start: span.start,
            position,
            meta,
            kind,
            children: Block::default(),
        });
    }

    fn push_node(&mut self, node: Node, position: Position) {
        if let Some(frame) = self.stack.last_mut() {
            frame.children.push(node);
            return;
        }
        let blank = match &node {
            Node::Text(text) => text.text.trim().is_empty(),
            Node::Comment(_) | Node::Extends(_) => true,
            _ => false,
        };
        if !blank {
            self.root_has_content = true;
            if self.extends
                && !matches!(node, Node::BlockDef(_))
                && self.ignored_content.is_none()
            {
                self.ignored_content = Some(position);
            }
        }
        self.root.push(node);
    }

    fn meta(&mut self, tag: &str, attrs: &Attributes, span: Span, position: Position) -> NodeMeta {
        let onerror = match attrs.get("onerror") {
            None => None,
            Some(raw) => match raw.parse::<ErrorStrategy>() {
                Ok(strategy) => Some(strategy),
                Err(_) => {
                    self.error(
                        format!(
                            "invalid onerror value \"{raw}\", expected throw, default, remove, keepraw or log"
                        ),
                        position,
                        tag,
                    );
                    None
                }
            },
        };
        NodeMeta {
            span,
            position,
            raw: self
                .source
                .get(span.start..span.end)
                .unwrap_or_default()
                .to_string(),
            onerror,
            default: attrs.get("default").map(str::to_string),
        }
    }

    fn expect_shape(
        &mut self,
        tag: &str,
        actual: TagShape,
        expected: TagShape,
        span: Span,
        position: Position,
    ) -> bool {
        if actual == expected {
            return true;
        }
        let message = match expected {
            TagShape::SelfClosing => format!("{tag} must be self-closing"),
            TagShape::Block => format!("{tag} must be a block tag with a matching close"),
        };
        self.error(message, position, tag);
        if actual == TagShape::Block {
            // consume the children and the matching close, if any
            self.push_frame(tag.to_string(), span, position, NodeMeta::default(), FrameKind::Discard);
        }
        false
    }

    fn required(
        &mut self,
        attrs: &Attributes,
        tag: &str,
        attr: &str,
        position: Position,
    ) -> Option<String> {
        match attrs.get(attr) {
            Some(value) if !value.trim().is_empty() => Some(value.to_string()),
            _ => {
                self.error(
                    format!("{tag} is missing required attribute \"{attr}\""),
                    position,
                    tag,
                );
                None
            }
        }
    }

    fn unclosed(&mut self, frame: &Frame) {
        self.error(format!("unclosed tag {}", frame.tag), frame.position, &frame.tag);
    }

    fn error(&mut self, message: impl Into<String>, position: Position, tag: &str) {
        self.issues
            .push(ValidationIssue::error(message, position).with_tag(tag));
    }

    fn warning(&mut self, message: impl Into<String>, position: Position, tag: &str) {
        self.issues
            .push(ValidationIssue::warning(message, position).with_tag(tag));
    }
}
