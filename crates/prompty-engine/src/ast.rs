// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::expr::Expr;

/// Byte offsets into the original template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Line/column (1-based) plus the byte offset of the first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(1, 1, 0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Ordered tag attributes. A repeated name keeps its first slot but takes the
/// last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_default<'a>(&'a self, name: &str, fallback: &'a str) -> &'a str {
        self.get(name).unwrap_or(fallback)
    }

    /// Parses an attribute into any `FromStr` type, reporting bad input as a render error.
    pub fn get_parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, Error> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                Error::render(format!("attribute {name}=\"{raw}\" has an invalid value"), None)
            }),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (key, value) in iter {
            attrs.set(key, value);
        }
        attrs
    }
}

/// What happens when a node fails to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
    #[default]
    Throw,
    Default,
    Remove,
    KeepRaw,
    Log,
}

impl ErrorStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStrategy::Throw => "throw",
            ErrorStrategy::Default => "default",
            ErrorStrategy::Remove => "remove",
            ErrorStrategy::KeepRaw => "keepraw",
            ErrorStrategy::Log => "log",
        }
    }
}

impl FromStr for ErrorStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "throw" => Ok(ErrorStrategy::Throw),
            "default" => Ok(ErrorStrategy::Default),
            "remove" => Ok(ErrorStrategy::Remove),
            "keepraw" => Ok(ErrorStrategy::KeepRaw),
            "log" => Ok(ErrorStrategy::Log),
            other => Err(Error::parse(
                format!("unknown error strategy \"{other}\""),
                None,
            )),
        }
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root AST structure for a parsed template.
#[derive(Debug, Clone)]
pub struct Ast {
    pub name: String,
    pub root: Block,
}

impl Ast {
    pub fn new(name: impl Into<String>, root: Block) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    /// Name of the parent template when the first node is an `extends` directive.
    pub fn extends(&self) -> Option<&str> {
        self.root.nodes.iter().find_map(|node| match node {
            Node::Text(text) if text.text.trim().is_empty() => None,
            Node::Comment(_) => None,
            Node::Extends(extends) => Some(Some(extends.template.as_str())),
            _ => Some(None),
        })?
    }

    /// Textual tree of the AST, one node per line.
    pub fn dump(&self) -> String {
        let mut out = format!("Template {:?}\n", self.name);
        dump_block(&mut out, &self.root, 1);
        out
    }
}

/// A sequential list of sibling nodes.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
}

impl Block {
    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl From<Vec<Node>> for Block {
    fn from(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

/// Node types recognised by the parser.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Node {
    Text(TextNode),
    Comment(CommentNode),
    Var(VarNode),
    Tag(TagNode),
    BlockTag(BlockTagNode),
    If(IfNode),
    For(ForNode),
    Include(IncludeNode),
    Extends(ExtendsNode),
    BlockDef(BlockDefNode),
    Parent(ParentNode),
    Message(MessageNode),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Text(node) => node.span,
            Node::Comment(node) => node.span,
            Node::Var(node) => node.meta.span,
            Node::Tag(node) => node.meta.span,
            Node::BlockTag(node) => node.meta.span,
            Node::If(node) => node.meta.span,
            Node::For(node) => node.meta.span,
            Node::Include(node) => node.meta.span,
            Node::Extends(node) => node.span,
            Node::BlockDef(node) => node.span,
            Node::Parent(node) => node.span,
            Node::Message(node) => node.span,
        }
    }
}

/// Source location and failure handling shared by every node that can fail.
#[derive(Debug, Clone, Default)]
pub struct NodeMeta {
    pub span: Span,
    pub position: Position,
    /// Verbatim source of the tag (the whole region for block tags).
    pub raw: String,
    pub onerror: Option<ErrorStrategy>,
    pub default: Option<String>,
}

/// Raw text literal.
#[derive(Debug, Clone)]
pub struct TextNode {
    pub span: Span,
    pub text: String,
}

impl TextNode {
    pub fn new(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }
}

/// `{~prompty.comment~}...{~/prompty.comment~}`; renders nothing.
#[derive(Debug, Clone)]
pub struct CommentNode {
    pub span: Span,
    pub text: String,
}

/// `{~prompty.var name="a.b" default="x" /~}`.
#[derive(Debug, Clone)]
pub struct VarNode {
    pub meta: NodeMeta,
    pub path: String,
}

/// Leaf tag dispatched to a registered resolver.
#[derive(Debug, Clone)]
pub struct TagNode {
    pub meta: NodeMeta,
    pub name: String,
    pub attrs: Attributes,
}

/// Block tag dispatched to a registered resolver; its output is prepended to the
/// rendered children.
#[derive(Debug, Clone)]
pub struct BlockTagNode {
    pub meta: NodeMeta,
    pub name: String,
    pub attrs: Attributes,
    pub children: Block,
}

/// `if`/`elseif` chain with an optional `else`.
#[derive(Debug, Clone)]
pub struct IfNode {
    pub meta: NodeMeta,
    pub branches: Vec<IfBranch>,
    pub else_block: Option<Block>,
}

#[derive(Debug, Clone)]
pub struct IfBranch {
    pub position: Position,
    pub source: String,
    pub condition: Expr,
    pub block: Block,
}

/// Bounded iteration over a sequence or mapping.
#[derive(Debug, Clone)]
pub struct ForNode {
    pub meta: NodeMeta,
    pub item: String,
    /// Bound to the 0-based position for sequences and to the key for mappings.
    pub index: Option<String>,
    pub source: String,
    pub limit: Option<usize>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct IncludeNode {
    pub meta: NodeMeta,
    pub template: String,
    /// Optional path whose value becomes the included template's data.
    pub with: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtendsNode {
    pub span: Span,
    pub position: Position,
    pub template: String,
}

/// Named, overridable region.
#[derive(Debug, Clone)]
pub struct BlockDefNode {
    pub span: Span,
    pub position: Position,
    pub name: String,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct ParentNode {
    pub span: Span,
    pub position: Position,
}

/// Conversational turn marker.
#[derive(Debug, Clone)]
pub struct MessageNode {
    pub span: Span,
    pub position: Position,
    pub role: String,
    pub body: Block,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(node) => write!(f, "Text({:?})", node.text),
            Node::Comment(_) => write!(f, "Comment"),
            Node::Var(node) => {
                write!(f, "Var({})", node.path)?;
                if let Some(default) = &node.meta.default {
                    write!(f, " default={default:?}")?;
                }
                write_onerror(f, node.meta.onerror)
            }
            Node::Tag(node) => {
                write!(f, "Tag({})", node.name)?;
                write_attrs(f, &node.attrs)?;
                write_onerror(f, node.meta.onerror)
            }
            Node::BlockTag(node) => {
                write!(f, "BlockTag({})", node.name)?;
                write_attrs(f, &node.attrs)?;
                write_onerror(f, node.meta.onerror)
            }
            Node::If(node) => write!(f, "If({} branches)", node.branches.len()),
            Node::For(node) => {
                write!(f, "For({} in {}", node.item, node.source)?;
                if let Some(index) = &node.index {
                    write!(f, ", index={index}")?;
                }
                if let Some(limit) = node.limit {
                    write!(f, ", limit={limit}")?;
                }
                write!(f, ")")
            }
            Node::Include(node) => write!(f, "Include({})", node.template),
            Node::Extends(node) => write!(f, "Extends({})", node.template),
            Node::BlockDef(node) => write!(f, "Block({})", node.name),
            Node::Parent(_) => write!(f, "Parent"),
            Node::Message(node) => write!(f, "Message({})", node.role),
        }
    }
}

fn write_attrs(f: &mut fmt::Formatter<'_>, attrs: &Attributes) -> fmt::Result {
    for (key, value) in attrs.iter() {
        write!(f, " {key}={value:?}")?;
    }
    Ok(())
}

fn write_onerror(f: &mut fmt::Formatter<'_>, onerror: Option<ErrorStrategy>) -> fmt::Result {
    match onerror {
        Some(strategy) => write!(f, " onerror={strategy}"),
        None => Ok(()),
    }
}

fn dump_block(out: &mut String, block: &Block, depth: usize) {
    for node in &block.nodes {
        dump_node(out, node, depth);
    }
}

fn dump_node(out: &mut String, node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push_str(&node.to_string());
    out.push('\n');
    match node {
        Node::BlockTag(tag) => dump_block(out, &tag.children, depth + 1),
        Node::If(if_node) => {
            for (idx, branch) in if_node.branches.iter().enumerate() {
                let label = if idx == 0 { "if" } else { "elseif" };
                out.push_str(&format!("{indent}  {label} {:?}\n", branch.source));
                dump_block(out, &branch.block, depth + 2);
            }
            if let Some(else_block) = &if_node.else_block {
                out.push_str(&format!("{indent}  else\n"));
                dump_block(out, else_block, depth + 2);
            }
        }
        Node::For(for_node) => dump_block(out, &for_node.body, depth + 1),
        Node::BlockDef(def) => dump_block(out, &def.body, depth + 1),
        Node::Message(message) => dump_block(out, &message.body, depth + 1),
        _ => {}
    }
}
