// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Merges `extends`/`block`/`parent` chains into one effective tree.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Ast, Block, BlockDefNode, BlockTagNode, ForNode, IfBranch, IfNode, MessageNode, Node};
use crate::error::Error;
use crate::Template;

/// Produces the effective AST for `ast`.
///
/// Parents are resolved first, so a chain of any length bottoms out before the
/// first merge. Block markers survive every intermediate merge so that a
/// grandchild can still override a block its parent already overrode; they are
/// stripped, together with `extends` and `parent`, in a final flattening pass.
/// The input trees are never modified.
pub(crate) fn resolve_inheritance<F>(ast: &Ast, max_depth: usize, mut load: F) -> Result<Ast, Error>
where
    F: FnMut(&str) -> Result<Option<Arc<Template>>, Error>,
{
    let mut chain = vec![ast.name.clone()];
    let merged = resolve_chain(ast, &mut chain, max_depth, &mut load)?;
    Ok(Ast::new(ast.name.clone(), flatten(&merged)))
}

fn resolve_chain<F>(
    ast: &Ast,
    chain: &mut Vec<String>,
    max_depth: usize,
    load: &mut F,
) -> Result<Block, Error>
where
    F: FnMut(&str) -> Result<Option<Arc<Template>>, Error>,
{
    let Some(parent_name) = ast.extends() else {
        return Ok(ast.root.clone());
    };

    if chain.iter().any(|name| name == parent_name) {
        let mut path = chain.join(" -> ");
        path.push_str(" -> ");
        path.push_str(parent_name);
        return Err(Error::inheritance(format!(
            "inheritance cycle detected: {path}"
        )));
    }
    if chain.len() > max_depth {
        return Err(Error::inheritance(format!(
            "inheritance chain exceeds the maximum depth of {max_depth}"
        )));
    }

    let parent = load(parent_name)?.ok_or_else(|| {
        Error::inheritance(format!(
            "template \"{}\" extends unknown template \"{parent_name}\"",
            ast.name
        ))
    })?;
    tracing::debug!(template = %ast.name, parent = parent_name, "resolving parent template");

    chain.push(parent_name.to_string());
    let parent_block = resolve_chain(parent.ast(), chain, max_depth, load)?;
    chain.pop();

    let mut overrides = HashMap::new();
    collect_overrides(&ast.root, &mut overrides);
    Ok(substitute(&parent_block, &overrides))
}

fn collect_overrides<'a>(block: &'a Block, out: &mut HashMap<&'a str, &'a Block>) {
    for node in &block.nodes {
        if let Node::BlockDef(def) = node {
            out.entry(def.name.as_str()).or_insert(&def.body);
        }
        for child in child_blocks(node) {
            collect_overrides(child, out);
        }
    }
}

fn substitute(block: &Block, overrides: &HashMap<&str, &Block>) -> Block {
    block
        .nodes
        .iter()
        .map(|node| match node {
            Node::BlockDef(def) => {
                let inherited = substitute(&def.body, overrides);
                let body = match overrides.get(def.name.as_str()) {
                    Some(child) => replace_parent(child, &inherited),
                    None => inherited,
                };
                Node::BlockDef(BlockDefNode {
                    span: def.span,
                    position: def.position,
                    name: def.name.clone(),
                    body,
                })
            }
            other => map_children(other, |child| substitute(child, overrides)),
        })
        .collect::<Vec<_>>()
        .into()
}

fn replace_parent(block: &Block, parent_body: &Block) -> Block {
    let mut nodes = Vec::with_capacity(block.nodes.len());
    for node in &block.nodes {
        match node {
            Node::Parent(_) => nodes.extend(parent_body.nodes.iter().cloned()),
            other => nodes.push(map_children(other, |child| replace_parent(child, parent_body))),
        }
    }
    nodes.into()
}

fn flatten(block: &Block) -> Block {
    let mut nodes = Vec::with_capacity(block.nodes.len());
    for node in &block.nodes {
        match node {
            Node::BlockDef(def) => nodes.extend(flatten(&def.body).nodes),
            Node::Extends(_) | Node::Parent(_) => {}
            other => nodes.push(map_children(other, flatten)),
        }
    }
    nodes.into()
}

fn child_blocks(node: &Node) -> Vec<&Block> {
    match node {
        Node::If(if_node) => if_node
            .branches
            .iter()
            .map(|branch| &branch.block)
            .chain(if_node.else_block.as_ref())
            .collect(),
        Node::For(for_node) => vec![&for_node.body],
        Node::BlockDef(def) => vec![&def.body],
        Node::Message(message) => vec![&message.body],
        Node::BlockTag(tag) => vec![&tag.children],
        _ => Vec::new(),
    }
}

/// Clones `node`, rebuilding each child block through `f`.
fn map_children<F>(node: &Node, mut f: F) -> Node
where
    F: FnMut(&Block) -> Block,
{
    match node {
        Node::If(if_node) => Node::If(IfNode {
            meta: if_node.meta.clone(),
            branches: if_node
                .branches
                .iter()
                .map(|branch| IfBranch {
                    position: branch.position,
                    source: branch.source.clone(),
                    condition: branch.condition.clone(),
                    block: f(&branch.block),
                })
                .collect(),
            else_block: if_node.else_block.as_ref().map(&mut f),
        }),
        Node::For(for_node) => Node::For(ForNode {
            meta: for_node.meta.clone(),
            item: for_node.item.clone(),
            index: for_node.index.clone(),
            source: for_node.source.clone(),
            limit: for_node.limit,
            body: f(&for_node.body),
        }),
        Node::BlockDef(def) => Node::BlockDef(BlockDefNode {
            span: def.span,
            position: def.position,
            name: def.name.clone(),
            body: f(&def.body),
        }),
        Node::Message(message) => Node::Message(MessageNode {
            span: message.span,
            position: message.position,
            role: message.role.clone(),
            body: f(&message.body),
        }),
        Node::BlockTag(tag) => Node::BlockTag(BlockTagNode {
            meta: tag.meta.clone(),
            name: tag.name.clone(),
            attrs: tag.attrs.clone(),
            children: f(&tag.children),
        }),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(templates: &[(&str, &str)], name: &str) -> Result<Ast, Error> {
        let parsed: HashMap<String, Arc<Template>> = templates
            .iter()
            .map(|(name, source)| {
                let template = Template::parse_str(name, source).unwrap();
                (name.to_string(), Arc::new(template))
            })
            .collect();
        let target = Arc::clone(&parsed[name]);
        resolve_inheritance(target.ast(), 10, |wanted| Ok(parsed.get(wanted).cloned()))
    }

    fn texts(ast: &Ast) -> String {
        fn walk(block: &Block, out: &mut String) {
            for node in &block.nodes {
                match node {
                    Node::Text(text) => out.push_str(&text.text),
                    other => {
                        for child in child_blocks(other) {
                            walk(child, out);
                        }
                    }
                }
            }
        }
        let mut out = String::new();
        walk(&ast.root, &mut out);
        out
    }

    #[test]
    fn parent_inserts_the_ancestor_body() {
        let ast = resolve(
            &[
                ("base", "{~prompty.block name=\"b\"~}B{~/prompty.block~}"),
                (
                    "child",
                    "{~prompty.extends template=\"base\" /~}{~prompty.block name=\"b\"~}{~prompty.parent /~}X{~/prompty.block~}",
                ),
            ],
            "child",
        )
        .unwrap();
        assert_eq!(texts(&ast), "BX");
        assert!(ast
            .root
            .nodes
            .iter()
            .all(|node| !matches!(node, Node::BlockDef(_) | Node::Extends(_) | Node::Parent(_))));
    }

    #[test]
    fn three_level_chain_keeps_unoverridden_defaults() {
        let ast = resolve(
            &[
                (
                    "base",
                    "<{~prompty.block name=\"head\"~}H{~/prompty.block~}|{~prompty.block name=\"body\"~}B{~/prompty.block~}>",
                ),
                (
                    "middle",
                    "{~prompty.extends template=\"base\" /~}{~prompty.block name=\"body\"~}{~prompty.parent /~}M{~/prompty.block~}",
                ),
                (
                    "leaf",
                    "{~prompty.extends template=\"middle\" /~}{~prompty.block name=\"body\"~}{~prompty.parent /~}L{~/prompty.block~}",
                ),
            ],
            "leaf",
        )
        .unwrap();
        assert_eq!(texts(&ast), "<H|BML>");
    }

    #[test]
    fn detects_cycles() {
        let err = resolve(
            &[
                ("a", "{~prompty.extends template=\"b\" /~}"),
                ("b", "{~prompty.extends template=\"a\" /~}"),
            ],
            "a",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Inheritance { .. }));
        assert!(err.to_string().contains("inheritance cycle detected: a -> b -> a"));
    }

    #[test]
    fn missing_parent_is_an_inheritance_error() {
        let err = resolve(&[("a", "{~prompty.extends template=\"nope\" /~}")], "a").unwrap_err();
        assert!(err.to_string().contains("unknown template \"nope\""));
    }

    #[test]
    fn standalone_blocks_render_their_bodies() {
        let ast = resolve(&[("solo", "a{~prompty.block name=\"x\"~}b{~/prompty.block~}c")], "solo").unwrap();
        assert_eq!(texts(&ast), "abc");
    }

    #[test]
    fn originals_are_untouched() {
        let base = Template::parse_str("base", "{~prompty.block name=\"b\"~}B{~/prompty.block~}").unwrap();
        let child = Template::parse_str(
            "child",
            "{~prompty.extends template=\"base\" /~}{~prompty.block name=\"b\"~}C{~/prompty.block~}",
        )
        .unwrap();
        let base = Arc::new(base);
        let merged = resolve_inheritance(child.ast(), 10, |_| Ok(Some(Arc::clone(&base)))).unwrap();
        assert_eq!(texts(&merged), "C");
        assert!(matches!(base.ast().root.nodes[0], Node::BlockDef(_)));
        assert!(matches!(child.ast().root.nodes[0], Node::Extends(_)));
    }
}
