//! HTML document capability.
//!
//! A [`Document`] is parsed once with `scraper` and flattened into a
//! pre-order arena, so every node is addressed by its document-order index.
//! A [`Selection`] is a reference to its document plus a sorted list of
//! arena indices. Sandboxes only ever hold these inert values, never a
//! pointer into the parsed tree.

mod bridge;
mod selection;

pub use bridge::{DocumentTable, Method};
pub use selection::Selection;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::CapabilityError;

#[derive(Debug)]
enum NodeKind {
    Document,
    Element { attrs: Vec<(String, String)> },
    Text(String),
    Comment(String),
    Doctype(String),
    Other,
}

#[derive(Debug)]
struct NodeInfo {
    id: NodeId,
    parent: Option<usize>,
    children: Vec<usize>,
    /// One past the last descendant in pre-order.
    end: usize,
    kind: NodeKind,
}

/// A parsed HTML document.
pub struct Document {
    html: Html,
    nodes: Vec<NodeInfo>,
    /// Selector string -> per-node match mask.
    matches: RefCell<HashMap<String, Rc<[bool]>>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl Document {
    /// Parse an HTML string. The HTML5 parser recovers from any malformed
    /// input, so this never fails.
    pub fn parse(source: &str) -> Rc<Self> {
        let html = Html::parse_document(source);
        let mut index_of = HashMap::new();
        let mut nodes: Vec<NodeInfo> = Vec::new();

        for (index, node) in html.tree.root().descendants().enumerate() {
            index_of.insert(node.id(), index);
            let parent = node.parent().and_then(|p| index_of.get(&p.id()).copied());
            if let Some(parent) = parent {
                nodes[parent].children.push(index);
            }
            let kind = match node.value() {
                Node::Document | Node::Fragment => NodeKind::Document,
                Node::Element(element) => NodeKind::Element {
                    attrs: element
                        .attrs()
                        .map(|(name, value)| (name.to_owned(), value.to_owned()))
                        .collect(),
                },
                Node::Text(text) => NodeKind::Text(String::from(&**text)),
                Node::Comment(comment) => NodeKind::Comment(String::from(&**comment)),
                Node::Doctype(doctype) => NodeKind::Doctype(doctype.name().to_owned()),
                _ => NodeKind::Other,
            };
            nodes.push(NodeInfo {
                id: node.id(),
                parent,
                children: Vec::new(),
                end: index + 1,
                kind,
            });
        }

        for index in (0..nodes.len()).rev() {
            if let Some(&last) = nodes[index].children.last() {
                nodes[index].end = nodes[last].end;
            }
        }

        Rc::new(Self {
            html,
            nodes,
            matches: RefCell::new(HashMap::new()),
        })
    }

    /// Number of nodes in the arena, the document node included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn is_element(&self, index: usize) -> bool {
        matches!(self.nodes[index].kind, NodeKind::Element { .. })
    }

    pub(crate) fn parent(&self, index: usize) -> Option<usize> {
        self.nodes[index].parent
    }

    pub(crate) fn children(&self, index: usize) -> &[usize] {
        &self.nodes[index].children
    }

    /// Indices of all descendants of `index`, excluding itself.
    pub(crate) fn descendants(&self, index: usize) -> std::ops::Range<usize> {
        index + 1..self.nodes[index].end
    }

    /// Element siblings of `index`, in document order, excluding itself.
    pub(crate) fn element_siblings(&self, index: usize) -> (Vec<usize>, Vec<usize>) {
        let Some(parent) = self.parent(index) else {
            return (Vec::new(), Vec::new());
        };
        let siblings = self.children(parent);
        let position = siblings.iter().position(|&s| s == index).unwrap_or(0);
        let before = siblings[..position]
            .iter()
            .copied()
            .filter(|&s| self.is_element(s))
            .collect();
        let after = siblings[position + 1..]
            .iter()
            .copied()
            .filter(|&s| self.is_element(s))
            .collect();
        (before, after)
    }

    /// Per-node match mask for a CSS selector. An empty selector matches
    /// nothing; an unparsable one is an error.
    pub(crate) fn matcher(&self, selector: &str) -> Result<Rc<[bool]>, CapabilityError> {
        if let Some(mask) = self.matches.borrow().get(selector) {
            return Ok(mask.clone());
        }

        let mask: Rc<[bool]> = if selector.trim().is_empty() {
            vec![false; self.nodes.len()].into()
        } else {
            let compiled =
                Selector::parse(selector).map_err(|e| CapabilityError::InvalidSelector {
                    selector: selector.to_owned(),
                    reason: format!("{e:?}"),
                })?;
            self.html
                .tree
                .root()
                .descendants()
                .map(|node| ElementRef::wrap(node).is_some_and(|el| compiled.matches(&el)))
                .collect()
        };

        self.matches
            .borrow_mut()
            .insert(selector.to_owned(), mask.clone());
        Ok(mask)
    }

    pub(crate) fn attr(&self, index: usize, name: &str) -> Option<String> {
        match &self.nodes[index].kind {
            NodeKind::Element { attrs } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone()),
            _ => None,
        }
    }

    /// Concatenated text of the node and all of its descendants.
    pub(crate) fn text(&self, index: usize, out: &mut String) {
        for i in index..self.nodes[index].end {
            if let NodeKind::Text(text) = &self.nodes[i].kind {
                out.push_str(text);
            }
        }
    }

    /// Serialized children of the node.
    pub(crate) fn inner_html(&self, index: usize) -> String {
        match &self.nodes[index].kind {
            NodeKind::Element { .. } => self
                .element(index)
                .map(|el| el.inner_html())
                .unwrap_or_default(),
            NodeKind::Document => self
                .children(index)
                .iter()
                .map(|&child| self.outer_html(child))
                .collect(),
            _ => String::new(),
        }
    }

    fn outer_html(&self, index: usize) -> String {
        match &self.nodes[index].kind {
            NodeKind::Element { .. } => self.element(index).map(|el| el.html()).unwrap_or_default(),
            NodeKind::Text(text) => escape_text(text),
            NodeKind::Comment(comment) => format!("<!--{comment}-->"),
            NodeKind::Doctype(name) => format!("<!DOCTYPE {name}>"),
            NodeKind::Document => self.inner_html(index),
            NodeKind::Other => String::new(),
        }
    }

    fn element(&self, index: usize) -> Option<ElementRef<'_>> {
        self.html
            .tree
            .get(self.nodes[index].id)
            .and_then(ElementRef::wrap)
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}
