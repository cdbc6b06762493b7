//! String-in, string-out access to documents for engines that cannot hold
//! Rust values directly.
//!
//! A request names a document by table id and a selection by its arena
//! indices. Every reply is either `{"ok": <value>}` or `{"err": "<message>"}`.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Document, Selection};
use crate::error::CapabilityError;

/// Selection methods that produce another selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Find,
    Children,
    Contents,
    ContentsFiltered,
    Parent,
    Parents,
    ParentsUntil,
    Closest,
    Next,
    Prev,
    NextAll,
    PrevAll,
    NextUntil,
    PrevUntil,
    Siblings,
    Filter,
    Not,
    Has,
    First,
    Last,
    Eq,
}

impl Method {
    /// Methods whose only argument is an optional filter selector.
    pub const OPTIONAL_FILTER: [Method; 9] = [
        Method::Children,
        Method::Parent,
        Method::Parents,
        Method::Closest,
        Method::Next,
        Method::Prev,
        Method::NextAll,
        Method::PrevAll,
        Method::Siblings,
    ];

    /// snake_case name, as exposed to the restricted interpreter.
    pub fn snake_name(self) -> &'static str {
        match self {
            Method::Find => "find",
            Method::Children => "children",
            Method::Contents => "contents",
            Method::ContentsFiltered => "contents_filtered",
            Method::Parent => "parent",
            Method::Parents => "parents",
            Method::ParentsUntil => "parents_until",
            Method::Closest => "closest",
            Method::Next => "next",
            Method::Prev => "prev",
            Method::NextAll => "next_all",
            Method::PrevAll => "prev_all",
            Method::NextUntil => "next_until",
            Method::PrevUntil => "prev_until",
            Method::Siblings => "siblings",
            Method::Filter => "filter",
            Method::Not => "not",
            Method::Has => "has",
            Method::First => "first",
            Method::Last => "last",
            Method::Eq => "eq",
        }
    }

    pub fn apply(
        self,
        sel: &Selection,
        selector: Option<&str>,
        until: Option<&str>,
        index: Option<i64>,
    ) -> Result<Selection, CapabilityError> {
        let required = || selector.ok_or(CapabilityError::MissingArgument("selector"));
        let stop = || until.ok_or(CapabilityError::MissingArgument("until"));
        match self {
            Method::Find => sel.find(required()?),
            Method::Children => sel.children(selector),
            Method::Contents => sel.contents(),
            Method::ContentsFiltered => sel.contents_filtered(selector.unwrap_or("")),
            Method::Parent => sel.parent(selector),
            Method::Parents => sel.parents(selector),
            Method::ParentsUntil => sel.parents_until(stop()?, selector),
            Method::Closest => sel.closest(selector),
            Method::Next => sel.next(selector),
            Method::Prev => sel.prev(selector),
            Method::NextAll => sel.next_all(selector),
            Method::PrevAll => sel.prev_all(selector),
            Method::NextUntil => sel.next_until(stop()?, selector),
            Method::PrevUntil => sel.prev_until(stop()?, selector),
            Method::Siblings => sel.siblings(selector),
            Method::Filter => sel.filter(required()?),
            Method::Not => sel.not(required()?),
            Method::Has => sel.has(required()?),
            Method::First => sel.first(),
            Method::Last => sel.last(),
            Method::Eq => sel.eq(index.ok_or(CapabilityError::MissingArgument("index"))?),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum DocRequest {
    Parse {
        html: String,
    },
    Select {
        doc: Option<u32>,
        nodes: Vec<usize>,
        method: Method,
        selector: Option<String>,
        until: Option<String>,
        index: Option<i64>,
    },
    Is {
        doc: Option<u32>,
        nodes: Vec<usize>,
        selector: String,
    },
    Html {
        doc: Option<u32>,
        nodes: Vec<usize>,
    },
    Text {
        doc: Option<u32>,
        nodes: Vec<usize>,
    },
    Attr {
        doc: Option<u32>,
        nodes: Vec<usize>,
        name: String,
    },
}

/// Documents parsed during one top-level invocation.
///
/// Ids are never reused for the life of the table, so a handle kept across
/// invocations resolves to nothing once [`DocumentTable::clear`] has run.
#[derive(Debug, Default)]
pub struct DocumentTable {
    next_id: u32,
    docs: HashMap<u32, Rc<Document>>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Drop every document. Outstanding handles become invalid.
    pub fn clear(&mut self) {
        self.docs.clear();
    }

    /// Serve one JSON request and return the JSON reply.
    pub fn handle(&mut self, request: &str) -> String {
        let reply = match serde_json::from_str::<DocRequest>(request) {
            Ok(request) => self.dispatch(request),
            Err(e) => Err(CapabilityError::TypeMismatch(e.to_string())),
        };
        match reply {
            Ok(value) => json!({ "ok": value }),
            Err(e) => json!({ "err": e.to_string() }),
        }
        .to_string()
    }

    fn dispatch(&mut self, request: DocRequest) -> Result<Value, CapabilityError> {
        match request {
            DocRequest::Parse { html } => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                let doc = Document::parse(&html);
                let root = Selection::root(doc.clone());
                self.docs.insert(id, doc);
                Ok(json!({ "doc": id, "nodes": root.nodes() }))
            }
            DocRequest::Select {
                doc,
                nodes,
                method,
                selector,
                until,
                index,
            } => {
                let sel = self.resolve(doc, nodes)?;
                let next = method.apply(&sel, selector.as_deref(), until.as_deref(), index)?;
                Ok(json!({ "doc": doc, "nodes": next.nodes() }))
            }
            DocRequest::Is {
                doc,
                nodes,
                selector,
            } => Ok(Value::Bool(self.resolve(doc, nodes)?.is(&selector)?)),
            // nil or stale handles degrade for content reads
            DocRequest::Html { doc, nodes } => Ok(self
                .resolve(doc, nodes)
                .ok()
                .and_then(|sel| sel.html())
                .map_or(Value::Null, Value::String)),
            DocRequest::Text { doc, nodes } => Ok(Value::String(
                self.resolve(doc, nodes)
                    .map(|sel| sel.text())
                    .unwrap_or_default(),
            )),
            DocRequest::Attr { doc, nodes, name } => Ok(self
                .resolve(doc, nodes)?
                .attr(&name)?
                .map_or(Value::Null, Value::String)),
        }
    }

    fn resolve(&self, doc: Option<u32>, nodes: Vec<usize>) -> Result<Selection, CapabilityError> {
        let doc = doc
            .and_then(|id| self.docs.get(&id))
            .ok_or(CapabilityError::InvalidHandle)?;
        Selection::from_parts(doc.clone(), nodes)
    }
}
