use std::rc::Rc;

use super::Document;
use crate::error::CapabilityError;

/// An ordered view over nodes of one [`Document`].
///
/// A default-constructed `Selection` has no document: it is the nil handle.
/// Traversal, filtering and predicates on it fail with
/// [`CapabilityError::InvalidHandle`]; `html()` and `text()` degrade to
/// empty values. A selection over a document with no nodes is valid.
#[derive(Clone)]
pub struct Selection {
    doc: Option<Rc<Document>>,
    nodes: Rc<[usize]>,
    prev: Option<Rc<Selection>>,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("valid", &self.doc.is_some())
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            doc: None,
            nodes: Rc::from(Vec::new()),
            prev: None,
        }
    }
}

impl Selection {
    /// Parse HTML and return the root selection (the document node).
    pub fn parse(html: &str) -> Self {
        Self::root(Document::parse(html))
    }

    pub fn root(doc: Rc<Document>) -> Self {
        let nodes = if doc.is_empty() { Vec::new() } else { vec![0] };
        Self {
            doc: Some(doc),
            nodes: nodes.into(),
            prev: None,
        }
    }

    /// Rebuild a selection from raw arena indices handed back by a sandbox.
    /// Any index outside the document makes the handle invalid.
    pub fn from_parts(doc: Rc<Document>, mut nodes: Vec<usize>) -> Result<Self, CapabilityError> {
        if nodes.iter().any(|&n| n >= doc.len()) {
            return Err(CapabilityError::InvalidHandle);
        }
        nodes.sort_unstable();
        nodes.dedup();
        Ok(Self {
            doc: Some(doc),
            nodes: nodes.into(),
            prev: None,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.doc.is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Arena indices in document order.
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn document(&self) -> Option<&Rc<Document>> {
        self.doc.as_ref()
    }

    fn doc(&self) -> Result<&Rc<Document>, CapabilityError> {
        self.doc.as_ref().ok_or(CapabilityError::InvalidHandle)
    }

    /// The receiver becomes `prev`; cloning it only bumps reference counts.
    fn derive(&self, mut nodes: Vec<usize>) -> Self {
        nodes.sort_unstable();
        nodes.dedup();
        Self {
            doc: self.doc.clone(),
            nodes: nodes.into(),
            prev: Some(Rc::new(self.clone())),
        }
    }

    /// Keep `candidates` that match `selector`, or all of them when no
    /// selector is given.
    fn filtered(
        doc: &Document,
        candidates: Vec<usize>,
        selector: Option<&str>,
    ) -> Result<Vec<usize>, CapabilityError> {
        match selector {
            None => Ok(candidates),
            Some(selector) => {
                let mask = doc.matcher(selector)?;
                Ok(candidates.into_iter().filter(|&n| mask[n]).collect())
            }
        }
    }

    // ── Traversal ────────────────────────────────────────────────────

    pub fn find(&self, selector: &str) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let mask = doc.matcher(selector)?;
        let found = self
            .nodes
            .iter()
            .flat_map(|&n| doc.descendants(n))
            .filter(|&d| mask[d])
            .collect();
        Ok(self.derive(found))
    }

    pub fn children(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let children = self
            .nodes
            .iter()
            .flat_map(|&n| doc.children(n).iter().copied())
            .filter(|&c| doc.is_element(c))
            .collect();
        Ok(self.derive(Self::filtered(doc, children, selector)?))
    }

    pub fn contents(&self) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let contents = self
            .nodes
            .iter()
            .flat_map(|&n| doc.children(n).iter().copied())
            .collect();
        Ok(self.derive(contents))
    }

    /// Children matching `selector`; an empty selector is `contents()`.
    pub fn contents_filtered(&self, selector: &str) -> Result<Self, CapabilityError> {
        if selector.is_empty() {
            return self.contents();
        }
        self.children(Some(selector))
    }

    pub fn parent(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let parents = self
            .nodes
            .iter()
            .filter_map(|&n| doc.parent(n))
            .filter(|&p| doc.is_element(p))
            .collect();
        Ok(self.derive(Self::filtered(doc, parents, selector)?))
    }

    pub fn parents(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let mut ancestors = Vec::new();
        for &n in self.nodes.iter() {
            let mut current = doc.parent(n);
            while let Some(p) = current {
                if doc.is_element(p) {
                    ancestors.push(p);
                }
                current = doc.parent(p);
            }
        }
        Ok(self.derive(Self::filtered(doc, ancestors, selector)?))
    }

    /// Ancestors up to but excluding the first one matching `until`,
    /// optionally filtered by `selector`.
    pub fn parents_until(
        &self,
        until: &str,
        selector: Option<&str>,
    ) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let stop = doc.matcher(until)?;
        let mut ancestors = Vec::new();
        for &n in self.nodes.iter() {
            let mut current = doc.parent(n);
            while let Some(p) = current {
                if !doc.is_element(p) || stop[p] {
                    break;
                }
                ancestors.push(p);
                current = doc.parent(p);
            }
        }
        Ok(self.derive(Self::filtered(doc, ancestors, selector)?))
    }

    pub fn closest(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let mask = doc.matcher(selector.unwrap_or(""))?;
        let mut found = Vec::new();
        for &n in self.nodes.iter() {
            let mut current = Some(n);
            while let Some(c) = current {
                if mask[c] {
                    found.push(c);
                    break;
                }
                current = doc.parent(c);
            }
        }
        Ok(self.derive(found))
    }

    pub fn next(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        self.sibling_walk(selector, |doc, n| {
            let (_, after) = doc.element_siblings(n);
            after.into_iter().take(1).collect()
        })
    }

    pub fn prev(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        self.sibling_walk(selector, |doc, n| {
            let (before, _) = doc.element_siblings(n);
            before.last().copied().into_iter().collect()
        })
    }

    pub fn next_all(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        self.sibling_walk(selector, |doc, n| doc.element_siblings(n).1)
    }

    pub fn prev_all(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        self.sibling_walk(selector, |doc, n| doc.element_siblings(n).0)
    }

    pub fn siblings(&self, selector: Option<&str>) -> Result<Self, CapabilityError> {
        self.sibling_walk(selector, |doc, n| {
            let (mut before, after) = doc.element_siblings(n);
            before.extend(after);
            before
        })
    }

    /// Following siblings up to but excluding the first matching `until`.
    pub fn next_until(&self, until: &str, selector: Option<&str>) -> Result<Self, CapabilityError> {
        let stop = self.doc()?.matcher(until)?;
        self.sibling_walk(selector, |doc, n| {
            doc.element_siblings(n)
                .1
                .into_iter()
                .take_while(|&s| !stop[s])
                .collect()
        })
    }

    /// Preceding siblings, nearest first, up to but excluding the first
    /// matching `until`.
    pub fn prev_until(&self, until: &str, selector: Option<&str>) -> Result<Self, CapabilityError> {
        let stop = self.doc()?.matcher(until)?;
        self.sibling_walk(selector, |doc, n| {
            doc.element_siblings(n)
                .0
                .into_iter()
                .rev()
                .take_while(|&s| !stop[s])
                .collect()
        })
    }

    fn sibling_walk(
        &self,
        selector: Option<&str>,
        walk: impl Fn(&Document, usize) -> Vec<usize>,
    ) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let found = self.nodes.iter().flat_map(|&n| walk(doc, n)).collect();
        Ok(self.derive(Self::filtered(doc, found, selector)?))
    }

    // ── Filtering ────────────────────────────────────────────────────

    pub fn filter(&self, selector: &str) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        Ok(self.derive(Self::filtered(doc, self.nodes.to_vec(), Some(selector))?))
    }

    /// Exact complement of [`Selection::filter`] within this set.
    pub fn not(&self, selector: &str) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let mask = doc.matcher(selector)?;
        Ok(self.derive(self.nodes.iter().copied().filter(|&n| !mask[n]).collect()))
    }

    pub fn is(&self, selector: &str) -> Result<bool, CapabilityError> {
        let doc = self.doc()?;
        let mask = doc.matcher(selector)?;
        Ok(self.nodes.iter().any(|&n| mask[n]))
    }

    pub fn has(&self, selector: &str) -> Result<Self, CapabilityError> {
        let doc = self.doc()?;
        let mask = doc.matcher(selector)?;
        let kept = self
            .nodes
            .iter()
            .copied()
            .filter(|&n| doc.descendants(n).any(|d| mask[d]))
            .collect();
        Ok(self.derive(kept))
    }

    /// Keep the nodes for which `predicate(index, single)` is true.
    pub fn filter_with<E: From<CapabilityError>>(
        &self,
        predicate: impl FnMut(usize, Selection) -> Result<bool, E>,
    ) -> Result<Self, E> {
        let kept = self.partition_with(predicate)?;
        Ok(self.derive(kept))
    }

    pub fn not_with<E: From<CapabilityError>>(
        &self,
        predicate: impl FnMut(usize, Selection) -> Result<bool, E>,
    ) -> Result<Self, E> {
        let kept = self.partition_with(predicate)?;
        let rest = self
            .nodes
            .iter()
            .copied()
            .filter(|n| kept.binary_search(n).is_err())
            .collect();
        Ok(self.derive(rest))
    }

    pub fn is_with<E: From<CapabilityError>>(
        &self,
        mut predicate: impl FnMut(usize, Selection) -> Result<bool, E>,
    ) -> Result<bool, E> {
        self.doc()?;
        for (i, &node) in self.nodes.iter().enumerate() {
            if predicate(i, self.single(node))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn partition_with<E: From<CapabilityError>>(
        &self,
        mut predicate: impl FnMut(usize, Selection) -> Result<bool, E>,
    ) -> Result<Vec<usize>, E> {
        self.doc()?;
        let mut kept = Vec::new();
        for (i, &node) in self.nodes.iter().enumerate() {
            if predicate(i, self.single(node))? {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    // ── Iteration ────────────────────────────────────────────────────

    /// Call `f(index, single)` for every node in document order.
    pub fn each<E: From<CapabilityError>>(
        &self,
        mut f: impl FnMut(usize, Selection) -> Result<(), E>,
    ) -> Result<&Self, E> {
        self.doc()?;
        for (i, &node) in self.nodes.iter().enumerate() {
            f(i, self.single(node))?;
        }
        Ok(self)
    }

    pub fn map<T, E: From<CapabilityError>>(
        &self,
        mut f: impl FnMut(usize, Selection) -> Result<T, E>,
    ) -> Result<Vec<T>, E> {
        self.doc()?;
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, &node)| f(i, self.single(node)))
            .collect()
    }

    fn single(&self, node: usize) -> Selection {
        self.derive(vec![node])
    }

    // ── Reduction ────────────────────────────────────────────────────

    pub fn first(&self) -> Result<Self, CapabilityError> {
        self.eq(0)
    }

    pub fn last(&self) -> Result<Self, CapabilityError> {
        self.eq(-1)
    }

    /// Node at `index`; negative indices count from the end. Out of range
    /// gives an empty selection.
    pub fn eq(&self, index: i64) -> Result<Self, CapabilityError> {
        self.doc()?;
        let len = self.nodes.len() as i64;
        let resolved = if index < 0 { len + index } else { index };
        let picked = if (0..len).contains(&resolved) {
            vec![self.nodes[resolved as usize]]
        } else {
            Vec::new()
        };
        Ok(self.derive(picked))
    }

    /// The selection this one was derived from, or an empty one.
    pub fn end(&self) -> Result<Self, CapabilityError> {
        self.doc()?;
        Ok(match &self.prev {
            Some(prev) => prev.as_ref().clone(),
            None => Self {
                doc: self.doc.clone(),
                nodes: Rc::from(Vec::new()),
                prev: None,
            },
        })
    }

    // ── Content ──────────────────────────────────────────────────────

    /// Inner HTML of the first node; `None` when empty or nil.
    pub fn html(&self) -> Option<String> {
        let doc = self.doc.as_ref()?;
        self.nodes.first().map(|&n| doc.inner_html(n))
    }

    /// Concatenated text of every node; empty when empty or nil.
    pub fn text(&self) -> String {
        let mut out = String::new();
        if let Some(doc) = &self.doc {
            for &n in self.nodes.iter() {
                doc.text(n, &mut out);
            }
        }
        out
    }

    /// Attribute of the first node; `Ok(None)` when absent or empty.
    pub fn attr(&self, name: &str) -> Result<Option<String>, CapabilityError> {
        let doc = self.doc()?;
        Ok(self.nodes.first().and_then(|&n| doc.attr(n, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = r#"
        <ul id="list">
            <li class="a" data-n="1">one</li>
            <li class="b">two</li>
            <li class="a stop">three</li>
            <li class="b">four <span>deep</span></li>
        </ul>
        <p>outside</p>
    "#;

    fn texts(sel: &Selection) -> Vec<String> {
        sel.map(|_, s| Ok::<_, CapabilityError>(s.text())).unwrap()
    }

    #[test]
    fn test_find_two_paragraphs_in_order() {
        let root = Selection::parse("<div><p>a</p><p>b</p></div>");
        let ps = root.find("p").unwrap();
        assert_eq!(ps.len(), 2);
        assert_eq!(ps.eq(1).unwrap().text(), "b");
        assert_eq!(texts(&ps), vec!["a", "b"]);
    }

    #[test]
    fn test_find_excludes_receiver() {
        let root = Selection::parse("<div><div><div></div></div></div>");
        let outer = root.find("body > div").unwrap();
        assert_eq!(outer.len(), 1);
        let inner = outer.find("div").unwrap();
        assert_eq!(inner.len(), 2);
        assert!(!inner.nodes().contains(&outer.nodes()[0]));
    }

    #[test]
    fn test_children_are_direct_only() {
        let root = Selection::parse(LIST);
        let ul = root.find("ul").unwrap();
        let children = ul.children(None).unwrap();
        assert_eq!(children.len(), 4);
        let doc = ul.document().unwrap();
        for &c in children.nodes() {
            assert_eq!(doc.parent(c), Some(ul.nodes()[0]));
        }
        assert_eq!(ul.children(Some(".a")).unwrap().len(), 2);
    }

    #[test]
    fn test_siblings_exclude_self() {
        let root = Selection::parse(LIST);
        let second = root.find("li").unwrap().eq(1).unwrap();
        let siblings = second.siblings(None).unwrap();
        assert_eq!(siblings.len(), 3);
        assert!(!siblings.nodes().contains(&second.nodes()[0]));
    }

    #[test]
    fn test_filter_and_not_partition() {
        let root = Selection::parse(LIST);
        let items = root.find("li").unwrap();
        let a = items.filter(".a").unwrap();
        let not_a = items.not(".a").unwrap();
        assert_eq!(a.len() + not_a.len(), items.len());
        for n in a.nodes() {
            assert!(items.nodes().contains(n));
            assert!(!not_a.nodes().contains(n));
        }
    }

    #[test]
    fn test_eq_negative_and_out_of_range() {
        let root = Selection::parse(LIST);
        let items = root.find("li").unwrap();
        assert_eq!(items.eq(-1).unwrap().nodes(), items.last().unwrap().nodes());
        assert!(items.eq(4).unwrap().is_empty());
        assert!(items.eq(-5).unwrap().is_empty());
    }

    #[test]
    fn test_parents_and_closest() {
        let root = Selection::parse(LIST);
        let span = root.find("span").unwrap();
        assert_eq!(span.parent(None).unwrap().attr("class").unwrap().as_deref(), Some("b"));
        // li, ul, body, html
        assert_eq!(span.parents(None).unwrap().len(), 4);
        assert_eq!(span.closest(Some("ul")).unwrap().attr("id").unwrap().as_deref(), Some("list"));
        assert!(span.closest(None).unwrap().is_empty());
        let until_body = span.parents_until("body", None).unwrap();
        assert_eq!(until_body.len(), 2);
    }

    #[test]
    fn test_sibling_ranges() {
        let root = Selection::parse(LIST);
        let first = root.find("li").unwrap().first().unwrap();
        assert_eq!(texts(&first.next(None).unwrap()), vec!["two"]);
        assert_eq!(first.next_all(None).unwrap().len(), 3);
        assert_eq!(texts(&first.next_until(".stop", None).unwrap()), vec!["two"]);
        let last = root.find("li").unwrap().last().unwrap();
        assert_eq!(last.prev_all(Some(".a")).unwrap().len(), 2);
        assert_eq!(last.prev_until(".stop", None).unwrap().len(), 0);
        assert!(first.prev(None).unwrap().is_empty());
    }

    #[test]
    fn test_has_and_is() {
        let root = Selection::parse(LIST);
        let items = root.find("li").unwrap();
        assert_eq!(texts(&items.has("span").unwrap()), vec!["four deep"]);
        assert!(items.is(".stop").unwrap());
        assert!(!items.is("p").unwrap());
    }

    #[test]
    fn test_contents_include_text_nodes() {
        let root = Selection::parse("<div>hi<!--c--><b>x</b></div>");
        let div = root.find("div").unwrap();
        assert_eq!(div.contents().unwrap().len(), 3);
        assert_eq!(div.contents_filtered("b").unwrap().len(), 1);
        assert_eq!(div.contents_filtered("").unwrap().len(), 3);
    }

    #[test]
    fn test_predicate_variants() {
        let root = Selection::parse(LIST);
        let items = root.find("li").unwrap();
        let even = items
            .filter_with(|i, _| Ok::<_, CapabilityError>(i % 2 == 0))
            .unwrap();
        let odd = items
            .not_with(|i, _| Ok::<_, CapabilityError>(i % 2 == 0))
            .unwrap();
        assert_eq!(texts(&even), vec!["one", "three"]);
        assert_eq!(odd.len(), 2);
        assert!(items
            .is_with(|_, s| Ok::<_, CapabilityError>(s.text() == "two"))
            .unwrap());
    }

    #[test]
    fn test_end_returns_previous() {
        let root = Selection::parse(LIST);
        let items = root.find("li").unwrap();
        let filtered = items.filter(".a").unwrap();
        assert_eq!(filtered.end().unwrap().nodes(), items.nodes());
        assert!(root.end().unwrap().is_empty());
    }

    #[test]
    fn test_html_text_attr() {
        let root = Selection::parse(LIST);
        let first = root.find("li").unwrap().first().unwrap();
        assert_eq!(first.html().as_deref(), Some("one"));
        assert_eq!(first.attr("data-n").unwrap().as_deref(), Some("1"));
        assert_eq!(first.attr("missing").unwrap(), None);
        assert!(root.html().unwrap().contains("<ul id=\"list\">"));
    }

    #[test]
    fn test_empty_selection_degrades() {
        let root = Selection::parse(LIST);
        let none = root.find("table").unwrap();
        assert!(none.is_valid());
        assert!(none.is_empty());
        assert_eq!(none.html(), None);
        assert_eq!(none.text(), "");
        assert_eq!(none.attr("id").unwrap(), None);
        assert!(none.find("td").unwrap().is_empty());
    }

    #[test]
    fn test_nil_selection_fails_fast() {
        let nil = Selection::default();
        assert_eq!(nil.find("p").unwrap_err(), CapabilityError::InvalidHandle);
        assert_eq!(nil.children(None).unwrap_err(), CapabilityError::InvalidHandle);
        assert_eq!(nil.is("p").unwrap_err(), CapabilityError::InvalidHandle);
        assert_eq!(nil.eq(0).unwrap_err(), CapabilityError::InvalidHandle);
        assert_eq!(nil.attr("id").unwrap_err(), CapabilityError::InvalidHandle);
        assert!(nil
            .each(|_, _| Ok::<_, CapabilityError>(()))
            .is_err());
        assert_eq!(nil.html(), None);
        assert_eq!(nil.text(), "");
    }

    #[test]
    fn test_each_over_large_selection_shares_nodes() {
        let html = format!("<ul>{}</ul>", "<li>x</li>".repeat(10_000));
        let items = Selection::parse(&html).find("li").unwrap();
        assert_eq!(items.len(), 10_000);

        let mut seen = 0;
        items
            .each(|i, single| {
                assert_eq!(single.nodes(), &[items.nodes()[i]]);
                let prev = single.prev.as_ref().unwrap();
                assert!(Rc::ptr_eq(&prev.nodes, &items.nodes));
                seen += 1;
                Ok::<_, CapabilityError>(())
            })
            .unwrap();
        assert_eq!(seen, 10_000);

        let texts = items.map(|_, single| Ok::<_, CapabilityError>(single.text())).unwrap();
        assert!(texts.iter().all(|t| t == "x"));
    }

    #[test]
    fn test_from_parts_rejects_foreign_indices() {
        let doc = Document::parse("<p>a</p>");
        let len = doc.len();
        assert!(Selection::from_parts(doc.clone(), vec![len]).is_err());
        let sel = Selection::from_parts(doc, vec![3, 1, 3]).unwrap();
        assert_eq!(sel.nodes(), &[1, 3]);
    }
}
