//! In-memory element tree standing in for the host page

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

use super::selector::Selector;

/// Identifier of a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

/// An element with attributes, text content and children
#[derive(Debug, Clone, Serialize)]
pub struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    #[serde(skip)]
    children: Vec<NodeId>,
    #[serde(skip)]
    parent: Option<NodeId>,
}

impl Element {
    /// Create a detached element
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    /// Set an attribute
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the text content
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<NodeId, Element>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    next_id: u64,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Self {
            nodes: BTreeMap::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            next_id: 0,
        };
        let root = tree.insert(None, Element::new("html"));
        tree.root = root;
        tree.head = tree.insert(Some(root), Element::new("head"));
        tree.body = tree.insert(Some(root), Element::new("body"));
        tree
    }

    fn insert(&mut self, parent: Option<NodeId>, mut element: Element) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        element.parent = parent;
        element.children.clear();
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.push(id);
        }
        self.nodes.insert(id, element);
        id
    }

    fn remove_subtree(&mut self, id: NodeId) {
        if let Some(element) = self.nodes.remove(&id) {
            for child in element.children {
                self.remove_subtree(child);
            }
        }
    }

    /// Node ids in document order
    fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(el) = self.nodes.get(&id) {
                stack.extend(el.children.iter().rev().copied());
            }
        }
        order
    }
}

/// Shared handle to the host page's element tree
#[derive(Debug, Clone)]
pub struct Document {
    tree: Arc<Mutex<Tree>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty page with `html`, `head` and `body`
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Create a page whose body holds one empty `div` per id
    pub fn with_mount_points<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let doc = Self::new();
        for id in ids {
            doc.append_to_body(Element::new("div").with_attr("id", id.as_ref()));
        }
        doc
    }

    pub fn head(&self) -> NodeId {
        self.tree.lock().head
    }

    pub fn body(&self) -> NodeId {
        self.tree.lock().body
    }

    /// Append an element under `parent`; `None` if the parent is gone
    pub fn append_child(&self, parent: NodeId, element: Element) -> Option<NodeId> {
        let mut tree = self.tree.lock();
        if !tree.nodes.contains_key(&parent) {
            return None;
        }
        Some(tree.insert(Some(parent), element))
    }

    /// Append an element to `head`
    pub fn append_to_head(&self, element: Element) -> NodeId {
        let mut tree = self.tree.lock();
        let head = tree.head;
        tree.insert(Some(head), element)
    }

    /// Append an element to `body`
    pub fn append_to_body(&self, element: Element) -> NodeId {
        let mut tree = self.tree.lock();
        let body = tree.body;
        tree.insert(Some(body), element)
    }

    /// Detach and drop a node and its subtree. The skeleton cannot be removed.
    pub fn remove(&self, id: NodeId) -> bool {
        let mut tree = self.tree.lock();
        if id == tree.root || id == tree.head || id == tree.body {
            return false;
        }
        let Some(parent) = tree.nodes.get(&id).map(|el| el.parent) else {
            return false;
        };
        if let Some(p) = parent.and_then(|p| tree.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        tree.remove_subtree(id);
        true
    }

    /// Whether the node is still attached
    pub fn contains(&self, id: NodeId) -> bool {
        self.tree.lock().nodes.contains_key(&id)
    }

    /// Copy of an element
    pub fn element(&self, id: NodeId) -> Option<Element> {
        self.tree.lock().nodes.get(&id).cloned()
    }

    /// Replace the text content of a node
    pub fn set_text(&self, id: NodeId, text: &str) -> bool {
        match self.tree.lock().nodes.get_mut(&id) {
            Some(el) => {
                el.text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Set an attribute on a node
    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) -> bool {
        match self.tree.lock().nodes.get_mut(&id) {
            Some(el) => {
                el.attributes.insert(name.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove an attribute from a node
    pub fn remove_attribute(&self, id: NodeId, name: &str) -> bool {
        self.tree
            .lock()
            .nodes
            .get_mut(&id)
            .and_then(|el| el.attributes.remove(name))
            .is_some()
    }

    /// First element matching the selector, in document order
    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.select(&selector).into_iter().next())
    }

    /// Every element matching the selector, in document order
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        Ok(self.select(&selector))
    }

    /// Every element matching an already parsed selector
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        let tree = self.tree.lock();
        tree.walk()
            .into_iter()
            .filter(|id| tree.nodes.get(id).is_some_and(|el| selector.matches(el)))
            .collect()
    }

    /// Markup-like outline of the page, one element per line
    pub fn outline(&self) -> Vec<String> {
        let tree = self.tree.lock();
        let mut lines = Vec::new();
        outline_node(&tree, tree.root, 0, &mut lines);
        lines
    }
}

fn outline_node(tree: &Tree, id: NodeId, depth: usize, lines: &mut Vec<String>) {
    let Some(el) = tree.nodes.get(&id) else {
        return;
    };

    let mut line = format!("{}<{}", "  ".repeat(depth), el.tag);
    for (name, value) in &el.attributes {
        line.push_str(&format!(" {}=\"{}\"", name, value));
    }
    line.push('>');
    if !el.text.is_empty() {
        line.push_str(&el.text);
    }
    lines.push(line);

    for child in &el.children {
        outline_node(tree, *child, depth + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skeleton() {
        let doc = Document::new();
        assert_eq!(doc.element(doc.head()).unwrap().tag(), "head");
        assert_eq!(doc.element(doc.body()).unwrap().tag(), "body");
        assert!(!doc.remove(doc.head()));
    }

    #[test]
    fn test_append_and_query() {
        let doc = Document::with_mount_points(["alpha", "beta"]);
        let link = doc.append_to_head(
            Element::new("link")
                .with_attr("rel", "stylesheet")
                .with_attr("data-micro-app", "alpha"),
        );

        assert!(doc.query_selector("#beta").unwrap().is_some());
        assert_eq!(
            doc.query_selector_all(r#"link[data-micro-app="alpha"]"#).unwrap(),
            vec![link]
        );
        assert!(doc.query_selector("#gamma").unwrap().is_none());
    }

    #[test]
    fn test_document_order() {
        let doc = Document::new();
        let first = doc.append_to_body(Element::new("div").with_attr("class", "x"));
        let nested = doc
            .append_child(first, Element::new("div").with_attr("class", "x"))
            .unwrap();
        let second = doc.append_to_body(Element::new("div").with_attr("class", "x"));
        assert_eq!(doc.query_selector_all(".x").unwrap(), vec![first, nested, second]);
    }

    #[test]
    fn test_remove_subtree() {
        let doc = Document::new();
        let parent = doc.append_to_body(Element::new("div"));
        let child = doc.append_child(parent, Element::new("span")).unwrap();

        assert!(doc.remove(parent));
        assert!(!doc.contains(parent));
        assert!(!doc.contains(child));
        assert!(!doc.remove(parent));
        assert!(doc.element(doc.body()).unwrap().children().is_empty());
    }

    #[test]
    fn test_text_and_attributes() {
        let doc = Document::with_mount_points(["alpha"]);
        let node = doc.query_selector("#alpha").unwrap().unwrap();
        assert!(doc.set_text(node, "Loading..."));
        assert!(doc.set_attribute(node, "data-micro-loading", "alpha"));
        assert_eq!(doc.element(node).unwrap().text(), "Loading...");
        assert!(doc.remove_attribute(node, "data-micro-loading"));
        assert!(!doc.remove_attribute(node, "data-micro-loading"));
    }

    #[test]
    fn test_outline() {
        let doc = Document::with_mount_points(["alpha"]);
        let lines = doc.outline();
        assert_eq!(lines[0], "<html>");
        assert!(lines.iter().any(|l| l.trim() == "<div id=\"alpha\">"));
    }

    #[test]
    fn test_invalid_selector() {
        let doc = Document::new();
        assert!(doc.query_selector("div > p").is_err());
    }
}
