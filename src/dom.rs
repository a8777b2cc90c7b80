//! Host document model
//!
//! An arena-backed element tree standing in for the live conversation view.
//! Markup is parsed with scraper and selectors are matched with
//! `scraper::Selector`, so the structural contract is plain CSS.
//!
//! Node identities come from a monotonic counter and are never reused: a node
//! the renderer replaces gets a new identity even if its text is unchanged.
//! Removing a node drops its whole subtree, attributes included.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::error::DomError;

/// Attribute carrying node identity into selector snapshots
const NODE_ID_ATTR: &str = "data-osint-node";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Identity handle for a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Attribute-safe form, read back with [`NodeId::from_attr`]
    pub fn to_attr(self) -> String {
        self.0.to_string()
    }

    pub fn from_attr(value: &str) -> Option<Self> {
        value.parse().ok().map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compiled CSS selector
#[derive(Debug, Clone)]
pub struct NodeSelector {
    source: String,
    inner: Selector,
}

impl NodeSelector {
    pub fn parse(source: &str) -> Result<Self, DomError> {
        let inner = Selector::parse(source).map_err(|e| DomError::Selector {
            selector: source.to_string(),
            reason: format!("{:?}", e),
        })?;
        Ok(Self {
            source: source.to_string(),
            inner,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Mutable element tree
#[derive(Debug)]
pub struct Document {
    nodes: HashMap<NodeId, NodeEntry>,
    root: NodeId,
    next_id: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty `<html><head></head><body></body></html>` document
    pub fn new() -> Self {
        Self::parse("")
    }

    /// Build a document from markup
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Document {
            nodes: HashMap::new(),
            root: NodeId(0),
            next_id: 0,
        };
        doc.root = doc.import_element(parsed.root_element());
        doc
    }

    /// Parse a markup fragment into detached nodes, ready to be inserted
    pub fn create_fragment(&mut self, markup: &str) -> Vec<NodeId> {
        let parsed = Html::parse_fragment(markup);
        let wrapper = parsed.root_element();
        let mut created = Vec::new();
        for child in wrapper.children() {
            if let Some(element) = ElementRef::wrap(child) {
                created.push(self.import_element(element));
            } else if let Some(text) = child.value().as_text() {
                let content: &str = text;
                created.push(self.alloc(NodeData::Text(content.to_string())));
            }
        }
        created
    }

    fn import_element(&mut self, element: ElementRef<'_>) -> NodeId {
        let attrs = element
            .value()
            .attrs()
            .filter(|(name, _)| *name != NODE_ID_ATTR)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let id = self.alloc(NodeData::Element {
            tag: element.value().name().to_string(),
            attrs,
        });

        for child in element.children() {
            let child_id = if let Some(child_el) = ElementRef::wrap(child) {
                self.import_element(child_el)
            } else if let Some(text) = child.value().as_text() {
                let content: &str = text;
                self.alloc(NodeData::Text(content.to_string()))
            } else {
                continue;
            };
            self.link(id, child_id);
        }

        id
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeEntry {
                data,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(entry) = self.nodes.get_mut(&child) {
            entry.parent = Some(parent);
        }
        if let Some(entry) = self.nodes.get_mut(&parent) {
            entry.children.push(child);
        }
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry, DomError> {
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The `<body>` element, or the root if there is none
    pub fn body(&self) -> NodeId {
        self.children(self.root)
            .into_iter()
            .find(|id| self.tag(*id) == Some("body"))
            .unwrap_or(self.root)
    }

    /// Number of nodes alive in the arena, attached or not
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Whether the node is attached under the document root
    pub fn contains(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.nodes.get(&node).and_then(|e| e.parent);
        }
        false
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    /// Append `child` as the last child of `parent`, detaching it first if needed
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !matches!(self.entry(parent)?.data, NodeData::Element { .. }) {
            return Err(DomError::NotAnElement(parent));
        }
        self.detach(child)?;
        self.link(parent, child);
        Ok(())
    }

    fn detach(&mut self, id: NodeId) -> Result<(), DomError> {
        let parent = self.entry_mut(id)?.parent.take();
        if let Some(parent) = parent {
            if let Some(entry) = self.nodes.get_mut(&parent) {
                entry.children.retain(|c| *c != id);
            }
        }
        Ok(())
    }

    /// Remove a node and drop its whole subtree from the arena
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if id == self.root {
            return Err(DomError::RootRemoval);
        }
        self.detach(id)?;
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&node) {
                stack.extend(entry.children);
            }
        }
        Ok(())
    }

    /// Put `new` where `old` is and remove `old`
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<(), DomError> {
        if old == self.root {
            return Err(DomError::RootRemoval);
        }
        self.entry(new)?;
        let parent = self.entry(old)?.parent;
        self.detach(new)?;
        if let Some(parent) = parent {
            if let Some(entry) = self.nodes.get_mut(&parent) {
                if let Some(pos) = entry.children.iter().position(|c| *c == old) {
                    entry.children[pos] = new;
                }
            }
            self.entry_mut(new)?.parent = Some(parent);
            self.entry_mut(old)?.parent = None;
        }
        self.remove(old)
    }

    /// Replace a node's content with a single text node. Identity is kept.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        if let NodeData::Text(content) = &mut self.entry_mut(id)?.data {
            *content = text.to_string();
            return Ok(());
        }
        for child in self.children(id) {
            self.remove(child)?;
        }
        let text_node = self.create_text(text);
        self.link(id, text_node);
        Ok(())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        match &mut self.entry_mut(id)?.data {
            NodeData::Element { attrs, .. } => {
                attrs.insert(name.to_string(), value.to_string());
                Ok(())
            }
            NodeData::Text(_) => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        match &mut self.entry_mut(id)?.data {
            NodeData::Element { attrs, .. } => {
                attrs.remove(name);
                Ok(())
            }
            NodeData::Text(_) => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes.get(&id)?.data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(&id)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?.parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    /// Flattened text of the node and all its descendants
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(entry) = self.nodes.get(&id) else {
            return;
        };
        match &entry.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element { .. } => {
                for child in &entry.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Attached elements matching the selector, in document order
    pub fn query_all(&self, selector: &NodeSelector) -> Vec<NodeId> {
        let mut markup = String::new();
        self.serialize(self.root, true, &mut markup);
        let snapshot = Html::parse_document(&markup);

        snapshot
            .select(&selector.inner)
            .filter_map(|el| el.value().attr(NODE_ID_ATTR))
            .filter_map(|raw| raw.parse::<u64>().ok())
            .map(NodeId)
            .filter(|id| self.nodes.contains_key(id))
            .collect()
    }

    /// Nearest ancestor (or the node itself) matching the selector
    pub fn closest(&self, id: NodeId, selector: &NodeSelector) -> Option<NodeId> {
        let matching: HashSet<NodeId> = self.query_all(selector).into_iter().collect();
        self.closest_in(id, &matching)
    }

    /// Nearest inclusive ancestor of `id` that is in `matching`.
    ///
    /// Lets a caller run one `query_all` and resolve many nodes against it.
    pub fn closest_in(&self, id: NodeId, matching: &HashSet<NodeId>) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if matching.contains(&node) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Serialized markup of the whole document
    pub fn to_html(&self) -> String {
        self.outer_html(self.root)
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize(id, false, &mut out);
        out
    }

    fn serialize(&self, id: NodeId, with_ids: bool, out: &mut String) {
        let Some(entry) = self.nodes.get(&id) else {
            return;
        };
        match &entry.data {
            NodeData::Text(text) => out.push_str(&escape_text(text)),
            NodeData::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                if with_ids {
                    out.push_str(&format!(" {}=\"{}\"", NODE_ID_ATTR, id.0));
                }
                for (name, value) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for child in &entry.children {
                    self.serialize(*child, with_ids, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: &str = r#"
    <html>
    <body>
        <div id="main">
            <div class="message-in">
                <span class="selectable-text">Call +1 555 0100 &amp; ask</span>
            </div>
            <div class="message-out">
                <span class="selectable-text">ok</span>
                <img src="blob:https://web.example/abc" width="300" height="200">
            </div>
        </div>
    </body>
    </html>
    "#;

    fn sel(s: &str) -> NodeSelector {
        NodeSelector::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_query() {
        let doc = Document::parse(CHAT);
        let spans = doc.query_all(&sel("span.selectable-text"));
        assert_eq!(spans.len(), 2);
        assert_eq!(doc.text_content(spans[0]), "Call +1 555 0100 & ask");
        assert_eq!(doc.text_content(spans[1]), "ok");

        let images = doc.query_all(&sel(r#"img[src^="blob:"]"#));
        assert_eq!(images.len(), 1);
        assert_eq!(doc.attr(images[0], "width"), Some("300"));
    }

    #[test]
    fn test_selector_matching_nothing_is_empty() {
        let doc = Document::parse(CHAT);
        assert!(doc.query_all(&sel("div.does-not-exist")).is_empty());
    }

    #[test]
    fn test_invalid_selector() {
        let err = NodeSelector::parse("div[").unwrap_err();
        assert!(matches!(err, DomError::Selector { .. }));
    }

    #[test]
    fn test_closest() {
        let doc = Document::parse(CHAT);
        let spans = doc.query_all(&sel("span.selectable-text"));
        let container = doc.closest(spans[0], &sel("div.message-in, div.message-out"));
        assert_eq!(
            container.and_then(|c| doc.attr(c, "class")),
            Some("message-in")
        );
        assert!(doc.closest(spans[0], &sel("table")).is_none());
    }

    #[test]
    fn test_closest_in_precomputed_set() {
        let doc = Document::parse(CHAT);
        let containers: HashSet<NodeId> = doc
            .query_all(&sel("div.message-in, div.message-out"))
            .into_iter()
            .collect();
        let spans = doc.query_all(&sel("span.selectable-text"));

        let first = doc.closest_in(spans[0], &containers).unwrap();
        let second = doc.closest_in(spans[1], &containers).unwrap();
        assert_eq!(doc.attr(first, "class"), Some("message-in"));
        assert_eq!(doc.attr(second, "class"), Some("message-out"));
        assert!(doc.closest_in(doc.body(), &containers).is_none());
    }

    #[test]
    fn test_node_id_attr_form() {
        let mut doc = Document::new();
        let img = doc.create_element("img");
        let encoded = img.to_attr();
        assert!(!encoded.starts_with('#'));
        assert_eq!(NodeId::from_attr(&encoded), Some(img));
        assert_eq!(NodeId::from_attr(&img.to_string()), None);
        assert_eq!(NodeId::from_attr("abc"), None);
    }

    #[test]
    fn test_replace_gives_new_identity() {
        let mut doc = Document::parse(CHAT);
        let span = doc.query_all(&sel("span.selectable-text"))[1];
        let fresh = doc.create_fragment(r#"<span class="selectable-text">ok</span>"#);
        assert_eq!(fresh.len(), 1);

        doc.replace(span, fresh[0]).unwrap();

        assert!(!doc.exists(span));
        let spans = doc.query_all(&sel("span.selectable-text"));
        assert_eq!(spans[1], fresh[0]);
        assert_ne!(spans[1], span);
        assert_eq!(doc.text_content(spans[1]), "ok");
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut doc = Document::parse(CHAT);
        let before = doc.len();
        let container = doc.query_all(&sel("div.message-out"))[0];
        let span = doc.query_all(&sel("div.message-out span"))[0];

        doc.remove(container).unwrap();

        assert!(!doc.exists(container));
        assert!(!doc.exists(span));
        assert!(doc.len() < before);
        assert!(matches!(doc.remove(doc.root()), Err(DomError::RootRemoval)));
    }

    #[test]
    fn test_set_text_keeps_identity() {
        let mut doc = Document::parse(CHAT);
        let span = doc.query_all(&sel("span.selectable-text"))[0];
        doc.set_text(span, "changed").unwrap();
        assert_eq!(doc.query_all(&sel("span.selectable-text"))[0], span);
        assert_eq!(doc.text_content(span), "changed");
    }

    #[test]
    fn test_created_elements_are_queryable() {
        let mut doc = Document::new();
        let body = doc.body();
        let badge = doc.create_element("button");
        doc.set_attr(badge, "class", "osint-badge").unwrap();
        assert!(!doc.contains(badge));
        doc.append_child(body, badge).unwrap();
        assert!(doc.contains(badge));
        assert_eq!(doc.query_all(&sel("button.osint-badge")), vec![badge]);
    }

    #[test]
    fn test_to_html_escapes_and_hides_ids() {
        let mut doc = Document::new();
        let body = doc.body();
        let div = doc.create_element("div");
        doc.set_attr(div, "title", "a \"b\"").unwrap();
        let text = doc.create_text("<x> & y");
        doc.append_child(div, text).unwrap();
        doc.append_child(body, div).unwrap();

        let html = doc.to_html();
        assert!(html.contains(r#"<div title="a &quot;b&quot;">&lt;x&gt; &amp; y</div>"#));
        assert!(!html.contains(NODE_ID_ATTR));
    }

    #[test]
    fn test_append_to_text_node_fails() {
        let mut doc = Document::new();
        let text = doc.create_text("x");
        let el = doc.create_element("span");
        assert!(matches!(
            doc.append_child(text, el),
            Err(DomError::NotAnElement(_))
        ));
    }
}
