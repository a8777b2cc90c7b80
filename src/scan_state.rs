//! Per-node scan bookkeeping
//!
//! The scan record lives in an attribute on the node itself, so removing a
//! node from the document also drops its record. Identity, not text, is the
//! key: a replacement node with identical text starts out unscanned.
//!
//! Known limitation: once a node is marked it is never scanned again, even if
//! the renderer later rewrites its text in place.

use crate::dom::{Document, NodeId};
use crate::error::DomError;

pub const DEFAULT_MARKER_ATTR: &str = "data-osint-scanned";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRecord {
    Unscanned,
    ScannedEmpty,
    ScannedWithEntities,
}

impl ScanRecord {
    fn as_attr(self) -> Option<&'static str> {
        match self {
            ScanRecord::Unscanned => None,
            ScanRecord::ScannedEmpty => Some("empty"),
            ScanRecord::ScannedWithEntities => Some("entities"),
        }
    }

    fn from_attr(value: Option<&str>) -> Self {
        match value {
            None => ScanRecord::Unscanned,
            Some("entities") => ScanRecord::ScannedWithEntities,
            Some(_) => ScanRecord::ScannedEmpty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanStateTracker {
    attr: String,
}

impl Default for ScanStateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_ATTR)
    }
}

impl ScanStateTracker {
    pub fn new(attr: &str) -> Self {
        Self {
            attr: attr.to_string(),
        }
    }

    pub fn attr_name(&self) -> &str {
        &self.attr
    }

    pub fn record(&self, doc: &Document, node: NodeId) -> ScanRecord {
        ScanRecord::from_attr(doc.attr(node, &self.attr))
    }

    pub fn is_marked(&self, doc: &Document, node: NodeId) -> bool {
        self.record(doc, node) != ScanRecord::Unscanned
    }

    /// Mark a node as scanned. A node that is already marked keeps its
    /// first record.
    pub fn mark(&self, doc: &mut Document, node: NodeId, record: ScanRecord) -> Result<(), DomError> {
        if self.is_marked(doc, node) {
            return Ok(());
        }
        match record.as_attr() {
            Some(value) => doc.set_attr(node, &self.attr, value),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSelector;

    fn first_span(doc: &Document) -> NodeId {
        doc.query_all(&NodeSelector::parse("span").unwrap())[0]
    }

    #[test]
    fn test_mark_once() {
        let mut doc = Document::parse("<div><span>hello</span></div>");
        let tracker = ScanStateTracker::default();
        let span = first_span(&doc);

        assert!(!tracker.is_marked(&doc, span));
        tracker.mark(&mut doc, span, ScanRecord::ScannedEmpty).unwrap();
        assert!(tracker.is_marked(&doc, span));

        // second mark does not overwrite the first record
        tracker
            .mark(&mut doc, span, ScanRecord::ScannedWithEntities)
            .unwrap();
        assert_eq!(tracker.record(&doc, span), ScanRecord::ScannedEmpty);
    }

    #[test]
    fn test_replacement_node_is_unscanned() {
        let mut doc = Document::parse("<div><span>hello</span></div>");
        let tracker = ScanStateTracker::default();
        let span = first_span(&doc);
        tracker
            .mark(&mut doc, span, ScanRecord::ScannedWithEntities)
            .unwrap();

        let fresh = doc.create_fragment("<span>hello</span>")[0];
        doc.replace(span, fresh).unwrap();

        assert!(!tracker.is_marked(&doc, fresh));
        assert_eq!(tracker.record(&doc, span), ScanRecord::Unscanned);
    }

    #[test]
    fn test_in_place_text_change_stays_marked() {
        let mut doc = Document::parse("<div><span>hello</span></div>");
        let tracker = ScanStateTracker::default();
        let span = first_span(&doc);
        tracker.mark(&mut doc, span, ScanRecord::ScannedEmpty).unwrap();

        doc.set_text(span, "now with a@b.com").unwrap();
        assert!(tracker.is_marked(&doc, span));
    }

    #[test]
    fn test_removed_node_loses_record() {
        let mut doc = Document::parse("<div><span>hello</span></div>");
        let tracker = ScanStateTracker::new("data-seen");
        let span = first_span(&doc);
        tracker.mark(&mut doc, span, ScanRecord::ScannedEmpty).unwrap();
        assert_eq!(doc.attr(span, "data-seen"), Some("empty"));

        doc.remove(span).unwrap();
        assert!(!doc.exists(span));
        assert!(!tracker.is_marked(&doc, span));
    }
}
