//! Annotation rendering
//!
//! Inline indicators beside annotated messages, the single detail overlay,
//! and the per-kind action-link templates it offers.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::dom::{Document, NodeId, NodeSelector};
use crate::error::{AnnotateError, DomError};
use crate::extractor::ExtractedEntity;
use crate::patterns::EntityKind;

pub const OVERLAY_ID: &str = "osint-overlay";
const INDICATOR_ATTR: &str = "data-osint-indicator";
const ENTITIES_ATTR: &str = "data-osint-entities";
const AFFORDANCE_ATTR: &str = "data-osint-analyze";
const BLOB_ATTR: &str = "data-osint-blob";

/// An externally hosted lookup, templated from an entity value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLink {
    pub label: String,
    pub href: String,
}

impl ActionLink {
    fn new(label: &str, href: String) -> Self {
        Self {
            label: label.to_string(),
            href,
        }
    }
}

/// What the overlay offers for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityAction {
    Open(ActionLink),
    Copy { value: String },
}

/// Lookup links for a kind/value pair. Kinds without provider templates
/// get none.
pub fn action_links(kind: EntityKind, value: &str) -> Vec<ActionLink> {
    match kind {
        EntityKind::Phone => {
            let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
            vec![
                ActionLink::new("WhatsApp", format!("https://wa.me/{}", digits)),
                ActionLink::new(
                    "Truecaller",
                    format!("https://www.truecaller.com/search/int/{}", digits),
                ),
                ActionLink::new(
                    "Web search",
                    format!(
                        "https://www.google.com/search?q={}",
                        urlencoding::encode(&format!("\"{}\"", value))
                    ),
                ),
            ]
        }
        EntityKind::Url => {
            let host = host_of(value);
            let host = urlencoding::encode(&host);
            vec![
                ActionLink::new(
                    "VirusTotal",
                    format!("https://www.virustotal.com/gui/domain/{}", host),
                ),
                ActionLink::new("URLVoid", format!("https://www.urlvoid.com/scan/{}/", host)),
                ActionLink::new("WHOIS", format!("https://who.is/whois/{}", host)),
            ]
        }
        EntityKind::Email | EntityKind::Crypto => Vec::new(),
    }
}

pub fn actions_for(entity: &ExtractedEntity) -> Vec<EntityAction> {
    match entity.kind {
        EntityKind::Phone | EntityKind::Url => action_links(entity.kind, &entity.value)
            .into_iter()
            .map(EntityAction::Open)
            .collect(),
        EntityKind::Email | EntityKind::Crypto => vec![EntityAction::Copy {
            value: entity.value.clone(),
        }],
    }
}

/// Reverse image search links for a publicly reachable media URL
pub fn reverse_search_links(media_url: &str) -> Vec<ActionLink> {
    let encoded = urlencoding::encode(media_url);
    vec![
        ActionLink::new(
            "Google Lens",
            format!("https://lens.google.com/uploadbyurl?url={}", encoded),
        ),
        ActionLink::new(
            "Yandex",
            format!("https://yandex.com/images/search?rpt=imageview&url={}", encoded),
        ),
        ActionLink::new("TinEye", format!("https://tineye.com/search?url={}", encoded)),
        ActionLink::new(
            "Bing",
            format!("https://www.bing.com/images/search?q=imgurl:{}&view=detailv2&iss=sbi", encoded),
        ),
    ]
}

fn host_of(value: &str) -> String {
    let candidate = if value.contains("://") {
        value.to_string()
    } else {
        format!("https://{}", value)
    };
    url::Url::parse(&candidate)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| value.to_string())
}

/// Content of the detail overlay
#[derive(Debug, Clone)]
pub enum OverlayContent {
    Entities(Vec<ExtractedEntity>),
    Loading { message: String },
    Error { message: String },
    Metadata {
        entries: Vec<(String, String)>,
        total: usize,
        links: Vec<ActionLink>,
    },
}

#[derive(Debug, Clone)]
pub struct AnnotationRenderer {
    container_selector: NodeSelector,
    overlay_selector: NodeSelector,
}

impl AnnotationRenderer {
    pub fn new(container_selector: NodeSelector) -> Result<Self, DomError> {
        Ok(Self {
            container_selector,
            overlay_selector: NodeSelector::parse(&format!("#{}", OVERLAY_ID))?,
        })
    }

    /// Every node matching the container selector
    pub fn containers(&self, doc: &Document) -> HashSet<NodeId> {
        doc.query_all(&self.container_selector).into_iter().collect()
    }

    /// Attach one indicator to the container holding `source`.
    ///
    /// Returns `Ok(None)` when the container already carries one.
    pub fn attach_indicator(
        &self,
        doc: &mut Document,
        source: NodeId,
        entities: &[ExtractedEntity],
    ) -> Result<Option<NodeId>, AnnotateError> {
        let containers = self.containers(doc);
        self.attach_indicator_in(doc, &containers, source, entities)
    }

    /// Same as [`attach_indicator`](Self::attach_indicator), resolving the
    /// container against a set computed once per pass.
    pub fn attach_indicator_in(
        &self,
        doc: &mut Document,
        containers: &HashSet<NodeId>,
        source: NodeId,
        entities: &[ExtractedEntity],
    ) -> Result<Option<NodeId>, AnnotateError> {
        let container = doc
            .closest_in(source, containers)
            .ok_or(AnnotateError::NoContainer(source))?;

        if find_child_with_attr(doc, container, INDICATOR_ATTR).is_some() {
            debug!(%container, "container already has an indicator");
            return Ok(None);
        }

        let indicator = doc.create_element("button");
        doc.set_attr(indicator, "class", "osint-indicator")?;
        doc.set_attr(indicator, INDICATOR_ATTR, "true")?;
        doc.set_attr(indicator, ENTITIES_ATTR, &serde_json::to_string(entities)?)?;
        doc.set_attr(indicator, "title", &format!("{} entities found", entities.len()))?;
        let label = doc.create_text(&format!("\u{1F50D} {}", entities.len()));
        doc.append_child(indicator, label)?;
        doc.append_child(container, indicator)?;

        debug!(%container, %indicator, count = entities.len(), "indicator attached");
        Ok(Some(indicator))
    }

    /// Open the detail overlay for an indicator, built from its payload
    pub fn activate_indicator(
        &self,
        doc: &mut Document,
        indicator: NodeId,
    ) -> Result<NodeId, AnnotateError> {
        let payload = doc
            .attr(indicator, ENTITIES_ATTR)
            .ok_or(DomError::UnknownNode(indicator))?;
        let entities: Vec<ExtractedEntity> = serde_json::from_str(payload)?;
        Ok(self.show_overlay(doc, &OverlayContent::Entities(entities))?)
    }

    /// Place the analysis affordance next to a media element. No-op if one
    /// is already there.
    pub fn attach_media_affordance(
        &self,
        doc: &mut Document,
        media: NodeId,
    ) -> Result<Option<NodeId>, AnnotateError> {
        let parent = doc.parent(media).ok_or(AnnotateError::NoContainer(media))?;
        let target = media.to_attr();
        let existing = doc
            .children(parent)
            .into_iter()
            .any(|c| doc.attr(c, AFFORDANCE_ATTR) == Some(target.as_str()));
        if existing {
            return Ok(None);
        }

        let button = doc.create_element("button");
        doc.set_attr(button, "class", "osint-media-analyze")?;
        doc.set_attr(button, AFFORDANCE_ATTR, &target)?;
        if let Some(src) = doc.attr(media, "src").map(str::to_string) {
            doc.set_attr(button, BLOB_ATTR, &src)?;
        }
        let label = doc.create_text("Analyze media");
        doc.append_child(button, label)?;
        doc.append_child(parent, button)?;
        Ok(Some(button))
    }

    /// Resolve an activated affordance to its media node and blob reference.
    ///
    /// Prefers the media's current `src`, falling back to the reference
    /// captured when the affordance was attached.
    pub fn affordance_target(
        &self,
        doc: &Document,
        button: NodeId,
    ) -> Result<(NodeId, String), AnnotateError> {
        let media = doc
            .attr(button, AFFORDANCE_ATTR)
            .and_then(NodeId::from_attr)
            .ok_or(AnnotateError::NotAnAffordance(button))?;
        if !doc.contains(media) {
            return Err(DomError::UnknownNode(media).into());
        }
        let blob_ref = doc
            .attr(media, "src")
            .or_else(|| doc.attr(button, BLOB_ATTR))
            .ok_or(AnnotateError::NotAnAffordance(button))?;
        Ok((media, blob_ref.to_string()))
    }

    /// Show the overlay, disposing of any previous one first
    pub fn show_overlay(
        &self,
        doc: &mut Document,
        content: &OverlayContent,
    ) -> Result<NodeId, DomError> {
        for previous in doc.query_all(&self.overlay_selector) {
            doc.remove(previous)?;
        }

        let overlay = doc.create_element("div");
        doc.set_attr(overlay, "id", OVERLAY_ID)?;
        doc.set_attr(overlay, "class", "osint-overlay")?;
        let close = element_with_text(doc, "button", "osint-close", "\u{00D7}")?;
        doc.append_child(overlay, close)?;

        match content {
            OverlayContent::Entities(entities) => {
                let title = element_with_text(doc, "h3", "osint-title", "Extracted entities")?;
                doc.append_child(overlay, title)?;
                for entity in entities {
                    let row = render_entity(doc, entity)?;
                    doc.append_child(overlay, row)?;
                }
            }
            OverlayContent::Loading { message } => {
                let node = element_with_text(doc, "div", "osint-loading", message)?;
                doc.append_child(overlay, node)?;
            }
            OverlayContent::Error { message } => {
                let card = element_with_text(doc, "div", "osint-error", message)?;
                doc.append_child(overlay, card)?;
            }
            OverlayContent::Metadata {
                entries,
                total,
                links,
            } => {
                let title = element_with_text(doc, "h3", "osint-title", "Media metadata")?;
                doc.append_child(overlay, title)?;
                let table = doc.create_element("dl");
                doc.set_attr(table, "class", "osint-metadata")?;
                for (key, value) in entries {
                    let dt = element_with_text(doc, "dt", "osint-key", key)?;
                    let dd = element_with_text(doc, "dd", "osint-value", value)?;
                    doc.append_child(table, dt)?;
                    doc.append_child(table, dd)?;
                }
                doc.append_child(overlay, table)?;
                if *total > entries.len() {
                    let more = format!("{} more fields not shown", total - entries.len());
                    let note = element_with_text(doc, "p", "osint-more", &more)?;
                    doc.append_child(overlay, note)?;
                }
                let actions = render_links(doc, links)?;
                doc.append_child(overlay, actions)?;
            }
        }

        let body = doc.body();
        doc.append_child(body, overlay)?;
        Ok(overlay)
    }

    pub fn close_overlay(&self, doc: &mut Document) -> Result<(), DomError> {
        for overlay in doc.query_all(&self.overlay_selector) {
            doc.remove(overlay)?;
        }
        Ok(())
    }
}

fn find_child_with_attr(doc: &Document, parent: NodeId, attr: &str) -> Option<NodeId> {
    doc.children(parent)
        .into_iter()
        .find(|c| doc.attr(*c, attr).is_some())
}

fn element_with_text(
    doc: &mut Document,
    tag: &str,
    class: &str,
    text: &str,
) -> Result<NodeId, DomError> {
    let el = doc.create_element(tag);
    doc.set_attr(el, "class", class)?;
    let text = doc.create_text(text);
    doc.append_child(el, text)?;
    Ok(el)
}

fn render_entity(doc: &mut Document, entity: &ExtractedEntity) -> Result<NodeId, DomError> {
    let row = doc.create_element("div");
    doc.set_attr(row, "class", "osint-entity")?;
    doc.set_attr(row, "data-kind", entity.kind.as_str())?;

    let kind = element_with_text(doc, "span", "osint-kind", entity.kind.label())?;
    let value = element_with_text(doc, "code", "osint-entity-value", &entity.value)?;
    doc.append_child(row, kind)?;
    doc.append_child(row, value)?;

    let actions = doc.create_element("div");
    doc.set_attr(actions, "class", "osint-actions")?;
    for action in actions_for(entity) {
        let node = match action {
            EntityAction::Open(link) => render_link(doc, &link)?,
            EntityAction::Copy { value } => {
                let button = element_with_text(doc, "button", "osint-copy", "Copy")?;
                doc.set_attr(button, "data-copy", &value)?;
                button
            }
        };
        doc.append_child(actions, node)?;
    }
    doc.append_child(row, actions)?;
    Ok(row)
}

fn render_links(doc: &mut Document, links: &[ActionLink]) -> Result<NodeId, DomError> {
    let actions = doc.create_element("div");
    doc.set_attr(actions, "class", "osint-actions")?;
    for link in links {
        let a = render_link(doc, link)?;
        doc.append_child(actions, a)?;
    }
    Ok(actions)
}

fn render_link(doc: &mut Document, link: &ActionLink) -> Result<NodeId, DomError> {
    let a = element_with_text(doc, "a", "osint-link", &link.label)?;
    doc.set_attr(a, "href", &link.href)?;
    doc.set_attr(a, "target", "_blank")?;
    doc.set_attr(a, "rel", "noopener noreferrer")?;
    Ok(a)
}
