//! Scan orchestration
//!
//! One pass enumerates candidate text and media nodes, skips anything already
//! marked, extracts and annotates the rest, and marks every node it visits.
//! A failure on one node never stops the pass.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

use crate::annotate::AnnotationRenderer;
use crate::config::{PipelineConfig, Selectors};
use crate::dom::{Document, NodeId, NodeSelector};
use crate::error::{AnnotateError, ConfigError};
use crate::extractor::{EntityExtractor, ExtractedEntity};
use crate::patterns::PatternLibrary;
use crate::scan_state::{ScanRecord, ScanStateTracker};
use crate::watcher::{MutationNotice, MutationWatcher, ScanTrigger};

const MEDIA_MARK_ATTR: &str = "data-osint-media";

/// Entities found in one text node during a pass
#[derive(Debug, Clone, Serialize)]
pub struct NodeFindings {
    pub node: NodeId,
    pub entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub text_nodes_scanned: usize,
    pub text_nodes_skipped: usize,
    pub entities_found: usize,
    pub indicators_attached: usize,
    pub structural_misses: usize,
    pub media_marked: usize,
    pub affordances_attached: usize,
    pub failures: usize,
    pub findings: Vec<NodeFindings>,
}

#[derive(Debug, Clone)]
pub struct ScanOrchestrator {
    extractor: EntityExtractor,
    tracker: ScanStateTracker,
    renderer: AnnotationRenderer,
    text_selector: NodeSelector,
    media_selector: NodeSelector,
    min_media_size: u32,
}

impl ScanOrchestrator {
    pub fn new(
        library: PatternLibrary,
        selectors: Selectors,
        min_media_size: u32,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            extractor: EntityExtractor::new(library),
            tracker: ScanStateTracker::default(),
            renderer: AnnotationRenderer::new(selectors.container)?,
            text_selector: selectors.text,
            media_selector: selectors.media,
            min_media_size,
        })
    }

    pub fn from_config(config: &PipelineConfig, library: PatternLibrary) -> Result<Self, ConfigError> {
        Self::new(library, config.selectors()?, config.min_media_size)
    }

    pub fn renderer(&self) -> &AnnotationRenderer {
        &self.renderer
    }

    pub fn tracker(&self) -> &ScanStateTracker {
        &self.tracker
    }

    /// Run one synchronous pass over the document
    pub fn scan(&self, doc: &mut Document) -> ScanReport {
        let span = info_span!("scan_pass");
        let _guard = span.enter();

        let mut report = ScanReport::default();
        self.scan_text(doc, &mut report);
        self.scan_media(doc, &mut report);

        info!(
            scanned = report.text_nodes_scanned,
            skipped = report.text_nodes_skipped,
            entities = report.entities_found,
            indicators = report.indicators_attached,
            media = report.media_marked,
            "scan pass complete"
        );
        report
    }

    fn scan_text(&self, doc: &mut Document, report: &mut ScanReport) {
        let containers = self.renderer.containers(doc);
        for node in doc.query_all(&self.text_selector) {
            if self.tracker.is_marked(doc, node) {
                report.text_nodes_skipped += 1;
                continue;
            }
            report.text_nodes_scanned += 1;

            let text = doc.text_content(node);
            let entities = self.extractor.extract(&text);
            let record = if entities.is_empty() {
                ScanRecord::ScannedEmpty
            } else {
                ScanRecord::ScannedWithEntities
            };

            if !entities.is_empty() {
                report.entities_found += entities.len();
                match self
                    .renderer
                    .attach_indicator_in(doc, &containers, node, &entities)
                {
                    Ok(Some(_)) => report.indicators_attached += 1,
                    Ok(None) => {}
                    Err(AnnotateError::NoContainer(_)) => {
                        debug!(%node, "no container for indicator, skipping annotation");
                        report.structural_misses += 1;
                    }
                    Err(e) => {
                        warn!(%node, error = %e, "failed to annotate node");
                        report.failures += 1;
                    }
                }
                report.findings.push(NodeFindings { node, entities });
            }

            if let Err(e) = self.tracker.mark(doc, node, record) {
                warn!(%node, error = %e, "failed to mark node");
                report.failures += 1;
            }
        }
    }

    fn scan_media(&self, doc: &mut Document, report: &mut ScanReport) {
        for node in doc.query_all(&self.media_selector) {
            if self.tracker.is_marked(doc, node) {
                continue;
            }

            if let Err(e) = doc.set_attr(node, MEDIA_MARK_ATTR, "detected") {
                warn!(%node, error = %e, "failed to mark media");
                report.failures += 1;
                continue;
            }
            report.media_marked += 1;

            if self.is_large(doc, node) {
                match self.renderer.attach_media_affordance(doc, node) {
                    Ok(Some(_)) => report.affordances_attached += 1,
                    Ok(None) => {}
                    Err(AnnotateError::NoContainer(_)) => report.structural_misses += 1,
                    Err(e) => {
                        warn!(%node, error = %e, "failed to attach media affordance");
                        report.failures += 1;
                    }
                }
            }

            if let Err(e) = self.tracker.mark(doc, node, ScanRecord::ScannedEmpty) {
                warn!(%node, error = %e, "failed to mark media");
                report.failures += 1;
            }
        }
    }

    fn is_large(&self, doc: &Document, node: NodeId) -> bool {
        let dimension = |name: &str| {
            doc.attr(node, name)
                .and_then(|v| v.trim().trim_end_matches("px").parse::<u32>().ok())
                .unwrap_or(0)
        };
        dimension("width") >= self.min_media_size && dimension("height") >= self.min_media_size
    }

    /// Attach the analysis affordance on first interaction with a media node
    pub fn on_media_hover(
        &self,
        doc: &mut Document,
        node: NodeId,
    ) -> Result<Option<NodeId>, AnnotateError> {
        self.renderer.attach_media_affordance(doc, node)
    }
}

/// Runs a pass at startup and one per watcher trigger
pub struct ScanLoop {
    orchestrator: Arc<ScanOrchestrator>,
    document: Arc<Mutex<Document>>,
}

impl ScanLoop {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, document: Arc<Mutex<Document>>) -> Self {
        Self {
            orchestrator,
            document,
        }
    }

    /// The document lock is held for the whole pass, so passes never interleave
    pub fn run_pass(&self) -> ScanReport {
        let mut doc = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        self.orchestrator.scan(&mut doc)
    }

    pub async fn run(
        self,
        mut triggers: mpsc::UnboundedReceiver<ScanTrigger>,
        reports: mpsc::UnboundedSender<ScanReport>,
    ) {
        if reports.send(self.run_pass()).is_err() {
            return;
        }
        while let Some(trigger) = triggers.recv().await {
            debug!(coalesced = trigger.coalesced, "re-scan triggered");
            if reports.send(self.run_pass()).is_err() {
                return;
            }
        }
    }
}

/// Handles to a running watcher + scan loop
pub struct PipelineHandle {
    pub notices: mpsc::UnboundedSender<MutationNotice>,
    pub reports: mpsc::UnboundedReceiver<ScanReport>,
    pub watcher: JoinHandle<()>,
    pub scanner: JoinHandle<()>,
}

/// Spawn the mutation-driven pipeline on the current tokio runtime
pub fn spawn_pipeline(
    orchestrator: Arc<ScanOrchestrator>,
    document: Arc<Mutex<Document>>,
    config: &PipelineConfig,
) -> PipelineHandle {
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();

    let watcher = tokio::spawn(MutationWatcher::new(config.debounce()).run(notice_rx, trigger_tx));
    let scanner = tokio::spawn(ScanLoop::new(orchestrator, document).run(trigger_rx, report_tx));

    PipelineHandle {
        notices: notice_tx,
        reports: report_rx,
        watcher,
        scanner,
    }
}
