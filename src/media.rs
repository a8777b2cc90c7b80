//! Media analysis
//!
//! User-triggered branch: resolve a media element's blob reference, hand the
//! bytes to the metadata service and show the outcome in the overlay. Each
//! invocation ends in exactly one of `Success` or `Failed`. Starting a new
//! analysis on a node supersedes the one already running there.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::annotate::{reverse_search_links, AnnotationRenderer, OverlayContent};
use crate::dom::{Document, NodeId};
use crate::error::{AnalysisError, AnnotateError};

/// Provider-defined key/value metadata for one asset
pub type MetadataResult = Map<String, Value>;

/// Raw media bytes plus their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Resolves ephemeral blob references to bytes
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn resolve(&self, blob_ref: &str) -> Result<MediaBlob, AnalysisError>;
}

/// The external metadata extraction service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn extract_metadata(
        &self,
        blob: MediaBlob,
        file_name: String,
    ) -> Result<MetadataResult, AnalysisError>;
}

/// In-memory registry of `blob:` references, revocable like object URLs
#[derive(Debug, Default)]
pub struct BlobStore {
    blobs: RwLock<HashMap<String, MediaBlob>>,
    next: AtomicU64,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: Vec<u8>, mime: &str) -> String {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let blob_ref = format!("blob:osint-lens/{}", id);
        let blob = MediaBlob {
            bytes,
            mime: mime.to_string(),
        };
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(blob_ref.clone(), blob);
        }
        blob_ref
    }

    /// Returns false if the reference was unknown
    pub fn revoke(&self, blob_ref: &str) -> bool {
        self.blobs
            .write()
            .map(|mut blobs| blobs.remove(blob_ref).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl BlobSource for BlobStore {
    async fn resolve(&self, blob_ref: &str) -> Result<MediaBlob, AnalysisError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| AnalysisError::BlobUnavailable(e.to_string()))?;
        blobs
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| AnalysisError::BlobExpired(blob_ref.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisState {
    Idle,
    FetchingBlob,
    Uploading,
    AwaitingResult,
    Success,
    Failed,
}

/// First N pairs of a metadata result in service order, values flattened
/// to text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataPreview {
    pub entries: Vec<(String, String)>,
    pub total: usize,
}

impl MetadataPreview {
    pub fn from_result(result: &MetadataResult, limit: usize) -> Self {
        let entries = result
            .iter()
            .take(limit)
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();
        Self {
            entries,
            total: result.len(),
        }
    }
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    /// Every state visited, starting at `Idle`
    pub transitions: Vec<AnalysisState>,
    pub result: Result<MetadataPreview, AnalysisError>,
}

impl AnalysisOutcome {
    pub fn final_state(&self) -> AnalysisState {
        match self.result {
            Ok(_) => AnalysisState::Success,
            Err(_) => AnalysisState::Failed,
        }
    }
}

pub struct MediaAnalysisDispatcher {
    blobs: Arc<dyn BlobSource>,
    service: Arc<dyn MetadataService>,
    renderer: AnnotationRenderer,
    preview_limit: usize,
    placeholder_url: String,
    in_flight: Mutex<HashMap<NodeId, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl MediaAnalysisDispatcher {
    pub fn new(
        blobs: Arc<dyn BlobSource>,
        service: Arc<dyn MetadataService>,
        renderer: AnnotationRenderer,
        preview_limit: usize,
        placeholder_url: &str,
    ) -> Self {
        Self {
            blobs,
            service,
            renderer,
            preview_limit,
            placeholder_url: placeholder_url.to_string(),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Analyze the media behind `node`. Never panics and never propagates:
    /// the outcome carries the terminal state.
    pub async fn analyze(
        &self,
        document: &Mutex<Document>,
        node: NodeId,
        blob_ref: &str,
    ) -> AnalysisOutcome {
        let span = info_span!("media_analysis", %node, blob_ref);
        async {
            let (generation, token) = self.begin(node);
            let mut transitions = vec![AnalysisState::Idle];

            self.render(
                document,
                &OverlayContent::Loading {
                    message: "Analyzing media\u{2026}".to_string(),
                },
            );

            let result = self
                .run_stages(blob_ref, &token, &mut transitions)
                .await;
            self.finish(node, generation);

            let result = match result {
                Ok(metadata) => {
                    let preview = MetadataPreview::from_result(&metadata, self.preview_limit);
                    self.render(
                        document,
                        &OverlayContent::Metadata {
                            entries: preview.entries.clone(),
                            total: preview.total,
                            links: reverse_search_links(&self.placeholder_url),
                        },
                    );
                    info!(fields = preview.total, "media analysis succeeded");
                    transitions.push(AnalysisState::Success);
                    Ok(preview)
                }
                Err(AnalysisError::Superseded) => {
                    info!("media analysis superseded");
                    transitions.push(AnalysisState::Failed);
                    Err(AnalysisError::Superseded)
                }
                Err(e) => {
                    warn!(error = %e, "media analysis failed");
                    self.render(
                        document,
                        &OverlayContent::Error {
                            message: e.to_string(),
                        },
                    );
                    transitions.push(AnalysisState::Failed);
                    Err(e)
                }
            };

            AnalysisOutcome {
                transitions,
                result,
            }
        }
        .instrument(span)
        .await
    }

    /// Entry point for a clicked analysis affordance: resolve it to its media
    /// node and blob reference, then [`analyze`](Self::analyze).
    pub async fn activate_affordance(
        &self,
        document: &Mutex<Document>,
        button: NodeId,
    ) -> Result<AnalysisOutcome, AnnotateError> {
        let (node, blob_ref) = {
            let doc = document.lock().unwrap_or_else(PoisonError::into_inner);
            self.renderer.affordance_target(&doc, button)?
        };
        Ok(self.analyze(document, node, &blob_ref).await)
    }

    async fn run_stages(
        &self,
        blob_ref: &str,
        token: &CancellationToken,
        transitions: &mut Vec<AnalysisState>,
    ) -> Result<MetadataResult, AnalysisError> {
        transitions.push(AnalysisState::FetchingBlob);
        let blob = tokio::select! {
            _ = token.cancelled() => return Err(AnalysisError::Superseded),
            blob = self.blobs.resolve(blob_ref) => blob?,
        };

        transitions.push(AnalysisState::Uploading);
        let file_name = file_name_for(&blob.mime);

        transitions.push(AnalysisState::AwaitingResult);
        tokio::select! {
            _ = token.cancelled() => Err(AnalysisError::Superseded),
            result = self.service.extract_metadata(blob, file_name) => result,
        }
    }

    /// Register a new invocation for `node`, cancelling any earlier one
    fn begin(&self, node: NodeId) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, previous)) = in_flight.insert(node, (generation, token.clone())) {
            previous.cancel();
        }
        (generation, token)
    }

    fn finish(&self, node: NodeId, generation: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(in_flight.get(&node), Some((g, _)) if *g == generation) {
            in_flight.remove(&node);
        }
    }

    fn render(&self, document: &Mutex<Document>, content: &OverlayContent) {
        let mut doc = document.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.renderer.show_overlay(&mut doc, content) {
            warn!(error = %e, "failed to render analysis overlay");
        }
    }
}

fn file_name_for(mime: &str) -> String {
    let ext = match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        _ => "bin",
    };
    format!("media.{}", ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSelector;
    use std::time::Duration;

    fn renderer() -> AnnotationRenderer {
        AnnotationRenderer::new(NodeSelector::parse("div.message-in").unwrap()).unwrap()
    }

    fn overlay_text(document: &Mutex<Document>) -> String {
        let doc = document.lock().unwrap();
        let overlays = doc.query_all(&NodeSelector::parse("#osint-overlay").unwrap());
        assert_eq!(overlays.len(), 1);
        doc.text_content(overlays[0])
    }

    fn dispatcher(store: Arc<BlobStore>, service: MockMetadataService) -> MediaAnalysisDispatcher {
        MediaAnalysisDispatcher::new(
            store,
            Arc::new(service),
            renderer(),
            2,
            "https://example.com/placeholder.jpg",
        )
    }

    fn setup() -> (Mutex<Document>, NodeId) {
        let doc = Document::parse(
            r#"<div class="message-in"><img src="blob:osint-lens/0" width="300" height="300"></div>"#,
        );
        let img = doc.query_all(&NodeSelector::parse("img").unwrap())[0];
        (Mutex::new(doc), img)
    }

    #[tokio::test]
    async fn test_success_renders_truncated_preview() {
        let store = Arc::new(BlobStore::new());
        let blob_ref = store.register(vec![0xff, 0xd8, 0xff], "image/jpeg");

        let mut service = MockMetadataService::new();
        service
            .expect_extract_metadata()
            .withf(|blob, name| blob.bytes == vec![0xff, 0xd8, 0xff] && name == "media.jpg")
            .times(1)
            .returning(|_, _| {
                let mut result = MetadataResult::new();
                result.insert("SourceFile".into(), Value::String("media.jpg".into()));
                result.insert("FileType".into(), Value::String("JPEG".into()));
                result.insert("Aperture".into(), Value::from(2.8));
                Ok(result)
            });

        let (document, img) = setup();
        let outcome = dispatcher(store, service)
            .analyze(&document, img, &blob_ref)
            .await;

        assert_eq!(outcome.final_state(), AnalysisState::Success);
        assert_eq!(
            outcome.transitions,
            vec![
                AnalysisState::Idle,
                AnalysisState::FetchingBlob,
                AnalysisState::Uploading,
                AnalysisState::AwaitingResult,
                AnalysisState::Success,
            ]
        );
        let preview = outcome.result.unwrap();
        assert_eq!(preview.total, 3);
        assert_eq!(preview.entries.len(), 2);
        // first pairs as the service returned them, not sorted
        assert_eq!(preview.entries[0], ("SourceFile".to_string(), "media.jpg".to_string()));
        assert_eq!(preview.entries[1], ("FileType".to_string(), "JPEG".to_string()));

        let text = overlay_text(&document);
        assert!(text.contains("JPEG"));
        assert!(!text.contains("Aperture"));
        assert!(text.contains("1 more fields not shown"));
        assert!(text.contains("Google Lens"));
    }

    #[tokio::test]
    async fn test_expired_blob_fails_without_upload() {
        let store = Arc::new(BlobStore::new());
        let blob_ref = store.register(vec![1, 2, 3], "image/png");
        assert!(store.revoke(&blob_ref));

        let mut service = MockMetadataService::new();
        service.expect_extract_metadata().times(0);

        let (document, img) = setup();
        let outcome = dispatcher(store, service)
            .analyze(&document, img, &blob_ref)
            .await;

        assert_eq!(outcome.final_state(), AnalysisState::Failed);
        assert_eq!(
            outcome.transitions,
            vec![
                AnalysisState::Idle,
                AnalysisState::FetchingBlob,
                AnalysisState::Failed
            ]
        );
        let err = outcome.result.unwrap_err();
        assert!(matches!(err, AnalysisError::BlobExpired(_)));
        assert!(overlay_text(&document).contains(&err.to_string()));
    }

    #[tokio::test]
    async fn test_service_error_is_shown_verbatim() {
        let store = Arc::new(BlobStore::new());
        let blob_ref = store.register(vec![9], "application/octet-stream");

        let mut service = MockMetadataService::new();
        service
            .expect_extract_metadata()
            .withf(|_, name| name == "media.bin")
            .returning(|_, _| {
                Err(AnalysisError::Service {
                    status: 422,
                    message: "exiftool: unsupported file type".to_string(),
                })
            });

        let (document, img) = setup();
        let outcome = dispatcher(store, service)
            .analyze(&document, img, &blob_ref)
            .await;

        assert_eq!(outcome.final_state(), AnalysisState::Failed);
        let text = overlay_text(&document);
        assert!(text.contains("exiftool: unsupported file type"));
        assert!(!text.contains("Analyzing media"));
    }

    struct SlowBlobs;

    #[async_trait]
    impl BlobSource for SlowBlobs {
        async fn resolve(&self, blob_ref: &str) -> Result<MediaBlob, AnalysisError> {
            if blob_ref.ends_with("slow") {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(MediaBlob {
                bytes: blob_ref.as_bytes().to_vec(),
                mime: "image/png".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_request_supersedes_in_flight() {
        let mut service = MockMetadataService::new();
        service
            .expect_extract_metadata()
            .times(1)
            .returning(|_, _| {
                let mut result = MetadataResult::new();
                result.insert("FileType".into(), Value::String("PNG".into()));
                Ok(result)
            });

        let dispatcher = MediaAnalysisDispatcher::new(
            Arc::new(SlowBlobs),
            Arc::new(service),
            renderer(),
            8,
            "https://example.com/placeholder.jpg",
        );
        let (document, img) = setup();

        let first = dispatcher.analyze(&document, img, "blob:slow");
        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            dispatcher.analyze(&document, img, "blob:fast").await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.final_state(), AnalysisState::Failed);
        assert!(matches!(first.result, Err(AnalysisError::Superseded)));
        assert_eq!(second.final_state(), AnalysisState::Success);
        assert!(overlay_text(&document).contains("PNG"));
    }

    #[tokio::test]
    async fn test_scanned_affordance_runs_analysis() {
        use crate::config::PipelineConfig;
        use crate::orchestrator::ScanOrchestrator;
        use crate::patterns::PatternLibrary;

        let store = Arc::new(BlobStore::new());
        let blob_ref = store.register(vec![0x89, 0x50], "image/png");

        let mut service = MockMetadataService::new();
        service
            .expect_extract_metadata()
            .withf(|blob, name| blob.bytes == vec![0x89, 0x50] && name == "media.png")
            .times(1)
            .returning(|_, _| {
                let mut result = MetadataResult::new();
                result.insert("FileType".into(), Value::String("PNG".into()));
                Ok(result)
            });

        let mut doc = Document::parse(&format!(
            r#"<div class="message-in"><img src="{}" width="300" height="300"></div>"#,
            blob_ref
        ));
        let orchestrator =
            ScanOrchestrator::from_config(&PipelineConfig::default(), PatternLibrary::builtin())
                .unwrap();
        let report = orchestrator.scan(&mut doc);
        assert_eq!(report.affordances_attached, 1);

        let button = doc.query_all(&NodeSelector::parse("button.osint-media-analyze").unwrap())[0];
        let document = Mutex::new(doc);
        let outcome = dispatcher(store, service)
            .activate_affordance(&document, button)
            .await
            .unwrap();

        assert_eq!(outcome.final_state(), AnalysisState::Success);
        let text = overlay_text(&document);
        assert!(text.contains("FileType"));
        assert!(text.contains("PNG"));
    }

    #[tokio::test]
    async fn test_activate_rejects_non_affordance() {
        let mut service = MockMetadataService::new();
        service.expect_extract_metadata().times(0);

        let (document, img) = setup();
        let err = dispatcher(Arc::new(BlobStore::new()), service)
            .activate_affordance(&document, img)
            .await
            .unwrap_err();
        assert!(matches!(err, AnnotateError::NotAnAffordance(n) if n == img));
    }

    #[test]
    fn test_preview_limit_larger_than_result() {
        let mut result = MetadataResult::new();
        result.insert("a".into(), Value::Bool(true));
        let preview = MetadataPreview::from_result(&result, 8);
        assert_eq!(preview.entries, vec![("a".to_string(), "true".to_string())]);
        assert_eq!(preview.total, 1);
    }
}
