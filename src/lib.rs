//! Real-time entity extraction and annotation for a live conversation view
//!
//! Watches a host document for mutations and, once activity settles:
//! - extracts phone numbers, emails, crypto addresses and URLs from new
//!   message text
//! - attaches an inline indicator and a detail overlay with lookup links
//! - marks blob-backed media and offers on-demand metadata analysis
//!
//! Also exposes a C ABI (see [`ffi`]) for native hosts.

pub mod annotate;
pub mod client;
pub mod config;
pub mod dom;
pub mod error;
pub mod extractor;
pub mod ffi;
pub mod media;
pub mod orchestrator;
pub mod patterns;
pub mod scan_state;
pub mod watcher;

pub use annotate::{action_links, actions_for, ActionLink, AnnotationRenderer, EntityAction, OverlayContent};
pub use client::HttpMetadataClient;
pub use config::PipelineConfig;
pub use dom::{Document, NodeId, NodeSelector};
pub use error::{AnalysisError, AnnotateError, ConfigError, DomError};
pub use extractor::{extract_entities, EntityExtractor, ExtractedEntity};
pub use media::{
    AnalysisOutcome, AnalysisState, BlobSource, BlobStore, MediaAnalysisDispatcher, MediaBlob,
    MetadataResult, MetadataService,
};
pub use orchestrator::{spawn_pipeline, PipelineHandle, ScanLoop, ScanOrchestrator, ScanReport};
pub use patterns::{EntityKind, MatchRule, PatternLibrary};
pub use scan_state::{ScanRecord, ScanStateTracker};
pub use watcher::{MutationNotice, MutationWatcher, ScanTrigger};
