//! Error types
//!
//! Structural misses during a scan are not errors; they are counted in the
//! scan report. Everything here is either a configuration problem or a
//! media-analysis failure that ends up on the user's error card.

use thiserror::Error;

use crate::dom::NodeId;

/// Errors raised by the host document model
#[derive(Debug, Error)]
pub enum DomError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("node {0} is not part of the document")]
    UnknownNode(NodeId),

    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("the document root cannot be removed or replaced")]
    RootRemoval,
}

/// Errors raised while attaching annotations
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// No container to hang the indicator on; the node is skipped
    #[error("no annotation container above node {0}")]
    NoContainer(NodeId),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("node {0} is not a media analysis affordance")]
    NotAnAffordance(NodeId),

    #[error("indicator payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failures of a single media analysis. `Display` is shown to the user as-is.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("blob reference expired or invalid: {0}")]
    BlobExpired(String),

    #[error("could not read media: {0}")]
    BlobUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    /// The endpoint's own `error` string, surfaced verbatim
    #[error("{message}")]
    Service { status: u16, message: String },

    #[error("malformed response from metadata service: {0}")]
    MalformedResponse(String),

    #[error("analysis superseded by a newer request")]
    Superseded,
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AnalysisError::MalformedResponse(err.to_string())
        } else {
            AnalysisError::Network(err.to_string())
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Selector(#[from] DomError),

    #[error("invalid metadata endpoint `{url}`: {reason}")]
    Endpoint { url: String, reason: String },

    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },
}
