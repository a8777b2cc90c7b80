//! Pipeline configuration
//!
//! Every field has a default; partial JSON overrides only what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dom::NodeSelector;
use crate::error::ConfigError;

const ENV_ENDPOINT: &str = "OSINT_LENS_ENDPOINT";
const ENV_DEBOUNCE_MS: &str = "OSINT_LENS_DEBOUNCE_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Text-bearing message nodes
    pub text_selector: String,
    /// Ancestor an indicator is attached to
    pub container_selector: String,
    /// Media elements backed by ephemeral blob references
    pub media_selector: String,
    pub debounce_ms: u64,
    /// Base URL of the metadata service (`/api/metadata`, `/api/version`)
    pub metadata_endpoint: String,
    /// Key/value pairs shown in the metadata preview
    pub preview_limit: usize,
    /// Media at least this wide and tall gets the affordance on first render
    pub min_media_size: u32,
    pub placeholder_media_url: String,
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_selector: "span.selectable-text".to_string(),
            container_selector: "div.message-in, div.message-out".to_string(),
            media_selector: r#"img[src^="blob:"]"#.to_string(),
            debounce_ms: 500,
            metadata_endpoint: "http://localhost:3000".to_string(),
            preview_limit: 8,
            min_media_size: 100,
            placeholder_media_url: "https://example.com/placeholder.jpg".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `OSINT_LENS_*` environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.metadata_endpoint = endpoint;
        }
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            self.debounce_ms = raw.trim().parse().map_err(|_| ConfigError::Env {
                key: ENV_DEBOUNCE_MS.to_string(),
                value: raw.clone(),
            })?;
        }
        self.validate()
    }

    /// Compile every selector and check the endpoint URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.selectors()?;
        url::Url::parse(&self.metadata_endpoint).map_err(|e| ConfigError::Endpoint {
            url: self.metadata_endpoint.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    pub fn selectors(&self) -> Result<Selectors, ConfigError> {
        Ok(Selectors {
            text: NodeSelector::parse(&self.text_selector)?,
            container: NodeSelector::parse(&self.container_selector)?,
            media: NodeSelector::parse(&self.media_selector)?,
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Compiled structural selectors
#[derive(Debug, Clone)]
pub struct Selectors {
    pub text: NodeSelector,
    pub container: NodeSelector,
    pub media: NodeSelector,
}
