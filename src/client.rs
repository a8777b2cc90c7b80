//! HTTP client for the metadata service
//!
//! `POST {endpoint}/api/metadata` takes one multipart `file` field and answers
//! with a JSON object, or a non-2xx status and `{"error": "..."}`.
//! `GET {endpoint}/api/version` answers `{"version": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{AnalysisError, ConfigError};
use crate::media::{MediaBlob, MetadataResult, MetadataService};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct VersionBody {
    version: String,
}

#[derive(Debug, Clone)]
pub struct HttpMetadataClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpMetadataClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigError> {
        url::Url::parse(endpoint).map_err(|e| ConfigError::Endpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Endpoint {
                url: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Version string reported by the service
    pub async fn version(&self) -> Result<String, AnalysisError> {
        let resp = self.http.get(self.url("/api/version")).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(service_error(status.as_u16(), &body));
        }
        serde_json::from_str::<VersionBody>(&body)
            .map(|v| v.version)
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl MetadataService for HttpMetadataClient {
    async fn extract_metadata(
        &self,
        blob: MediaBlob,
        file_name: String,
    ) -> Result<MetadataResult, AnalysisError> {
        let size = blob.bytes.len();
        let part = Part::bytes(blob.bytes)
            .file_name(file_name)
            .mime_str(&blob.mime)
            .map_err(|e| AnalysisError::BlobUnavailable(e.to_string()))?;
        let form = Form::new().part("file", part);

        debug!(size, "uploading media to metadata service");
        let resp = self
            .http
            .post(self.url("/api/metadata"))
            .multipart(form)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        interpret_metadata_response(status, &body)
    }
}

/// Turn a raw metadata response into a result
pub fn interpret_metadata_response(status: u16, body: &str) -> Result<MetadataResult, AnalysisError> {
    if !(200..300).contains(&status) {
        return Err(service_error(status, body));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AnalysisError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(e) => Err(AnalysisError::MalformedResponse(e.to_string())),
    }
}

fn service_error(status: u16, body: &str) -> AnalysisError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => AnalysisError::Service {
            status,
            message: err.error,
        },
        Err(_) => {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or("Unknown Status");
            AnalysisError::Service {
                status,
                message: format!("HTTP {} {}", status, reason),
            }
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_object() {
        let result =
            interpret_metadata_response(200, r#"{"FileType":"JPEG","ImageWidth":4000}"#).unwrap();
        assert_eq!(result["FileType"], "JPEG");
        assert_eq!(result["ImageWidth"], 4000);
    }

    #[test]
    fn test_error_body_is_verbatim() {
        let err = interpret_metadata_response(400, r#"{"error":"No file uploaded"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: 400, .. }));
        assert_eq!(err.to_string(), "No file uploaded");
    }

    #[test]
    fn test_error_without_json_body() {
        let err = interpret_metadata_response(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: 502, .. }));
        assert_eq!(err.to_string(), "HTTP 502 Bad Gateway");
    }

    #[test]
    fn test_result_keeps_service_key_order() {
        let body = r#"{"SourceFile":"a.jpg","FileType":"JPEG","Make":"Canon","Aperture":2.8}"#;
        let result = interpret_metadata_response(200, body).unwrap();
        let keys: Vec<&str> = result.keys().map(String::as_str).collect();
        assert_eq!(keys, ["SourceFile", "FileType", "Make", "Aperture"]);

        let preview = crate::media::MetadataPreview::from_result(&result, 2);
        assert_eq!(preview.entries[0].0, "SourceFile");
        assert_eq!(preview.entries[1].0, "FileType");
    }

    #[test]
    fn test_malformed_success_body() {
        assert!(matches!(
            interpret_metadata_response(200, "not json"),
            Err(AnalysisError::MalformedResponse(_))
        ));
        let err = interpret_metadata_response(200, "[1,2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(HttpMetadataClient::new("nope", Duration::from_secs(1)).is_err());
        let client = HttpMetadataClient::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/api/version"), "http://localhost:3000/api/version");
    }
}
