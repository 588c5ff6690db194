//! Client for the remote execution and validation service

use async_trait::async_trait;
use pipecore::{GraphSnapshot, NodeId};
use piperuntime::GraphSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000";

/// Failure talking to the remote service. `Display` is the message shown to
/// the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Backend unavailable. Is the pipeline service running at {url}? ({reason})")]
    Unreachable { url: String, reason: String },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

/// Body of an execution response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub outputs: HashMap<NodeId, String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecuteResponse {
    pub fn ok(outputs: HashMap<NodeId, String>) -> Self {
        Self {
            outputs,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            outputs: HashMap::new(),
            error: Some(error.into()),
        }
    }
}

/// Remote collaborator that executes or validates whole pipelines
#[async_trait]
pub trait PipelineService: Send + Sync {
    async fn execute(&self, snapshot: &GraphSnapshot) -> Result<HashMap<NodeId, String>, RemoteError>;

    async fn validate(&self, snapshot: &GraphSnapshot) -> Result<GraphSummary, RemoteError>;
}

fn excerpt(body: &str) -> String {
    let head: String = body.chars().take(80).collect();
    if head.len() < body.len() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Decode a response body, distinguishing an unreachable service (a non-JSON
/// error page) from a rejected request.
fn decode(url: &str, status: u16, body: &str) -> Result<JsonValue, RemoteError> {
    let success = (200..300).contains(&status);
    let data: JsonValue = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(_) if success => {
            return Err(RemoteError::InvalidResponse(format!(
                "expected JSON, got {:?}",
                excerpt(body)
            )))
        }
        Err(_) => {
            return Err(RemoteError::Unreachable {
                url: url.to_string(),
                reason: format!("HTTP {}: {}", status, excerpt(body)),
            })
        }
    };

    if !success {
        let message = data
            .get("error")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed: {}", status));
        return Err(RemoteError::Rejected(message));
    }
    Ok(data)
}

pub fn interpret_execute(
    url: &str,
    status: u16,
    body: &str,
) -> Result<HashMap<NodeId, String>, RemoteError> {
    let data = decode(url, status, body)?;
    let response: ExecuteResponse =
        serde_json::from_value(data).map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
    match response.error {
        Some(error) => Err(RemoteError::Rejected(error)),
        None => Ok(response.outputs),
    }
}

pub fn interpret_validate(url: &str, status: u16, body: &str) -> Result<GraphSummary, RemoteError> {
    let data = decode(url, status, body)?;
    serde_json::from_value(data).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

/// `PipelineService` over HTTP
pub struct HttpPipelineService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPipelineService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, snapshot: &GraphSnapshot) -> Result<(String, u16, String), RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable {
                url: self.base_url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok((url, status, body))
    }
}

#[async_trait]
impl PipelineService for HttpPipelineService {
    async fn execute(&self, snapshot: &GraphSnapshot) -> Result<HashMap<NodeId, String>, RemoteError> {
        let (url, status, body) = self.post("/pipelines/execute", snapshot).await?;
        interpret_execute(&url, status, &body)
    }

    async fn validate(&self, snapshot: &GraphSnapshot) -> Result<GraphSummary, RemoteError> {
        let (url, status, body) = self.post("/pipelines/parse", snapshot).await?;
        interpret_validate(&url, status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://localhost:8000/pipelines/execute";

    #[test]
    fn test_execute_outputs() {
        let outputs = interpret_execute(URL, 200, r#"{"outputs": {"out-1": "hi"}, "error": null}"#).unwrap();
        assert_eq!(outputs["out-1"], "hi");
    }

    #[test]
    fn test_execute_error_field_is_rejection() {
        let err = interpret_execute(URL, 200, r#"{"outputs": {}, "error": "Pipeline has a cycle"}"#)
            .unwrap_err();
        assert_eq!(err, RemoteError::Rejected("Pipeline has a cycle".to_string()));
        assert_eq!(err.to_string(), "Request rejected: Pipeline has a cycle");
    }

    #[test]
    fn test_non_json_error_page_means_unreachable() {
        let err = interpret_execute(URL, 502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, RemoteError::Unreachable { .. }));
        assert!(err.to_string().starts_with("Backend unavailable"));
    }

    #[test]
    fn test_non_json_success_is_invalid() {
        let err = interpret_validate(URL, 200, "OK").unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[test]
    fn test_http_error_status() {
        let err = interpret_validate(URL, 500, r#"{"detail": "boom"}"#).unwrap_err();
        assert_eq!(err, RemoteError::Rejected("Request failed: 500".to_string()));

        let err = interpret_execute(URL, 422, r#"{"error": "Invalid request"}"#).unwrap_err();
        assert_eq!(err, RemoteError::Rejected("Invalid request".to_string()));
    }

    #[test]
    fn test_validate_summary() {
        let summary =
            interpret_validate(URL, 200, r#"{"num_nodes": 3, "num_edges": 2, "is_dag": true}"#).unwrap();
        assert_eq!(summary, GraphSummary { num_nodes: 3, num_edges: 2, is_dag: true });
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(200);
        assert_eq!(excerpt(&long).len(), 83);
        assert_eq!(excerpt("short"), "short");
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        // Port 9 (discard) is not expected to run an HTTP server.
        let service = HttpPipelineService::new("http://127.0.0.1:9/");
        assert_eq!(service.base_url(), "http://127.0.0.1:9");

        let err = service.validate(&GraphSnapshot::default()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unreachable { .. }));
    }
}
