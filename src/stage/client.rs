use std::{collections::HashMap, time::Duration};

use tracing::debug;

use crate::{
    foundation::error::{SpritecastError, SpritecastResult},
    job::model::StageKind,
};

/// Invokes one downstream processing stage over HTTP.
///
/// Every transport error, timeout, non-success status and malformed body is
/// normalized into [`SpritecastError::Stage`] carrying the destination stage
/// and the underlying cause; the coordinator never needs to distinguish them.
#[async_trait::async_trait]
pub trait StageClient: Send + Sync {
    async fn invoke(
        &self,
        stage: StageKind,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> SpritecastResult<serde_json::Value>;
}

/// reqwest-backed client posting JSON to each stage's `/process` endpoint.
pub struct HttpStageClient {
    http: reqwest::Client,
    endpoints: HashMap<StageKind, String>,
}

impl HttpStageClient {
    pub fn new(endpoints: HashMap<StageKind, String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }

    fn endpoint_for(&self, stage: StageKind) -> SpritecastResult<&str> {
        self.endpoints
            .get(&stage)
            .map(String::as_str)
            .ok_or_else(|| SpritecastError::stage(stage, "no endpoint configured"))
    }
}

#[async_trait::async_trait]
impl StageClient for HttpStageClient {
    async fn invoke(
        &self,
        stage: StageKind,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> SpritecastResult<serde_json::Value> {
        let endpoint = self.endpoint_for(stage)?;
        let url = format!("{}/process", endpoint.trim_end_matches('/'));
        debug!(%stage, %url, timeout_secs = timeout.as_secs(), "invoking stage");

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SpritecastError::stage(
                        stage,
                        format!("timed out after {}s", timeout.as_secs()),
                    )
                } else {
                    SpritecastError::stage(stage, format!("transport error: {err}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SpritecastError::stage(stage, format!("unreadable response: {err}")))?;

        if !status.is_success() {
            return Err(SpritecastError::stage(
                stage,
                format!("{status}: {}", extract_service_error(&body)),
            ));
        }

        serde_json::from_str(&body)
            .map_err(|err| SpritecastError::stage(stage, format!("malformed response: {err}")))
    }
}

/// Collaborator services answer failures as `{"error": "..."}`; surface that
/// message when present instead of the raw body.
fn extract_service_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}
