//! HTTP client for the snapshot trigger/progress/fetch endpoints.
//!
//! Request formatting for concrete datasets stays with the caller: the
//! client sends an opaque JSON body plus query params and only understands
//! the `snapshot_id` / status / payload envelope. Async paths use reqwest;
//! `*_blocking` variants use ureq for callers without a runtime.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::result::Payload;
use crate::snapshot::{RemoteStatus, SnapshotHandle};

/// Env var consulted by [`SnapshotClient::from_env`].
pub const TOKEN_ENV: &str = "SNAPFETCH_API_TOKEN";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Opaque, externally formatted job specification.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerSpec {
    /// Request body, formatted by the caller for its dataset.
    pub body: serde_json::Value,
    /// Query parameters appended to the trigger request.
    pub params: Vec<(String, String)>,
}

impl TriggerSpec {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            body,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Remote status and result queries the poller depends on.
#[async_trait]
pub trait SnapshotApi: Send + Sync {
    async fn status(&self, id: &str) -> Result<RemoteStatus, EngineError>;
    async fn fetch(&self, id: &str) -> Result<Payload, EngineError>;
}

/// Client for a dataset-snapshot style remote API.
pub struct SnapshotClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl SnapshotClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(ref token) = token
            && let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    /// Read the bearer token from `SNAPFETCH_API_TOKEN`.
    pub fn from_env(base_url: impl Into<String>) -> Self {
        Self::new(base_url, std::env::var(TOKEN_ENV).ok())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Trigger a new snapshot job. Returns a pending handle on success.
    ///
    /// No retry: a caller that wants to retry triggering decides itself.
    pub async fn trigger(&self, spec: &TriggerSpec) -> Result<SnapshotHandle, EngineError> {
        let response = self
            .client
            .post(format!("{}/trigger", self.base_url))
            .query(&spec.params)
            .json(&spec.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "trigger request rejected");
            return Err(EngineError::Transport(format!(
                "trigger returned {}: {}",
                status, body
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let id = extract_snapshot_id(&body)?;
        tracing::debug!(snapshot = %id, "snapshot triggered");
        Ok(SnapshotHandle::new(id))
    }

    /// Query the job's progress. Unknown status strings classify as pending.
    pub async fn status(&self, id: &str) -> Result<RemoteStatus, EngineError> {
        let response = self
            .client
            .get(format!("{}/progress/{}", self.base_url, id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Transport(format!(
                "progress returned {}",
                status
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let raw = body.get("status").and_then(|v| v.as_str()).unwrap_or("");
        Ok(RemoteStatus::classify(raw))
    }

    /// Retrieve the payload of a ready snapshot.
    ///
    /// Callers are expected to have observed `Ready` first. Any failure here
    /// is reported as `ResultUnavailable` and not retried.
    pub async fn fetch(&self, id: &str) -> Result<Payload, EngineError> {
        let response = self
            .client
            .get(format!("{}/snapshot/{}", self.base_url, id))
            .query(&[("format", "json")])
            .send()
            .await
            .map_err(|e| EngineError::ResultUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::ResultUnavailable(format!(
                "snapshot returned {}",
                status
            )));
        }

        response
            .json::<Payload>()
            .await
            .map_err(|e| EngineError::ResultUnavailable(format!("malformed payload: {}", e)))
    }

    fn blocking_agent(&self) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .new_agent()
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    /// Blocking trigger for callers without an async runtime.
    pub fn trigger_blocking(&self, spec: &TriggerSpec) -> Result<SnapshotHandle, EngineError> {
        let agent = self.blocking_agent();
        let mut request = agent.post(format!("{}/trigger", self.base_url));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", &auth);
        }
        for (key, value) in &spec.params {
            request = request.query(key, value);
        }

        let mut response = request
            .send_json(&spec.body)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            tracing::warn!(status = %status, "trigger request rejected");
            return Err(EngineError::Transport(format!(
                "trigger returned {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| EngineError::Transport(format!("malformed trigger response: {}", e)))?;
        let id = extract_snapshot_id(&body)?;
        tracing::debug!(snapshot = %id, "snapshot triggered");
        Ok(SnapshotHandle::new(id))
    }

    /// Blocking status query.
    pub fn status_blocking(&self, id: &str) -> Result<RemoteStatus, EngineError> {
        let agent = self.blocking_agent();
        let mut request = agent.get(format!("{}/progress/{}", self.base_url, id));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", &auth);
        }

        let mut response = request
            .call()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(EngineError::Transport(format!(
                "progress returned {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| EngineError::Transport(format!("malformed progress response: {}", e)))?;
        let raw = body.get("status").and_then(|v| v.as_str()).unwrap_or("");
        Ok(RemoteStatus::classify(raw))
    }

    /// Blocking payload retrieval.
    pub fn fetch_blocking(&self, id: &str) -> Result<Payload, EngineError> {
        let agent = self.blocking_agent();
        let mut request = agent
            .get(format!("{}/snapshot/{}", self.base_url, id))
            .query("format", "json");
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", &auth);
        }

        let mut response = request
            .call()
            .map_err(|e| EngineError::ResultUnavailable(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(EngineError::ResultUnavailable(format!(
                "snapshot returned {}",
                status
            )));
        }

        response
            .body_mut()
            .read_json::<Payload>()
            .map_err(|e| EngineError::ResultUnavailable(format!("malformed payload: {}", e)))
    }
}

fn extract_snapshot_id(body: &serde_json::Value) -> Result<&str, EngineError> {
    body.get("snapshot_id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EngineError::Transport("trigger response missing snapshot_id".to_string()))
}

#[async_trait]
impl SnapshotApi for SnapshotClient {
    async fn status(&self, id: &str) -> Result<RemoteStatus, EngineError> {
        SnapshotClient::status(self, id).await
    }

    async fn fetch(&self, id: &str) -> Result<Payload, EngineError> {
        SnapshotClient::fetch(self, id).await
    }
}
