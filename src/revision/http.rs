//! Remote graph API client
//!
//! Speaks the three revision endpoints of the graph service:
//! - `POST   {base}/graphs/{graph}/revisions`               → open
//! - `POST   {base}/graphs/{graph}/revisions/{uid}/entries` → append
//! - `PATCH  {base}/graphs/{graph}/revisions/{uid}`         → close

use super::traits::{BackendError, GraphBackend, RevisionId};
use crate::transform::DestinationEntry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP client for the graph service's revision API.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    graph: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        graph: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            graph: graph.into(),
            api_key,
        })
    }

    fn revisions_url(&self) -> String {
        format!("{}/graphs/{}/revisions", self.base_url, self.graph)
    }

    fn revision_url(&self, revision: &RevisionId) -> String {
        format!("{}/{}", self.revisions_url(), revision)
    }

    /// Build a request with the API key, if one is configured.
    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        match &self.api_key {
            Some(key) => req.header(reqwest::header::AUTHORIZATION, key),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(format!("{}: {}", self.base_url, e))
            } else {
                BackendError::Request(format!("{}: {}", self.base_url, e))
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Extract the revision uid from an open-revision response.
fn parse_revision_uid(body: &Value) -> Result<RevisionId, BackendError> {
    body.pointer("/revision/uid")
        .and_then(Value::as_str)
        .filter(|uid| !uid.is_empty())
        .map(RevisionId::from_string)
        .ok_or_else(|| BackendError::Response(format!("missing revision uid in {}", body)))
}

fn entries_body(entries: &[DestinationEntry]) -> Result<Value, BackendError> {
    Ok(json!({ "entries": serde_json::to_value(entries)? }))
}

fn close_body(commit: bool) -> Value {
    json!({ "status": if commit { "active" } else { "canceled" } })
}

#[async_trait]
impl GraphBackend for HttpBackend {
    async fn open_revision(&self) -> Result<RevisionId, BackendError> {
        let req = self
            .request(reqwest::Method::POST, &self.revisions_url())
            .json(&json!({}));
        let body = self.send(req).await?;
        parse_revision_uid(&body)
    }

    async fn append_entries(
        &self,
        revision: &RevisionId,
        entries: &[DestinationEntry],
    ) -> Result<(), BackendError> {
        let url = format!("{}/entries", self.revision_url(revision));
        let req = self
            .request(reqwest::Method::POST, &url)
            .json(&entries_body(entries)?);
        self.send(req).await?;
        Ok(())
    }

    async fn close_revision(&self, revision: &RevisionId, commit: bool) -> Result<(), BackendError> {
        let req = self
            .request(reqwest::Method::PATCH, &self.revision_url(revision))
            .json(&close_body(commit));
        self.send(req).await?;
        Ok(())
    }
}
