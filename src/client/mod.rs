// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download service client.
//!
//! Typed request/response boundary to the remote download service. The client
//! holds no download state of its own; it only translates calls into HTTP
//! requests and JSON bodies back into [`Download`] records.
//!
//! | Operation | Request                       |
//! |-----------|-------------------------------|
//! | create    | `POST   {base}/downloads`     |
//! | list      | `GET    {base}/downloads`     |
//! | get       | `GET    {base}/downloads/{id}`|
//! | pause     | `POST   {base}/downloads/{id}/pause`  |
//! | resume    | `POST   {base}/downloads/{id}/resume` |
//! | cancel    | `POST   {base}/downloads/{id}/cancel` |
//! | delete    | `DELETE {base}/downloads/{id}`|
//!
//! # Example
//!
//! ```no_run
//! use dlsync::client::{DownloadService, HttpDownloadService};
//! use dlsync::download::NewDownload;
//!
//! # async fn example() -> dlsync::error::Result<()> {
//! let client = HttpDownloadService::new("http://localhost:8086/api")?;
//! let created = client.create(&NewDownload::new("https://example.com/big.iso")).await?;
//! println!("{} is {}", created.id, created.status);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};

use crate::download::types::{Download, DownloadId, NewDownload};
use crate::error::{DownloadError, Result};

/// Default download service endpoint.
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8086/api";

/// Default timeout for establishing a connection (in seconds).
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Default timeout for a whole request (in seconds).
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Operations offered by the remote download service.
///
/// Every call is a single, non-idempotent network request. Implementations
/// must not retry on their own.
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Create a download; returns the record as stored by the service.
    async fn create(&self, request: &NewDownload) -> Result<Download>;

    /// All downloads known to the service.
    async fn list(&self) -> Result<Vec<Download>>;

    /// Current state of a single download.
    async fn get(&self, id: &DownloadId) -> Result<Download>;

    async fn pause(&self, id: &DownloadId) -> Result<()>;

    async fn resume(&self, id: &DownloadId) -> Result<()>;

    async fn cancel(&self, id: &DownloadId) -> Result<()>;

    async fn delete(&self, id: &DownloadId) -> Result<()>;
}

/// HTTP/JSON implementation of [`DownloadService`].
#[derive(Debug, Clone)]
pub struct HttpDownloadService {
    /// Base URL, e.g. `http://localhost:8086/api`.
    base: Url,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpDownloadService {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| DownloadError::Validation(format!("invalid service URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(DownloadError::Validation(format!("invalid service URL '{}'", base_url)));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        Ok(Self {
            base,
            client,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Check whether the service answers at all.
    ///
    /// Used by the CLI to print a reachability line; any HTTP answer other
    /// than a 2xx counts as not running.
    pub async fn ping(&self) -> bool {
        match self.send(self.client.get(self.endpoint(&[])), "Failed to fetch downloads").await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("download service ping failed: {}", e);
                false
            }
        }
    }

    /// `{base}/downloads/{segments...}`
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("downloads").extend(segments);
        }
        url
    }

    /// Send a request, mapping transport errors and non-2xx answers.
    async fn send(&self, request: RequestBuilder, fallback: &str) -> Result<Response> {
        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(e, self.base_url()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(DownloadError::service(status, &body, fallback))
    }

    async fn send_command(&self, id: &DownloadId, action: &str, fallback: &str) -> Result<()> {
        let request = self.client.post(self.endpoint(&[id.as_str(), action]));
        self.send(request, fallback).await?;
        Ok(())
    }
}

#[async_trait]
impl DownloadService for HttpDownloadService {
    async fn create(&self, request: &NewDownload) -> Result<Download> {
        request.validate()?;
        let response = self
            .send(self.client.post(self.endpoint(&[])).json(request), "Failed to start download")
            .await?;
        response
            .json()
            .await
            .map_err(|e| DownloadError::Decode(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<Download>> {
        let response = self
            .send(self.client.get(self.endpoint(&[])), "Failed to fetch downloads")
            .await?;
        response
            .json()
            .await
            .map_err(|e| DownloadError::Decode(e.to_string()))
    }

    async fn get(&self, id: &DownloadId) -> Result<Download> {
        let response = self
            .send(
                self.client.get(self.endpoint(&[id.as_str()])),
                "Failed to fetch download progress",
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| DownloadError::Decode(e.to_string()))
    }

    async fn pause(&self, id: &DownloadId) -> Result<()> {
        self.send_command(id, "pause", "Failed to pause download").await
    }

    async fn resume(&self, id: &DownloadId) -> Result<()> {
        self.send_command(id, "resume", "Failed to resume download").await
    }

    async fn cancel(&self, id: &DownloadId) -> Result<()> {
        self.send_command(id, "cancel", "Failed to cancel download").await
    }

    async fn delete(&self, id: &DownloadId) -> Result<()> {
        let request = self.client.delete(self.endpoint(&[id.as_str()]));
        self.send(request, "Failed to delete download").await?;
        Ok(())
    }
}
