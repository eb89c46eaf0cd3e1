//! REST client for the cross-device account store
//!
//! HTTP client for the remote entry store shared across a user's devices.
//! Transient failures (refused connections, timeouts) are retried with
//! exponential backoff up to a configured cap; everything else maps onto the
//! store error taxonomy (404 → NotFound, 409 → DuplicateId).

use crate::store::error::{StoreError, StoreResult};
use crate::store::types::MetricEntry;
use crate::store::RemoteStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

/// Configuration for the remote store client
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the account API (e.g., "https://api.example.com")
    pub base_url: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8087".to_string(),
            request_timeout_ms: 5000,
            max_retries: 3,
        }
    }
}

/// Account-store client
pub struct RestRemoteStore {
    client: Client,
    config: RemoteConfig,
}

impl RestRemoteStore {
    /// Create a new client with the given configuration
    pub fn new(config: RemoteConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn entry_url(&self, id: Uuid) -> String {
        format!("{}/v1/entries/{}", self.config.base_url, id)
    }

    fn author_url(&self, author_id: &str) -> String {
        format!("{}/v1/users/{}/entries", self.config.base_url, author_id)
    }

    /// Send a request, retrying transient failures with exponential backoff
    async fn send_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> StoreResult<Response> {
        let mut attempt = 0u32;

        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if attempt >= self.config.max_retries {
                        return Err(StoreError::Unavailable(e.to_string()));
                    }
                    attempt += 1;
                    let delay = std::time::Duration::from_millis(250u64 << attempt.min(6));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(StoreError::Remote(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn create(&self, entry: &MetricEntry) -> StoreResult<()> {
        let url = self.author_url(&entry.author_id);
        let response = self
            .send_with_retry(|| self.client.post(&url).json(entry))
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(StoreError::DuplicateId(entry.id)),
            s => Err(StoreError::Remote(format!("create returned {}", s))),
        }
    }

    async fn read(&self, id: Uuid) -> StoreResult<MetricEntry> {
        let url = self.entry_url(id);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;

        match response.status() {
            s if s.is_success() => response
                .json::<MetricEntry>()
                .await
                .map_err(|e| StoreError::Remote(e.to_string())),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id)),
            s => Err(StoreError::Remote(format!("read returned {}", s))),
        }
    }

    async fn read_all(&self, author_id: &str) -> StoreResult<Vec<MetricEntry>> {
        let url = self.author_url(author_id);
        let response = self.send_with_retry(|| self.client.get(&url)).await?;

        if !response.status().is_success() {
            return Err(StoreError::Remote(format!(
                "read_all returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<MetricEntry>>()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))
    }

    async fn update(&self, entry: &MetricEntry) -> StoreResult<()> {
        let url = self.entry_url(entry.id);
        let response = self
            .send_with_retry(|| self.client.put(&url).json(entry))
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(entry.id)),
            s => Err(StoreError::Remote(format!("update returned {}", s))),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let url = self.entry_url(id);
        let response = self.send_with_retry(|| self.client.delete(&url)).await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id)),
            s => Err(StoreError::Remote(format!("delete returned {}", s))),
        }
    }

    async fn delete_all(&self, author_id: &str) -> StoreResult<()> {
        let url = self.author_url(author_id);
        let response = self.send_with_retry(|| self.client.delete(&url)).await?;

        if !response.status().is_success() {
            return Err(StoreError::Remote(format!(
                "delete_all returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
