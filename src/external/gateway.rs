//! Health gateway client
//!
//! Talks to a local health-bridge daemon that fronts the platform health
//! store over HTTP:
//! - `GET /v1/samples?since=...&earliest=...` - incremental sample read
//! - `POST /v1/samples` - write a value back

use super::{ExternalSampleSource, Sample, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Configuration for the health gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the bridge daemon (e.g., "http://localhost:8088")
    pub base_url: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8088".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Health store access via the local bridge daemon
pub struct HealthGatewaySource {
    client: Client,
    config: GatewayConfig,
}

impl HealthGatewaySource {
    /// Create a new gateway client
    pub fn new(config: GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn map_request_error(e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl ExternalSampleSource for HealthGatewaySource {
    async fn samples_since(
        &self,
        watermark: Option<DateTime<Utc>>,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, SourceError> {
        let url = format!("{}/v1/samples", self.config.base_url);

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(since) = watermark {
            query.push(("since", since.to_rfc3339()));
        }
        if let Some(earliest) = earliest {
            query.push(("earliest", earliest.to_rfc3339()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        match response.status() {
            s if s.is_success() => response
                .json::<Vec<Sample>>()
                .await
                .map_err(|e| SourceError::Parse(e.to_string())),
            StatusCode::FORBIDDEN => Err(SourceError::PermissionDenied),
            s => Err(SourceError::Unavailable(format!("gateway returned {}", s))),
        }
    }

    async fn save_sample(&self, value: f64, date: DateTime<Utc>) -> Result<String, SourceError> {
        let url = format!("{}/v1/samples", self.config.base_url);

        #[derive(Serialize)]
        struct SaveRequest {
            value: f64,
            date: DateTime<Utc>,
        }

        #[derive(Deserialize)]
        struct SaveResponse {
            id: String,
        }

        let response = self
            .client
            .post(&url)
            .json(&SaveRequest { value, date })
            .send()
            .await
            .map_err(Self::map_request_error)?;

        match response.status() {
            s if s.is_success() => {
                let body: SaveResponse = response
                    .json()
                    .await
                    .map_err(|e| SourceError::Parse(e.to_string()))?;
                Ok(body.id)
            }
            StatusCode::FORBIDDEN => Err(SourceError::PermissionDenied),
            s => Err(SourceError::Unavailable(format!("gateway returned {}", s))),
        }
    }
}
