//! Device health source
//!
//! The passive external custodian: a platform health store that collects
//! samples on its own schedule, outside the app's control. The engine reads
//! samples incrementally from a watermark and writes user-entered values back
//! on a best-effort basis.
//!
//! The source is optional at runtime (not every platform has one). The engine
//! holds an `Option<Arc<dyn ExternalSampleSource>>` and degrades to
//! local/remote-only sync when it is absent.

mod gateway;

pub use gateway::{GatewayConfig, HealthGatewaySource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One device-collected measurement, immutable once returned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Source-assigned opaque identifier
    pub id: String,
    /// Measured value
    pub value: f64,
    /// When the measurement was taken
    pub date: DateTime<Utc>,
}

/// Read/write access to the platform health store
#[async_trait]
pub trait ExternalSampleSource: Send + Sync {
    /// Samples at or after `watermark` (and at or after `earliest`, when set)
    ///
    /// The window is inclusive at the watermark; callers deduplicate by
    /// sample id, so re-presenting the newest already-seen sample is fine.
    async fn samples_since(
        &self,
        watermark: Option<DateTime<Utc>>,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, SourceError>;

    /// Write a single value back to the health store
    ///
    /// Best-effort: may fail if the source is unavailable or permission has
    /// been revoked. Returns the source-assigned sample id on success.
    async fn save_sample(&self, value: f64, date: DateTime<Utc>) -> Result<String, SourceError>;
}

/// Errors from the health source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Source disabled, not installed, or unreachable
    #[error("Health source unavailable: {0}")]
    Unavailable(String),

    /// Request exceeded the sync timeout
    #[error("Health source request timed out")]
    Timeout,

    /// The user revoked health data access
    #[error("Health source permission denied")]
    PermissionDenied,

    /// Response could not be decoded
    #[error("Health source parse error: {0}")]
    Parse(String),
}
