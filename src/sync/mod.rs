//! Reconciliation engine
//!
//! Orchestrates the movement of metric entries between the three custodians:
//! import (health source → local → remote), export (local/remote → health
//! source via a durable outbox), and the day-level dedup pass.

pub mod dedup;
mod engine;

pub use engine::ReconciliationEngine;

use crate::external::SourceError;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors from engine operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The health source failed
    #[error("Health source error: {0}")]
    Source(#[from] SourceError),

    /// A batch operation partially failed; carries the failed ids so the
    /// caller can decide whether the partial result is acceptable
    #[error("Partial sync: {failed} of {total} entries failed to merge")]
    Aggregate {
        failed: usize,
        total: usize,
        failed_ids: Vec<Uuid>,
    },
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, SyncError>;

/// Configuration for sync behavior
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout for health-source calls, in seconds
    pub external_timeout_secs: u64,
    /// Base delay before retrying a failed export, in seconds
    pub export_backoff_base_secs: u64,
    /// Upper bound on the export retry delay, in seconds
    pub export_backoff_cap_secs: u64,
    /// How often the background sync cycle runs, in minutes
    pub sync_interval_minutes: u64,
    /// Whether the background cycle is enabled
    pub background_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            external_timeout_secs: 30,
            export_backoff_base_secs: 60,
            export_backoff_cap_secs: 3600,
            sync_interval_minutes: 15,
            background_enabled: true,
        }
    }
}

impl SyncConfig {
    pub(crate) fn external_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.external_timeout_secs)
    }

    /// Delay before the next export attempt after `attempts` failures
    pub(crate) fn export_backoff(&self, attempts: u32) -> chrono::Duration {
        let secs = self
            .export_backoff_base_secs
            .saturating_mul(1u64 << attempts.min(6))
            .min(self.export_backoff_cap_secs);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Current state of the engine's sync bookkeeping
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Timestamp of the last completed sync, in milliseconds
    pub last_sync_timestamp: i64,
    /// Outcome of the last sync
    pub last_status: Option<SyncStatus>,
}

/// Outcome of one sync operation
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// When the sync completed, in milliseconds
    pub timestamp: i64,
    /// Entries imported from the health source
    pub imported: usize,
    /// Remote entries merged into the local store
    pub merged: usize,
    /// Entries exported to the health source
    pub exported: usize,
    /// Entries that failed to merge (partial sync)
    pub failed_ids: Vec<Uuid>,
    /// How long the sync took
    pub duration_ms: u64,
    /// Whether it succeeded
    pub success: bool,
    /// Error message if failed or partial
    pub error: Option<String>,
}

impl SyncStatus {
    pub(crate) fn failure(started: std::time::Instant, error: String) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            imported: 0,
            merged: 0,
            exported: 0,
            failed_ids: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: false,
            error: Some(error),
        }
    }
}

/// Outcome of one import pass
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Whether the pass actually ran (false when the source is absent or an
    /// import for the author was already in flight)
    pub ran: bool,
    /// New entries created
    pub imported: usize,
    /// Samples skipped by the exactly-once id guard
    pub skipped_known: usize,
    /// Samples skipped by the per-day non-regression guard
    pub skipped_regression: usize,
    /// Watermark after the pass
    pub watermark: Option<DateTime<Utc>>,
}

impl ImportReport {
    pub(crate) fn not_run() -> Self {
        Self::default()
    }
}

/// Outcome of the dedup pass
#[derive(Debug, Clone, Default)]
pub struct DedupReport {
    /// Days that had more than one live entry
    pub days_collapsed: usize,
    /// Entries deleted from both stores
    pub entries_removed: usize,
    /// Entries that could not be fully removed
    pub failed_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.external_timeout_secs, 30);
        assert_eq!(config.sync_interval_minutes, 15);
        assert!(config.background_enabled);
    }

    #[test]
    fn test_export_backoff_ladder() {
        let config = SyncConfig::default();

        assert_eq!(config.export_backoff(0), chrono::Duration::seconds(60));
        assert_eq!(config.export_backoff(1), chrono::Duration::seconds(120));
        assert_eq!(config.export_backoff(2), chrono::Duration::seconds(240));
        // Capped
        assert_eq!(config.export_backoff(10), chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_sync_state_default() {
        let state = SyncState::default();
        assert_eq!(state.last_sync_timestamp, 0);
        assert!(state.last_status.is_none());
    }
}
