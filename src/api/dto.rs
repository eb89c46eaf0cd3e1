//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use crate::store::MetricEntry;
use crate::sync::{DedupReport, SyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// ENTRY DTOs
// ============================================

/// Create entry request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEntryRequest {
    /// Measured value
    pub value: f64,
    /// Measurement instant; defaults to now
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Update entry request (value/date correction)
#[derive(Debug, Deserialize)]
pub struct UpdateEntryRequest {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Entry as exposed by the API
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub id: String,
    pub author_id: String,
    pub value: f64,
    pub date: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_sample_id: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&MetricEntry> for EntryResponse {
    fn from(entry: &MetricEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            author_id: entry.author_id.clone(),
            value: entry.value,
            date: entry.date,
            source: entry.source.to_string(),
            external_sample_id: entry.external_sample_id.clone(),
            date_created: entry.date_created,
            date_modified: entry.date_modified,
            deleted_at: entry.deleted_at,
        }
    }
}

/// Entry list response
#[derive(Debug, Serialize)]
pub struct EntryListResponse {
    pub total: usize,
    pub entries: Vec<EntryResponse>,
}

// ============================================
// SYNC DTOs
// ============================================

/// Explicit sync trigger request
#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    /// Account creation date; floors the first import so pre-account history
    /// is not pulled in
    #[serde(default)]
    pub account_created: Option<DateTime<Utc>>,
}

/// Sync trigger response
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: String,
    pub total: usize,
    pub imported: usize,
    pub merged: usize,
    pub exported: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sync status response
#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub last_sync_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<SyncStatusDto>,
    pub external_source_available: bool,
}

/// Last sync outcome
#[derive(Debug, Serialize)]
pub struct SyncStatusDto {
    pub timestamp: i64,
    pub imported: usize,
    pub merged: usize,
    pub exported: usize,
    pub failed_ids: Vec<String>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&SyncStatus> for SyncStatusDto {
    fn from(status: &SyncStatus) -> Self {
        Self {
            timestamp: status.timestamp,
            imported: status.imported,
            merged: status.merged,
            exported: status.exported,
            failed_ids: status.failed_ids.iter().map(|id| id.to_string()).collect(),
            duration_ms: status.duration_ms,
            success: status.success,
            error: status.error.clone(),
        }
    }
}

/// Dedup pass response
#[derive(Debug, Serialize)]
pub struct DedupResponse {
    pub days_collapsed: usize,
    pub entries_removed: usize,
    pub failed_ids: Vec<String>,
}

impl From<&DedupReport> for DedupResponse {
    fn from(report: &DedupReport) -> Self {
        Self {
            days_collapsed: report.days_collapsed,
            entries_removed: report.entries_removed,
            failed_ids: report.failed_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub external_source_available: bool,
}
