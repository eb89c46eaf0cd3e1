//! Core data types for the Stride sync engine
//!
//! This module defines the unit of reconciliation:
//! - `MetricEntry`: one dated numeric measurement for one author
//! - `EntrySource`: provenance of an entry, used to decide export eligibility

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single per-day metric measurement
///
/// Entries are reconciled across three custodians (local store, remote store,
/// device health source). At most one live entry per `(author_id, calendar
/// day)` survives the dedup pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricEntry {
    /// Opaque unique identifier, assigned at creation, immutable
    pub id: Uuid,
    /// Owning user; all queries are scoped to one author
    pub author_id: String,
    /// The measured value (step count, kilograms, ...)
    pub value: f64,
    /// The calendar instant the measurement represents (not necessarily "now")
    pub date: DateTime<Utc>,
    /// Provenance of the entry
    pub source: EntrySource,
    /// Back-reference to a sample in the device health source; present only
    /// if this entry was created by or successfully exported to that source
    #[serde(default)]
    pub external_sample_id: Option<String>,
    /// Audit timestamp: when the entry was created
    pub date_created: DateTime<Utc>,
    /// Audit timestamp: last mutation
    pub date_modified: DateTime<Utc>,
    /// Soft-delete marker; soft-deleted entries are excluded from dedup and
    /// display but retained as tombstones
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MetricEntry {
    /// Create a new entry with a fresh id and current audit timestamps
    pub fn new(
        author_id: impl Into<String>,
        value: f64,
        date: DateTime<Utc>,
        source: EntrySource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            author_id: author_id.into(),
            value,
            date,
            source,
            external_sample_id: None,
            date_created: now,
            date_modified: now,
            deleted_at: None,
        }
    }

    /// Builder method: link this entry to a health-source sample
    pub fn with_sample_id(mut self, sample_id: impl Into<String>) -> Self {
        self.external_sample_id = Some(sample_id.into());
        self
    }

    /// The UTC calendar day this entry belongs to (dedup granularity)
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }

    /// Whether the entry is live (not soft-deleted)
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether the entry may still be exported to the health source
    ///
    /// An entry is export-eligible exactly once: it did not come from the
    /// device, and it has never been linked to a sample.
    pub fn export_eligible(&self) -> bool {
        self.source != EntrySource::ExternalDevice
            && self.external_sample_id.is_none()
            && self.is_live()
    }

    /// Bump the modification timestamp
    pub fn touch(&mut self) {
        self.date_modified = Utc::now();
    }
}

/// Where an entry came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Entered by the user through the app
    Manual,
    /// Pulled from the remote account store (written by another device)
    RemoteSync,
    /// Imported from the device health source
    ExternalDevice,
}

impl EntrySource {
    /// Stable string form used in storage and APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Manual => "manual",
            EntrySource::RemoteSync => "remote_sync",
            EntrySource::ExternalDevice => "external_device",
        }
    }

    /// Parse the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(EntrySource::Manual),
            "remote_sync" => Some(EntrySource::RemoteSync),
            "external_device" => Some(EntrySource::ExternalDevice),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
