//! Entry stores
//!
//! This module defines the three persistence seams of the sync engine and
//! their concrete implementations:
//! - `LocalStore`: durable, single-device persistence (SQLite)
//! - `RemoteStore`: cross-device account store (REST, eventually consistent)
//! - `WatermarkStore` / `OutboxStore`: sync bookkeeping (import cursor and
//!   pending-export queue), persisted next to the local entries

mod error;
mod memory;
mod remote;
mod sqlite;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryRemoteStore;
pub use remote::{RemoteConfig, RestRemoteStore};
pub use sqlite::SqliteStore;
pub use types::{EntrySource, MetricEntry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Durable single-device persistence for metric entries
///
/// Local operations are treated as synchronous and fast; only network-backed
/// collaborators suspend. `create` fails with `DuplicateId` when called twice
/// for the same id; callers with uncertain provenance use `upsert`.
pub trait LocalStore: Send + Sync {
    fn create(&self, entry: &MetricEntry) -> StoreResult<()>;
    fn read(&self, id: Uuid) -> StoreResult<MetricEntry>;
    fn read_all(&self, author_id: &str) -> StoreResult<Vec<MetricEntry>>;
    fn update(&self, entry: &MetricEntry) -> StoreResult<()>;
    fn delete(&self, id: Uuid) -> StoreResult<()>;
    fn delete_all(&self, author_id: &str) -> StoreResult<()>;

    /// All authors with at least one entry on this device
    fn authors(&self) -> StoreResult<Vec<String>>;

    /// Create, falling back to update on an id collision
    fn upsert(&self, entry: &MetricEntry) -> StoreResult<()> {
        match self.create(entry) {
            Err(StoreError::DuplicateId(_)) => self.update(entry),
            other => other,
        }
    }
}

/// Cross-device account store
///
/// Durable and author-scoped like the local store, but asynchronous and only
/// eventually consistent across devices.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, entry: &MetricEntry) -> StoreResult<()>;
    async fn read(&self, id: Uuid) -> StoreResult<MetricEntry>;
    async fn read_all(&self, author_id: &str) -> StoreResult<Vec<MetricEntry>>;
    async fn update(&self, entry: &MetricEntry) -> StoreResult<()>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn delete_all(&self, author_id: &str) -> StoreResult<()>;

    /// Create, falling back to update on an id collision
    async fn upsert(&self, entry: &MetricEntry) -> StoreResult<()> {
        match self.create(entry).await {
            Err(StoreError::DuplicateId(_)) => self.update(entry).await,
            other => other,
        }
    }
}

/// Import cursor for one author
///
/// `last_sample_date` marks the newest health-source sample already processed;
/// the next import queries from there. `earliest_date` is an optional floor
/// (derived from the account creation date) that keeps a first run from
/// importing pre-account history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermark {
    pub last_sample_date: Option<DateTime<Utc>>,
    pub earliest_date: Option<DateTime<Utc>>,
}

/// Persisted per-author import cursors
pub trait WatermarkStore: Send + Sync {
    fn watermark(&self, author_id: &str) -> StoreResult<Watermark>;
    fn set_watermark(&self, author_id: &str, mark: &Watermark) -> StoreResult<()>;
    fn clear_watermark(&self, author_id: &str) -> StoreResult<()>;
}

/// A pending export waiting to be written to the health source
#[derive(Debug, Clone)]
pub struct OutboxItem {
    pub entry_id: Uuid,
    pub author_id: String,
    /// Failed attempts so far; drives the backoff ladder
    pub attempts: u32,
    /// Earliest time the next attempt may run
    pub next_attempt_at: DateTime<Utc>,
}

/// Durable queue of entries not yet exported to the health source
///
/// Drained by the same sync cycle that drives import, so a failed export is
/// retried on every tick instead of only at the next unrelated create.
pub trait OutboxStore: Send + Sync {
    /// Enqueue an entry for export; a no-op if it is already queued
    fn enqueue(&self, author_id: &str, entry_id: Uuid) -> StoreResult<()>;

    /// All queued items for the author whose next attempt is due at `now`
    fn due(&self, author_id: &str, now: DateTime<Utc>) -> StoreResult<Vec<OutboxItem>>;

    /// Record a failed attempt and reschedule
    fn mark_attempt(&self, entry_id: Uuid, next_attempt_at: DateTime<Utc>) -> StoreResult<()>;

    fn remove(&self, entry_id: Uuid) -> StoreResult<()>;
    fn clear(&self, author_id: &str) -> StoreResult<()>;
}
