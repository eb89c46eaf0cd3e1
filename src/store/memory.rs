//! In-memory remote store
//!
//! HashMap-backed implementation of `RemoteStore` for offline development
//! (no account API configured) and for exercising the engine in tests.

use crate::store::error::{StoreError, StoreResult};
use crate::store::types::MetricEntry;
use crate::store::RemoteStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Remote store that keeps everything in process memory
#[derive(Default)]
pub struct MemoryRemoteStore {
    entries: Mutex<HashMap<Uuid, MetricEntry>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored entry, unordered
    pub fn all(&self) -> Vec<MetricEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    /// Pre-populate the store (test setup)
    pub fn seed(&self, entries: Vec<MetricEntry>) {
        let mut map = self.entries.lock().unwrap();
        for entry in entries {
            map.insert(entry.id, entry);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, entry: &MetricEntry) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&entry.id) {
            return Err(StoreError::DuplicateId(entry.id));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn read(&self, id: Uuid) -> StoreResult<MetricEntry> {
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn read_all(&self, author_id: &str) -> StoreResult<Vec<MetricEntry>> {
        let mut entries: Vec<MetricEntry> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.author_id == author_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }

    async fn update(&self, entry: &MetricEntry) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&entry.id) {
            return Err(StoreError::NotFound(entry.id));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete_all(&self, author_id: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.author_id != author_id);
        Ok(())
    }
}
