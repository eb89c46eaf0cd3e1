//! The reconciliation engine
//!
//! Owns the CRUD façade consumed by the app and the sync machinery that moves
//! entries between the local store, the remote account store, and the device
//! health source:
//!
//! - Import: health source → local → remote, bounded by a per-author
//!   watermark, exactly-once by sample id, never regressing a day's best
//!   known value. The watermark is persisted only after the full batch, so an
//!   interrupted run reprocesses the same window instead of skipping samples.
//! - Export: eligible entries go through a durable outbox drained by the same
//!   cycle that drives import.
//! - Merge: the explicit remote pull upserts every remote entry into the
//!   local store (remote wins on conflict) and replaces the in-memory cache.
//!
//! Every mutating path for an author runs under that author's mutex. Import
//! keeps drop-don't-defer semantics: a second trigger while an import is in
//! flight is a silent no-op.

use crate::external::{ExternalSampleSource, SourceError};
use crate::store::{
    EntrySource, LocalStore, MetricEntry, OutboxStore, RemoteStore, StoreError, Watermark,
    WatermarkStore,
};
use crate::sync::{
    dedup, DedupReport, EngineResult, ImportReport, SyncConfig, SyncState, SyncStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Reconciles an author's entries across the three custodians
pub struct ReconciliationEngine {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    watermarks: Arc<dyn WatermarkStore>,
    outbox: Arc<dyn OutboxStore>,
    /// Absent on platforms without a health store; the engine degrades to
    /// local/remote-only sync
    external: Option<Arc<dyn ExternalSampleSource>>,
    config: SyncConfig,
    /// The active author's entries; always replaced wholesale, never patched
    cache: RwLock<Vec<MetricEntry>>,
    /// One mutex per author, guarding every mutating operation
    author_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    state: RwLock<SyncState>,
}

impl ReconciliationEngine {
    /// Create a new engine over the given collaborators
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        watermarks: Arc<dyn WatermarkStore>,
        outbox: Arc<dyn OutboxStore>,
        external: Option<Arc<dyn ExternalSampleSource>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            remote,
            watermarks,
            outbox,
            external,
            config,
            cache: RwLock::new(Vec::new()),
            author_locks: std::sync::Mutex::new(HashMap::new()),
            state: RwLock::new(SyncState::default()),
        }
    }

    fn author_lock(&self, author_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.author_locks.lock().unwrap();
        Arc::clone(locks.entry(author_id.to_string()).or_default())
    }

    /// Create an entry: local first (durability), then remote best-effort,
    /// then an export attempt if the entry is eligible
    ///
    /// A remote failure is swallowed; the entry is durable on-device and the
    /// next remote pull converges. Export is attempted even when the remote
    /// write failed, since local durability is what makes it eligible.
    pub async fn create(&self, entry: MetricEntry) -> EngineResult<MetricEntry> {
        let lock = self.author_lock(&entry.author_id);
        let _guard = lock.lock().await;

        self.local.create(&entry)?;

        if let Err(e) = self.remote.create(&entry).await {
            tracing::warn!(id = %entry.id, error = %e, "remote create deferred to next sync");
        }

        let entry = if entry.export_eligible() {
            self.outbox.enqueue(&entry.author_id, entry.id)?;
            self.export_queued(entry, 0).await
        } else {
            entry
        };

        self.refresh_cache(&entry.author_id).await?;
        Ok(entry)
    }

    /// Correct an entry's value or date; local first, remote best-effort
    pub async fn update(&self, mut entry: MetricEntry) -> EngineResult<MetricEntry> {
        let lock = self.author_lock(&entry.author_id);
        let _guard = lock.lock().await;

        entry.touch();
        self.local.update(&entry)?;

        if let Err(e) = self.remote.update(&entry).await {
            tracing::warn!(id = %entry.id, error = %e, "remote update deferred to next sync");
        }

        self.refresh_cache(&entry.author_id).await?;
        Ok(entry)
    }

    /// Hard-delete an entry from both stores (explicit user action)
    pub async fn delete(&self, id: Uuid) -> EngineResult<()> {
        let entry = self.local.read(id)?;
        let lock = self.author_lock(&entry.author_id);
        let _guard = lock.lock().await;

        self.local.delete(id)?;

        if let Err(e) = self.remote.delete(id).await {
            tracing::warn!(id = %id, error = %e, "remote delete deferred to next sync");
        }

        if let Err(e) = self.outbox.remove(id) {
            tracing::warn!(id = %id, error = %e, "failed to drop deleted entry from outbox");
        }

        self.refresh_cache(&entry.author_id).await?;
        Ok(())
    }

    /// Read a single entry from the local store
    pub fn entry(&self, id: Uuid) -> EngineResult<MetricEntry> {
        Ok(self.local.read(id)?)
    }

    /// Snapshot of the in-memory cache
    pub async fn cached_entries(&self) -> Vec<MetricEntry> {
        self.cache.read().await.clone()
    }

    /// The non-blocking read path
    ///
    /// Returns the cache refreshed from the local store and, when a health
    /// source exists, triggers a detached background import for the author.
    /// The read never waits on the import; callers see whatever the local
    /// store currently holds.
    pub async fn read_all_local(self: &Arc<Self>) -> EngineResult<Vec<MetricEntry>> {
        let author = self
            .cache
            .read()
            .await
            .first()
            .map(|e| e.author_id.clone());

        match author {
            Some(author) => self.read_all_local_for(&author).await,
            None => Ok(Vec::new()),
        }
    }

    /// `read_all_local` with an explicit author (first read of a session)
    pub async fn read_all_local_for(
        self: &Arc<Self>,
        author_id: &str,
    ) -> EngineResult<Vec<MetricEntry>> {
        let entries = self.local.read_all(author_id)?;
        {
            let mut cache = self.cache.write().await;
            *cache = entries.clone();
        }

        if self.external.is_some() {
            let engine = Arc::clone(self);
            let author = author_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = engine.import_from_external(&author).await {
                    tracing::debug!(author = %author, error = %e, "background import failed");
                }
            });
        }

        Ok(entries)
    }

    /// The explicit foreground sync path (app-foreground, pull-to-refresh)
    ///
    /// Runs the import synchronously first so fresh samples are part of the
    /// merge, pulls everything from the remote store, upserts each remote
    /// entry into the local store (remote wins), replaces the cache with the
    /// remote result set, and drains the export outbox. Per-entry merge
    /// failures are logged and recorded in the sync status without aborting
    /// the batch; a failed remote fetch propagates.
    pub async fn read_all_remote(
        &self,
        author_id: &str,
        account_created: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<MetricEntry>> {
        let started = std::time::Instant::now();
        let lock = self.author_lock(author_id);
        let _guard = lock.lock().await;

        if let Some(created) = account_created {
            let mut mark = self.watermarks.watermark(author_id)?;
            if mark.earliest_date.is_none() {
                mark.earliest_date = Some(created);
                self.watermarks.set_watermark(author_id, &mark)?;
            }
        }

        let mut imported = 0;
        if self.external.is_some() {
            match self.import_locked(author_id).await {
                Ok(report) => imported = report.imported,
                Err(e) => {
                    tracing::warn!(author = %author_id, error = %e, "import before remote pull failed")
                }
            }
        }

        let remote_entries = match self.remote.read_all(author_id).await {
            Ok(entries) => entries,
            Err(e) => {
                self.record_status(SyncStatus::failure(started, e.to_string()))
                    .await;
                return Err(e.into());
            }
        };

        let mut failed_ids = Vec::new();
        for entry in &remote_entries {
            if let Err(e) = self.local.upsert(entry) {
                tracing::warn!(id = %entry.id, error = %e, "failed to merge remote entry");
                failed_ids.push(entry.id);
            }
        }

        {
            let mut cache = self.cache.write().await;
            *cache = remote_entries.clone();
        }

        let (exported, _) = self.drain_outbox(author_id).await.unwrap_or_else(|e| {
            tracing::warn!(author = %author_id, error = %e, "outbox drain failed");
            (0, 0)
        });

        let error = if failed_ids.is_empty() {
            None
        } else {
            Some(
                crate::sync::SyncError::Aggregate {
                    failed: failed_ids.len(),
                    total: remote_entries.len(),
                    failed_ids: failed_ids.clone(),
                }
                .to_string(),
            )
        };

        self.record_status(SyncStatus {
            timestamp: Utc::now().timestamp_millis(),
            imported,
            merged: remote_entries.len() - failed_ids.len(),
            exported,
            failed_ids,
            duration_ms: started.elapsed().as_millis() as u64,
            success: true,
            error,
        })
        .await;

        Ok(remote_entries)
    }

    /// Incremental import from the health source
    ///
    /// Single-flight per author: a trigger while another import for the same
    /// author is in flight is dropped, not deferred.
    pub async fn import_from_external(&self, author_id: &str) -> EngineResult<ImportReport> {
        let lock = self.author_lock(author_id);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(author = %author_id, "import already in flight, dropping trigger");
                return Ok(ImportReport::not_run());
            }
        };

        self.import_locked(author_id).await
    }

    /// Import body; the caller holds the author lock
    async fn import_locked(&self, author_id: &str) -> EngineResult<ImportReport> {
        let Some(source) = &self.external else {
            return Ok(ImportReport::not_run());
        };

        let mark = self.watermarks.watermark(author_id)?;
        let samples = tokio::time::timeout(
            self.config.external_timeout(),
            source.samples_since(mark.last_sample_date, mark.earliest_date),
        )
        .await
        .map_err(|_| SourceError::Timeout)??;

        if samples.is_empty() {
            tracing::debug!(author = %author_id, "no new samples");
            return Ok(ImportReport {
                ran: true,
                watermark: mark.last_sample_date,
                ..Default::default()
            });
        }

        let existing = self.local.read_all(author_id)?;
        let mut known = dedup::known_sample_ids(&existing);
        let mut day_max = dedup::max_value_by_day(&existing);

        let mut report = ImportReport {
            ran: true,
            ..Default::default()
        };
        let mut newest = mark.last_sample_date;

        for sample in samples {
            // The watermark advances to the max date observed, not the last
            // element, so an out-of-order batch still lands in the right spot
            newest = Some(newest.map_or(sample.date, |n| n.max(sample.date)));

            if known.contains(&sample.id) {
                report.skipped_known += 1;
                continue;
            }

            let day = sample.date.date_naive();
            if day_max
                .get(&day)
                .map(|&best| best >= sample.value)
                .unwrap_or(false)
            {
                report.skipped_regression += 1;
                continue;
            }

            let entry = MetricEntry::new(
                author_id,
                sample.value,
                sample.date,
                EntrySource::ExternalDevice,
            )
            .with_sample_id(&sample.id);

            if let Err(e) = self.local.upsert(&entry) {
                tracing::warn!(sample = %sample.id, error = %e, "skipping sample, local write failed");
                continue;
            }

            if let Err(e) = self.remote.create(&entry).await {
                tracing::debug!(id = %entry.id, error = %e, "remote create deferred to next sync");
            }

            known.insert(sample.id);
            day_max.insert(day, sample.value);
            report.imported += 1;
        }

        // Persisted only now: a crash mid-loop leaves the watermark unmoved
        // and the next run reprocesses the same window
        if newest != mark.last_sample_date {
            self.watermarks.set_watermark(
                author_id,
                &Watermark {
                    last_sample_date: newest,
                    earliest_date: mark.earliest_date,
                },
            )?;
        }
        report.watermark = newest;

        self.refresh_cache(author_id).await?;

        tracing::info!(
            author = %author_id,
            imported = report.imported,
            skipped_known = report.skipped_known,
            skipped_regression = report.skipped_regression,
            "import complete"
        );
        Ok(report)
    }

    /// Export an entry to the health source if it is still eligible
    ///
    /// Enqueues the entry in the durable outbox and attempts the export
    /// immediately. On failure the entry stays queued and the next sync cycle
    /// retries it.
    pub async fn export_if_needed(&self, entry: MetricEntry) -> EngineResult<MetricEntry> {
        if !entry.export_eligible() {
            return Ok(entry);
        }

        let lock = self.author_lock(&entry.author_id);
        let _guard = lock.lock().await;

        self.outbox.enqueue(&entry.author_id, entry.id)?;
        let entry = self.export_queued(entry, 0).await;
        self.refresh_cache(&entry.author_id).await?;
        Ok(entry)
    }

    /// One export attempt for a queued entry; the caller holds the author lock
    async fn export_queued(&self, mut entry: MetricEntry, attempts: u32) -> MetricEntry {
        let Some(source) = &self.external else {
            // No source on this platform; the entry stays queued in case one
            // appears after a reconfiguration
            return entry;
        };

        let saved = tokio::time::timeout(
            self.config.external_timeout(),
            source.save_sample(entry.value, entry.date),
        )
        .await;

        match saved {
            Ok(Ok(sample_id)) => {
                entry.external_sample_id = Some(sample_id);
                entry.touch();

                match self.local.update(&entry) {
                    Ok(()) => {
                        if let Err(e) = self.remote.update(&entry).await {
                            tracing::warn!(id = %entry.id, error = %e, "remote update deferred to next sync");
                        }
                        if let Err(e) = self.outbox.remove(entry.id) {
                            tracing::warn!(id = %entry.id, error = %e, "failed to dequeue exported entry");
                        }
                        tracing::info!(id = %entry.id, "exported entry to health source");
                    }
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "failed to persist sample id");
                    }
                }
            }
            Ok(Err(e)) => {
                let next = Utc::now() + self.config.export_backoff(attempts);
                tracing::warn!(id = %entry.id, error = %e, "export failed, will retry");
                if let Err(e) = self.outbox.mark_attempt(entry.id, next) {
                    tracing::warn!(id = %entry.id, error = %e, "failed to reschedule export");
                }
            }
            Err(_) => {
                let next = Utc::now() + self.config.export_backoff(attempts);
                tracing::warn!(id = %entry.id, "export timed out, will retry");
                if let Err(e) = self.outbox.mark_attempt(entry.id, next) {
                    tracing::warn!(id = %entry.id, error = %e, "failed to reschedule export");
                }
            }
        }

        entry
    }

    /// Drain due outbox rows; the caller holds the author lock
    ///
    /// Returns (exported, deferred).
    async fn drain_outbox(&self, author_id: &str) -> EngineResult<(usize, usize)> {
        if self.external.is_none() {
            return Ok((0, 0));
        }

        let due = self.outbox.due(author_id, Utc::now())?;
        let mut exported = 0;
        let mut deferred = 0;

        for item in due {
            let entry = match self.local.read(item.entry_id) {
                Ok(entry) => entry,
                Err(StoreError::NotFound(_)) => {
                    let _ = self.outbox.remove(item.entry_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !entry.export_eligible() {
                let _ = self.outbox.remove(item.entry_id);
                continue;
            }

            let after = self.export_queued(entry, item.attempts).await;
            if after.external_sample_id.is_some() {
                exported += 1;
            } else {
                deferred += 1;
            }
        }

        Ok((exported, deferred))
    }

    /// Administrative cleanup: collapse each day down to one live entry
    ///
    /// The earliest entry per day survives; the rest are deleted from both
    /// stores. Invoked explicitly, not on every sync: the pass is destructive
    /// and O(entries).
    pub async fn dedupe_entries_by_day(&self, author_id: &str) -> EngineResult<DedupReport> {
        let lock = self.author_lock(author_id);
        let _guard = lock.lock().await;

        let entries = self.local.read_all(author_id)?;
        let plan = dedup::plan(&entries);

        let mut report = DedupReport {
            days_collapsed: plan.duplicate_days,
            ..Default::default()
        };

        for loser in &plan.losers {
            match self.local.delete(loser.id) {
                Ok(()) => {
                    if let Err(e) = self.remote.delete(loser.id).await {
                        tracing::warn!(id = %loser.id, error = %e, "remote delete failed during dedup");
                        report.failed_ids.push(loser.id);
                    }
                    let _ = self.outbox.remove(loser.id);
                    report.entries_removed += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %loser.id, error = %e, "local delete failed during dedup");
                    report.failed_ids.push(loser.id);
                }
            }
        }

        self.refresh_cache(author_id).await?;

        tracing::info!(
            author = %author_id,
            days = report.days_collapsed,
            removed = report.entries_removed,
            "dedup pass complete"
        );
        Ok(report)
    }

    /// Device-local reset (sign-out): wipes local entries, the watermark,
    /// the outbox, and the cache. The remote store and the health source are
    /// untouched.
    pub async fn clear_all_local_data(&self, author_id: &str) -> EngineResult<()> {
        let lock = self.author_lock(author_id);
        let _guard = lock.lock().await;

        self.local.delete_all(author_id)?;
        self.watermarks.clear_watermark(author_id)?;
        self.outbox.clear(author_id)?;

        let mut cache = self.cache.write().await;
        cache.retain(|e| e.author_id != author_id);

        tracing::info!(author = %author_id, "cleared local data");
        Ok(())
    }

    /// One background sync cycle: import then drain the export outbox
    pub async fn run_sync_cycle(&self, author_id: &str) -> EngineResult<SyncStatus> {
        let started = std::time::Instant::now();
        let lock = self.author_lock(author_id);
        let _guard = lock.lock().await;

        let report = self.import_locked(author_id).await?;
        let (exported, deferred) = self.drain_outbox(author_id).await?;

        if deferred > 0 {
            tracing::debug!(author = %author_id, deferred, "exports deferred to a later cycle");
        }

        let status = SyncStatus {
            timestamp: Utc::now().timestamp_millis(),
            imported: report.imported,
            merged: 0,
            exported,
            failed_ids: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: true,
            error: None,
        };
        self.record_status(status.clone()).await;

        Ok(status)
    }

    /// Start the background sync task
    ///
    /// Spawns a tokio task that runs the sync cycle for every author known to
    /// the local store, on the configured interval.
    pub fn start_background_sync(self: Arc<Self>) {
        if !self.config.background_enabled {
            tracing::info!("background sync disabled");
            return;
        }

        tracing::info!(
            interval_minutes = self.config.sync_interval_minutes,
            "starting background sync"
        );

        tokio::spawn(async move {
            let interval =
                std::time::Duration::from_secs(self.config.sync_interval_minutes * 60);
            let mut ticker = tokio::time::interval(interval);

            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let authors = match self.local.authors() {
                    Ok(authors) => authors,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to list authors for sync cycle");
                        continue;
                    }
                };

                for author in authors {
                    match self.run_sync_cycle(&author).await {
                        Ok(status) => {
                            tracing::debug!(
                                author = %author,
                                imported = status.imported,
                                exported = status.exported,
                                duration_ms = status.duration_ms,
                                "sync cycle complete"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(author = %author, error = %e, "sync cycle failed");
                        }
                    }
                }
            }
        });
    }

    /// Current sync bookkeeping
    pub async fn status(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// Whether a health source is configured
    pub fn has_external_source(&self) -> bool {
        self.external.is_some()
    }

    async fn record_status(&self, status: SyncStatus) {
        let mut state = self.state.write().await;
        state.last_sync_timestamp = status.timestamp;
        state.last_status = Some(status);
    }

    async fn refresh_cache(&self, author_id: &str) -> EngineResult<()> {
        let entries = self.local.read_all(author_id)?;
        let mut cache = self.cache.write().await;
        // The cache tracks one active author; a background cycle for another
        // author must not replace it
        if cache.first().map_or(true, |e| e.author_id == author_id) {
            *cache = entries;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::Sample;
    use crate::store::{MemoryRemoteStore, SqliteStore};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Health source stub with scriptable samples and failure modes
    #[derive(Default)]
    struct StubSource {
        samples: std::sync::Mutex<Vec<Sample>>,
        saves: std::sync::Mutex<Vec<(f64, DateTime<Utc>)>>,
        fail_saves: AtomicBool,
        next_save_id: AtomicUsize,
    }

    impl StubSource {
        fn push_sample(&self, id: &str, date: DateTime<Utc>, value: f64) {
            self.samples.lock().unwrap().push(Sample {
                id: id.to_string(),
                value,
                date,
            });
        }

        fn save_count(&self) -> usize {
            self.saves.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExternalSampleSource for StubSource {
        async fn samples_since(
            &self,
            watermark: Option<DateTime<Utc>>,
            earliest: Option<DateTime<Utc>>,
        ) -> Result<Vec<Sample>, SourceError> {
            let samples = self.samples.lock().unwrap();
            Ok(samples
                .iter()
                .filter(|s| watermark.map(|w| s.date >= w).unwrap_or(true))
                .filter(|s| earliest.map(|e| s.date >= e).unwrap_or(true))
                .cloned()
                .collect())
        }

        async fn save_sample(
            &self,
            value: f64,
            date: DateTime<Utc>,
        ) -> Result<String, SourceError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable("health source offline".into()));
            }
            let n = self.next_save_id.fetch_add(1, Ordering::SeqCst);
            self.saves.lock().unwrap().push((value, date));
            Ok(format!("hk-{}", n))
        }
    }

    /// Remote store wrapper that can be switched into a failing mode
    #[derive(Default)]
    struct FlakyRemote {
        inner: MemoryRemoteStore,
        fail_writes: AtomicBool,
    }

    impl FlakyRemote {
        fn check(&self) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("remote down".into()));
            }
            Ok(())
        }
    }

    use crate::store::StoreResult;

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn create(&self, entry: &MetricEntry) -> StoreResult<()> {
            self.check()?;
            self.inner.create(entry).await
        }
        async fn read(&self, id: Uuid) -> StoreResult<MetricEntry> {
            self.inner.read(id).await
        }
        async fn read_all(&self, author_id: &str) -> StoreResult<Vec<MetricEntry>> {
            self.check()?;
            self.inner.read_all(author_id).await
        }
        async fn update(&self, entry: &MetricEntry) -> StoreResult<()> {
            self.check()?;
            self.inner.update(entry).await
        }
        async fn delete(&self, id: Uuid) -> StoreResult<()> {
            self.check()?;
            self.inner.delete(id).await
        }
        async fn delete_all(&self, author_id: &str) -> StoreResult<()> {
            self.check()?;
            self.inner.delete_all(author_id).await
        }
    }

    struct Harness {
        engine: Arc<ReconciliationEngine>,
        store: Arc<SqliteStore>,
        remote: Arc<FlakyRemote>,
        source: Arc<StubSource>,
    }

    fn harness() -> Harness {
        harness_with_config(SyncConfig {
            // Zero backoff so failed exports are immediately due again
            export_backoff_base_secs: 0,
            ..SyncConfig::default()
        })
    }

    fn harness_with_config(config: SyncConfig) -> Harness {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let remote = Arc::new(FlakyRemote::default());
        let source = Arc::new(StubSource::default());

        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store) as Arc<dyn LocalStore>,
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&store) as Arc<dyn WatermarkStore>,
            Arc::clone(&store) as Arc<dyn OutboxStore>,
            Some(Arc::clone(&source) as Arc<dyn ExternalSampleSource>),
            config,
        ));

        Harness {
            engine,
            store,
            remote,
            source,
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    fn live(entries: &[MetricEntry]) -> Vec<&MetricEntry> {
        entries.iter().filter(|e| e.is_live()).collect()
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let h = harness();
        h.source.push_sample("s1", at(1, 10), 1000.0);
        h.source.push_sample("s2", at(2, 10), 2000.0);

        let first = h.engine.import_from_external("alice").await.unwrap();
        assert_eq!(first.imported, 2);
        assert_eq!(h.store.read_all("alice").unwrap().len(), 2);

        let mark_after_first = h.store.watermark("alice").unwrap();
        assert_eq!(mark_after_first.last_sample_date, Some(at(2, 10)));

        // Second run: the max-date sample is re-presented (inclusive window)
        // and absorbed by the id guard; nothing changes
        let second = h.engine.import_from_external("alice").await.unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(h.store.read_all("alice").unwrap().len(), 2);
        assert_eq!(h.store.watermark("alice").unwrap(), mark_after_first);
    }

    #[tokio::test]
    async fn test_sample_id_imported_exactly_once() {
        let h = harness();

        let existing = MetricEntry::new("alice", 500.0, at(1, 9), EntrySource::ExternalDevice)
            .with_sample_id("s1");
        h.store.create(&existing).unwrap();

        h.source.push_sample("s1", at(1, 9), 500.0);
        let report = h.engine.import_from_external("alice").await.unwrap();

        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped_known, 1);
        assert_eq!(h.store.read_all("alice").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tombstone_blocks_reimport() {
        let h = harness();

        let mut deleted = MetricEntry::new("alice", 500.0, at(1, 9), EntrySource::ExternalDevice)
            .with_sample_id("s1");
        deleted.deleted_at = Some(Utc::now());
        h.store.create(&deleted).unwrap();

        h.source.push_sample("s1", at(1, 9), 500.0);
        let report = h.engine.import_from_external("alice").await.unwrap();

        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped_known, 1);
    }

    #[tokio::test]
    async fn test_import_never_regresses_day_value() {
        let h = harness();

        let existing = MetricEntry::new("alice", 100.0, at(5, 8), EntrySource::Manual);
        h.store.create(&existing).unwrap();

        // Lower value for the same day: skipped, existing entry untouched
        h.source.push_sample("s-low", at(5, 12), 80.0);
        let report = h.engine.import_from_external("alice").await.unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped_regression, 1);
        assert_eq!(h.store.read(existing.id).unwrap().value, 100.0);
        assert_eq!(h.store.read_all("alice").unwrap().len(), 1);

        // Higher value: a new entry is created
        h.source.push_sample("s-high", at(5, 13), 120.0);
        let report = h.engine.import_from_external("alice").await.unwrap();
        assert_eq!(report.imported, 1);

        let entries = h.store.read_all("alice").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(h.store.read(existing.id).unwrap().value, 100.0);
    }

    #[tokio::test]
    async fn test_watermark_advances_to_max_date_seen() {
        let h = harness();

        // Out of order: newest first
        h.source.push_sample("s3", at(3, 10), 300.0);
        h.source.push_sample("s1", at(1, 10), 100.0);
        h.source.push_sample("s2", at(2, 10), 200.0);

        let report = h.engine.import_from_external("alice").await.unwrap();

        assert_eq!(report.imported, 3);
        assert_eq!(report.watermark, Some(at(3, 10)));
        assert_eq!(
            h.store.watermark("alice").unwrap().last_sample_date,
            Some(at(3, 10))
        );
    }

    #[tokio::test]
    async fn test_earliest_floor_limits_first_import() {
        let h = harness();

        h.source.push_sample("old", at(1, 10), 100.0);
        h.source.push_sample("new", at(10, 10), 200.0);

        // Account created on day 5: pre-account history is not imported
        h.engine
            .read_all_remote("alice", Some(at(5, 0)))
            .await
            .unwrap();

        let entries = h.store.read_all("alice").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].external_sample_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_dedupe_keeps_earliest_entry() {
        let h = harness();

        let t1 = MetricEntry::new("alice", 100.0, at(4, 8), EntrySource::Manual);
        let t2 = MetricEntry::new("alice", 200.0, at(4, 12), EntrySource::Manual);
        let t3 = MetricEntry::new("alice", 300.0, at(4, 18), EntrySource::Manual);
        for e in [&t1, &t2, &t3] {
            h.store.create(e).unwrap();
            h.remote.inner.seed(vec![(*e).clone()]);
        }

        let report = h.engine.dedupe_entries_by_day("alice").await.unwrap();

        assert_eq!(report.days_collapsed, 1);
        assert_eq!(report.entries_removed, 2);
        assert!(report.failed_ids.is_empty());

        let local = h.store.read_all("alice").unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, t1.id);

        let remote = h.remote.inner.all();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id, t1.id);
    }

    #[tokio::test]
    async fn test_export_sets_sample_id_exactly_once() {
        let h = harness();

        let entry = MetricEntry::new("alice", 9000.0, at(2, 9), EntrySource::Manual);
        let created = h.engine.create(entry).await.unwrap();

        assert!(created.external_sample_id.is_some());
        assert_eq!(h.source.save_count(), 1);

        // The exported entry is no longer eligible; a second call is a no-op
        let again = h.engine.export_if_needed(created.clone()).await.unwrap();
        assert_eq!(again.external_sample_id, created.external_sample_id);
        assert_eq!(h.source.save_count(), 1);

        // Sample id persisted in both stores
        assert!(h
            .store
            .read(created.id)
            .unwrap()
            .external_sample_id
            .is_some());
        assert!(h
            .remote
            .inner
            .read(created.id)
            .await
            .unwrap()
            .external_sample_id
            .is_some());
    }

    #[tokio::test]
    async fn test_imported_entries_are_not_exported() {
        let h = harness();
        h.source.push_sample("s1", at(1, 10), 1000.0);

        h.engine.import_from_external("alice").await.unwrap();

        assert_eq!(h.source.save_count(), 0);
    }

    #[tokio::test]
    async fn test_create_survives_remote_failure() {
        let h = harness();
        h.remote.fail_writes.store(true, Ordering::SeqCst);

        let entry = MetricEntry::new("alice", 7000.0, at(2, 9), EntrySource::Manual);
        let created = h.engine.create(entry).await.unwrap();

        // Durable locally, export still attempted, remote empty
        assert!(h.store.read(created.id).is_ok());
        assert_eq!(h.source.save_count(), 1);
        assert!(h.remote.inner.all().is_empty());
    }

    #[tokio::test]
    async fn test_failed_export_retried_by_sync_cycle() {
        let h = harness();
        h.source.fail_saves.store(true, Ordering::SeqCst);

        let entry = MetricEntry::new("alice", 7000.0, at(2, 9), EntrySource::Manual);
        let created = h.engine.create(entry).await.unwrap();
        assert!(created.external_sample_id.is_none());

        // Source comes back; the next cycle drains the outbox
        h.source.fail_saves.store(false, Ordering::SeqCst);
        let status = h.engine.run_sync_cycle("alice").await.unwrap();

        assert_eq!(status.exported, 1);
        assert!(h
            .store
            .read(created.id)
            .unwrap()
            .external_sample_id
            .is_some());
        assert_eq!(h.source.save_count(), 1);
    }

    #[tokio::test]
    async fn test_read_all_remote_merges_into_local() {
        let h = harness();

        let e1 = MetricEntry::new("alice", 50.0, at(5, 12), EntrySource::RemoteSync);
        h.remote.inner.seed(vec![e1.clone()]);

        let result = h.engine.read_all_remote("alice", None).await.unwrap();

        assert_eq!(result, vec![e1.clone()]);
        assert_eq!(h.store.read(e1.id).unwrap(), e1);
        assert_eq!(h.engine.cached_entries().await, vec![e1]);
    }

    #[tokio::test]
    async fn test_remote_wins_on_conflicting_entry() {
        let h = harness();

        let mut local_version = MetricEntry::new("alice", 50.0, at(5, 12), EntrySource::Manual);
        h.store.create(&local_version).unwrap();

        local_version.value = 75.0;
        local_version.source = EntrySource::RemoteSync;
        h.remote.inner.seed(vec![local_version.clone()]);

        h.engine.read_all_remote("alice", None).await.unwrap();

        assert_eq!(h.store.read(local_version.id).unwrap().value, 75.0);
    }

    #[tokio::test]
    async fn test_read_all_remote_propagates_fetch_failure() {
        let h = harness();
        h.remote.fail_writes.store(true, Ordering::SeqCst);

        let err = h.engine.read_all_remote("alice", None).await.unwrap_err();
        assert!(matches!(err, crate::sync::SyncError::Store(_)));

        let state = h.engine.status().await;
        assert!(!state.last_status.unwrap().success);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let h = harness();

        // Remote has one entry for day 5 with value 50
        let e1 = MetricEntry::new("alice", 50.0, at(5, 12), EntrySource::RemoteSync);
        h.remote.inner.seed(vec![e1.clone()]);

        let result = h.engine.read_all_remote("alice", None).await.unwrap();
        assert_eq!(result, vec![e1.clone()]);
        assert_eq!(h.store.read_all("alice").unwrap(), vec![e1.clone()]);
        assert_eq!(h.engine.cached_entries().await, vec![e1.clone()]);

        // A day-5 sample with a lower value is rejected by the regression guard
        h.source.push_sample("s5", at(5, 14), 40.0);
        let report = h.engine.import_from_external("alice").await.unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped_regression, 1);
        assert_eq!(live(&h.store.read_all("alice").unwrap()).len(), 1);

        // A day-6 sample creates an entry in both stores and advances the
        // watermark to day 6
        h.source.push_sample("s6", at(6, 9), 30.0);
        let report = h.engine.import_from_external("alice").await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(
            h.store.watermark("alice").unwrap().last_sample_date,
            Some(at(6, 9))
        );

        let local = h.store.read_all("alice").unwrap();
        assert_eq!(local.len(), 2);
        let imported = local
            .iter()
            .find(|e| e.external_sample_id.as_deref() == Some("s6"))
            .unwrap();
        assert_eq!(imported.value, 30.0);
        assert_eq!(imported.source, EntrySource::ExternalDevice);
        assert!(h.remote.inner.read(imported.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_all_local_data_is_device_local() {
        let h = harness();

        h.source.push_sample("s1", at(1, 10), 1000.0);
        h.engine.import_from_external("alice").await.unwrap();
        assert!(!h.store.read_all("alice").unwrap().is_empty());

        h.engine.clear_all_local_data("alice").await.unwrap();

        assert!(h.store.read_all("alice").unwrap().is_empty());
        assert_eq!(h.store.watermark("alice").unwrap(), Watermark::default());
        assert!(h.engine.cached_entries().await.is_empty());
        // Remote untouched
        assert_eq!(h.remote.inner.all().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_degrades_without_external_source() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store) as Arc<dyn LocalStore>,
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&store) as Arc<dyn WatermarkStore>,
            Arc::clone(&store) as Arc<dyn OutboxStore>,
            None,
            SyncConfig::default(),
        ));

        let report = engine.import_from_external("alice").await.unwrap();
        assert!(!report.ran);

        // CRUD and remote merge still work
        let entry = MetricEntry::new("alice", 100.0, at(1, 9), EntrySource::Manual);
        let created = engine.create(entry).await.unwrap();
        assert!(created.external_sample_id.is_none());

        let result = engine.read_all_remote("alice", None).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_read_all_local_returns_without_blocking() {
        let h = harness();

        let entry = MetricEntry::new("alice", 100.0, at(1, 9), EntrySource::Manual);
        h.engine.create(entry).await.unwrap();

        let entries = h.engine.read_all_local().await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
