//! # Stride
//!
//! Multi-source sync engine for per-day fitness metrics. Stride reconciles a
//! numeric metric (step counts, weight) across three custodians that each
//! hold an imperfect copy of the data:
//!
//! - a durable on-device store (SQLite)
//! - a remote account store shared across the user's devices
//! - a passive device health source that collects samples on its own
//!
//! ## Guarantees
//!
//! - **Exactly-once import**: a health-source sample id never becomes more
//!   than one entry
//! - **Non-regression**: an import never lowers a day's best-known value
//! - **Idempotent sync**: re-running a sync on the same inputs is a no-op;
//!   a crash mid-import leaves the watermark unmoved and the window is
//!   safely reprocessed
//! - **Local durability first**: every write lands on-device before the
//!   network is involved; remote failures converge on the next pull
//!
//! ## Modules
//!
//! - [`store`]: local/remote store contracts and implementations
//! - [`external`]: the device health source seam
//! - [`sync`]: the reconciliation engine
//! - [`api`]: REST façade with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stride::store::{
//!     EntrySource, LocalStore, MemoryRemoteStore, MetricEntry, OutboxStore, RemoteStore,
//!     SqliteStore, WatermarkStore,
//! };
//! use stride::sync::{ReconciliationEngine, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open("stride_data/stride.db")?);
//!     let remote = Arc::new(MemoryRemoteStore::new());
//!
//!     let engine = Arc::new(ReconciliationEngine::new(
//!         Arc::clone(&store) as Arc<dyn LocalStore>,
//!         remote as Arc<dyn RemoteStore>,
//!         Arc::clone(&store) as Arc<dyn WatermarkStore>,
//!         store as Arc<dyn OutboxStore>,
//!         None,
//!         SyncConfig::default(),
//!     ));
//!
//!     // Record today's steps
//!     let entry = MetricEntry::new("alice", 8200.0, chrono::Utc::now(), EntrySource::Manual);
//!     engine.create(entry).await?;
//!
//!     // Explicit sync + merge
//!     let entries = engine.read_all_remote("alice", None).await?;
//!     println!("{} entries after sync", entries.len());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod external;
pub mod store;
pub mod sync;

// Re-export top-level types for convenience
pub use store::{
    EntrySource, LocalStore, MemoryRemoteStore, MetricEntry, OutboxItem, OutboxStore,
    RemoteConfig, RemoteStore, RestRemoteStore, SqliteStore, StoreError, StoreResult, Watermark,
    WatermarkStore,
};

pub use external::{
    ExternalSampleSource, GatewayConfig, HealthGatewaySource, Sample, SourceError,
};

pub use sync::{
    DedupReport, EngineResult, ImportReport, ReconciliationEngine, SyncConfig, SyncError,
    SyncState, SyncStatus,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{
    Config, ConfigError, LoggingConfig, ApiConfig as ConfigApiConfig,
    ExternalConfig as ConfigExternalConfig, RemoteConfig as ConfigRemoteConfig,
    StoreConfig as ConfigStoreConfig, SyncConfig as ConfigSyncConfig,
};
