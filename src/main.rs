//! Stride Server
//!
//! Run with: cargo run --bin stride
//!
//! Loads configuration, opens the local store, wires the remote account store
//! and the optional health gateway, starts the background sync cycle, and
//! serves the REST API.
//!
//! # Configuration
//!
//! Reads `config.toml` from the usual locations (see `config::Config`), with
//! environment variable overrides:
//! - `STRIDE_DATA_DIR`: Data directory
//! - `STRIDE_REMOTE_URL`: Account API URL (empty = in-memory store)
//! - `STRIDE_HEALTH_URL`: Health bridge URL (setting it enables the source)
//! - `STRIDE_API_HOST` / `STRIDE_API_PORT`: Bind address
//! - `STRIDE_LOG_LEVEL` / `STRIDE_LOG_FORMAT`: Logging
//! - `RUST_LOG`: Overrides the log filter entirely

use anyhow::Context;
use std::sync::Arc;
use stride::api::{serve, ApiConfig, AppState};
use stride::config::Config;
use stride::external::{ExternalSampleSource, GatewayConfig, HealthGatewaySource};
use stride::store::{
    LocalStore, MemoryRemoteStore, OutboxStore, RemoteConfig, RemoteStore, RestRemoteStore,
    SqliteStore, WatermarkStore,
};
use stride::sync::{ReconciliationEngine, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_default();
    init_tracing(&config);

    tracing::info!("Starting Stride v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", config.store.data_dir);

    // Local store (entries + watermarks + export outbox)
    let store = Arc::new(
        SqliteStore::open(config.store.db_path()).context("failed to open local store")?,
    );

    // Remote account store
    let remote: Arc<dyn RemoteStore> = if config.remote.base_url.is_empty() {
        tracing::info!("No remote URL configured, using in-memory store");
        Arc::new(MemoryRemoteStore::new())
    } else {
        tracing::info!("Remote account store: {}", config.remote.base_url);
        Arc::new(RestRemoteStore::new(RemoteConfig {
            base_url: config.remote.base_url.clone(),
            request_timeout_ms: config.remote.request_timeout_ms,
            max_retries: config.remote.max_retries,
        }))
    };

    // Optional health source
    let external: Option<Arc<dyn ExternalSampleSource>> = if config.external.enabled {
        tracing::info!("Health gateway enabled: {}", config.external.base_url);
        Some(Arc::new(HealthGatewaySource::new(GatewayConfig {
            base_url: config.external.base_url.clone(),
            request_timeout_ms: config.external.request_timeout_ms,
        })))
    } else {
        tracing::info!("Health gateway disabled (set STRIDE_HEALTH_URL to enable)");
        None
    };

    let sync_config = SyncConfig {
        external_timeout_secs: config.sync.external_timeout_secs,
        export_backoff_base_secs: config.sync.export_backoff_base_secs,
        export_backoff_cap_secs: config.sync.export_backoff_cap_secs,
        sync_interval_minutes: config.sync.interval_minutes,
        background_enabled: config.sync.background_enabled,
    };

    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&store) as Arc<dyn LocalStore>,
        remote,
        Arc::clone(&store) as Arc<dyn WatermarkStore>,
        store as Arc<dyn OutboxStore>,
        external,
        sync_config,
    ));

    // Background sync cycle (import + outbox drain per known author)
    Arc::clone(&engine).start_background_sync();

    let api_config = ApiConfig {
        host: config.api.host.clone(),
        port: config.api.port,
        request_timeout_secs: config.api.request_timeout_secs,
    };

    let state = AppState::new(engine, api_config.clone());
    serve(state, &api_config)
        .await
        .context("API server failed")?;

    tracing::info!("Stride stopped");
    Ok(())
}

/// Initialize tracing from the logging config
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "stride={},tower_http=info",
            config.logging.level
        ))
    });

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
