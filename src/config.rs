//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub external: ExternalConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("stride").to_string_lossy().to_string())
        .unwrap_or_else(|| "./stride_data".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StoreConfig {
    /// Path to the SQLite database file
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("stride.db")
    }
}

/// Remote account store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the account API; empty switches to the in-memory store
    #[serde(default = "default_remote_url")]
    pub base_url: String,

    #[serde(default = "default_remote_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_remote_retries")]
    pub max_retries: u32,
}

fn default_remote_url() -> String {
    "http://localhost:8087".to_string()
}

fn default_remote_timeout() -> u64 {
    5000
}

fn default_remote_retries() -> u32 {
    3
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            request_timeout_ms: default_remote_timeout(),
            max_retries: default_remote_retries(),
        }
    }
}

/// Health gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_external_url")]
    pub base_url: String,

    #[serde(default = "default_external_timeout")]
    pub request_timeout_ms: u64,
}

fn default_external_url() -> String {
    "http://localhost:8088".to_string()
}

fn default_external_timeout() -> u64 {
    10_000
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_external_url(),
            request_timeout_ms: default_external_timeout(),
        }
    }
}

/// Sync behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval")]
    pub interval_minutes: u64,

    #[serde(default = "default_external_call_timeout")]
    pub external_timeout_secs: u64,

    #[serde(default = "default_export_backoff_base")]
    pub export_backoff_base_secs: u64,

    #[serde(default = "default_export_backoff_cap")]
    pub export_backoff_cap_secs: u64,

    #[serde(default = "default_background_enabled")]
    pub background_enabled: bool,
}

fn default_sync_interval() -> u64 {
    15
}

fn default_external_call_timeout() -> u64 {
    30
}

fn default_export_backoff_base() -> u64 {
    60
}

fn default_export_backoff_cap() -> u64 {
    3600
}

fn default_background_enabled() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_sync_interval(),
            external_timeout_secs: default_external_call_timeout(),
            export_backoff_base_secs: default_export_backoff_base(),
            export_backoff_cap_secs: default_export_backoff_cap(),
            background_enabled: default_background_enabled(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("stride").join("config.toml")),
            Some(PathBuf::from("/etc/stride/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Store overrides
        if let Ok(data_dir) = std::env::var("STRIDE_DATA_DIR") {
            self.store.data_dir = data_dir;
        }

        // Remote store overrides
        if let Ok(url) = std::env::var("STRIDE_REMOTE_URL") {
            self.remote.base_url = url;
        }

        // Health gateway overrides
        if let Ok(url) = std::env::var("STRIDE_HEALTH_URL") {
            self.external.base_url = url;
            self.external.enabled = true;
        }

        // API overrides
        if let Ok(host) = std::env::var("STRIDE_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("STRIDE_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("STRIDE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STRIDE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            remote: RemoteConfig::default(),
            external: ExternalConfig::default(),
            sync: SyncConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Stride Configuration
#
# Environment variables override these settings:
# - STRIDE_DATA_DIR
# - STRIDE_REMOTE_URL
# - STRIDE_HEALTH_URL
# - STRIDE_API_HOST
# - STRIDE_API_PORT
# - STRIDE_LOG_LEVEL
# - STRIDE_LOG_FORMAT

[store]
# Directory for the local SQLite database
data_dir = "~/.local/share/stride"

[remote]
# Account API shared across the user's devices.
# Leave empty to run against an in-memory store (offline development).
base_url = "http://localhost:8087"

# Request timeout (ms)
request_timeout_ms = 5000

# Retry attempts for transient failures
max_retries = 3

[external]
# Enable the device health source
enabled = false

# Health bridge daemon URL
base_url = "http://localhost:8088"

# Request timeout (ms)
request_timeout_ms = 10000

[sync]
# Background sync cycle interval (minutes)
interval_minutes = 15

# Timeout for health-source calls (seconds)
external_timeout_secs = 30

# Export retry backoff: base delay and cap (seconds)
export_backoff_base_secs = 60
export_backoff_cap_secs = 3600

# Enable the background sync cycle
background_enabled = true

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8086

# Request timeout in seconds
request_timeout_secs = 30

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/stride/stride.log"
"#
    .to_string()
}
