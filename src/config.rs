//! Configuration management for the telemetry backend
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.
//!
//! # Environment Overrides
//!
//! The deployment-level variables (`DATABASE_URL`, `PSQL_*`, `DB_*`,
//! `RATE_LIMIT_*`, `DEBUG*`, `LOG_PAYLOAD`, `DIRECT_INSERT`) are honored on
//! top of whatever the file provides, plus `TELEMETRY_LISTEN_ADDR`,
//! `TELEMETRY_STORAGE` and `RUST_LOG`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for the writer queue
const MAX_QUEUE_CAPACITY: usize = 1_000_000;
/// Upper bound for writer workers
const MAX_WORKERS: usize = 256;
/// Upper bound for a flush batch
const MAX_BATCH_SIZE: usize = 100_000;
/// Upper bound for the pool
const MAX_CONNECTIONS: u32 = 1_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch writer tuning
    #[serde(default)]
    pub writer: WriterConfig,

    /// Normalizer behavior
    #[serde(default)]
    pub normalizer: NormalizerConfig,

    /// Per-client rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-server ingestion diagnostics
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// CORS allowed origins (empty = allow any)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Database connection configuration
///
/// `url` wins when set; otherwise the URL is assembled from the discrete
/// `host`/`port`/`user`/`password`/`name`/`sslmode` settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Full connection URL
    #[serde(default)]
    pub url: Option<String>,

    /// Database host
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    #[serde(default = "default_db_user")]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default = "default_db_name")]
    pub name: String,

    /// libpq sslmode
    #[serde(default = "default_sslmode")]
    pub sslmode: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle pool connections
    #[serde(default)]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Seconds before an idle connection is closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds before a connection is recycled
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Create tables and indexes at startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// PostgreSQL (optionally TimescaleDB)
    #[default]
    Postgres,
    /// Process-local, non-durable
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackend,
}

/// What to do with series points when the writer queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Write overflowing points synchronously and surface errors
    #[default]
    DirectWrite,
    /// Discard overflowing points and count them
    Drop,
}

/// Batch writer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriterConfig {
    /// Bounded queue capacity in points
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of drain workers
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Points per flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Periodic flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Queue-full policy
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Bypass the queue and write every batch synchronously
    #[serde(default)]
    pub direct_insert: bool,
}

impl WriterConfig {
    /// Flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Normalizer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizerConfig {
    /// Use the snapshot time for samples without a positive timestamp
    #[serde(default = "default_true")]
    pub point_time_fallback: bool,

    /// Family prefix that carries geo tags
    #[serde(default = "default_geo_tag_prefix")]
    pub geo_tag_prefix: String,
}

/// Rate limit configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window (0 = disabled)
    #[serde(default = "default_rate_limit_max")]
    pub max_requests: u32,

    /// Window length in seconds (0 = disabled)
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl RateLimitConfig {
    /// Window length as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Ingestion diagnostics configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiagnosticsConfig {
    /// Emit per-server ingestion diagnostics
    #[serde(default)]
    pub enabled: bool,

    /// Only diagnose this server id or host (empty = all)
    #[serde(default)]
    pub server_filter: String,

    /// Log the decoded payload
    #[serde(default)]
    pub log_payload: bool,
}

impl DiagnosticsConfig {
    /// Whether diagnostics apply to a server, matched case-insensitively on id or host
    pub fn applies_to(&self, server_id: &str, host: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let filter = self.server_filter.trim();
        if filter.is_empty() {
            return true;
        }
        filter.eq_ignore_ascii_case(server_id.trim()) || filter.eq_ignore_ascii_case(host.trim())
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Expose Prometheus metrics on /metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_user() -> String {
    "postgres".to_string()
}
fn default_db_name() -> String {
    "telemetry".to_string()
}
fn default_sslmode() -> String {
    "disable".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_max_lifetime_secs() -> u64 {
    1800
}
fn default_queue_capacity() -> usize {
    5000
}
fn default_num_workers() -> usize {
    4
}
fn default_batch_size() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_geo_tag_prefix() -> String {
    "kiosk_".to_string()
}
fn default_rate_limit_max() -> u32 {
    120
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: default_db_name(),
            sslmode: default_sslmode(),
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            auto_migrate: true,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            num_workers: default_num_workers(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            overflow: OverflowPolicy::default(),
            direct_insert: false,
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            point_time_fallback: true,
            geo_tag_prefix: default_geo_tag_prefix(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: true,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, explicit or assembled from parts
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_ref().filter(|u| !u.trim().is_empty()) {
            return url.clone();
        }
        let auth = if self.password.is_empty() {
            self.user.clone()
        } else {
            format!("{}:{}", self.user, self.password)
        };
        format!(
            "postgres://{}@{}:{}/{}?sslmode={}",
            auth, self.host, self.port, self.name, self.sslmode
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(addr) = std::env::var("TELEMETRY_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.server.log_level = level;
        }

        // Database
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database.url = Some(url);
            }
        }
        if let Ok(host) = std::env::var("PSQL_HOST") {
            self.database.host = host;
        }
        if let Some(port) = parse_env("PSQL_PORT") {
            self.database.port = port;
        }
        if let Ok(user) = std::env::var("PSQL_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("PSQL_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(name) = std::env::var("PSQL_DB_NAME") {
            self.database.name = name;
        }
        if let Ok(sslmode) = std::env::var("PSQL_SSLMODE") {
            self.database.sslmode = sslmode;
        }
        if let Some(max) = parse_env("DB_MAX_OPEN_CONNS") {
            self.database.max_connections = max;
        }
        if let Some(minutes) = parse_env::<u64>("DB_CONN_MAX_LIFETIME_MIN") {
            self.database.max_lifetime_secs = minutes * 60;
        }
        if let Some(minutes) = parse_env::<u64>("DB_CONN_MAX_IDLE_MIN") {
            self.database.idle_timeout_secs = minutes * 60;
        }

        // Storage
        if let Some(backend) = parse_env("TELEMETRY_STORAGE") {
            self.storage.backend = backend;
        }

        // Writer
        if let Some(direct) = parse_env_bool("DIRECT_INSERT") {
            self.writer.direct_insert = direct;
        }

        // Rate limit
        if let Some(max) = parse_env("RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = max;
        }
        if let Some(secs) = parse_env("RATE_LIMIT_WINDOW_SECONDS") {
            self.rate_limit.window_secs = secs;
        }

        // Diagnostics
        if let Some(enabled) = parse_env_bool("DEBUG") {
            self.diagnostics.enabled = enabled;
        }
        if let Ok(filter) = std::env::var("DEBUG_SERVER_ID") {
            self.diagnostics.server_filter = filter;
        }
        if let Some(log_payload) = parse_env_bool("LOG_PAYLOAD") {
            self.diagnostics.log_payload = log_payload;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.trim().is_empty() {
            return Err("Listen address cannot be empty".to_string());
        }

        // Database pool
        if self.storage.backend == StorageBackend::Postgres {
            if self.database.max_connections == 0 {
                return Err("Database max_connections must be > 0".to_string());
            }
            if self.database.max_connections > MAX_CONNECTIONS {
                return Err(format!(
                    "Database max_connections cannot exceed {}",
                    MAX_CONNECTIONS
                ));
            }
            if self.database.min_connections > self.database.max_connections {
                return Err("Database min_connections cannot exceed max_connections".to_string());
            }
        }

        // Writer
        if self.writer.queue_capacity == 0 || self.writer.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(format!(
                "Writer queue_capacity must be between 1 and {}",
                MAX_QUEUE_CAPACITY
            ));
        }
        if self.writer.num_workers == 0 || self.writer.num_workers > MAX_WORKERS {
            return Err(format!(
                "Writer num_workers must be between 1 and {}",
                MAX_WORKERS
            ));
        }
        if self.writer.batch_size == 0 || self.writer.batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "Writer batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            ));
        }
        if self.writer.flush_interval_ms == 0 {
            return Err("Writer flush_interval_ms must be > 0".to_string());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path.display(), e))
    }
}
