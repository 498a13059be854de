//! Configuration loading and types for chunkyard.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, upload limits, chunk storage, orphan reclamation,
//! the upload client, and logging.

use serde::Deserialize;
use std::path::Path;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upload size limits and chunking parameters.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Chunk store and artifact destination settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Orphaned session reclamation.
    #[serde(default)]
    pub reclaim: ReclaimConfig,

    /// Upload client settings (used by `chunkyard-push`).
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted artifact in bytes (default 180 MiB).  Declared sizes
    /// above this are rejected before any I/O.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Largest accepted single chunk payload in bytes (default 8 MiB).
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Chunk size suggested to clients via `/health` (default 1 MiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Size above which clients should switch to chunked upload, advertised
    /// via `/health` (default 5 MiB).
    #[serde(default = "default_chunking_threshold")]
    pub chunking_threshold: u64,

    /// Hold a per-session guard while finalizing, rejecting concurrent
    /// chunk writes for that session with `SessionFinalizing`.
    #[serde(default = "default_true")]
    pub lock_during_finalize: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            max_chunk_size: default_max_chunk_size(),
            chunk_size: default_chunk_size(),
            chunking_threshold: default_chunking_threshold(),
            lock_during_finalize: true,
        }
    }
}

/// Chunk storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, `sqlite`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local filesystem chunk store configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Memory chunk store configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,

    /// SQLite chunk store configuration.
    #[serde(default)]
    pub sqlite: SqliteStorageConfig,

    /// Where finished artifacts are published.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
            sqlite: SqliteStorageConfig::default(),
            artifacts: ArtifactsConfig::default(),
        }
    }
}

/// Local filesystem chunk store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory holding one subdirectory per session.
    #[serde(default = "default_chunk_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_chunk_root(),
        }
    }
}

/// Memory chunk store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// SQLite chunk store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

/// Artifact destination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Publicly served directory for finished artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,

    /// Scratch directory for in-progress reassembly.  Must be on the same
    /// filesystem as `dir` and must not be publicly served.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// URL prefix artifacts are served under.
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
            scratch_dir: default_scratch_dir(),
            public_prefix: default_public_prefix(),
        }
    }
}

/// Orphaned session reclamation.
#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimConfig {
    /// Run the background sweep.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sessions whose first chunk is older than this are deleted.
    #[serde(default = "default_reclaim_ttl")]
    pub ttl_seconds: u64,

    /// Seconds between sweeps.
    #[serde(default = "default_reclaim_interval")]
    pub interval_seconds: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_reclaim_ttl(),
            interval_seconds: default_reclaim_interval(),
        }
    }
}

/// Upload client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the chunkyard server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Files above this size use chunked upload.
    #[serde(default = "default_chunking_threshold")]
    pub chunking_threshold: u64,

    /// Files above this size are refused before any request is sent.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Maximum chunk transmissions in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries per chunk after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds; doubles per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            chunking_threshold: default_chunking_threshold(),
            max_upload_size: default_max_upload_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    180 * MIB
}

fn default_max_chunk_size() -> u64 {
    8 * MIB
}

fn default_chunk_size() -> u64 {
    MIB
}

fn default_chunking_threshold() -> u64 {
    5 * MIB
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_chunk_root() -> String {
    "./data/chunks".to_string()
}

fn default_sqlite_path() -> String {
    "./data/chunks.db".to_string()
}

fn default_artifacts_dir() -> String {
    "./public/uploads".to_string()
}

fn default_scratch_dir() -> String {
    "./data/scratch".to_string()
}

fn default_public_prefix() -> String {
    "/uploads".to_string()
}

fn default_reclaim_ttl() -> u64 {
    86_400
}

fn default_reclaim_interval() -> u64 {
    3_600
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.  An empty document yields defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}
