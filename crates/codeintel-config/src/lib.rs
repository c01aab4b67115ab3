//! Configuration schema for the code intelligence server.
//!
//! Mirrors the key groups of spec §6 one-to-one. A missing or malformed
//! config is `ConfigError` and the caller (the main process) must exit
//! before starting any worker — this crate never papers over a bad config
//! with silent defaults for anything the operator was required to set.

mod error;

pub use error::ConfigError;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_DATASET: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub code_analysis: CodeAnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    pub advertised_host: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeAnalysisConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub file_watcher: FileWatcherConfig,
    #[serde(default)]
    pub indexing_worker: IndexingWorkerConfig,
    #[serde(default)]
    pub index_file: IndexFilePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub faiss_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub logs_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    pub query_log_path: Option<PathBuf>,
    #[serde(default = "default_query_log_max_bytes")]
    pub query_log_max_bytes: u64,
    #[serde(default = "default_query_log_backup_count")]
    pub query_log_backup_count: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            query_log_path: None,
            query_log_max_bytes: default_query_log_max_bytes(),
            query_log_backup_count: default_query_log_backup_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_worker_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_vectorize_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub batch_processor: BatchProcessorConfig,
    #[serde(default = "default_embedder_endpoint")]
    pub embedder_endpoint: String,
    #[serde(default = "default_embedder_timeout")]
    pub embedder_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_worker_poll_interval(),
            batch_size: default_vectorize_batch_size(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            circuit_breaker: CircuitBreakerConfig::default(),
            batch_processor: BatchProcessorConfig::default(),
            embedder_endpoint: default_embedder_endpoint(),
            embedder_timeout_secs: default_embedder_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchProcessorConfig {
    #[serde(default = "default_max_empty_iterations")]
    pub max_empty_iterations: u32,
    #[serde(default = "default_empty_delay")]
    pub empty_delay: u64,
}

impl Default for BatchProcessorConfig {
    fn default() -> Self {
        Self {
            max_empty_iterations: default_max_empty_iterations(),
            empty_delay: default_empty_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchDirSpec {
    pub id: Uuid,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub watch_dirs: Vec<WatchDirSpec>,
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: default_scan_interval(),
            log_path: None,
            watch_dirs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexingWorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_indexing_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_indexing_batch_size")]
    pub batch_size: usize,
    pub log_path: Option<PathBuf>,
}

impl Default for IndexingWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_indexing_poll_interval(),
            batch_size: default_indexing_batch_size(),
            log_path: None,
        }
    }
}

/// Open Question 3 of spec §9: whether `index_file` also chunks small files
/// inline instead of waiting for the Vectorization Worker. Resolved as an
/// explicit policy flag, default `false`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexFilePolicy {
    #[serde(default)]
    pub inline_chunking: bool,
}

impl Default for IndexFilePolicy {
    fn default() -> Self {
        Self {
            inline_chunking: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7890
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_query_log_max_bytes() -> u64 {
    104_857_600
}
fn default_query_log_backup_count() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_worker_poll_interval() -> u64 {
    30
}
fn default_vectorize_batch_size() -> usize {
    10
}
fn default_indexing_batch_size() -> usize {
    5
}
fn default_indexing_poll_interval() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1
}
fn default_embedder_endpoint() -> String {
    "http://127.0.0.1:8900/embed".into()
}
fn default_embedder_timeout() -> u64 {
    10
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout() -> u64 {
    60
}
fn default_success_threshold() -> u32 {
    2
}
fn default_initial_backoff() -> u64 {
    5
}
fn default_max_backoff() -> u64 {
    300
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_empty_iterations() -> u32 {
    20
}
fn default_empty_delay() -> u64 {
    2
}
fn default_scan_interval() -> u64 {
    30
}

impl Config {
    /// Load and validate a config file. Paths inside the file that are
    /// relative are resolved against `path`'s parent directory, matching
    /// `gaspardpetit-findx`'s convention of keeping config-relative paths
    /// portable across working directories.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let mut cfg: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        cfg.resolve_relative_paths(base);
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        self.server.log_dir = resolve(base, &self.server.log_dir);
        self.code_analysis.storage.db_path = resolve(base, &self.code_analysis.storage.db_path);
        self.code_analysis.storage.faiss_dir = resolve(base, &self.code_analysis.storage.faiss_dir);
        self.code_analysis.storage.locks_dir = resolve(base, &self.code_analysis.storage.locks_dir);
        self.code_analysis.storage.logs_dir = resolve(base, &self.code_analysis.storage.logs_dir);
        if let Some(p) = &self.code_analysis.database.driver.query_log_path {
            self.code_analysis.database.driver.query_log_path = Some(resolve(base, p));
        }
        // watch_dirs paths are NOT resolved relative to the config file:
        // spec requires them to already be absolute ("string-only form is
        // rejected" means a bare relative path is a config error, not a
        // path to normalize).
    }

    fn validate(&self) -> Result<()> {
        if self.code_analysis.file_watcher.enabled
            && self.code_analysis.file_watcher.watch_dirs.is_empty()
        {
            return Err(ConfigError::Validation(
                "file_watcher.enabled=true requires at least one watch_dirs entry".into(),
            ));
        }
        for wd in &self.code_analysis.file_watcher.watch_dirs {
            if !wd.path.is_absolute() {
                return Err(ConfigError::Validation(format!(
                    "watch_dirs entry {} must be an absolute path, a string-only form is rejected",
                    wd.path.display()
                )));
            }
        }
        Ok(())
    }
}

fn resolve(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}
