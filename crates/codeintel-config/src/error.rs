use std::path::PathBuf;
use thiserror::Error;

/// `ConfigErr` from spec §7: missing or malformed config. The main process
/// must exit on this before starting any worker.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("cannot parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}
