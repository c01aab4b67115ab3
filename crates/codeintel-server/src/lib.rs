//! Shared pieces for every `codeintel-server` binary target: the common
//! `--config` flag and the sibling-executable lookup each worker binary
//! uses to find its own process image next to `codeintel-server`.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "codeintel-server", version, about = "Code intelligence server")]
pub struct ServerArgs {
    /// Path to the TOML config file.
    #[arg(long, default_value = "codeintel.toml")]
    pub config: PathBuf,
}

/// Resolves a worker's executable path as a sibling of the current
/// process, falling back to a bare name on `$PATH` lookup when the
/// current executable's directory can't be determined.
#[must_use]
pub fn resolve_sibling_exe(name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .unwrap_or_else(|| PathBuf::from(name))
}
