use anyhow::{Context, Result};
use clap::Parser;
use codeintel_client::{Client, ReconnectConfig};
use codeintel_server::ServerArgs;
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = ServerArgs::parse();
    let config = codeintel_config::Config::load(&args.config).context("loading config")?;
    let socket_path = codeintel_driver::socket_path_for_db(&config.code_analysis.storage.db_path);
    let client = Client::connect(socket_path, ReconnectConfig::default())
        .await
        .context("connecting to driver")?;

    let watch_dirs = config.code_analysis.file_watcher.watch_dirs.clone();
    let scan_interval = Duration::from_secs(config.code_analysis.file_watcher.scan_interval);
    let locks_dir = config.code_analysis.storage.locks_dir.clone();

    log::info!("file watcher starting with {} watch dirs", watch_dirs.len());
    codeintel_workers::watcher::run(client, watch_dirs, locks_dir, scan_interval).await
}
