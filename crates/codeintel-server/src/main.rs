//! Worker Manager boot: loads config, starts the driver and every enabled
//! worker as its own process, then serves until a termination signal asks
//! for a graceful stop.

use anyhow::{Context, Result};
use clap::Parser;
use codeintel_manager::{WorkerManager, WorkerSpec};
use codeintel_server::{resolve_sibling_exe, ServerArgs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = ServerArgs::parse();
    let config = codeintel_config::Config::load(&args.config).context("loading config")?;
    let config_arg = args.config.to_string_lossy().into_owned();

    log::info!("starting codeintel-server");

    let logs_dir = &config.server.log_dir;
    let mut manager = WorkerManager::new(POLL_INTERVAL, GRACEFUL_TIMEOUT);

    manager
        .spawn(WorkerSpec {
            name: "driver".into(),
            exe: resolve_sibling_exe("codeintel-driver-process"),
            args: vec!["--config".into(), config_arg.clone()],
            pid_path: logs_dir.join("driver.pid"),
            log_path: logs_dir.join("driver.log"),
        })
        .context("starting driver")?;

    if config.code_analysis.file_watcher.enabled {
        manager
            .spawn(WorkerSpec {
                name: "file-watcher".into(),
                exe: resolve_sibling_exe("codeintel-file-watcher"),
                args: vec!["--config".into(), config_arg.clone()],
                pid_path: logs_dir.join("file-watcher.pid"),
                log_path: logs_dir.join("file-watcher.log"),
            })
            .context("starting file watcher")?;
    }

    if config.code_analysis.indexing_worker.enabled {
        manager
            .spawn(WorkerSpec {
                name: "indexing-worker".into(),
                exe: resolve_sibling_exe("codeintel-indexing-worker"),
                args: vec!["--config".into(), config_arg.clone()],
                pid_path: logs_dir.join("indexing-worker.pid"),
                log_path: logs_dir.join("indexing-worker.log"),
            })
            .context("starting indexing worker")?;
    }

    if config.code_analysis.worker.enabled {
        manager
            .spawn(WorkerSpec {
                name: "vectorization-worker".into(),
                exe: resolve_sibling_exe("codeintel-vectorization-worker"),
                args: vec!["--config".into(), config_arg],
                pid_path: logs_dir.join("vectorization-worker.pid"),
                log_path: logs_dir.join("vectorization-worker.log"),
            })
            .context("starting vectorization worker")?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst))
        .context("installing signal handler")?;

    manager.run_until(|| stop.load(Ordering::SeqCst)).await;
    log::info!("codeintel-server stopped");
    Ok(())
}
