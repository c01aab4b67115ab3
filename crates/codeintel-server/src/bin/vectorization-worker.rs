use anyhow::{Context, Result};
use clap::Parser;
use codeintel_client::{Client, ReconnectConfig};
use codeintel_server::ServerArgs;
use codeintel_workers::vectorize::{Embedder, VectorizeWorker};
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

    let worker_cfg = config.code_analysis.worker.clone();
    let embedder = Embedder::new(
        worker_cfg.embedder_endpoint.clone(),
        Duration::from_secs(worker_cfg.embedder_timeout_secs),
    );
    let faiss_dir = config.code_analysis.storage.faiss_dir.clone();
    let worker = VectorizeWorker::new(client, embedder, worker_cfg.circuit_breaker.clone(), faiss_dir);
    let poll_interval = Duration::from_secs(worker_cfg.poll_interval);

    log::info!("vectorization worker starting, poll_interval={poll_interval:?} batch_size={}", worker_cfg.batch_size);
    codeintel_workers::vectorize::run(worker, poll_interval, worker_cfg.batch_size).await
}
