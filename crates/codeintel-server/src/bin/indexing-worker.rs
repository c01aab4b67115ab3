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

    let poll_interval = Duration::from_secs(config.code_analysis.indexing_worker.poll_interval);
    let batch_size = config.code_analysis.indexing_worker.batch_size;
    let inline_chunking = config.code_analysis.index_file.inline_chunking;

    log::info!("indexing worker starting, poll_interval={poll_interval:?} batch_size={batch_size}");
    codeintel_workers::indexing::run(client, poll_interval, batch_size, inline_chunking).await
}
