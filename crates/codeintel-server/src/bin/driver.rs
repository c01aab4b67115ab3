use anyhow::{Context, Result};
use clap::Parser;
use codeintel_server::ServerArgs;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = ServerArgs::parse();
    let config = codeintel_config::Config::load(&args.config).context("loading config")?;
    let db_path = &config.code_analysis.storage.db_path;
    let journal_path = config.code_analysis.database.driver.query_log_path.clone();

    log::info!("driver starting on {}", db_path.display());
    codeintel_driver::run_driver(db_path, journal_path.as_deref())
        .await
        .context("driver exited")?;
    Ok(())
}
