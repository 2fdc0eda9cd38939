mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;

use bulkload_core::config::{load_dotenv, Config};
use bulkload_ingest::db;

use crate::cli::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    load_dotenv();

    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.validate()?;

    let pool = db::connect(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;

    let result = commands::run(args.command, &config, pool.clone()).await;
    pool.close().await;
    result
}
