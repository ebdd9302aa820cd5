// crates/pharmetl/src/main.rs

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pharmetl_core::config::WarehouseConfig;
use pharmetl_core::pipeline::run_full_etl;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Batch loader for the pharma sales star schema.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the extracted source CSVs.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = WarehouseConfig::from_env().context("failed to read warehouse configuration")?;

    let summary = run_full_etl(&config, &cli.data_dir).await?;

    info!("ETL run finished");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
