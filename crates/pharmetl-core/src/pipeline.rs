// crates/pharmetl-core/src/pipeline.rs

use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::WarehouseConfig;
use crate::error::Result;
use crate::extract::extract_csv;
use crate::loader::{DimensionLoadReport, FactLoadReport, WarehouseLoader};

/// Source file and destination relation for each dimension, in load order.
pub const DIMENSION_SOURCES: &[(&str, &str)] = &[
    ("dim_date.csv", "dim_date"),
    ("dim_sales_rep.csv", "dim_sales_rep"),
    ("dim_doctor.csv", "dim_doctor"),
    ("dim_product.csv", "dim_product"),
    ("dim_territory.csv", "dim_territory"),
];

pub const FACT_SOURCE: (&str, &str) = ("fact_sales.csv", "fact_sales");
pub const FACT_KEY_COLUMN: &str = "sale_id";

#[derive(Debug, Serialize)]
pub struct EtlSummary {
    pub dimensions: Vec<DimensionLoadReport>,
    pub facts: FactLoadReport,
}

/// Run the complete pipeline: connect, load each dimension with upsert-skip
/// semantics, load the fact table incrementally past its watermark, then
/// release the session. The first failing stage aborts the remainder; the
/// session is closed on every path. Re-running wholesale is safe: dimension
/// loads are idempotent and the fact watermark filters already-loaded rows.
pub async fn run_full_etl(config: &WarehouseConfig, data_dir: &Path) -> Result<EtlSummary> {
    let mut loader = WarehouseLoader::connect(config).await?;
    let outcome = run_stages(&mut loader, data_dir).await;

    if let Err(err) = &outcome {
        error!(error = %err, "ETL pipeline failed");
    }

    match loader.close().await {
        Ok(()) => outcome,
        Err(close_err) if outcome.is_ok() => Err(close_err),
        Err(close_err) => {
            // The stage error is the one worth surfacing.
            warn!(error = %close_err, "Session close failed after pipeline error");
            outcome
        }
    }
}

async fn run_stages(loader: &mut WarehouseLoader, data_dir: &Path) -> Result<EtlSummary> {
    info!("Loading dimension tables");
    let mut dimensions = Vec::with_capacity(DIMENSION_SOURCES.len());
    for (file, destination) in DIMENSION_SOURCES {
        let table = extract_csv(data_dir.join(file))?;
        dimensions.push(loader.load_dimension(&table, destination).await?);
    }

    info!("Loading fact table");
    let (fact_file, fact_destination) = FACT_SOURCE;
    let table = extract_csv(data_dir.join(fact_file))?;
    let facts = loader
        .incremental_load_facts(&table, fact_destination, FACT_KEY_COLUMN)
        .await?;

    info!("ETL pipeline completed successfully");
    Ok(EtlSummary { dimensions, facts })
}
