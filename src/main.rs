// src/main.rs

use anyhow::{Context, Result};
use chichester_stats::{logging, pipeline, PipelineConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    logging::init_logging();
    info!("startup");

    // ─── 2) load datasets ────────────────────────────────────────────
    let config = PipelineConfig::load().context("loading pipeline config")?;
    info!("{} datasets configured", config.datasets.len());

    // ─── 3) fetch → normalize → persist, one dataset at a time ───────
    let outcomes = pipeline::run_all(&config).await?;
    pipeline::report(&outcomes);

    info!("all datasets updated");
    Ok(())
}
