// Refresh the street crime tables only.

use anyhow::{Context, Result};
use chichester_stats::{logging, pipeline, PipelineConfig};
use tracing::info;

const DATASETS: &[&str] = &["crime"];

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = PipelineConfig::load().context("loading pipeline config")?;
    let outcomes = pipeline::run_named(&config, DATASETS).await?;
    pipeline::report(&outcomes);

    info!("street crime updated");
    Ok(())
}
