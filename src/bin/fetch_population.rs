// Refresh the population estimates tables only.

use anyhow::{Context, Result};
use chichester_stats::{logging, pipeline, PipelineConfig};
use tracing::info;

const DATASETS: &[&str] = &["population_age", "population_gender"];

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = PipelineConfig::load().context("loading pipeline config")?;
    let outcomes = pipeline::run_named(&config, DATASETS).await?;
    pipeline::report(&outcomes);

    info!("population estimates updated");
    Ok(())
}
