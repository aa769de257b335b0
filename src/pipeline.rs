// src/pipeline.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::config::{DatasetConfig, Layout, PipelineConfig};
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::normalize::normalize;
use crate::pivot::pivot;
use crate::store::{persist, Table};
use crate::table::RawTable;

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub dataset: String,
    pub raw_rows: usize,
    pub records: usize,
    pub rows_written: usize,
    pub output_path: PathBuf,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Written(RunSummary),
    /// Nothing was written; an expected operational state, not a failure.
    Skipped { dataset: String, reason: String },
}

/// Normalize and reshape a fetched table into its persisted layout.
///
/// A source with no rows and no columns (police.uk sends `[]` for a quiet
/// month) yields an empty table rather than a schema error.
pub fn shape(raw: &RawTable, dataset: &DatasetConfig) -> crate::error::Result<(Table, usize)> {
    let records = if raw.is_empty() && raw.headers.is_empty() {
        warn!(dataset = %dataset.name, "source returned no rows");
        Vec::new()
    } else {
        raw.require_columns(&dataset.rules.required_source_columns())?;
        normalize(raw, &dataset.rules)?
    };
    let count = records.len();
    let table = match dataset.layout {
        Layout::Wide => Table::Wide(pivot(&records)?.with_location(dataset.location.clone())),
        Layout::Long => {
            // conflicting duplicates must not reach the file in either layout
            pivot(&records)?;
            Table::Long(records)
        }
    };
    Ok((table, count))
}

/// fetch → validate → normalize → pivot → persist for one dataset.
///
/// The output file is only touched once every earlier stage has succeeded.
pub async fn run_dataset(fetcher: &Fetcher, dataset: &DatasetConfig) -> Result<RunOutcome> {
    info!(dataset = %dataset.name, "starting");

    let raw = match fetcher.load(&dataset.source()).await {
        Ok(raw) => raw,
        Err(e) if e.is_tolerated() => {
            warn!(dataset = %dataset.name, error = %e, "skipping dataset");
            return Ok(RunOutcome::Skipped {
                dataset: dataset.name.clone(),
                reason: e.to_string(),
            });
        }
        Err(e) => return Err(e).with_context(|| format!("[{}] fetch", dataset.name)),
    };

    let (table, records) =
        shape(&raw, dataset).with_context(|| format!("[{}] normalize/pivot", dataset.name))?;
    persist(&table, &dataset.output_path).with_context(|| {
        format!(
            "[{}] persist to {}",
            dataset.name,
            dataset.output_path.display()
        )
    })?;

    let summary = RunSummary {
        dataset: dataset.name.clone(),
        raw_rows: raw.len(),
        records,
        rows_written: table.row_count(),
        output_path: dataset.output_path.clone(),
        finished_at: Utc::now(),
    };
    info!(
        dataset = %summary.dataset,
        raw_rows = summary.raw_rows,
        records = summary.records,
        rows = summary.rows_written,
        path = %summary.output_path.display(),
        "saved"
    );
    Ok(RunOutcome::Written(summary))
}

/// Run the named datasets in order, stopping at the first failure.
pub async fn run_named(config: &PipelineConfig, names: &[&str]) -> Result<Vec<RunOutcome>> {
    let datasets = names
        .iter()
        .map(|name| config.dataset(name))
        .collect::<std::result::Result<Vec<_>, PipelineError>>()?;
    run_datasets(config, &datasets).await
}

/// Run every configured dataset in order, stopping at the first failure.
pub async fn run_all(config: &PipelineConfig) -> Result<Vec<RunOutcome>> {
    let datasets: Vec<&DatasetConfig> = config.datasets.iter().collect();
    run_datasets(config, &datasets).await
}

async fn run_datasets(
    config: &PipelineConfig,
    datasets: &[&DatasetConfig],
) -> Result<Vec<RunOutcome>> {
    let fetcher = Fetcher::new(config.timeout(), config.retry)?;
    let mut outcomes = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        match run_dataset(&fetcher, dataset).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("{:#}", e);
                return Err(e);
            }
        }
    }
    Ok(outcomes)
}

/// One line per dataset for the operator.
pub fn report(outcomes: &[RunOutcome]) {
    for outcome in outcomes {
        match outcome {
            RunOutcome::Written(s) => info!(
                "{}: {} rows → {} ({})",
                s.dataset,
                s.rows_written,
                s.output_path.display(),
                s.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            RunOutcome::Skipped { dataset, reason } => {
                warn!("{}: skipped ({})", dataset, reason)
            }
        }
    }
}
