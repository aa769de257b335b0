use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Transport failure, non-success status or empty body.
    #[error("fetch from {url} failed (status {}): {excerpt}", status_label(.status))]
    Fetch {
        url: String,
        status: Option<u16>,
        excerpt: String,
    },

    #[error("could not parse source table: {0}")]
    Parse(String),

    #[error(
        "conflicting values for ({year}, {category}): {first} vs {second}; check the dataset filters"
    )]
    PivotConflict {
        year: String,
        category: String,
        first: f64,
        second: f64,
    },

    #[error("upstream file {0} not found; download it manually first")]
    MissingUpstreamFile(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl PipelineError {
    /// Upstream-file absence is an expected operational state, not a crash.
    pub fn is_tolerated(&self) -> bool {
        matches!(self, PipelineError::MissingUpstreamFile(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Cut a response body down to something fit for a log line.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}
