// src/fetch.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{excerpt, PipelineError, Result};
use crate::table::{RawTable, SourceFormat};

/// Longest body excerpt carried in a `Fetch` error.
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Everything needed to issue the request for one remote dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub url: String,
    pub query_params: BTreeMap<String, String>,
    pub api_key: Option<String>,
    /// Query parameter the key is sent as (`uid` for NOMIS).
    pub api_key_param: String,
    pub format: SourceFormat,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query_params: BTreeMap::new(),
            api_key: None,
            api_key_param: "uid".to_string(),
            format: SourceFormat::Csv,
        }
    }

    /// Full request URL, API key appended last.
    pub fn request_url(&self) -> Result<Url> {
        let mut url = self.public_url()?;
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair(&self.api_key_param, key);
        }
        Ok(url)
    }

    /// Request URL without the API key, safe to log.
    pub fn public_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| PipelineError::Config(format!("invalid source URL {}: {}", self.url, e)))?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query_params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// Where a dataset's rows come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Http(SourceDescriptor),
    /// A manual export dropped on disk ahead of the run.
    File { path: PathBuf, format: SourceFormat },
}

impl Source {
    pub fn format(&self) -> SourceFormat {
        match self {
            Source::Http(desc) => desc.format,
            Source::File { format, .. } => *format,
        }
    }
}

/// Outcome of one attempt: whether trying again could help.
enum AttemptError {
    Retryable(PipelineError),
    Fatal(PipelineError),
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Config(format!("building HTTP client: {}", e)))?;
        Ok(Self { client, retry })
    }

    pub async fn load(&self, source: &Source) -> Result<RawTable> {
        match source {
            Source::Http(desc) => self.fetch(desc).await,
            Source::File { path, format } => read_local(path, *format),
        }
    }

    /// GET the descriptor's URL (retrying transient failures) and parse the body.
    #[instrument(level = "info", skip(self, source), fields(url = %source.url))]
    pub async fn fetch(&self, source: &SourceDescriptor) -> Result<RawTable> {
        let url = source.request_url()?;
        let shown = source.public_url()?.to_string();
        let body = self.get_text_with_retry(&url, &shown).await?;
        let table = RawTable::parse(&body, source.format)?;
        info!(rows = table.len(), columns = table.headers.len(), "fetched");
        Ok(table)
    }

    async fn get_text_with_retry(&self, url: &Url, shown: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.get_text_core(url, shown).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Retryable(e)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(url = %shown, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Retryable(e)) => {
                    error!(url = %shown, attempts = attempt, error = %e, "Exhausted retries");
                    return Err(e);
                }
                Err(AttemptError::Fatal(e)) => {
                    error!(url = %shown, error = %e, "fetch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn get_text_core(&self, url: &Url, shown: &str) -> std::result::Result<String, AttemptError> {
        debug!("Fetching text from {}", shown);
        let resp = self.client.get(url.clone()).send().await.map_err(|e| {
            AttemptError::Retryable(PipelineError::Fetch {
                url: shown.to_string(),
                status: e.status().map(|s| s.as_u16()),
                // reqwest errors embed the URL, which may carry the key
                excerpt: e.without_url().to_string(),
            })
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            AttemptError::Retryable(PipelineError::Fetch {
                url: shown.to_string(),
                status: Some(status.as_u16()),
                excerpt: e.without_url().to_string(),
            })
        })?;

        if !status.is_success() {
            let err = PipelineError::Fetch {
                url: shown.to_string(),
                status: Some(status.as_u16()),
                excerpt: excerpt(&body, EXCERPT_CHARS),
            };
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        if body.trim().is_empty() {
            return Err(AttemptError::Fatal(PipelineError::Fetch {
                url: shown.to_string(),
                status: Some(status.as_u16()),
                excerpt: "empty response body".to_string(),
            }));
        }

        Ok(body)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Read a manually downloaded export.
pub fn read_local(path: &Path, format: SourceFormat) -> Result<RawTable> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PipelineError::MissingUpstreamFile(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let table = RawTable::parse(&text, format)?;
    info!(path = %path.display(), rows = table.len(), "read local export");
    Ok(table)
}
