// src/config.rs

use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::fetch::{RetryPolicy, Source, SourceDescriptor};
use crate::normalize::{NormalizeRules, ValueMode, CATEGORY, VALUE, YEAR};
use crate::table::SourceFormat;

/// Canonical dataset set, also used when no config file is present.
static BUILTIN_CONFIG: &str = include_str!("../pipeline.yaml");

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CHICHESTER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "pipeline.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub source: SourceConfig,
    #[serde(flatten)]
    pub rules: NormalizeRules,
    #[serde(default)]
    pub layout: Layout,
    /// Constant `Location` column written after `Year` in the wide form.
    #[serde(default)]
    pub location: Option<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Http {
        url: String,
        #[serde(default)]
        query_params: BTreeMap<String, String>,
        /// Name of the environment variable holding the API key.
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default = "default_api_key_param")]
        api_key_param: String,
        #[serde(default)]
        format: SourceFormat,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        format: SourceFormat,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `Year[,Location],<category>...`
    #[default]
    Wide,
    /// `Year,Category,Type,Value`
    Long,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_api_key_param() -> String {
    "uid".to_string()
}

impl PipelineConfig {
    /// Load from `$CHICHESTER_CONFIG`, else `./pipeline.yaml`, else the built-in set.
    pub fn load() -> Result<Self> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_path(Path::new(&path)),
            Err(_) => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_path(default)
                } else {
                    debug!("no {} found, using built-in datasets", DEFAULT_CONFIG_PATH);
                    Self::builtin()
                }
            }
        }
    }

    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CONFIG)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "loaded pipeline config");
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetConfig> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| PipelineError::Config(format!("unknown dataset '{}'", name)))
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(PipelineError::Config("timeout_secs must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if !names.insert(dataset.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "dataset '{}' is defined twice",
                    dataset.name
                )));
            }
            dataset.validate()?;
        }
        Ok(())
    }
}

impl DatasetConfig {
    fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(PipelineError::Config(format!(
                "dataset '{}' has an empty output_path",
                self.name
            )));
        }

        let canonical: HashSet<&str> = self.rules.column_map.values().map(String::as_str).collect();
        let mut needed = vec![YEAR, CATEGORY];
        if self.rules.value == ValueMode::Column {
            needed.push(VALUE);
        } else if canonical.contains(VALUE) {
            return Err(PipelineError::Config(format!(
                "dataset '{}' counts rows but also maps a Value column",
                self.name
            )));
        }
        let produced_by_melt = self
            .rules
            .melt
            .as_ref()
            .map(|m| vec![m.var_name.as_str(), m.value_name.as_str()])
            .unwrap_or_default();
        for column in needed {
            if !canonical.contains(column) && !produced_by_melt.contains(&column) {
                return Err(PipelineError::Config(format!(
                    "dataset '{}' never produces a {} column",
                    self.name, column
                )));
            }
        }
        Ok(())
    }

    /// Resolve the source, reading any API key from the environment now.
    pub fn source(&self) -> Source {
        match &self.source {
            SourceConfig::Http {
                url,
                query_params,
                api_key_env,
                api_key_param,
                format,
            } => {
                let api_key = api_key_env.as_deref().and_then(|var| match env::var(var) {
                    Ok(key) if !key.trim().is_empty() => Some(key),
                    _ => {
                        warn!(dataset = %self.name, var, "API key variable unset, fetching without a key");
                        None
                    }
                });
                Source::Http(SourceDescriptor {
                    url: url.clone(),
                    query_params: query_params.clone(),
                    api_key,
                    api_key_param: api_key_param.clone(),
                    format: *format,
                })
            }
            SourceConfig::File { path, format } => Source::File {
                path: path.clone(),
                format: *format,
            },
        }
    }
}
