// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Run configuration: file loading, environment overrides and validation

use llmeval_core::{AggregatedStats, MetricConfig};
use llmeval_evals::llm_client::DEFAULT_EMBEDDING_MODEL;
use llmeval_evals::quality_gate::QualityGateRules;
use llmeval_evals::ModelSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_MAX_WORKERS: &str = "LLMEVAL_MAX_WORKERS";

const EMBEDDING_BACKENDS: [&str; 2] = ["local", "openai"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Unsupported config format {0} (expected .toml, .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityGatesConfig {
    /// Flat `"metric.stat" -> threshold` map
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingsConfig {
    /// `local` (offline hashing embedder) or `openai`
    #[serde(default = "default_embedding_backend")]
    pub backend: String,

    /// Remote embedding model, ignored by the local backend
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    #[serde(default)]
    pub openai_base_url: Option<String>,

    #[serde(default)]
    pub anthropic_base_url: Option<String>,
}

fn default_max_workers() -> usize {
    4
}

fn default_embedding_backend() -> String {
    "local".to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

/// Everything `llmeval run` needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub dataset: DatasetConfig,

    pub models: Vec<ModelSpec>,

    pub metrics: Vec<MetricConfig>,

    #[serde(default)]
    pub quality_gates: Option<QualityGatesConfig>,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl RunConfig {
    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: ConfigFormat, path: &Path) -> Result<Self, ConfigError> {
        let parsed = match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Load configuration from a file, choosing the format by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format, path)
    }

    /// Load with priority: file < environment, then validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading configuration from file: {:?}", path);
        let config = Self::from_file(path)?.merge_with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    ///
    /// Supported environment variables:
    /// - OPENAI_API_KEY: OpenAI key for judging and remote embeddings
    /// - ANTHROPIC_API_KEY: Anthropic key for judging
    /// - LLMEVAL_MAX_WORKERS: Per-batch concurrency bound
    pub fn merge_with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_OPENAI_API_KEY) {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(key) = lookup(ENV_ANTHROPIC_API_KEY) {
            self.llm.anthropic_api_key = Some(key);
        }
        if let Some(workers) = lookup(ENV_MAX_WORKERS) {
            self.execution.max_workers = workers
                .trim()
                .parse()
                .map_err(|_| {
                    invalid(format!(
                        "{ENV_MAX_WORKERS} must be a positive integer, got '{workers}'"
                    ))
                })?;
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_jsonl_file("dataset.path", &self.dataset.path)?;

        if self.models.is_empty() {
            return Err(invalid("at least one model must be configured"));
        }
        let mut model_names = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(invalid("model name must not be empty"));
            }
            if !model_names.insert(model.name.as_str()) {
                return Err(invalid(format!("duplicate model name '{}'", model.name)));
            }
            check_jsonl_file(&format!("models.{}.predictions", model.name), &model.predictions)?;
        }

        if self.metrics.is_empty() {
            return Err(invalid("at least one metric must be configured"));
        }
        let mut metric_names = HashSet::new();
        for metric in &self.metrics {
            if metric.name.trim().is_empty() {
                return Err(invalid("metric name must not be empty"));
            }
            if !metric_names.insert(metric.name.as_str()) {
                return Err(invalid(format!("duplicate metric '{}'", metric.name)));
            }
        }

        self.quality_rules()?;

        if self.execution.max_workers == 0 {
            return Err(invalid("execution.max_workers must be at least 1"));
        }

        if !EMBEDDING_BACKENDS.contains(&self.embeddings.backend.as_str()) {
            return Err(invalid(format!(
                "unknown embeddings.backend '{}', expected one of {:?}",
                self.embeddings.backend, EMBEDDING_BACKENDS
            )));
        }
        if self.embeddings.backend == "openai" && self.llm.openai_api_key.is_none() {
            return Err(invalid(format!(
                "embeddings.backend 'openai' requires llm.openai_api_key or {ENV_OPENAI_API_KEY}"
            )));
        }

        Ok(())
    }

    /// Configured gate rules, `None` when the section is absent or empty
    pub fn quality_rules(&self) -> Result<Option<QualityGateRules>, ConfigError> {
        let Some(gates) = &self.quality_gates else {
            return Ok(None);
        };

        for (key, threshold) in &gates.thresholds {
            if !threshold.is_finite() {
                return Err(invalid(format!("quality gate '{key}' has a non-finite threshold")));
            }
        }

        let rules = QualityGateRules::from_thresholds(&gates.thresholds)
            .map_err(|e| invalid(e.to_string()))?;
        if let Some((metric, stat, _)) = rules
            .iter()
            .find(|(_, stat, _)| !AggregatedStats::is_known_stat(stat))
        {
            return Err(invalid(format!(
                "quality gate '{metric}.{stat}' uses an unknown statistic, expected one of {:?}",
                AggregatedStats::STAT_NAMES
            )));
        }

        Ok((!rules.is_empty()).then_some(rules))
    }
}

fn check_jsonl_file(field: &str, path: &Path) -> Result<(), ConfigError> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return Err(invalid(format!("{field} must be a .jsonl file: {}", path.display())));
    }
    if !path.is_file() {
        return Err(invalid(format!("{field} does not exist: {}", path.display())));
    }
    Ok(())
}
