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

//! llmeval command-line front end
//!
//! Wires configuration, backends and the metric registry into an
//! [`EvaluationRunner`], writes reports and maps failures to exit codes.

pub mod config;
pub mod report;

use anyhow::Context;
use config::{ConfigError, RunConfig};
use llmeval_core::{load_dataset, DataError, RunAggregates};
use llmeval_evals::quality_gate::{self, QualityGateRules, QualityGateViolation};
use llmeval_evals::{
    register_builtin_metrics, AnthropicClient, CachedEmbedder, EvaluationRunner, MetricBackends,
    MetricRegistry, OpenAIClient, RegistryError, RunOutput, RunnerConfig, RunnerError,
};
use report::{EvaluationReport, GateReport};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_RUNTIME_ERROR: u8 = 2;
pub const EXIT_GATE_FAILED: u8 = 3;

/// Install the global subscriber; `RUST_LOG` wins over `verbose`
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "llmeval=debug,llmeval_cli=debug,llmeval_evals=debug,llmeval_core=debug"
    } else {
        "llmeval=info,llmeval_cli=info,llmeval_evals=info,llmeval_core=info"
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Build the embedders and judges available to metric factories.
///
/// Remote clients are only registered when an API key is configured.
pub fn build_backends(config: &RunConfig) -> MetricBackends {
    let mut backends = MetricBackends::new();

    if let Some(key) = &config.llm.openai_api_key {
        let mut client =
            OpenAIClient::new(key.clone()).with_embedding_model(config.embeddings.model.clone());
        if let Some(url) = &config.llm.openai_base_url {
            client = client.with_base_url(url.clone());
        }
        let client = Arc::new(client);
        backends = backends
            .with_judge(client.clone())
            .with_embedder("openai", Arc::new(CachedEmbedder::new(client)));
    }

    if let Some(key) = &config.llm.anthropic_api_key {
        let mut client = AnthropicClient::new(key.clone());
        if let Some(url) = &config.llm.anthropic_base_url {
            client = client.with_base_url(url.clone());
        }
        backends = backends.with_judge(Arc::new(client));
    }

    backends.with_default_embedder(config.embeddings.backend.clone())
}

pub fn build_registry(backends: &MetricBackends) -> Result<MetricRegistry, RegistryError> {
    let mut registry = MetricRegistry::new();
    register_builtin_metrics(&mut registry, backends)?;
    Ok(registry)
}

/// Options of `llmeval run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
    pub workers: Option<usize>,
    pub enforce_gates: bool,
}

/// Run a full evaluation.
///
/// Results and reports are always written before the gate verdict is
/// enforced, so a failing gate still leaves the run inspectable.
pub async fn run_command(options: &RunOptions) -> anyhow::Result<RunOutput> {
    let config = RunConfig::load(&options.config_path)?;

    let max_workers = match options.workers {
        Some(0) => {
            return Err(ConfigError::Invalid("--workers must be at least 1".to_string()).into())
        }
        Some(workers) => workers,
        None => config.execution.max_workers,
    };
    let configured_rules = config.quality_rules()?;

    let dataset = load_dataset(&config.dataset.path)?;
    let dataset_size = dataset.len();

    let backends = build_backends(&config);
    let registry = build_registry(&backends)?;

    info!(
        models = config.models.len(),
        metrics = config.metrics.len(),
        rows = dataset_size,
        max_workers,
        "Starting evaluation"
    );

    let runner = EvaluationRunner::new(
        &registry,
        dataset,
        config.models.clone(),
        config.metrics.clone(),
        RunnerConfig::new(&options.output_dir).with_max_workers(max_workers),
    );
    let output = runner.run().await?;

    let rules = match (configured_rules, options.enforce_gates) {
        (Some(rules), _) => Some(rules),
        (None, true) => Some(QualityGateRules::ci_defaults()),
        (None, false) => None,
    };
    let verdict = rules.map(|rules| quality_gate::evaluate_run(&output.aggregates, &rules));

    let gate = verdict.as_ref().map(GateReport::from_result).unwrap_or_else(GateReport::skipped);
    let metric_names = config.metrics.iter().map(|m| m.name.clone()).collect();
    let report = EvaluationReport::new(
        &config.dataset.path,
        dataset_size,
        metric_names,
        &output,
        gate,
    );
    let (json_path, md_path) = report.write(&options.output_dir)?;
    info!(json = %json_path.display(), markdown = %md_path.display(), "Reports written");

    match verdict {
        Some(Err(violation)) if options.enforce_gates => Err(violation.into()),
        Some(Err(violation)) => {
            warn!(%violation, "Quality gate failed (not enforced)");
            Ok(output)
        }
        _ => Ok(output),
    }
}

/// Re-check a previous run's `aggregates.json` against the configured gates
pub fn gate_command(aggregates_path: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    let rules = match config_path {
        Some(path) => RunConfig::from_file(path)?.quality_rules()?,
        None => None,
    }
    .unwrap_or_else(QualityGateRules::ci_defaults);

    let content = fs::read_to_string(aggregates_path)
        .with_context(|| format!("Failed to read {}", aggregates_path.display()))?;
    let aggregates: RunAggregates = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", aggregates_path.display()))?;

    quality_gate::evaluate_run(&aggregates, &rules)?;
    info!(rules = rules.len(), models = aggregates.len(), "Quality gate passed");
    Ok(())
}

/// One line per registered metric with its capability flags
pub fn render_metric_list(registry: &MetricRegistry) -> String {
    let mut out = String::new();
    for d in registry.descriptors() {
        let mut flags = Vec::new();
        if d.requires_reference {
            flags.push("reference");
        }
        if d.requires_context {
            flags.push("context");
        }
        if d.calls_backend {
            flags.push("backend");
        }
        let _ = writeln!(out, "{:<20} [{}] {}", d.name, flags.join(","), d.description);
    }
    out
}

/// Map an error chain onto the process exit code
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<QualityGateViolation>().is_some() {
            return EXIT_GATE_FAILED;
        }
        if cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<RegistryError>().is_some()
            || cause.downcast_ref::<DataError>().is_some()
        {
            return EXIT_CONFIG_ERROR;
        }
        if let Some(err) = cause.downcast_ref::<RunnerError>() {
            return match err {
                RunnerError::Registry(_) | RunnerError::Data { .. } => EXIT_CONFIG_ERROR,
                RunnerError::Io { .. } | RunnerError::Serialize(_) => EXIT_RUNTIME_ERROR,
            };
        }
    }
    EXIT_RUNTIME_ERROR
}
