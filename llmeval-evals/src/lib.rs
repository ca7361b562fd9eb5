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

//! # llmeval evaluation engine
//!
//! Scores model answers against a benchmark dataset with pluggable metrics.
//!
//! ## Features
//!
//! - **Trait-based metric system**: every metric implements [`Metric`] and never fails
//! - **Explicit registry**: metrics are built by name from configuration
//! - **Bounded concurrency**: rows of one (model, metric) batch are scored in parallel
//! - **Retrying judges**: LLM-as-judge calls are retried with exponential backoff
//! - **Aggregation and quality gates**: summary statistics and CI thresholds
//!
//! ## Example
//!
//! ```rust,ignore
//! use llmeval_evals::{register_builtin_metrics, EvaluationRunner, MetricBackends, MetricRegistry};
//!
//! let mut registry = MetricRegistry::new();
//! register_builtin_metrics(&mut registry, &MetricBackends::new())?;
//!
//! let config = RunnerConfig::default();
//! let runner = EvaluationRunner::new(&registry, dataset, models, metrics, config);
//! let output = runner.run().await?;
//! quality_gate::evaluate_run(&output.aggregates, &QualityGateRules::ci_defaults())?;
//! ```

use async_trait::async_trait;
use llmeval_core::{DatasetRow, MetricResult, PredictionRow};
use serde::{Deserialize, Serialize};

pub mod aggregator;
pub mod backends;
pub mod cache;
pub mod llm_client;
pub mod local;
pub mod metrics;
pub mod params;
pub mod quality_gate;
pub mod registry;
pub mod runner;

pub use aggregator::aggregate;
pub use backends::MetricBackends;
pub use cache::CachedEmbedder;
pub use llm_client::{
    AnthropicClient, EmbedError, EmbeddingClient, JudgeClient, JudgeRequest, JudgeResponse,
    LLMError, OpenAIClient, TokenUsage,
};
pub use local::HashingEmbedder;
pub use metrics::register_builtin_metrics;
pub use params::{MetricBuildError, Params};
pub use quality_gate::{QualityGateRules, QualityGateViolation};
pub use registry::{MetricFactory, MetricRegistry, RegistryError};
pub use runner::{
    AlignmentWarning, BatchSummary, EvaluationRunner, ModelSpec, RunOutput, RunnerConfig,
    RunnerError,
};

/// Contract every scoring plugin implements.
///
/// `compute` is infallible by signature: implementations catch every internal
/// fault (bad input, unavailable backend, unparseable output) and return
/// [`MetricResult::failed`]. Scores are clamped by the metric itself, and rows
/// missing the inputs a metric needs score `0.0`.
///
/// One instance is shared by all concurrently scored rows of a batch, so any
/// internal cache must be safe for concurrent use.
#[async_trait]
pub trait Metric: Send + Sync {
    /// Registry name (e.g. "bleu")
    fn name(&self) -> &str;

    /// Whether the metric reads `expected_answer`. Informational only.
    fn requires_reference(&self) -> bool {
        false
    }

    /// Whether the metric reads `retrieved_contexts`. Informational only.
    fn requires_context(&self) -> bool {
        false
    }

    /// Score one prediction against its benchmark row
    async fn compute(&self, example: &DatasetRow, prediction: &PredictionRow) -> MetricResult;
}

/// Static description of a registered metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,

    /// One-line summary of what is measured
    pub description: String,

    pub requires_reference: bool,

    pub requires_context: bool,

    /// Whether scoring calls an external, non-deterministic backend
    pub calls_backend: bool,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            requires_reference: false,
            requires_context: false,
            calls_backend: false,
        }
    }

    pub fn requires_reference(mut self) -> Self {
        self.requires_reference = true;
        self
    }

    pub fn requires_context(mut self) -> Self {
        self.requires_context = true;
        self
    }

    pub fn calls_backend(mut self) -> Self {
        self.calls_backend = true;
        self
    }
}
