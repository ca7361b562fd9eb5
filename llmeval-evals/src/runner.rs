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

//! Evaluation runner: scores every (model, metric) pair over the dataset.
//!
//! Batches run one after another. Inside a batch every row is a task on a
//! worker pool bounded by a fresh semaphore, and scores are written back at
//! their row index so the output order matches the dataset order.

use crate::aggregator::aggregate_all;
use crate::registry::{MetricRegistry, RegistryError};
use crate::Metric;
use futures::future::join_all;
use llmeval_core::{
    load_predictions, DataError, DatasetRow, MetricConfig, MetricResult, PredictionRow, RawScoreSet,
    RunAggregates,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub const RAW_SCORES_FILE: &str = "raw_scores.json";
pub const AGGREGATES_FILE: &str = "aggregates.json";
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// A model under evaluation and the JSONL file holding its predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    pub predictions: PathBuf,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, predictions: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            predictions: predictions.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Upper bound on rows scored concurrently within one batch
    pub max_workers: usize,

    /// Directory receiving the persisted scores
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            output_dir: PathBuf::from("results"),
        }
    }
}

impl RunnerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }
}

/// Dataset and prediction counts differed; only the common prefix was scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentWarning {
    pub model: String,
    pub dataset_rows: usize,
    pub prediction_rows: usize,
    pub evaluated_rows: usize,
}

impl AlignmentWarning {
    pub fn dropped_rows(&self) -> usize {
        self.dataset_rows.max(self.prediction_rows) - self.evaluated_rows
    }
}

/// Diagnostics for one (model, metric) batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub model: String,
    pub metric: String,
    pub rows: usize,
    /// Rows whose result carried an error or whose task panicked
    pub errors: usize,
    pub duration_ms: u64,
}

/// Everything a run produced before persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutput {
    pub raw_scores: RawScoreSet,
    pub aggregates: RunAggregates,
    pub alignment_warnings: Vec<AlignmentWarning>,
    pub batches: Vec<BatchSummary>,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to load predictions for model '{model}': {source}")]
    Data {
        model: String,
        #[source]
        source: DataError,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Orchestrates one evaluation run.
///
/// Borrows the registry for the duration of the run. The dataset is shared
/// read-only with every row task.
pub struct EvaluationRunner<'r> {
    registry: &'r MetricRegistry,
    dataset: Arc<[DatasetRow]>,
    models: Vec<ModelSpec>,
    metrics: Vec<MetricConfig>,
    config: RunnerConfig,
}

impl<'r> EvaluationRunner<'r> {
    pub fn new(
        registry: &'r MetricRegistry,
        dataset: impl Into<Arc<[DatasetRow]>>,
        models: Vec<ModelSpec>,
        metrics: Vec<MetricConfig>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            dataset: dataset.into(),
            models,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Evaluate and persist; returns what was written
    pub async fn run(&self) -> Result<RunOutput, RunnerError> {
        let output = self.evaluate().await?;
        self.persist(&output)?;
        Ok(output)
    }

    /// Score every model with every metric without touching the filesystem.
    ///
    /// Every configured metric is constructed once up front, so a bad metric
    /// name or parameter fails the run before any row is scored.
    pub async fn evaluate(&self) -> Result<RunOutput, RunnerError> {
        for metric in &self.metrics {
            self.registry.create(&metric.name, &metric.params)?;
        }

        let mut output = RunOutput::default();
        info!(
            models = self.models.len(),
            metrics = self.metrics.len(),
            rows = self.dataset.len(),
            max_workers = self.config.max_workers,
            "Starting evaluation run"
        );

        for model in &self.models {
            let predictions =
                load_predictions(&model.predictions).map_err(|source| RunnerError::Data {
                    model: model.name.clone(),
                    source,
                })?;

            let n = self.dataset.len().min(predictions.len());
            if predictions.len() != self.dataset.len() {
                let warning = AlignmentWarning {
                    model: model.name.clone(),
                    dataset_rows: self.dataset.len(),
                    prediction_rows: predictions.len(),
                    evaluated_rows: n,
                };
                warn!(
                    model = %model.name,
                    dataset_rows = warning.dataset_rows,
                    prediction_rows = warning.prediction_rows,
                    dropped_rows = warning.dropped_rows(),
                    "Dataset and predictions differ in length, evaluating the common prefix"
                );
                output.alignment_warnings.push(warning);
            }

            let predictions: Arc<[PredictionRow]> = predictions
                .iter()
                .take(n)
                .map(PredictionRow::normalized)
                .collect();

            for metric_config in &self.metrics {
                let metric = self.registry.create(&metric_config.name, &metric_config.params)?;
                let (scores, summary) = self
                    .score_batch(&model.name, metric, Arc::clone(&predictions))
                    .await;

                output.batches.push(summary);
                output
                    .raw_scores
                    .entry(model.name.clone())
                    .or_default()
                    .insert(metric_config.name.clone(), scores);
            }
        }

        output.aggregates = aggregate_all(&output.raw_scores);
        info!(batches = output.batches.len(), "Evaluation run complete");
        Ok(output)
    }

    /// Score the first `predictions.len()` rows with one metric instance
    async fn score_batch(
        &self,
        model: &str,
        metric: Arc<dyn Metric>,
        predictions: Arc<[PredictionRow]>,
    ) -> (Vec<f64>, BatchSummary) {
        let start = Instant::now();
        let rows = predictions.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        debug!(model, metric = metric.name(), rows, "Dispatching batch");

        let tasks: Vec<_> = (0..rows)
            .map(|index| {
                let semaphore = Arc::clone(&semaphore);
                let metric = Arc::clone(&metric);
                let dataset = Arc::clone(&self.dataset);
                let predictions = Arc::clone(&predictions);

                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return MetricResult::failed(e),
                    };
                    metric.compute(&dataset[index], &predictions[index]).await
                })
            })
            .collect();

        // join_all yields in submission order, so position == row index
        let mut scores = vec![0.0; rows];
        let mut errors = 0;
        for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
            match joined {
                Ok(result) => {
                    if let Some(e) = &result.error {
                        errors += 1;
                        debug!(
                            model,
                            metric = metric.name(),
                            row = index,
                            error = %e,
                            "Row scored with error"
                        );
                    }
                    scores[index] = result.score;
                }
                Err(e) => {
                    errors += 1;
                    error!(
                        model,
                        metric = metric.name(),
                        row = index,
                        "Metric task panicked: {}",
                        e
                    );
                }
            }
        }

        let summary = BatchSummary {
            model: model.to_string(),
            metric: metric.name().to_string(),
            rows,
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if errors > 0 {
            warn!(model, metric = metric.name(), rows, errors, "Batch finished with row errors");
        } else {
            info!(
                model,
                metric = metric.name(),
                rows,
                duration_ms = summary.duration_ms,
                "Batch finished"
            );
        }

        (scores, summary)
    }

    /// Write `raw_scores.json` and `aggregates.json` into the output directory
    pub fn persist(&self, output: &RunOutput) -> Result<(), RunnerError> {
        let dir = &self.config.output_dir;
        fs::create_dir_all(dir).map_err(|source| RunnerError::Io {
            path: dir.clone(),
            source,
        })?;

        write_json(&dir.join(RAW_SCORES_FILE), &output.raw_scores)?;
        write_json(&dir.join(AGGREGATES_FILE), &output.aggregates)?;

        info!(output_dir = %dir.display(), "Persisted raw scores and aggregates");
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RunnerError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| RunnerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::MetricBuildError;
    use async_trait::async_trait;
    use llmeval_core::MetricParams;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    /// Scores each row by its answer parsed as a number, sleeping longer for earlier rows
    struct ParseMetric;

    #[async_trait]
    impl Metric for ParseMetric {
        fn name(&self) -> &str {
            "parse"
        }

        async fn compute(&self, _example: &DatasetRow, prediction: &PredictionRow) -> MetricResult {
            let value: f64 = prediction.answer.parse().unwrap_or(0.0);
            tokio::time::sleep(Duration::from_millis(((1.0 - value) * 20.0) as u64)).await;
            MetricResult::scored(value)
        }
    }

    /// Records peak concurrency across all instances
    struct GaugeMetric {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Metric for GaugeMetric {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn compute(
            &self,
            _example: &DatasetRow,
            _prediction: &PredictionRow,
        ) -> MetricResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            MetricResult::scored(1.0)
        }
    }

    struct PanickyMetric;

    #[async_trait]
    impl Metric for PanickyMetric {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn compute(&self, example: &DatasetRow, _prediction: &PredictionRow) -> MetricResult {
            if example.id == "1" {
                panic!("metric bug");
            }
            MetricResult::scored(0.8)
        }
    }

    fn dataset(n: usize) -> Vec<DatasetRow> {
        (0..n).map(|i| DatasetRow::new(i.to_string(), "q", "a")).collect()
    }

    fn predictions_file(answers: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for answer in answers {
            writeln!(file, "{}", serde_json::json!({ "answer": answer })).unwrap();
        }
        file
    }

    fn registry() -> (MetricRegistry, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let gauge_peak = Arc::clone(&peak);

        let mut registry = MetricRegistry::new();
        registry
            .register("parse", |_: &MetricParams| -> Result<Arc<dyn Metric>, MetricBuildError> {
                Ok(Arc::new(ParseMetric))
            })
            .unwrap();
        registry
            .register(
                "gauge",
                move |_: &MetricParams| -> Result<Arc<dyn Metric>, MetricBuildError> {
                    Ok(Arc::new(GaugeMetric {
                        in_flight: Arc::clone(&in_flight),
                        peak: Arc::clone(&gauge_peak),
                    }))
                },
            )
            .unwrap();
        registry
            .register("panicky", |_: &MetricParams| -> Result<Arc<dyn Metric>, MetricBuildError> {
                Ok(Arc::new(PanickyMetric))
            })
            .unwrap();
        (registry, peak)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scores_keep_row_order() {
        let (registry, _) = registry();
        let file = predictions_file(&["0.1", "0.9", "0.5", "0.3", "1.0", "0.0"]);
        let runner = EvaluationRunner::new(
            &registry,
            dataset(6),
            vec![ModelSpec::new("m", file.path())],
            vec![MetricConfig::new("parse")],
            RunnerConfig::default().with_max_workers(3),
        );

        let output = runner.evaluate().await.unwrap();
        assert_eq!(output.raw_scores["m"]["parse"], vec![0.1, 0.9, 0.5, 0.3, 1.0, 0.0]);
        assert!(output.alignment_warnings.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_bound_respected() {
        let (registry, peak) = registry();
        let file = predictions_file(&["a"; 12]);
        let runner = EvaluationRunner::new(
            &registry,
            dataset(12),
            vec![ModelSpec::new("m", file.path())],
            vec![MetricConfig::new("gauge")],
            RunnerConfig::default().with_max_workers(2),
        );

        runner.evaluate().await.unwrap();
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak {peak}");
    }

    #[tokio::test]
    async fn test_panicking_row_degrades_to_zero() {
        let (registry, _) = registry();
        let file = predictions_file(&["x", "y", "z"]);
        let runner = EvaluationRunner::new(
            &registry,
            dataset(3),
            vec![ModelSpec::new("m", file.path())],
            vec![MetricConfig::new("panicky")],
            RunnerConfig::default(),
        );

        let output = runner.evaluate().await.unwrap();
        assert_eq!(output.raw_scores["m"]["panicky"], vec![0.8, 0.0, 0.8]);
        assert_eq!(output.batches[0].errors, 1);
    }

    #[tokio::test]
    async fn test_truncates_to_shorter_side() {
        let (registry, _) = registry();
        let file = predictions_file(&["0.5", "0.5"]);
        let runner = EvaluationRunner::new(
            &registry,
            dataset(3),
            vec![ModelSpec::new("m", file.path())],
            vec![MetricConfig::new("parse")],
            RunnerConfig::default(),
        );

        let output = runner.evaluate().await.unwrap();
        assert_eq!(output.raw_scores["m"]["parse"].len(), 2);
        let warning = &output.alignment_warnings[0];
        assert_eq!(
            (warning.dataset_rows, warning.prediction_rows, warning.evaluated_rows),
            (3, 2, 2)
        );
        assert_eq!(warning.dropped_rows(), 1);
    }

    #[tokio::test]
    async fn test_unknown_metric_fails_before_scoring() {
        let (registry, peak) = registry();
        let file = predictions_file(&["a"]);
        let runner = EvaluationRunner::new(
            &registry,
            dataset(1),
            vec![ModelSpec::new("m", file.path())],
            vec![MetricConfig::new("gauge"), MetricConfig::new("nonexistent")],
            RunnerConfig::default(),
        );

        let err = runner.evaluate().await.unwrap_err();
        assert!(matches!(err, RunnerError::Registry(RegistryError::UnknownMetric { .. })));
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_predictions_file() {
        let (registry, _) = registry();
        let runner = EvaluationRunner::new(
            &registry,
            dataset(1),
            vec![ModelSpec::new("m", "/nonexistent/predictions.jsonl")],
            vec![MetricConfig::new("parse")],
            RunnerConfig::default(),
        );

        let err = runner.evaluate().await.unwrap_err();
        assert!(matches!(err, RunnerError::Data { ref model, .. } if model == "m"));
    }

    #[tokio::test]
    async fn test_run_persists_outputs() {
        let (registry, _) = registry();
        let file = predictions_file(&["0.25", "0.75"]);
        let out = TempDir::new().unwrap();
        let output_dir = out.path().join("nested").join("results");
        let runner = EvaluationRunner::new(
            &registry,
            dataset(2),
            vec![ModelSpec::new("m", file.path())],
            vec![MetricConfig::new("parse")],
            RunnerConfig::new(&output_dir),
        );

        let output = runner.run().await.unwrap();

        let raw = fs::read_to_string(output_dir.join(RAW_SCORES_FILE)).unwrap();
        let raw: RawScoreSet = serde_json::from_str(&raw).unwrap();
        assert_eq!(raw, output.raw_scores);

        let aggregates = fs::read_to_string(output_dir.join(AGGREGATES_FILE)).unwrap();
        let aggregates: RunAggregates = serde_json::from_str(&aggregates).unwrap();
        assert_eq!(aggregates["m"]["parse"].mean, 0.5);
        assert_eq!(aggregates["m"]["parse"].median, 0.5);
    }
}
