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

//! End-to-end runs over JSONL files with the built-in metrics

use async_trait::async_trait;
use llmeval_core::{load_dataset, MetricConfig, PredictionRow};
use llmeval_evals::quality_gate::{self, QualityGateRules};
use llmeval_evals::runner::{AGGREGATES_FILE, RAW_SCORES_FILE};
use llmeval_evals::{
    register_builtin_metrics, EvaluationRunner, JudgeClient, JudgeRequest, JudgeResponse, LLMError,
    MetricBackends, MetricRegistry, ModelSpec, RegistryError, RunnerConfig, RunnerError,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn write_jsonl(dir: &Path, name: &str, records: &[Value]) -> PathBuf {
    let path = dir.join(name);
    let body: Vec<String> = records.iter().map(Value::to_string).collect();
    std::fs::write(&path, body.join("\n")).unwrap();
    path
}

fn dataset_records() -> Vec<Value> {
    vec![
        json!({
            "id": "q1",
            "query": "What is the capital of France?",
            "expected_answer": "Paris is the capital of France",
            "retrieved_contexts": ["Paris is the capital and largest city of France."],
            "difficulty": "easy",
            "category": "geography"
        }),
        json!({
            "id": "q2",
            "query": "Who wrote Hamlet?",
            "expected_answer": "William Shakespeare wrote Hamlet",
            "retrieved_contexts": ["Hamlet is a tragedy written by William Shakespeare."],
            "difficulty": "medium",
            "category": "literature"
        }),
        json!({
            "id": "q3",
            "query": "What is the boiling point of water at sea level?",
            "expected_answer": "Water boils at 100 degrees Celsius at sea level",
            "retrieved_contexts": [],
            "difficulty": "hard",
            "category": "science"
        }),
    ]
}

struct Fixture {
    dir: TempDir,
    dataset: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let dataset = write_jsonl(dir.path(), "dataset.jsonl", &dataset_records());
        Self { dir, dataset }
    }

    fn predictions(&self, name: &str, answers: &[&str]) -> PathBuf {
        let records: Vec<Value> = answers.iter().map(|a| json!({ "answer": a })).collect();
        write_jsonl(self.dir.path(), name, &records)
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("results")
    }
}

fn builtin_registry(backends: &MetricBackends) -> MetricRegistry {
    let mut registry = MetricRegistry::new();
    register_builtin_metrics(&mut registry, backends).unwrap();
    registry
}

/// Judge backend whose every call fails with a server error
struct UnavailableJudge {
    calls: AtomicU32,
}

#[async_trait]
impl JudgeClient for UnavailableJudge {
    async fn complete(&self, _request: &JudgeRequest) -> Result<JudgeResponse, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LLMError::Status {
            status: 503,
            body: "judge overloaded".to_string(),
        })
    }

    fn provider(&self) -> &str {
        "unavailable"
    }
}

#[tokio::test]
async fn test_truncates_to_common_prefix_with_warning() {
    let fixture = Fixture::new();
    let predictions = fixture.predictions(
        "model_a.jsonl",
        &["Paris is the capital of France", "Shakespeare wrote it"],
    );
    let registry = builtin_registry(&MetricBackends::new());

    let runner = EvaluationRunner::new(
        &registry,
        load_dataset(&fixture.dataset).unwrap(),
        vec![ModelSpec::new("model_a", predictions)],
        vec![MetricConfig::new("bleu"), MetricConfig::new("rouge_l")],
        RunnerConfig::new(fixture.output_dir()),
    );
    let output = runner.run().await.unwrap();

    for metric in ["bleu", "rouge_l"] {
        assert_eq!(output.raw_scores["model_a"][metric].len(), 2, "{metric}");
    }
    assert_eq!(output.alignment_warnings.len(), 1);
    assert_eq!(output.alignment_warnings[0].dataset_rows, 3);
    assert_eq!(output.alignment_warnings[0].prediction_rows, 2);
    assert_eq!(output.alignment_warnings[0].evaluated_rows, 2);

    assert!(fixture.output_dir().join(RAW_SCORES_FILE).exists());
    assert!(fixture.output_dir().join(AGGREGATES_FILE).exists());
}

#[tokio::test]
async fn test_scores_follow_dataset_order() {
    let fixture = Fixture::new();
    let predictions = fixture.predictions(
        "model_a.jsonl",
        &[
            "completely unrelated words here",
            "William Shakespeare wrote Hamlet",
            "Water boils at 100 degrees Celsius at sea level",
        ],
    );
    let registry = builtin_registry(&MetricBackends::new());

    let runner = EvaluationRunner::new(
        &registry,
        load_dataset(&fixture.dataset).unwrap(),
        vec![ModelSpec::new("model_a", predictions)],
        vec![MetricConfig::new("rouge_l")],
        RunnerConfig::new(fixture.output_dir()).with_max_workers(3),
    );
    let output = runner.evaluate().await.unwrap();

    let scores = &output.raw_scores["model_a"]["rouge_l"];
    assert_eq!(scores.len(), 3);
    assert_eq!(scores[0], 0.0);
    assert!((scores[1] - 1.0).abs() < 1e-9);
    assert!((scores[2] - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_judge_backend_fault_degrades_rows() {
    let fixture = Fixture::new();
    let predictions = fixture.predictions("model_a.jsonl", &["a", "b", "c"]);

    let judge = Arc::new(UnavailableJudge {
        calls: AtomicU32::new(0),
    });
    let backends = MetricBackends::new().with_judge(judge.clone());
    let registry = builtin_registry(&backends);

    let judge_config = MetricConfig::new("llm_judge")
        .with_param("provider", "unavailable")
        .with_param("model", "judge-1")
        .with_param("retry_base_delay_ms", 1)
        .with_param("retry_max_delay_ms", 2);

    // the fault is reported on the row result
    let metric = registry.create("llm_judge", &judge_config.params).unwrap();
    let dataset = load_dataset(&fixture.dataset).unwrap();
    let result = metric.compute(&dataset[0], &PredictionRow::new("a")).await;
    assert_eq!(result.score, 0.0);
    assert!(result.error.unwrap().contains("judge overloaded"));

    let runner = EvaluationRunner::new(
        &registry,
        dataset,
        vec![ModelSpec::new("model_a", predictions)],
        vec![judge_config],
        RunnerConfig::new(fixture.output_dir()),
    );
    let output = runner.evaluate().await.unwrap();

    assert_eq!(output.raw_scores["model_a"]["llm_judge"], vec![0.0, 0.0, 0.0]);
    assert_eq!(output.batches[0].errors, 3);
    // one direct row plus three runner rows, three attempts each
    assert_eq!(judge.calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_construction_fault_aborts_run_before_writing() {
    let fixture = Fixture::new();
    let predictions = fixture.predictions("model_a.jsonl", &["a", "b", "c"]);
    let registry = builtin_registry(&MetricBackends::new());

    let runner = EvaluationRunner::new(
        &registry,
        load_dataset(&fixture.dataset).unwrap(),
        vec![ModelSpec::new("model_a", predictions)],
        vec![
            MetricConfig::new("rouge_l"),
            MetricConfig::new("bleu").with_param("n_gram", 9),
        ],
        RunnerConfig::new(fixture.output_dir()),
    );

    let err = runner.run().await.unwrap_err();
    match err {
        RunnerError::Registry(RegistryError::Construction { metric, .. }) => {
            assert_eq!(metric, "bleu")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fixture.output_dir().exists());
}

#[tokio::test]
async fn test_quality_gate_over_run_output() {
    let fixture = Fixture::new();
    let good = fixture.predictions(
        "good.jsonl",
        &[
            "Paris is the capital of France",
            "William Shakespeare wrote Hamlet",
            "Water boils at 100 degrees Celsius at sea level",
        ],
    );
    let bad = fixture.predictions("bad.jsonl", &["no idea", "no idea", "no idea"]);
    let registry = builtin_registry(&MetricBackends::new());

    let runner = EvaluationRunner::new(
        &registry,
        load_dataset(&fixture.dataset).unwrap(),
        vec![ModelSpec::new("bad", bad), ModelSpec::new("good", good)],
        vec![MetricConfig::new("bleu"), MetricConfig::new("faithfulness")],
        RunnerConfig::new(fixture.output_dir()),
    );
    let output = runner.evaluate().await.unwrap();

    let bleu_only = QualityGateRules::new().with_rule("bleu", "mean", 0.3);
    assert!(quality_gate::evaluate(&output.aggregates["good"], &bleu_only).is_ok());

    let violation = quality_gate::evaluate_run(&output.aggregates, &bleu_only).unwrap_err();
    assert_eq!(violation.model.as_deref(), Some("bad"));
    assert_eq!(violation.metric, "bleu");
    assert_eq!(violation.actual, 0.0);
}
