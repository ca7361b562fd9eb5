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

//! JSON and Markdown evaluation reports

use chrono::{DateTime, Utc};
use llmeval_core::RunAggregates;
use llmeval_evals::quality_gate::QualityGateViolation;
use llmeval_evals::{AlignmentWarning, BatchSummary, RunOutput};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const JSON_REPORT_FILE: &str = "evaluation_report.json";
pub const MARKDOWN_REPORT_FILE: &str = "evaluation_report.md";

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub run_id: Uuid,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub dataset_path: PathBuf,
    pub dataset_size: usize,
    pub models: Vec<String>,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateReport {
    pub status: GateStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<QualityGateViolation>,
}

impl GateReport {
    pub fn skipped() -> Self {
        Self {
            status: GateStatus::Skipped,
            violation: None,
        }
    }

    pub fn from_result(result: &Result<(), QualityGateViolation>) -> Self {
        match result {
            Ok(()) => Self {
                status: GateStatus::Passed,
                violation: None,
            },
            Err(violation) => Self {
                status: GateStatus::Failed,
                violation: Some(violation.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub metadata: ReportMetadata,
    pub aggregates: RunAggregates,
    pub alignment_warnings: Vec<AlignmentWarning>,
    pub batches: Vec<BatchSummary>,
    pub quality_gate: GateReport,
}

impl EvaluationReport {
    pub fn new(
        dataset_path: &Path,
        dataset_size: usize,
        metrics: Vec<String>,
        output: &RunOutput,
        quality_gate: GateReport,
    ) -> Self {
        Self {
            metadata: ReportMetadata {
                run_id: Uuid::new_v4(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                generated_at: Utc::now(),
                dataset_path: dataset_path.to_path_buf(),
                dataset_size,
                models: output.raw_scores.keys().cloned().collect(),
                metrics,
            },
            aggregates: output.aggregates.clone(),
            alignment_warnings: output.alignment_warnings.clone(),
            batches: output.batches.clone(),
            quality_gate,
        }
    }

    /// Render one summary table per model plus warnings and the gate verdict
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let meta = &self.metadata;

        let _ = writeln!(md, "# LLM Evaluation Report\n");
        let _ = writeln!(md, "- **Run ID:** {}", meta.run_id);
        let _ = writeln!(md, "- **Generated:** {}", meta.generated_at.to_rfc3339());
        let _ = writeln!(md, "- **Tool version:** {}", meta.tool_version);
        let _ = writeln!(
            md,
            "- **Dataset:** `{}` ({} rows)",
            meta.dataset_path.display(),
            meta.dataset_size
        );
        let _ = writeln!(md, "- **Metrics:** {}\n", meta.metrics.join(", "));

        for (model, metrics) in &self.aggregates {
            let _ = writeln!(md, "## Model: {model}\n");
            let _ = writeln!(md, "| Metric | Mean | Median | Std | Min | Max |");
            let _ = writeln!(md, "|--------|------|--------|-----|-----|-----|");
            for (metric, s) in metrics {
                let _ = writeln!(
                    md,
                    "| {metric} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} |",
                    s.mean, s.median, s.std, s.min, s.max
                );
            }
            md.push('\n');
        }

        if !self.alignment_warnings.is_empty() {
            let _ = writeln!(md, "## Warnings\n");
            for w in &self.alignment_warnings {
                let _ = writeln!(
                    md,
                    "- `{}`: {} dataset rows vs {} predictions, evaluated {} ({} dropped)",
                    w.model,
                    w.dataset_rows,
                    w.prediction_rows,
                    w.evaluated_rows,
                    w.dropped_rows()
                );
            }
            md.push('\n');
        }

        let errored: Vec<&BatchSummary> = self.batches.iter().filter(|b| b.errors > 0).collect();
        if !errored.is_empty() {
            let _ = writeln!(md, "## Row Errors\n");
            for b in errored {
                let _ = writeln!(
                    md,
                    "- `{}` / `{}`: {} of {} rows failed",
                    b.model, b.metric, b.errors, b.rows
                );
            }
            md.push('\n');
        }

        let _ = writeln!(md, "## Quality Gate\n");
        match (&self.quality_gate.status, &self.quality_gate.violation) {
            (GateStatus::Failed, Some(violation)) => {
                let _ = writeln!(md, "**FAILED**: {violation}");
            }
            (GateStatus::Passed, _) => {
                let _ = writeln!(md, "**PASSED**");
            }
            _ => {
                let _ = writeln!(md, "Not evaluated");
            }
        }

        md
    }

    /// Write both report files into `dir`, returning their paths
    pub fn write(&self, dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)?;

        let json_path = dir.join(JSON_REPORT_FILE);
        fs::write(&json_path, serde_json::to_string_pretty(self)?)?;

        let md_path = dir.join(MARKDOWN_REPORT_FILE);
        fs::write(&md_path, self.to_markdown())?;

        Ok((json_path, md_path))
    }
}
