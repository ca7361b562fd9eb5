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

//! llmeval core
//!
//! Data model shared by the evaluation engine and its front ends: benchmark
//! rows, predictions, metric declarations and results, plus the JSONL loaders
//! and the retry policy used by backend-calling metrics.

pub mod data;
pub mod eval_dataset;
pub mod eval_result;
pub mod resilience;

pub use data::{load_dataset, load_predictions, validate_row, DataError};
pub use eval_dataset::{DatasetRow, Difficulty, MetricConfig, MetricParams, PredictionRow};
pub use eval_result::{AggregatedStats, MetricResult, RawScoreSet, RunAggregates};
pub use resilience::{RetryError, RetryPolicy, Retryable};
