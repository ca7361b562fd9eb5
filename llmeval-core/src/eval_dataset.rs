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

//! Benchmark rows, model predictions and metric declarations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Construction parameters for a metric, forwarded verbatim from configuration.
pub type MetricParams = Map<String, Value>;

/// Difficulty bucket of a benchmark item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == value)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One benchmark item.
///
/// Rows are produced once by the dataset loader and are read-only for the
/// rest of the run. During evaluation a row is addressed by its position,
/// `id` is carried for reporting only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetRow {
    /// Stable identifier of the benchmark item
    pub id: String,

    /// The question put to the model
    pub query: String,

    /// Golden answer (may be empty for reference-free benchmarks)
    pub expected_answer: String,

    /// Retrieved passages, in retrieval order
    pub retrieved_contexts: Vec<String>,

    pub difficulty: Difficulty,

    pub category: String,
}

impl DatasetRow {
    /// Create a medium-difficulty row without retrieved context
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        expected_answer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            expected_answer: expected_answer.into(),
            retrieved_contexts: Vec::new(),
            difficulty: Difficulty::Medium,
            category: "general".to_string(),
        }
    }

    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retrieved_contexts = contexts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// One model output, paired positionally with a [`DatasetRow`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PredictionRow {
    #[serde(default)]
    pub answer: String,

    /// Fields of the prediction record other than the answer
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PredictionRow {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            extra: Map::new(),
        }
    }

    /// Build a prediction from a raw JSON record.
    ///
    /// The answer is read from `answer`, falling back to the legacy
    /// `prediction` key; a record with neither yields an empty answer.
    pub fn from_record(mut record: Map<String, Value>) -> Self {
        let key = ["answer", "prediction"]
            .into_iter()
            .find(|key| matches!(record.get(*key), Some(Value::String(_))));

        let answer = match key.and_then(|key| record.remove(key)) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };

        Self {
            answer,
            extra: record,
        }
    }

    /// Project onto the field shape metrics consume (`{answer}` only)
    pub fn normalized(&self) -> Self {
        Self::new(self.answer.clone())
    }
}

/// Declares one metric to run and its construction parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,

    #[serde(default)]
    pub params: MetricParams,
}

impl MetricConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: MetricParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}
