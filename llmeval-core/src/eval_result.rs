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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Score produced by one metric for one (row, model) pair.
///
/// `score` is always finite and within `[0, 1]`, including when `error` is
/// set: failed computations degrade to `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub score: f64,

    /// Description of the fault when the metric could not score the row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Metric-specific diagnostics (sub-scores, judge reasoning, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl MetricResult {
    /// Successful score, clamped to `[0, 1]`; non-finite input becomes `0.0`
    pub fn scored(score: f64) -> Self {
        Self {
            score: clamp_unit(score),
            error: None,
            metadata: Map::new(),
        }
    }

    /// Zero score for rows lacking the inputs a metric needs
    pub fn empty() -> Self {
        Self::scored(0.0)
    }

    /// Degraded result carrying the fault description
    pub fn failed(error: impl ToString) -> Self {
        Self {
            score: 0.0,
            error: Some(error.to_string()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn clamp_unit(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Summary statistics of one metric over one model's rows
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl AggregatedStats {
    pub const STAT_NAMES: [&'static str; 5] = ["mean", "median", "std", "min", "max"];

    /// Look a statistic up by name
    pub fn get(&self, stat: &str) -> Option<f64> {
        match stat {
            "mean" => Some(self.mean),
            "median" => Some(self.median),
            "std" => Some(self.std),
            "min" => Some(self.min),
            "max" => Some(self.max),
            _ => None,
        }
    }

    pub fn is_known_stat(stat: &str) -> bool {
        Self::STAT_NAMES.contains(&stat)
    }
}

/// model -> metric -> per-row scores
pub type RawScoreSet = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// model -> metric -> summary statistics
pub type RunAggregates = BTreeMap<String, BTreeMap<String, AggregatedStats>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_clamps() {
        assert_eq!(MetricResult::scored(1.7).score, 1.0);
        assert_eq!(MetricResult::scored(-0.2).score, 0.0);
        assert_eq!(MetricResult::scored(f64::NAN).score, 0.0);
        assert_eq!(MetricResult::scored(f64::INFINITY).score, 0.0);
        assert_eq!(MetricResult::scored(0.42).score, 0.42);
    }

    #[test]
    fn test_failed_is_zero_with_error() {
        let result = MetricResult::failed("backend down");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.error.as_deref(), Some("backend down"));
        assert!(result.is_error());
    }

    #[test]
    fn test_metric_result_serialization_skips_empty() {
        let json = serde_json::to_string(&MetricResult::scored(0.5)).unwrap();
        assert_eq!(json, r#"{"score":0.5}"#);
    }

    #[test]
    fn test_stats_lookup() {
        let stats = AggregatedStats {
            mean: 0.5,
            median: 0.4,
            std: 0.1,
            min: 0.2,
            max: 0.9,
        };
        assert_eq!(stats.get("median"), Some(0.4));
        assert_eq!(stats.get("p95"), None);
        assert!(AggregatedStats::is_known_stat("std"));
        assert!(!AggregatedStats::is_known_stat("variance"));
    }
}
