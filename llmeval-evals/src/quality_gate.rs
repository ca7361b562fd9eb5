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

//! Threshold checks over aggregated statistics, used as a CI gate.

use llmeval_core::{AggregatedStats, RunAggregates};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// metric -> statistic -> minimum acceptable value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityGateRules {
    rules: BTreeMap<String, BTreeMap<String, f64>>,
}

impl QualityGateRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(
        mut self,
        metric: impl Into<String>,
        stat: impl Into<String>,
        threshold: f64,
    ) -> Self {
        self.insert(metric, stat, threshold);
        self
    }

    pub fn insert(&mut self, metric: impl Into<String>, stat: impl Into<String>, threshold: f64) {
        self.rules
            .entry(metric.into())
            .or_default()
            .insert(stat.into(), threshold);
    }

    /// Thresholds enforced in CI when a configuration declares none
    pub fn ci_defaults() -> Self {
        Self::new()
            .with_rule("bleu", "mean", 0.3)
            .with_rule("faithfulness", "mean", 0.7)
    }

    /// Parse the flat `{"metric.stat": threshold}` configuration form.
    ///
    /// The key is split on its last `.`, so both halves must be non-empty.
    pub fn from_thresholds<'a, I>(thresholds: I) -> Result<Self, RuleParseError>
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        let mut rules = Self::new();
        for (key, threshold) in thresholds {
            match key.rsplit_once('.') {
                Some((metric, stat)) if !metric.is_empty() && !stat.is_empty() => {
                    rules.insert(metric, stat, *threshold);
                }
                _ => return Err(RuleParseError { key: key.clone() }),
            }
        }
        Ok(rules)
    }

    /// Iterate `(metric, stat, threshold)` sorted by metric then statistic
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.rules.iter().flat_map(|(metric, stats)| {
            stats
                .iter()
                .map(move |(stat, threshold)| (metric.as_str(), stat.as_str(), *threshold))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.values().all(BTreeMap::is_empty)
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(BTreeMap::len).sum()
    }
}

/// Malformed flat threshold key
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid quality gate key '{key}': expected '<metric>.<statistic>'")]
pub struct RuleParseError {
    pub key: String,
}

/// First rule whose statistic fell below its threshold
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error(
    "Quality gate failed: {metric}.{statistic} {actual:.3} < {threshold:.3}{}",
    model_suffix(.model)
)]
pub struct QualityGateViolation {
    /// Set when the gate was applied across a whole run
    pub model: Option<String>,
    pub metric: String,
    pub statistic: String,
    pub actual: f64,
    pub threshold: f64,
}

fn model_suffix(model: &Option<String>) -> String {
    model
        .as_ref()
        .map(|model| format!(" (model '{model}')"))
        .unwrap_or_default()
}

/// Check one model's aggregates against `rules`.
///
/// Metrics absent from `aggregates` are skipped. A statistic name the stats
/// do not define reads as `0.0`. Rules are checked in sorted order and the
/// first failure is returned.
pub fn evaluate(
    aggregates: &BTreeMap<String, AggregatedStats>,
    rules: &QualityGateRules,
) -> Result<(), QualityGateViolation> {
    for (metric, stat, threshold) in rules.iter() {
        let Some(stats) = aggregates.get(metric) else {
            debug!(metric, "Metric not in aggregates, skipping gate rule");
            continue;
        };

        let actual = stats.get(stat).unwrap_or(0.0);
        if actual < threshold {
            return Err(QualityGateViolation {
                model: None,
                metric: metric.to_string(),
                statistic: stat.to_string(),
                actual,
                threshold,
            });
        }
    }
    Ok(())
}

/// Check every model of a run, in model-name order
pub fn evaluate_run(
    aggregates: &RunAggregates,
    rules: &QualityGateRules,
) -> Result<(), QualityGateViolation> {
    for (model, stats) in aggregates {
        evaluate(stats, rules).map_err(|mut violation| {
            violation.model = Some(model.clone());
            violation
        })?;
    }
    info!(models = aggregates.len(), rules = rules.len(), "All quality gates passed");
    Ok(())
}
