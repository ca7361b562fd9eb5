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

//! Summary statistics over per-row scores.

use llmeval_core::{AggregatedStats, RawScoreSet, RunAggregates};

/// Reduce a score list to mean, median, population std, min and max.
///
/// Empty input yields all zeros. The result does not depend on input order.
pub fn aggregate(scores: &[f64]) -> AggregatedStats {
    if scores.is_empty() {
        return AggregatedStats::default();
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    // Summing in sorted order keeps the result independent of input order.
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    AggregatedStats {
        mean,
        median,
        std: variance.sqrt(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
    }
}

/// Aggregate every (model, metric) score list of a run
pub fn aggregate_all(raw_scores: &RawScoreSet) -> RunAggregates {
    raw_scores
        .iter()
        .map(|(model, metrics)| {
            let stats = metrics
                .iter()
                .map(|(metric, scores)| (metric.clone(), aggregate(scores)))
                .collect();
            (model.clone(), stats)
        })
        .collect()
}
