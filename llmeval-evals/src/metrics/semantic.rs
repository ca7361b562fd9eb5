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

//! Embedding-similarity metrics

use crate::backends::MetricBackends;
use crate::llm_client::EmbeddingClient;
use crate::params::{MetricBuildError, Params};
use crate::Metric;
use async_trait::async_trait;
use llmeval_core::{DatasetRow, MetricParams, MetricResult, PredictionRow};
use std::sync::Arc;

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Resolve the `embedder` parameter against the configured backends
pub(crate) fn embedder_param(
    p: &mut Params<'_>,
    backends: &MetricBackends,
) -> Result<Arc<dyn EmbeddingClient>, MetricBuildError> {
    let name = p.optional_str("embedder")?;
    backends.embedder(name)
}

/// BERTScore-style similarity: `(cos(reference, answer) + 1) / 2`
pub struct BertScoreMetric {
    embedder: Arc<dyn EmbeddingClient>,
}

impl BertScoreMetric {
    pub const NAME: &'static str = "bertscore";

    pub fn new(embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { embedder }
    }

    pub fn from_params(
        params: &MetricParams,
        backends: &MetricBackends,
    ) -> Result<Self, MetricBuildError> {
        let mut p = Params::new(Self::NAME, params);
        let embedder = embedder_param(&mut p, backends)?;
        p.finish();
        Ok(Self::new(embedder))
    }
}

#[async_trait]
impl Metric for BertScoreMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_reference(&self) -> bool {
        true
    }

    async fn compute(&self, example: &DatasetRow, prediction: &PredictionRow) -> MetricResult {
        if example.expected_answer.is_empty() || prediction.answer.is_empty() {
            return MetricResult::empty();
        }

        let reference = match self.embedder.embed(&example.expected_answer).await {
            Ok(embedding) => embedding,
            Err(e) => return MetricResult::failed(e),
        };
        let candidate = match self.embedder.embed(&prediction.answer).await {
            Ok(embedding) => embedding,
            Err(e) => return MetricResult::failed(e),
        };

        let cosine = cosine_similarity(&reference, &candidate);
        MetricResult::scored((cosine + 1.0) / 2.0).with_metadata("cosine", cosine)
    }
}
