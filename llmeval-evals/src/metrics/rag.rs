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

//! Retrieval-augmented generation metrics built on embedding similarity.
//!
//! - `faithfulness`: share of answer claims supported by the retrieved context
//! - `context_relevancy`: how well the retrieved passages match the query
//! - `answer_relevancy`: how well the answer addresses the query

use super::semantic::{cosine_similarity, embedder_param};
use crate::backends::MetricBackends;
use crate::llm_client::{EmbedError, EmbeddingClient};
use crate::params::{MetricBuildError, Params};
use crate::Metric;
use async_trait::async_trait;
use llmeval_core::{DatasetRow, MetricParams, MetricResult, PredictionRow};
use std::sync::Arc;

fn threshold_param(p: &mut Params<'_>, default: f64) -> Result<f64, MetricBuildError> {
    let threshold = p.f64_or("threshold", default)?;
    if threshold <= 0.0 || threshold > 1.0 {
        return Err(MetricBuildError::InvalidParam {
            param: "threshold".to_string(),
            reason: format!("must be in (0, 1], got {threshold}"),
        });
    }
    Ok(threshold)
}

/// Split an answer into `.`-separated, non-empty claims
pub fn split_claims(text: &str) -> Vec<String> {
    text.split('.')
        .map(str::trim)
        .filter(|claim| !claim.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fraction of answer claims whose similarity to the joined context reaches the threshold
pub struct FaithfulnessMetric {
    embedder: Arc<dyn EmbeddingClient>,
    threshold: f64,
}

impl FaithfulnessMetric {
    pub const NAME: &'static str = "faithfulness";

    pub fn new(embedder: Arc<dyn EmbeddingClient>, threshold: f64) -> Self {
        Self { embedder, threshold }
    }

    pub fn from_params(
        params: &MetricParams,
        backends: &MetricBackends,
    ) -> Result<Self, MetricBuildError> {
        let mut p = Params::new(Self::NAME, params);
        let threshold = threshold_param(&mut p, 0.6)?;
        let embedder = embedder_param(&mut p, backends)?;
        p.finish();
        Ok(Self::new(embedder, threshold))
    }

    async fn supported_claims(
        &self,
        claims: &[String],
        context: &str,
    ) -> Result<usize, EmbedError> {
        let context_embedding = self.embedder.embed(context).await?;
        let claim_embeddings = self.embedder.embed_batch(claims).await?;

        Ok(claim_embeddings
            .iter()
            .filter(|claim| cosine_similarity(claim, &context_embedding) >= self.threshold)
            .count())
    }
}

#[async_trait]
impl Metric for FaithfulnessMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_context(&self) -> bool {
        true
    }

    async fn compute(&self, example: &DatasetRow, prediction: &PredictionRow) -> MetricResult {
        if prediction.answer.is_empty() || example.retrieved_contexts.is_empty() {
            return MetricResult::empty();
        }

        let claims = split_claims(&prediction.answer);
        if claims.is_empty() {
            return MetricResult::empty();
        }

        let context = example.retrieved_contexts.join(" ");
        match self.supported_claims(&claims, &context).await {
            Ok(supported) => MetricResult::scored(supported as f64 / claims.len() as f64)
                .with_metadata("claims", claims.len())
                .with_metadata("supported_claims", supported),
            Err(e) => MetricResult::failed(e),
        }
    }
}

/// Mean query/passage similarity, normalised by the threshold
pub struct ContextRelevancyMetric {
    embedder: Arc<dyn EmbeddingClient>,
    threshold: f64,
}

impl ContextRelevancyMetric {
    pub const NAME: &'static str = "context_relevancy";

    pub fn new(embedder: Arc<dyn EmbeddingClient>, threshold: f64) -> Self {
        Self { embedder, threshold }
    }

    pub fn from_params(
        params: &MetricParams,
        backends: &MetricBackends,
    ) -> Result<Self, MetricBuildError> {
        let mut p = Params::new(Self::NAME, params);
        let threshold = threshold_param(&mut p, 0.5)?;
        let embedder = embedder_param(&mut p, backends)?;
        p.finish();
        Ok(Self::new(embedder, threshold))
    }

    async fn mean_similarity(&self, query: &str, contexts: &[String]) -> Result<f64, EmbedError> {
        let query_embedding = self.embedder.embed(query).await?;
        let context_embeddings = self.embedder.embed_batch(contexts).await?;

        let total: f64 = context_embeddings
            .iter()
            .map(|context| cosine_similarity(&query_embedding, context))
            .sum();
        Ok(total / contexts.len() as f64)
    }
}

#[async_trait]
impl Metric for ContextRelevancyMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn requires_context(&self) -> bool {
        true
    }

    async fn compute(&self, example: &DatasetRow, _prediction: &PredictionRow) -> MetricResult {
        if example.query.is_empty() || example.retrieved_contexts.is_empty() {
            return MetricResult::empty();
        }

        match self.mean_similarity(&example.query, &example.retrieved_contexts).await {
            Ok(mean) => {
                MetricResult::scored(mean / self.threshold).with_metadata("mean_similarity", mean)
            }
            Err(e) => MetricResult::failed(e),
        }
    }
}

/// Query/answer similarity, normalised by the threshold
pub struct AnswerRelevancyMetric {
    embedder: Arc<dyn EmbeddingClient>,
    threshold: f64,
}

impl AnswerRelevancyMetric {
    pub const NAME: &'static str = "answer_relevancy";

    pub fn new(embedder: Arc<dyn EmbeddingClient>, threshold: f64) -> Self {
        Self { embedder, threshold }
    }

    pub fn from_params(
        params: &MetricParams,
        backends: &MetricBackends,
    ) -> Result<Self, MetricBuildError> {
        let mut p = Params::new(Self::NAME, params);
        let threshold = threshold_param(&mut p, 0.5)?;
        let embedder = embedder_param(&mut p, backends)?;
        p.finish();
        Ok(Self::new(embedder, threshold))
    }
}

#[async_trait]
impl Metric for AnswerRelevancyMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn compute(&self, example: &DatasetRow, prediction: &PredictionRow) -> MetricResult {
        if example.query.is_empty() || prediction.answer.is_empty() {
            return MetricResult::empty();
        }

        let query = match self.embedder.embed(&example.query).await {
            Ok(embedding) => embedding,
            Err(e) => return MetricResult::failed(e),
        };
        let answer = match self.embedder.embed(&prediction.answer).await {
            Ok(embedding) => embedding,
            Err(e) => return MetricResult::failed(e),
        };

        let similarity = cosine_similarity(&query, &answer);
        MetricResult::scored(similarity / self.threshold).with_metadata("similarity", similarity)
    }
}
