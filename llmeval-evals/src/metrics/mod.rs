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

//! Built-in metrics and their registration

pub mod judge;
pub mod rag;
pub mod reference;
pub mod semantic;

pub use judge::{JudgeError, LlmJudgeMetric};
pub use rag::{AnswerRelevancyMetric, ContextRelevancyMetric, FaithfulnessMetric};
pub use reference::{BleuMetric, RougeLMetric};
pub use semantic::BertScoreMetric;

use crate::backends::MetricBackends;
use crate::params::MetricBuildError;
use crate::registry::{MetricRegistry, RegistryError};
use crate::{Metric, MetricDescriptor};
use llmeval_core::MetricParams;
use std::sync::Arc;

/// Adapt a typed constructor into a registry factory
fn factory<M, F>(
    build: F,
) -> impl Fn(&MetricParams) -> Result<Arc<dyn Metric>, MetricBuildError> + Send + Sync
where
    M: Metric + 'static,
    F: Fn(&MetricParams) -> Result<M, MetricBuildError> + Send + Sync,
{
    move |params| Ok(Arc::new(build(params)?) as Arc<dyn Metric>)
}

/// Register every built-in metric. Factories keep a handle on `backends`.
pub fn register_builtin_metrics(
    registry: &mut MetricRegistry,
    backends: &MetricBackends,
) -> Result<(), RegistryError> {
    let backends = Arc::new(backends.clone());

    registry.register_with_descriptor(
        MetricDescriptor::new(BleuMetric::NAME, "Sentence BLEU against the expected answer")
            .requires_reference(),
        factory(BleuMetric::from_params),
    )?;

    registry.register_with_descriptor(
        MetricDescriptor::new(RougeLMetric::NAME, "ROUGE-L F1 against the expected answer")
            .requires_reference(),
        factory(RougeLMetric::from_params),
    )?;

    let b = Arc::clone(&backends);
    registry.register_with_descriptor(
        MetricDescriptor::new(BertScoreMetric::NAME, "Embedding similarity to the expected answer")
            .requires_reference(),
        factory(move |params| BertScoreMetric::from_params(params, &b)),
    )?;

    let b = Arc::clone(&backends);
    registry.register_with_descriptor(
        MetricDescriptor::new(
            FaithfulnessMetric::NAME,
            "Share of answer claims supported by the context",
        )
        .requires_context(),
        factory(move |params| FaithfulnessMetric::from_params(params, &b)),
    )?;

    let b = Arc::clone(&backends);
    registry.register_with_descriptor(
        MetricDescriptor::new(
            ContextRelevancyMetric::NAME,
            "Similarity of retrieved passages to the query",
        )
        .requires_context(),
        factory(move |params| ContextRelevancyMetric::from_params(params, &b)),
    )?;

    let b = Arc::clone(&backends);
    registry.register_with_descriptor(
        MetricDescriptor::new(AnswerRelevancyMetric::NAME, "Similarity of the answer to the query"),
        factory(move |params| AnswerRelevancyMetric::from_params(params, &b)),
    )?;

    registry.register_with_descriptor(
        MetricDescriptor::new(LlmJudgeMetric::NAME, "LLM rating of coherence, relevance and safety")
            .calls_backend(),
        factory(move |params| LlmJudgeMetric::from_params(params, &backends)),
    )?;

    Ok(())
}
