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

//! Backend catalogue metric factories draw embedders and judges from

use crate::llm_client::{EmbeddingClient, JudgeClient};
use crate::local::HashingEmbedder;
use crate::params::MetricBuildError;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const LOCAL_EMBEDDER: &str = "local";

/// Named embedding and judge clients available to metrics.
///
/// Always contains the offline `local` embedder. Judges are keyed by provider
/// name and resolved by the judge metric at compute time.
#[derive(Clone)]
pub struct MetricBackends {
    embedders: BTreeMap<String, Arc<dyn EmbeddingClient>>,
    default_embedder: String,
    judges: BTreeMap<String, Arc<dyn JudgeClient>>,
}

impl MetricBackends {
    pub fn new() -> Self {
        let mut embedders: BTreeMap<String, Arc<dyn EmbeddingClient>> = BTreeMap::new();
        embedders.insert(LOCAL_EMBEDDER.to_string(), Arc::new(HashingEmbedder::new()));

        Self {
            embedders,
            default_embedder: LOCAL_EMBEDDER.to_string(),
            judges: BTreeMap::new(),
        }
    }

    pub fn with_embedder(
        mut self,
        name: impl Into<String>,
        client: Arc<dyn EmbeddingClient>,
    ) -> Self {
        self.embedders.insert(name.into(), client);
        self
    }

    /// Select the embedder used when a metric names none
    pub fn with_default_embedder(mut self, name: impl Into<String>) -> Self {
        self.default_embedder = name.into();
        self
    }

    /// Register a judge under its own provider name
    pub fn with_judge(self, client: Arc<dyn JudgeClient>) -> Self {
        let provider = client.provider().to_string();
        self.with_judge_named(provider, client)
    }

    pub fn with_judge_named(
        mut self,
        provider: impl Into<String>,
        client: Arc<dyn JudgeClient>,
    ) -> Self {
        self.judges.insert(provider.into(), client);
        self
    }

    pub fn default_embedder(&self) -> &str {
        &self.default_embedder
    }

    /// Resolve an embedder by name, `None` selecting the default
    pub fn embedder(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingClient>, MetricBuildError> {
        let name = name.unwrap_or(&self.default_embedder);
        self.embedders
            .get(name)
            .cloned()
            .ok_or_else(|| MetricBuildError::UnknownBackend {
                kind: "embedding",
                name: name.to_string(),
            })
    }

    pub fn judge(&self, provider: &str) -> Option<Arc<dyn JudgeClient>> {
        self.judges.get(provider).cloned()
    }

    pub fn embedder_names(&self) -> Vec<String> {
        self.embedders.keys().cloned().collect()
    }

    pub fn judge_providers(&self) -> Vec<String> {
        self.judges.keys().cloned().collect()
    }
}

impl Default for MetricBackends {
    fn default() -> Self {
        Self::new()
    }
}
