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

//! Memoising wrapper around an embedding backend

use crate::llm_client::{EmbedError, EmbeddingClient};
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CAPACITY: u64 = 10_000;

/// Caches embeddings by exact text.
///
/// Concurrent lookups of the same uncached text share one backend call.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    cache: Cache<String, Arc<Vec<f64>>>,
    requests: AtomicU64,
    misses: Arc<AtomicU64>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EmbeddingClient>, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(Duration::from_secs(3600))
            .build();

        Self {
            inner,
            cache,
            requests: AtomicU64::new(0),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hits = requests.saturating_sub(misses);

        CacheStats {
            hits,
            misses,
            hit_rate: if requests > 0 {
                hits as f64 / requests as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let misses = Arc::clone(&self.misses);
        let owned = text.to_string();
        let embedding = self
            .cache
            .try_get_with(text.to_string(), async move {
                misses.fetch_add(1, Ordering::Relaxed);
                inner.embed(&owned).await.map(Arc::new)
            })
            .await
            .map_err(EmbedError::Shared)?;

        Ok(embedding.as_ref().clone())
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}
