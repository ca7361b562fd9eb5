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

//! Offline embedding backend.
//!
//! Texts are embedded as feature-hashed bags of words: every lowercase
//! alphanumeric token is hashed with xxHash64 into one of `dimensions`
//! buckets with a hash-derived sign, and the vector is L2-normalised.
//! Texts sharing vocabulary land close together, which is enough for the
//! similarity metrics to run without network access or model weights.

use crate::llm_client::{EmbedError, EmbeddingClient};
use async_trait::async_trait;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Standard size for small sentence-embedding models
pub const DEFAULT_DIMENSIONS: usize = 384;

const SEED: u64 = 0x6c6c_6d65_7661_6c00;

/// Deterministic feature-hashing embedder registered as `local`
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous embedding, zero vector for text without tokens
    pub fn embed_text(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dimensions];

        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(SEED);
            hasher.write(token.as_bytes());
            let hash = hasher.finish();

            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        Ok(self.embed_text(text))
    }
}
