// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic mock embedding adapter.
//!
//! Embeds text as an L2-normalized bag-of-words vector: each lowercased
//! word is hashed into one of the vector's dimensions. Identical texts get
//! identical vectors (cosine 1.0) and texts sharing words score higher
//! than unrelated ones, which is enough signal for recall, dedup, and
//! contradiction tests without any network or model files.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use memfuse_core::error::MemfuseError;
use memfuse_core::traits::adapter::PluginAdapter;
use memfuse_core::traits::EmbeddingAdapter;
use memfuse_core::types::{
    l2_normalize, AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus,
};

/// Default width of mock embeddings; matches the production fixed width.
pub const MOCK_DIM: usize = 1024;

/// Deterministic bag-of-words embedder for tests.
pub struct MockEmbedder {
    dim: usize,
    /// Exact-text overrides for scripting specific similarities.
    overrides: Mutex<HashMap<String, Vec<f32>>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dim(MOCK_DIM)
    }

    pub fn with_dim(dim: usize) -> Self {
        Self {
            dim,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    /// Pin the embedding of an exact text, normalized on insert.
    pub fn set_override(&self, text: &str, embedding: Vec<f32>) {
        self.overrides
            .lock()
            .expect("override lock poisoned")
            .insert(text.to_string(), l2_normalize(&embedding));
    }

    /// The deterministic embedding this mock produces for `text`.
    pub fn embedding_for(&self, text: &str) -> Vec<f32> {
        if let Some(pinned) = self
            .overrides
            .lock()
            .expect("override lock poisoned")
            .get(text)
        {
            return pinned.clone();
        }
        bag_of_words(text, self.dim)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash each word into a dimension and L2-normalize the histogram.
fn bag_of_words(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let digest = Sha256::digest(word.as_bytes());
        let index = u64::from_le_bytes(digest[..8].try_into().expect("8 bytes")) as usize % dim;
        vector[index] += 1.0;
    }
    l2_normalize(&vector)
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, MemfuseError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), MemfuseError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemfuseError> {
        let embeddings: Vec<Vec<f32>> = input
            .texts
            .iter()
            .map(|text| self.embedding_for(text))
            .collect();
        Ok(EmbeddingOutput {
            embeddings,
            dimensions: self.dim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfuse_core::types::cosine_similarity;

    #[tokio::test]
    async fn identical_texts_are_identical_vectors() {
        let embedder = MockEmbedder::with_dim(64);
        let a = embedder.embedding_for("We decided to ship on Monday.");
        let b = embedder.embedding_for("We decided to ship on Monday.");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_unrelated() {
        let embedder = MockEmbedder::with_dim(256);
        let seed = embedder.embedding_for("Plan B was rejected because of cost overruns");
        let related = embedder.embedding_for("Why was Plan B rejected?");
        let unrelated = embedder.embedding_for("quantum entanglement bananas");

        assert!(
            cosine_similarity(&seed, &related) > cosine_similarity(&seed, &unrelated),
            "word overlap must dominate"
        );
    }

    #[tokio::test]
    async fn overrides_pin_exact_texts() {
        let embedder = MockEmbedder::with_dim(4);
        embedder.set_override("pinned", vec![1.0, 0.0, 0.0, 0.0]);
        let v = embedder.embedding_for("pinned");
        assert!((v[0] - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn adapter_contract_batches() {
        let embedder = MockEmbedder::with_dim(16);
        let out = embedder
            .embed(EmbeddingInput {
                texts: vec!["a".to_string(), "b".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(out.embeddings.len(), 2);
        assert_eq!(out.dimensions, 16);
    }
}
