// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP embedding adapter for Jina-style `/v1/embeddings` endpoints.
//!
//! Returns 1024-dim L2-normalized vectors. Transient failures are retried
//! with bounded exponential backoff; a wrong-width response is an error,
//! never a silent degradation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use memfuse_config::model::EmbeddingConfig;
use memfuse_core::error::MemfuseError;
use memfuse_core::traits::adapter::PluginAdapter;
use memfuse_core::traits::EmbeddingAdapter;
use memfuse_core::types::{
    l2_normalize, AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus,
};

const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

/// HTTP embedding client for an external text-to-vector service.
#[derive(Debug)]
pub struct HttpEmbedder {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    /// Create a client from configuration. The API key falls back to the
    /// `MEMFUSE_EMBEDDING_API_KEY` environment variable.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, MemfuseError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("MEMFUSE_EMBEDDING_API_KEY").ok())
            .ok_or_else(|| {
                MemfuseError::Config(
                    "embedding API key required: set embedding.api_key or MEMFUSE_EMBEDDING_API_KEY"
                        .to_string(),
                )
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MemfuseError::Embedding {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            dim: config.dim,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemfuseError> {
        let body = serde_json::json!({
            "model": self.model,
            "task": "text-matching",
            "input": texts,
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MemfuseError::Embedding {
                message: format!("embedding request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MemfuseError::Embedding {
                message: format!("embedding API returned {status}: {text}"),
                source: None,
            });
        }

        let parsed: EmbeddingsResponse =
            response.json().await.map_err(|e| MemfuseError::Embedding {
                message: "embedding response was not valid JSON".to_string(),
                source: Some(Box::new(e)),
            })?;

        if parsed.data.len() != texts.len() {
            return Err(MemfuseError::Embedding {
                message: format!(
                    "embedding count mismatch: sent {}, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
                source: None,
            });
        }

        let mut embeddings = Vec::with_capacity(parsed.data.len());
        for datum in parsed.data {
            if datum.embedding.len() != self.dim {
                return Err(MemfuseError::Embedding {
                    message: format!(
                        "embedding width mismatch: expected {}, got {}",
                        self.dim,
                        datum.embedding.len()
                    ),
                    source: None,
                });
            }
            embeddings.push(l2_normalize(&datum.embedding));
        }
        Ok(embeddings)
    }
}

/// Compute the backoff delay for a retry attempt.
fn compute_delay(attempt: u32) -> u64 {
    let base = INITIAL_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt));
    let jitter = (base / 10).saturating_mul(u64::from(rand_jitter(attempt))) / 100;
    base.saturating_add(jitter).min(MAX_DELAY_MS)
}

/// Deterministic jitter in [0, 100) derived from the attempt number.
fn rand_jitter(attempt: u32) -> u32 {
    attempt.wrapping_mul(2654435761) % 100
}

#[async_trait]
impl PluginAdapter for HttpEmbedder {
    fn name(&self) -> &str {
        "http-embedder"
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
impl EmbeddingAdapter for HttpEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemfuseError> {
        if input.texts.is_empty() {
            return Ok(EmbeddingOutput {
                embeddings: vec![],
                dimensions: self.dim,
            });
        }

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            match self.request_embeddings(&input.texts).await {
                Ok(embeddings) => {
                    return Ok(EmbeddingOutput {
                        embeddings,
                        dimensions: self.dim,
                    })
                }
                Err(e) => {
                    if attempt == MAX_RETRIES || !e.is_transient() {
                        return Err(e);
                    }
                    let delay = compute_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "retrying embedding request"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| MemfuseError::Internal("retry loop exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_delay_grows_and_caps() {
        assert!(compute_delay(0) >= INITIAL_DELAY_MS);
        assert!(compute_delay(1) > compute_delay(0));
        assert!(compute_delay(10) <= MAX_DELAY_MS);
    }

    #[test]
    fn jitter_is_deterministic() {
        assert_eq!(rand_jitter(2), rand_jitter(2));
        assert!(rand_jitter(5) < 100);
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = EmbeddingConfig {
            api_key: None,
            ..EmbeddingConfig::default()
        };
        // Only meaningful when the env var is not set in the test environment.
        if std::env::var("MEMFUSE_EMBEDDING_API_KEY").is_err() {
            let err = HttpEmbedder::new(&config).expect_err("must require a key");
            assert!(matches!(err, MemfuseError::Config(_)));
        }
    }
}
