// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry decorator for provider adapters.
//!
//! Transient failures (network, 5xx, timeouts) retry with bounded
//! exponential backoff and deterministic jitter; validation failures
//! surface immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use memfuse_core::error::MemfuseError;
use memfuse_core::traits::adapter::PluginAdapter;
use memfuse_core::traits::ProviderAdapter;
use memfuse_core::types::{AdapterType, HealthStatus, ProviderRequest, ProviderResponse};

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Provider decorator that retries transient failures.
pub struct RetryingProvider {
    inner: Arc<dyn ProviderAdapter>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ProviderAdapter>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self
            .config
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let jitter = (base / 10).saturating_mul(u64::from(rand_jitter(attempt))) / 100;
        base.saturating_add(jitter).min(self.config.max_delay_ms)
    }

    async fn run_with_retries<F, Fut, T>(&self, mut call: F) -> Result<T, MemfuseError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, MemfuseError>>,
    {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt == self.config.max_retries || !e.is_transient() {
                        return Err(e);
                    }
                    let delay = self.compute_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay,
                        error = %e,
                        "retrying LLM request"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| MemfuseError::Internal("retry loop exhausted".into())))
    }
}

/// Deterministic jitter in [0, 100) derived from the attempt number.
fn rand_jitter(attempt: u32) -> u32 {
    attempt.wrapping_mul(2654435761) % 100
}

#[async_trait]
impl PluginAdapter for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, MemfuseError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), MemfuseError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl ProviderAdapter for RetryingProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, MemfuseError> {
        self.run_with_retries(|| self.inner.complete(request.clone()))
            .await
    }

    async fn complete_json(
        &self,
        request: ProviderRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, MemfuseError> {
        self.run_with_retries(|| self.inner.complete_json(request.clone(), schema))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfuse_core::types::TokenUsage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with a transient error N times, then succeeds.
    struct FlakyProvider {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl PluginAdapter for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn version(&self) -> semver::Version {
            semver::Version::new(0, 1, 0)
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::Provider
        }
        async fn health_check(&self) -> Result<HealthStatus, MemfuseError> {
            Ok(HealthStatus::Healthy)
        }
        async fn shutdown(&self) -> Result<(), MemfuseError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProviderAdapter for FlakyProvider {
        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, MemfuseError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(MemfuseError::Provider {
                    message: "503 service unavailable".to_string(),
                    source: None,
                });
            }
            Ok(ProviderResponse {
                content: "ok".to_string(),
                usage: TokenUsage::default(),
            })
        }

        async fn complete_json(
            &self,
            _request: ProviderRequest,
            _schema: &serde_json::Value,
        ) -> Result<serde_json::Value, MemfuseError> {
            Err(MemfuseError::Validation("always invalid".to_string()))
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "test-model".to_string(),
            messages: vec![],
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let inner = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(2),
        });
        let provider = RetryingProvider::new(inner, fast_config());
        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces() {
        let inner = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(10),
        });
        let provider = RetryingProvider::new(inner, fast_config());
        let err = provider.complete(request()).await.expect_err("must fail");
        assert!(matches!(err, MemfuseError::Provider { .. }));
    }

    #[tokio::test]
    async fn validation_errors_do_not_retry() {
        let inner = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(0),
        });
        let provider = RetryingProvider::new(inner, fast_config());
        let err = provider
            .complete_json(request(), &serde_json::json!({}))
            .await
            .expect_err("must fail");
        assert!(matches!(err, MemfuseError::Validation(_)));
    }

    #[test]
    fn delay_is_bounded() {
        let provider = RetryingProvider::new(
            Arc::new(FlakyProvider {
                failures: AtomicUsize::new(0),
            }),
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
            },
        );
        assert!(provider.compute_delay(10) <= 2000);
        assert!(provider.compute_delay(1) >= 1000);
    }
}
