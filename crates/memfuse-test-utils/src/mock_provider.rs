// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock LLM provider adapter for deterministic testing.
//!
//! `MockProvider` implements `ProviderAdapter` with pre-configured
//! responses, enabling fast, CI-runnable tests without external API calls.
//! Plain and JSON completions draw from separate FIFO queues; call counts
//! are tracked so tests can assert, e.g., that the planner was skipped on
//! a fast-path reuse.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use memfuse_core::error::MemfuseError;
use memfuse_core::traits::adapter::PluginAdapter;
use memfuse_core::traits::ProviderAdapter;
use memfuse_core::types::{
    AdapterType, HealthStatus, ProviderRequest, ProviderResponse, TokenUsage,
};

/// A mock LLM provider that returns pre-configured responses.
///
/// When a queue runs dry, `complete` returns a default text and
/// `complete_json` returns an empty object.
pub struct MockProvider {
    text_responses: Arc<Mutex<VecDeque<String>>>,
    json_responses: Arc<Mutex<VecDeque<serde_json::Value>>>,
    complete_calls: AtomicUsize,
    complete_json_calls: AtomicUsize,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with empty response queues.
    pub fn new() -> Self {
        Self {
            text_responses: Arc::new(Mutex::new(VecDeque::new())),
            json_responses: Arc::new(Mutex::new(VecDeque::new())),
            complete_calls: AtomicUsize::new(0),
            complete_json_calls: AtomicUsize::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock provider pre-loaded with plain-text responses.
    pub fn with_responses(responses: Vec<String>) -> Self {
        let provider = Self::new();
        {
            let queue = provider.text_responses.clone();
            let mut guard = queue.try_lock().expect("fresh mutex");
            guard.extend(responses);
        }
        provider
    }

    /// Queue a plain-text response.
    pub async fn add_response(&self, text: impl Into<String>) {
        self.text_responses.lock().await.push_back(text.into());
    }

    /// Queue a JSON response for `complete_json`.
    pub async fn add_json_response(&self, value: serde_json::Value) {
        self.json_responses.lock().await.push_back(value);
    }

    /// Number of `complete` calls observed.
    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    /// Number of `complete_json` calls observed.
    pub fn complete_json_calls(&self) -> usize {
        self.complete_json_calls.load(Ordering::SeqCst)
    }

    /// All requests seen so far, in order.
    pub async fn recorded_requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
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
impl ProviderAdapter for MockProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, MemfuseError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request);
        let content = self
            .text_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "mock response".to_string());
        Ok(ProviderResponse {
            content,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        })
    }

    async fn complete_json(
        &self,
        request: ProviderRequest,
        _schema: &serde_json::Value,
    ) -> Result<serde_json::Value, MemfuseError> {
        self.complete_json_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request);
        Ok(self
            .json_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| serde_json::json!({})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "test-model".to_string(),
            messages: vec![],
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn default_response_when_queue_empty() {
        let provider = MockProvider::new();
        let resp = provider.complete(request()).await.unwrap();
        assert_eq!(resp.content, "mock response");
    }

    #[tokio::test]
    async fn queued_responses_returned_in_order() {
        let provider =
            MockProvider::with_responses(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(provider.complete(request()).await.unwrap().content, "first");
        assert_eq!(
            provider.complete(request()).await.unwrap().content,
            "second"
        );
        assert_eq!(
            provider.complete(request()).await.unwrap().content,
            "mock response"
        );
        assert_eq!(provider.complete_calls(), 3);
    }

    #[tokio::test]
    async fn json_queue_is_separate() {
        let provider = MockProvider::new();
        provider
            .add_json_response(serde_json::json!({"steps": []}))
            .await;

        let value = provider
            .complete_json(request(), &serde_json::json!({}))
            .await
            .unwrap();
        assert!(value["steps"].as_array().unwrap().is_empty());
        assert_eq!(provider.complete_json_calls(), 1);
        assert_eq!(provider.complete_calls(), 0);

        // Drained queue falls back to an empty object.
        let value = provider
            .complete_json(request(), &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let provider = MockProvider::new();
        provider.complete(request()).await.unwrap();
        let seen = provider.recorded_requests().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "test-model");
    }
}
