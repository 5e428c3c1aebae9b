// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible chat completion client.
//!
//! Two operations: plain [`complete`](memfuse_core::ProviderAdapter::complete)
//! and schema-guided [`complete_json`](memfuse_core::ProviderAdapter::complete_json).
//! JSON completions inline the schema into a system message, strip markdown
//! fences from the reply, and spend exactly one repair round-trip on a
//! parse failure before surfacing the error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use memfuse_config::model::LlmConfig;
use memfuse_core::error::MemfuseError;
use memfuse_core::traits::adapter::PluginAdapter;
use memfuse_core::traits::ProviderAdapter;
use memfuse_core::types::{
    AdapterType, ChatMessage, HealthStatus, ProviderRequest, ProviderResponse, TokenUsage,
};

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Chat completion client for an OpenAI-compatible endpoint.
#[derive(Debug)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    json_timeout: Duration,
}

impl OpenAiProvider {
    /// Create a client from configuration. The API key falls back to the
    /// `MEMFUSE_LLM_API_KEY` environment variable.
    pub fn new(config: &LlmConfig) -> Result<Self, MemfuseError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("MEMFUSE_LLM_API_KEY").ok())
            .ok_or_else(|| {
                MemfuseError::Config(
                    "LLM API key required: set llm.api_key or MEMFUSE_LLM_API_KEY".to_string(),
                )
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.chat_timeout_secs))
            .build()
            .map_err(|e| MemfuseError::Provider {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            json_timeout: Duration::from_secs(config.json_timeout_secs),
        })
    }

    async fn post_chat(
        &self,
        request: &ProviderRequest,
        json_mode: bool,
    ) -> Result<ProviderResponse, MemfuseError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let mut http_request = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body);
        if json_mode {
            // Structured completions get the longer deadline.
            http_request = http_request.timeout(self.json_timeout);
        }

        let response = http_request.send().await.map_err(|e| MemfuseError::Provider {
            message: format!("chat completion request failed: {e}"),
            source: Some(Box::new(e)),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // 4xx responses are caller errors and must not be retried.
            if status.is_client_error() {
                return Err(MemfuseError::Validation(format!(
                    "chat completion rejected ({status}): {text}"
                )));
            }
            return Err(MemfuseError::Provider {
                message: format!("chat completion API returned {status}: {text}"),
                source: None,
            });
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| MemfuseError::Provider {
                message: "chat completion response was not valid JSON".to_string(),
                source: Some(Box::new(e)),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MemfuseError::Provider {
                message: "chat completion returned no choices".to_string(),
                source: None,
            })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ProviderResponse { content, usage })
    }
}

/// Extract the first JSON value (object or array) from possibly-fenced text.
///
/// Handles markdown code blocks and surrounding prose; returns an error
/// when nothing parseable remains.
pub fn parse_json_response(text: &str) -> Result<serde_json::Value, MemfuseError> {
    let trimmed = text.trim();
    let start = trimmed
        .find(['{', '['])
        .ok_or_else(|| MemfuseError::Validation("no JSON found in response".to_string()))?;
    let end = trimmed
        .rfind(['}', ']'])
        .map(|i| i + 1)
        .filter(|&end| end > start)
        .ok_or_else(|| MemfuseError::Validation("unterminated JSON in response".to_string()))?;

    serde_json::from_str(&trimmed[start..end])
        .map_err(|e| MemfuseError::Validation(format!("response was not valid JSON: {e}")))
}

#[async_trait]
impl PluginAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-provider"
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
impl ProviderAdapter for OpenAiProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, MemfuseError> {
        self.post_chat(&request, false).await
    }

    async fn complete_json(
        &self,
        request: ProviderRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, MemfuseError> {
        let mut request = request;
        request.messages.insert(
            0,
            ChatMessage::system(format!(
                "Respond with a single JSON object conforming to this schema. \
                 No explanations, no markdown fences.\nSchema:\n{schema}"
            )),
        );

        let response = self.post_chat(&request, true).await?;
        match parse_json_response(&response.content) {
            Ok(value) => Ok(value),
            Err(first_error) => {
                warn!(error = %first_error, "JSON completion failed to parse, attempting repair");
                debug!(raw = %response.content, "unparseable JSON completion");

                // One repair round-trip: show the model its own output and
                // the parse failure, then give up.
                let mut repair = request.clone();
                repair
                    .messages
                    .push(ChatMessage::assistant(response.content.clone()));
                repair.messages.push(ChatMessage::user(format!(
                    "Your previous output was not valid JSON ({first_error}). \
                     Reply again with only the corrected JSON object."
                )));
                let repaired = self.post_chat(&repair, true).await?;
                parse_json_response(&repaired.content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_object() {
        let value = parse_json_response(r#"{"steps": []}"#).unwrap();
        assert!(value["steps"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parse_fenced_object() {
        let text = "```json\n{\"items\": [{\"type\": \"Fact\"}]}\n```";
        let value = parse_json_response(text).unwrap();
        assert_eq!(value["items"][0]["type"], "Fact");
    }

    #[test]
    fn parse_object_with_surrounding_prose() {
        let text = "Here is the plan:\n{\"steps\": [1, 2]}\nDone.";
        let value = parse_json_response(text).unwrap();
        assert_eq!(value["steps"][1], 2);
    }

    #[test]
    fn parse_array_payload() {
        let value = parse_json_response("[1, 2, 3]").unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn parse_failure_is_validation_error() {
        let err = parse_json_response("no json here at all").expect_err("must fail");
        assert!(matches!(err, MemfuseError::Validation(_)));
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        if std::env::var("MEMFUSE_LLM_API_KEY").is_err() {
            let err = OpenAiProvider::new(&config).expect_err("must require a key");
            assert!(matches!(err, MemfuseError::Config(_)));
        }
    }
}
