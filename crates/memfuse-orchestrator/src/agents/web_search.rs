// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live web search subagent (DuckDuckGo instant-answer API).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use memfuse_core::traits::Subagent;
use memfuse_core::types::{SubagentContext, SubagentOutput};
use memfuse_core::MemfuseError;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RELATED: usize = 5;

#[derive(Debug, Deserialize)]
struct DuckDuckGoResponse {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "Abstract", default)]
    abstract_fallback: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
}

/// Queries the live web through the DuckDuckGo instant-answer API.
pub struct WebSearchAgent {
    http: reqwest::Client,
    api_url: String,
}

impl WebSearchAgent {
    pub fn new() -> Result<Self, MemfuseError> {
        let http = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| MemfuseError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: "https://api.duckduckgo.com/".to_string(),
        })
    }

    /// Point the agent at a different endpoint (tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait]
impl Subagent for WebSearchAgent {
    fn name(&self) -> &str {
        "web-search"
    }

    fn description(&self) -> &str {
        "Search the live web for a query and return an abstract plus related results"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &SubagentContext,
    ) -> Result<SubagentOutput, MemfuseError> {
        let query = params
            .get("query")
            .or_else(|| params.get("q"))
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| MemfuseError::Validation("web-search requires a query".to_string()))?;

        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
            ])
            .send()
            .await
            .map_err(|e| MemfuseError::Provider {
                message: format!("web search request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MemfuseError::Provider {
                message: format!("web search returned {status}"),
                source: None,
            });
        }

        let parsed: DuckDuckGoResponse =
            response.json().await.map_err(|e| MemfuseError::Provider {
                message: "web search response was not valid JSON".to_string(),
                source: Some(Box::new(e)),
            })?;

        let abstract_text = if parsed.abstract_text.is_empty() {
            parsed.abstract_fallback
        } else {
            parsed.abstract_text
        };
        let related: Vec<String> = parsed
            .related_topics
            .into_iter()
            .map(|t| t.text)
            .filter(|t| !t.is_empty())
            .take(MAX_RELATED)
            .collect();

        Ok(SubagentOutput {
            output: serde_json::json!({
                "engine": "duckduckgo",
                "abstract": abstract_text,
                "related": related,
            }),
            artifacts: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shape_deserializes() {
        let raw = r#"{
            "AbstractText": "Rust is a systems language.",
            "RelatedTopics": [
                {"Text": "Rust (programming language)"},
                {"Text": ""},
                {"Name": "grouped topic without text"}
            ]
        }"#;
        let parsed: DuckDuckGoResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.abstract_text, "Rust is a systems language.");
        assert_eq!(parsed.related_topics.len(), 3);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let agent = WebSearchAgent::new().unwrap();
        let err = agent
            .execute(serde_json::json!({"query": "  "}), &SubagentContext::default())
            .await
            .expect_err("must reject");
        assert!(matches!(err, MemfuseError::Validation(_)));
    }
}
