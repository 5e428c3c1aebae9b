// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report generation subagent.
//!
//! Summarizes prior step outputs into a concise brief. When the provider
//! is unavailable the agent degrades to a local key/value rendering so a
//! task can still finish with something readable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use memfuse_config::model::LlmConfig;
use memfuse_core::traits::{ProviderAdapter, Subagent};
use memfuse_core::types::{ChatMessage, ProviderRequest, SubagentContext, SubagentOutput};
use memfuse_core::MemfuseError;

const REPORT_SYSTEM_PROMPT: &str =
    "You are a precise report writer. Summarize the inputs into a concise, well-formatted brief.";

/// Renders prior outputs into a final report.
pub struct ReportGenerationAgent {
    provider: Arc<dyn ProviderAdapter>,
    llm: LlmConfig,
}

impl ReportGenerationAgent {
    pub fn new(provider: Arc<dyn ProviderAdapter>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }
}

/// Local fallback rendering when the provider call fails.
fn offline_report(points: &serde_json::Value) -> String {
    let mut lines = vec!["Report (offline fallback):".to_string()];
    match points {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                let rendered = value.to_string();
                let clipped: String = rendered.chars().take(200).collect();
                lines.push(format!("- {key}: {clipped}"));
            }
        }
        other => {
            let rendered = other.to_string();
            let clipped: String = rendered.chars().take(400).collect();
            lines.push(format!("- content: {clipped}"));
        }
    }
    lines.join("\n")
}

#[async_trait]
impl Subagent for ReportGenerationAgent {
    fn name(&self) -> &str {
        "report"
    }

    fn description(&self) -> &str {
        "Summarize collected step outputs into a final report"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "points": {
                    "description": "Data to summarize; defaults to all prior step outputs"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &SubagentContext,
    ) -> Result<SubagentOutput, MemfuseError> {
        // Explicit points win; otherwise summarize everything gathered so far.
        let points = params
            .get("points")
            .or_else(|| params.get("data"))
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(ctx.prior_outputs.clone()));
        let text = serde_json::to_string_pretty(&points)
            .unwrap_or_else(|_| points.to_string());

        let request = ProviderRequest {
            model: self.llm.model.clone(),
            messages: vec![
                ChatMessage::system(REPORT_SYSTEM_PROMPT),
                ChatMessage::user(text),
            ],
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
        };

        match self.provider.complete(request).await {
            Ok(response) => Ok(SubagentOutput {
                output: serde_json::json!({"report": response.content}),
                artifacts: None,
            }),
            Err(e) => {
                warn!(error = %e, "report completion failed, using offline fallback");
                Ok(SubagentOutput {
                    output: serde_json::json!({
                        "report": offline_report(&points),
                        "note": e.to_string(),
                    }),
                    artifacts: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_report_renders_objects() {
        let points = serde_json::json!({
            "step_1_web-search": {"abstract": "findings"},
            "step_2_rag-query": {"answer": "details"},
        });
        let report = offline_report(&points);
        assert!(report.starts_with("Report (offline fallback):"));
        assert!(report.contains("step_1_web-search"));
        assert!(report.contains("step_2_rag-query"));
    }

    #[test]
    fn offline_report_clips_long_values() {
        let long = "x".repeat(1000);
        let points = serde_json::json!({"key": long});
        let report = offline_report(&points);
        let line = report.lines().nth(1).unwrap();
        assert!(line.len() < 250);
    }
}
