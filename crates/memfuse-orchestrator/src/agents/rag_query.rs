// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RAG query subagent: answers a question over indexed knowledge.

use std::sync::Arc;

use async_trait::async_trait;

use memfuse_core::traits::Subagent;
use memfuse_core::types::{SubagentContext, SubagentOutput};
use memfuse_core::MemfuseError;
use memfuse_rag::RagService;

/// Answers questions against the ingested corpus and session memory.
pub struct RagQueryAgent {
    rag: Arc<RagService>,
}

impl RagQueryAgent {
    pub fn new(rag: Arc<RagService>) -> Self {
        Self { rag }
    }
}

#[async_trait]
impl Subagent for RagQueryAgent {
    fn name(&self) -> &str {
        "rag-query"
    }

    fn description(&self) -> &str {
        "Answer a question using indexed documents and session memory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The question to answer" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &SubagentContext,
    ) -> Result<SubagentOutput, MemfuseError> {
        let query = params
            .get("query")
            .or_else(|| params.get("question"))
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| MemfuseError::Validation("rag-query requires a query".to_string()))?;

        let answer = self.rag.answer(&ctx.session_id, query).await?;
        Ok(SubagentOutput {
            output: serde_json::json!({"answer": answer}),
            artifacts: None,
        })
    }
}
