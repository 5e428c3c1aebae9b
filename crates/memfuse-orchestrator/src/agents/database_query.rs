// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only SQL subagent.
//!
//! Translates a natural-language request into SQL with a structured
//! completion, refuses anything but a single SELECT, and executes against
//! the local store with a row cap.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use memfuse_config::model::LlmConfig;
use memfuse_core::traits::{ProviderAdapter, Subagent};
use memfuse_core::types::{ChatMessage, ProviderRequest, SubagentContext, SubagentOutput};
use memfuse_core::MemfuseError;
use memfuse_storage::Database;

/// Maximum rows returned from a query.
const MAX_ROWS: usize = 100;

/// NL-to-SQL agent over the MemFuse store, SELECT-only.
pub struct DatabaseQueryAgent {
    db: Arc<Database>,
    provider: Arc<dyn ProviderAdapter>,
    llm: LlmConfig,
}

impl DatabaseQueryAgent {
    pub fn new(db: Arc<Database>, provider: Arc<dyn ProviderAdapter>, llm: LlmConfig) -> Self {
        Self { db, provider, llm }
    }

    async fn nl_to_sql(&self, request: &str, schema_hint: &str) -> Result<String, MemfuseError> {
        let system = format!(
            "You translate natural language to SQLite SQL.\n\
             Constraints: a single SELECT statement, safe, no writes. \
             Tables: sessions, conversation_turns, document_chunks, structured_memory, \
             procedural_memory, procedural_lessons.\n\
             Schema hint: {schema_hint}"
        );
        let value = self
            .provider
            .complete_json(
                ProviderRequest {
                    model: self.llm.model.clone(),
                    messages: vec![
                        ChatMessage::system(system),
                        ChatMessage::user(format!("NL: {request}")),
                    ],
                    max_tokens: self.llm.max_tokens,
                    temperature: 0.0,
                },
                &serde_json::json!({
                    "type": "object",
                    "properties": { "sql": { "type": "string" } },
                    "required": ["sql"]
                }),
            )
            .await?;
        Ok(value
            .get("sql")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// A statement is acceptable iff it is a single SELECT.
fn is_select_only(sql: &str) -> bool {
    let trimmed = sql.trim().trim_end_matches(';');
    if trimmed.contains(';') {
        return false;
    }
    trimmed.to_lowercase().starts_with("select")
}

#[async_trait]
impl Subagent for DatabaseQueryAgent {
    fn name(&self) -> &str {
        "db-query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query over the memory store from a natural-language request"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "request": { "type": "string", "description": "Natural-language query" },
                "schema_hint": { "type": "string" }
            },
            "required": ["request"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &SubagentContext,
    ) -> Result<SubagentOutput, MemfuseError> {
        let request = params
            .get("request")
            .or_else(|| params.get("query"))
            .and_then(|v| v.as_str())
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| MemfuseError::Validation("db-query requires a request".to_string()))?;
        let schema_hint = params
            .get("schema_hint")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let sql = self.nl_to_sql(request, schema_hint).await?;
        if !is_select_only(&sql) {
            return Err(MemfuseError::Validation(format!(
                "generated SQL is not a single SELECT: {sql}"
            )));
        }
        debug!(sql = %sql, "executing read-only query");

        let sql_owned = sql.clone();
        let (columns, rows) = self
            .db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql_owned)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let column_count = columns.len();

                let mut rows_out: Vec<Vec<serde_json::Value>> = Vec::new();
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    if rows_out.len() >= MAX_ROWS {
                        break;
                    }
                    let mut values = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        let value = match row.get_ref(i)? {
                            rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                            rusqlite::types::ValueRef::Integer(n) => serde_json::json!(n),
                            rusqlite::types::ValueRef::Real(f) => serde_json::json!(f),
                            rusqlite::types::ValueRef::Text(t) => {
                                serde_json::json!(String::from_utf8_lossy(t))
                            }
                            rusqlite::types::ValueRef::Blob(b) => {
                                serde_json::json!(format!("<blob {} bytes>", b.len()))
                            }
                        };
                        values.push(value);
                    }
                    rows_out.push(values);
                }
                Ok((columns, rows_out))
            })
            .await
            .map_err(|e| MemfuseError::Storage {
                source: Box::new(e),
            })?;

        Ok(SubagentOutput {
            output: serde_json::json!({
                "sql": sql,
                "columns": columns,
                "rows": rows,
            }),
            artifacts: None,
        })
    }
}
