// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Allow-listed shell subagent.
//!
//! Runs ripgrep (`rg`) and nothing else, read-only, with a match cap.

use async_trait::async_trait;
use tokio::process::Command;

use memfuse_core::traits::Subagent;
use memfuse_core::types::{SubagentContext, SubagentOutput};
use memfuse_core::MemfuseError;

const DEFAULT_MAX_MATCHES: u64 = 200;

/// Runs a limited, read-only ripgrep search on the local filesystem.
pub struct ShellCommandAgent;

impl ShellCommandAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellCommandAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subagent for ShellCommandAgent {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a read-only ripgrep (rg) search over local files"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cmd": { "type": "string", "enum": ["rg"] },
                "pattern": { "type": "string", "description": "Regex to search for" },
                "path": { "type": "string", "description": "Directory or file to search" },
                "max": { "type": "integer", "minimum": 1 }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &SubagentContext,
    ) -> Result<SubagentOutput, MemfuseError> {
        let cmd = params.get("cmd").and_then(|v| v.as_str()).unwrap_or("rg");
        if cmd != "rg" {
            return Err(MemfuseError::Validation(format!(
                "only 'rg' is allowed, got '{cmd}'"
            )));
        }

        let pattern = params
            .get("pattern")
            .or_else(|| params.get("query"))
            .and_then(|v| v.as_str())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| MemfuseError::Validation("shell requires a pattern".to_string()))?;
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let max = params
            .get("max")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_MATCHES);

        let output = Command::new("rg")
            .args(["-n", "--no-heading", "-S", "-m", &max.to_string(), pattern, path])
            .output()
            .await
            .map_err(|e| MemfuseError::Internal(format!("failed to spawn rg: {e}")))?;

        Ok(SubagentOutput {
            output: serde_json::json!({
                "engine": "rg",
                "pattern": pattern,
                "path": path,
                "exit": output.status.code(),
                "output": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }),
            artifacts: None,
        })
    }
}
