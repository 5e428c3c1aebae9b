// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Uniform invocation contract for tool-like subagents.
//!
//! Subagents are stateless across invocations; anything they need to
//! persist goes through the store. The orchestrator validates plan
//! parameters against [`Subagent::parameters_schema`] and feeds the same
//! schema to the repair prompt on step failure.

use async_trait::async_trait;

use crate::error::MemfuseError;
use crate::types::{SubagentContext, SubagentOutput};

/// A single tool-like agent the orchestrator can invoke as a plan step.
#[async_trait]
pub trait Subagent: Send + Sync {
    /// Returns the agent's unique registry name.
    fn name(&self) -> &str;

    /// Returns a human-readable description used by the planner prompt.
    fn description(&self) -> &str;

    /// Returns the JSON Schema describing the agent's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Executes the agent with validated parameters and the shared context.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &SubagentContext,
    ) -> Result<SubagentOutput, MemfuseError>;
}
