// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait for LLM chat completion integrations.

use async_trait::async_trait;

use crate::error::MemfuseError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ProviderRequest, ProviderResponse};

/// Adapter for LLM provider integrations.
///
/// Provider adapters handle communication with language model APIs,
/// supporting plain-text completion and schema-guided JSON completion.
#[async_trait]
pub trait ProviderAdapter: PluginAdapter {
    /// Sends a completion request and returns the full response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, MemfuseError>;

    /// Sends a completion request expecting a JSON object conforming to
    /// `schema` (a JSON Schema value inlined into the prompt).
    ///
    /// Implementations attempt exactly one repair round-trip when the
    /// response fails to parse, then surface the failure.
    async fn complete_json(
        &self,
        request: ProviderRequest,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, MemfuseError>;
}
