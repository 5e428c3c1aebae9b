// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./memfuse.toml` > `~/.config/memfuse/memfuse.toml`
//! > `/etc/memfuse/memfuse.toml` with environment variable overrides via the
//! `MEMFUSE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::MemfuseConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/memfuse/memfuse.toml` (system-wide)
/// 3. `~/.config/memfuse/memfuse.toml` (user XDG config)
/// 4. `./memfuse.toml` (local directory)
/// 5. `MEMFUSE_*` environment variables
pub fn load_config() -> Result<MemfuseConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MemfuseConfig::default()))
        .merge(Toml::file("/etc/memfuse/memfuse.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("memfuse/memfuse.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("memfuse.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from an inline TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<MemfuseConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MemfuseConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<MemfuseConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MemfuseConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `MEMFUSE_CONTEXT_HISTORY_MAX_TOKENS`
/// must map to `context.history_max_tokens`, not `context.history.max.tokens`.
fn env_provider() -> Env {
    Env::prefixed("MEMFUSE_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("agent_", "agent.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("embedding_", "embedding.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("context_", "context.", 1)
            .replacen("retrieval_", "retrieval.", 1)
            .replacen("extractor_", "extractor.", 1)
            .replacen("procedural_", "procedural.", 1)
            .replacen("router_", "router.", 1);
        mapped.into()
    })
}
