// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the MemFuse engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup. The loaded value is immutable and passed
//! explicitly into the router and components; nothing reads it ambiently.

use serde::{Deserialize, Serialize};

/// Top-level MemFuse configuration.
///
/// Loaded from TOML files with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemfuseConfig {
    /// Service identity and logging settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding service settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Context composition budgets.
    #[serde(default)]
    pub context: ContextConfig,

    /// Hybrid retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// M2 extractor settings.
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// M3 procedural memory settings.
    #[serde(default)]
    pub procedural: ProceduralConfig,

    /// Request routing settings.
    #[serde(default)]
    pub router: RouterConfig,
}

impl MemfuseConfig {
    /// Cross-field sanity checks not expressible as serde defaults.
    ///
    /// Returns a human-readable description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dim != 1024 {
            return Err(format!(
                "embedding.dim is fixed at 1024 for this deployment, got {}",
                self.embedding.dim
            ));
        }
        if self.context.user_input_max_tokens == 0 || self.context.total_context_max_tokens == 0 {
            return Err("context token budgets must be positive".to_string());
        }
        if self.context.user_input_max_tokens > self.context.total_context_max_tokens {
            return Err(format!(
                "context.user_input_max_tokens ({}) exceeds context.total_context_max_tokens ({})",
                self.context.user_input_max_tokens, self.context.total_context_max_tokens
            ));
        }
        if !(0.0..=1.0).contains(&self.extractor.dedup_sim_threshold)
            || !(0.0..=1.0).contains(&self.extractor.contradiction_sim_threshold)
        {
            return Err("extractor similarity thresholds must lie in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.procedural.reuse_threshold) {
            return Err("procedural.reuse_threshold must lie in [0, 1]".to_string());
        }
        Ok(())
    }
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the service.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "memfuse".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    "memfuse.db".to_string()
}

/// Embedding service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Embeddings endpoint URL.
    #[serde(default = "default_embedding_url")]
    pub api_url: String,

    /// API key. `None` requires the MEMFUSE_EMBEDDING_API_KEY env var.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Embedding model identifier.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding width. Fixed at 1024.
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,

    /// Per-request deadline in seconds.
    #[serde(default = "default_embed_timeout")]
    pub request_timeout_secs: u64,

    /// In-process LRU cache capacity (entries, keyed by content hash).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: default_embedding_url(),
            api_key: None,
            model: default_embedding_model(),
            dim: default_embedding_dim(),
            request_timeout_secs: default_embed_timeout(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_embedding_url() -> String {
    "https://api.jina.ai/v1/embeddings".to_string()
}

fn default_embedding_model() -> String {
    "jina-embeddings-v3".to_string()
}

fn default_embedding_dim() -> usize {
    1024
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    4096
}

/// LLM provider configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Chat completions endpoint URL.
    #[serde(default = "default_llm_url")]
    pub api_url: String,

    /// API key. `None` requires the MEMFUSE_LLM_API_KEY env var.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Output token cap for completions.
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for plain chat completions, in seconds.
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,

    /// Deadline for structured-JSON completions, in seconds.
    #[serde(default = "default_json_timeout")]
    pub json_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_url(),
            api_key: None,
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            chat_timeout_secs: default_chat_timeout(),
            json_timeout_secs: default_json_timeout(),
        }
    }
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.2
}

fn default_chat_timeout() -> u64 {
    60
}

fn default_json_timeout() -> u64 {
    120
}

/// Token budgets for context composition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Oversize user queries are truncated to this many tokens.
    #[serde(default = "default_user_input_max_tokens")]
    pub user_input_max_tokens: usize,

    /// Token budget for included prior turns.
    #[serde(default = "default_history_max_tokens")]
    pub history_max_tokens: usize,

    /// Hard cap on the final prompt.
    #[serde(default = "default_total_context_max_tokens")]
    pub total_context_max_tokens: usize,

    /// DB-side ceiling on prefetched history rounds.
    #[serde(default = "default_history_fetch_rounds")]
    pub history_fetch_rounds: i64,

    /// System prompt prepended to every chat completion.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            user_input_max_tokens: default_user_input_max_tokens(),
            history_max_tokens: default_history_max_tokens(),
            total_context_max_tokens: default_total_context_max_tokens(),
            history_fetch_rounds: default_history_fetch_rounds(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_user_input_max_tokens() -> usize {
    32_000
}

fn default_history_max_tokens() -> usize {
    16_000
}

fn default_total_context_max_tokens() -> usize {
    64_000
}

fn default_history_fetch_rounds() -> i64 {
    50
}

fn default_system_prompt() -> String {
    "You are MemFuse, a helpful assistant. Use provided context.".to_string()
}

/// Hybrid retrieval configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Per-stream chunk recall cap.
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,

    /// Per-stream fact recall cap.
    #[serde(default = "default_structured_top_k")]
    pub structured_top_k: usize,

    /// Prefer the session-scoped chunk index when one exists.
    #[serde(default = "default_true")]
    pub prefer_session: bool,

    /// Enable M2 facts in the read path.
    #[serde(default = "default_true")]
    pub structured_enabled: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rag_top_k: default_rag_top_k(),
            structured_top_k: default_structured_top_k(),
            prefer_session: true,
            structured_enabled: true,
        }
    }
}

fn default_rag_top_k() -> usize {
    5
}

fn default_structured_top_k() -> usize {
    5
}

/// M2 extractor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractorConfig {
    /// Enable the background extraction workers.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// A round whose combined token count exceeds this is enqueued immediately.
    #[serde(default = "default_trigger_tokens_single")]
    pub trigger_tokens_single: usize,

    /// Smaller rounds accumulate until pending tokens exceed this.
    #[serde(default = "default_trigger_tokens_batch")]
    pub trigger_tokens_batch: usize,

    /// Cosine similarity at or above which a same-type fact is a duplicate.
    #[serde(default = "default_dedup_sim_threshold")]
    pub dedup_sim_threshold: f32,

    /// Cosine similarity at or above which a model-flagged contradiction is linked.
    #[serde(default = "default_contradiction_sim_threshold")]
    pub contradiction_sim_threshold: f32,

    /// Maximum extraction attempts per queue entry before giving up.
    #[serde(default = "default_extractor_max_attempts")]
    pub max_attempts: i32,

    /// How many session facts to recall as extraction context.
    #[serde(default = "default_context_facts")]
    pub context_facts: usize,

    /// Number of background worker loops.
    #[serde(default = "default_extractor_workers")]
    pub workers: usize,

    /// Queue poll interval when idle, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_tokens_single: default_trigger_tokens_single(),
            trigger_tokens_batch: default_trigger_tokens_batch(),
            dedup_sim_threshold: default_dedup_sim_threshold(),
            contradiction_sim_threshold: default_contradiction_sim_threshold(),
            max_attempts: default_extractor_max_attempts(),
            context_facts: default_context_facts(),
            workers: default_extractor_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_trigger_tokens_single() -> usize {
    512
}

fn default_trigger_tokens_batch() -> usize {
    2048
}

fn default_dedup_sim_threshold() -> f32 {
    0.95
}

fn default_contradiction_sim_threshold() -> f32 {
    0.88
}

fn default_extractor_max_attempts() -> i32 {
    3
}

fn default_context_facts() -> usize {
    10
}

fn default_extractor_workers() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// M3 procedural memory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProceduralConfig {
    /// Enable workflow reuse and distillation.
    #[serde(default = "default_true")]
    pub m3_enabled: bool,

    /// Workflow recall cap.
    #[serde(default = "default_procedural_top_k")]
    pub top_k: usize,

    /// Minimum trigger similarity for fast-path reuse.
    #[serde(default = "default_reuse_threshold")]
    pub reuse_threshold: f32,

    /// Per-step retries with parameter repair.
    #[serde(default = "default_step_retries")]
    pub step_retries: u32,

    /// Trigger similarity at or above which two workflows are one cluster.
    #[serde(default = "default_distill_dedup_threshold")]
    pub distill_dedup_threshold: f32,

    /// Deadline for a full task execution, in seconds.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for ProceduralConfig {
    fn default() -> Self {
        Self {
            m3_enabled: true,
            top_k: default_procedural_top_k(),
            reuse_threshold: default_reuse_threshold(),
            step_retries: default_step_retries(),
            distill_dedup_threshold: default_distill_dedup_threshold(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

fn default_procedural_top_k() -> usize {
    5
}

fn default_reuse_threshold() -> f32 {
    0.9
}

fn default_step_retries() -> u32 {
    2
}

fn default_distill_dedup_threshold() -> f32 {
    0.97
}

fn default_task_timeout() -> u64 {
    600
}

/// Request routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Route untagged multi-step goals to the task path via the heuristic
    /// classifier. Off by default; explicit `tag=m3` always routes.
    #[serde(default)]
    pub classifier_enabled: bool,

    /// Score multiplier applied to workflow results under `tag=m3` queries.
    #[serde(default = "default_workflow_bias")]
    pub workflow_bias: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier_enabled: false,
            workflow_bias: default_workflow_bias(),
        }
    }
}

fn default_workflow_bias() -> f32 {
    1.25
}

fn default_true() -> bool {
    true
}
