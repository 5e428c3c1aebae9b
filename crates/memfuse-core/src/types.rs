// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common domain types shared across the MemFuse workspace.
//!
//! The layered memory model lives here: [`Turn`] (M1 episodic),
//! [`Chunk`] (M1 document), [`Fact`] (M2 semantic), [`Workflow`] and
//! [`Lesson`] (M3 procedural), plus the adapter request/response types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Fixed width of all embedding vectors in the system.
pub const EMBEDDING_DIM: usize = 1024;

/// Identifies the type of adapter in the plugin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum AdapterType {
    Provider,
    Embedding,
    Storage,
    Subagent,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

// --- M1: episodic turns ---

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "user" => Speaker::User,
            _ => Speaker::Assistant,
        }
    }
}

/// A single conversation turn within a session (M1 episodic memory).
///
/// One round bundles a user turn and its assistant reply under the same
/// `round_id`; round ids are dense per session, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Session this turn belongs to (resolved uuid).
    pub session_id: String,
    /// Per-session dense round counter.
    pub round_id: i64,
    /// Who spoke.
    pub speaker: Speaker,
    /// Turn text.
    pub content: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

// --- M1: document chunks ---

/// A chunk of an ingested document (M1 document memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier.
    pub chunk_id: String,
    /// Logical source (`seed`, `session:<uuid>`, a file name, ...).
    pub document_source: String,
    /// Chunk text.
    pub content: String,
    /// SHA-256 hex digest of the content; idempotency key together with the source.
    pub content_hash: String,
    /// Embedding vector for semantic search.
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

// --- M2: structured facts ---

/// Category of a structured fact mined from conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactType {
    Fact,
    Decision,
    Assumption,
    UserPreference,
}

impl FactType {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Fact => "Fact",
            FactType::Decision => "Decision",
            FactType::Assumption => "Assumption",
            FactType::UserPreference => "UserPreference",
        }
    }

    /// Parse from storage or extractor output. Unrecognized values fall
    /// back to `Fact` (the extractor prompt also emits `User_Preference`).
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "Decision" => FactType::Decision,
            "Assumption" => FactType::Assumption,
            "UserPreference" | "User_Preference" => FactType::UserPreference,
            _ => FactType::Fact,
        }
    }
}

/// Typed relations between facts.
///
/// `based_on` edges form DAGs; `contradicts` edges may form cycles, so
/// traversals must carry a visited set. Retrieval never resolves
/// relations transitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactRelations {
    /// Facts this one is derived from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<String>,
    /// A fact this one contradicts; the older fact is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradicts: Option<String>,
    /// Facts this one supports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supports: Vec<String>,
}

impl FactRelations {
    /// True when no relation edges are present.
    pub fn is_empty(&self) -> bool {
        self.based_on.is_empty() && self.contradicts.is_none() && self.supports.is_empty()
    }
}

/// A structured fact mined from a conversation round (M2 semantic memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Unique fact identifier.
    pub fact_id: String,
    /// Session the fact was mined from.
    pub session_id: String,
    /// Round that produced this fact (last round of a batch).
    pub source_round_id: i64,
    /// Fact category.
    pub fact_type: FactType,
    /// Self-contained fact statement.
    pub content: String,
    /// Typed relation edges to other facts.
    #[serde(default)]
    pub relations: FactRelations,
    /// Free-form metadata; `confidence` in [0, 1] is recognized.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Embedding of `content`.
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

impl Fact {
    /// Extraction confidence, defaulting to 0.5 when absent or malformed.
    pub fn confidence(&self) -> f64 {
        self.metadata
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0)
    }
}

// --- M3: procedural workflows ---

/// One step of a stored workflow plan.
///
/// `params` is a template: values may contain `{{goal}}` or
/// `{{step_N.output}}` placeholders resolved at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Registered subagent name.
    pub agent: String,
    /// Parameter template for the subagent.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An ordered plan distilled from a successful task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    /// The goal text the plan was distilled from.
    pub goal: String,
    /// Ordered subagent invocations.
    pub steps: Vec<WorkflowStep>,
}

/// A reusable workflow keyed by its trigger embedding (M3 procedural memory).
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Unique workflow identifier.
    pub workflow_id: String,
    /// Embedding of the original goal text.
    pub trigger_embedding: Vec<f32>,
    /// Optional substring pattern that must also match for fast-path reuse.
    pub trigger_pattern: Option<String>,
    /// The distilled plan template.
    pub plan: WorkflowPlan,
    /// How many times the workflow has been reused.
    pub usage_count: i64,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-reuse timestamp; bumped on every fast-path hit.
    pub updated_at: String,
}

/// Outcome of a recorded step-level lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LessonStatus {
    Success,
    Fail,
}

impl LessonStatus {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Success => "success",
            LessonStatus::Fail => "fail",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "success" => LessonStatus::Success,
            _ => LessonStatus::Fail,
        }
    }
}

/// A step-level execution lesson attached to M3; biases future planning.
#[derive(Debug, Clone)]
pub struct Lesson {
    /// Unique lesson identifier.
    pub lesson_id: String,
    /// Embedding of the goal that produced the lesson.
    pub trigger_embedding: Vec<f32>,
    /// Goal text.
    pub goal_text: String,
    /// Subagent the lesson is about.
    pub agent: String,
    /// Whether the step ultimately succeeded.
    pub status: LessonStatus,
    /// Error message, for failed or repaired steps.
    pub error: Option<String>,
    /// Short description of the repair that worked (or was attempted).
    pub fix_summary: Option<String>,
    /// Parameters that worked after repair.
    pub working_params: Option<serde_json::Value>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

// --- Recall ---

/// Which memory stream a recalled item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecallKind {
    Chunk,
    Fact,
    Workflow,
    Lesson,
}

impl RecallKind {
    /// Convert to a stable string for API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecallKind::Chunk => "chunk",
            RecallKind::Fact => "fact",
            RecallKind::Workflow => "workflow",
            RecallKind::Lesson => "lesson",
        }
    }
}

/// One item of fused recall output, in descending score order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalledItem {
    /// Source stream.
    pub kind: RecallKind,
    /// Item text (chunk content, fact statement, or workflow goal).
    pub content: String,
    /// Fused relevance score.
    pub score: f32,
    /// Provenance label (document source, fact type, workflow id).
    pub origin: String,
    /// ISO 8601 creation timestamp of the underlying row; recency tie-break key.
    pub created_at: String,
}

// --- Embedding adapter types ---

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

/// Output from an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}

// --- Provider adapter types ---

/// A single chat message in a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered message list, system prompt first.
    pub messages: Vec<ChatMessage>,
    /// Output token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A response from an LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Response text.
    pub content: String,
    /// Token accounting for the call.
    pub usage: TokenUsage,
}

/// Token usage reported by a provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// --- Subagent types ---

/// Execution context handed to every subagent invocation.
#[derive(Debug, Clone, Default)]
pub struct SubagentContext {
    /// Resolved session uuid.
    pub session_id: String,
    /// Optional user identifier.
    pub user_id: Option<String>,
    /// Outputs of prior steps, keyed `step_<n>_<agent>`.
    pub prior_outputs: serde_json::Map<String, serde_json::Value>,
}

/// The result of a subagent invocation.
#[derive(Debug, Clone)]
pub struct SubagentOutput {
    /// Primary structured output.
    pub output: serde_json::Value,
    /// Optional side artifacts (rendered report, raw rows, ...).
    pub artifacts: Option<serde_json::Value>,
}

// --- Embedding helpers ---

/// Convert an f32 vector to bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a SQLite BLOB back to an f32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Compute cosine similarity between two vectors.
///
/// For L2-normalized vectors (all embedders in this workspace normalize
/// their output) this is equivalent to the dot product.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vectors must have same length");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalize a vector in place and return it.
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vec.iter().map(|v| v / norm).collect()
    } else {
        vec.to_vec()
    }
}
