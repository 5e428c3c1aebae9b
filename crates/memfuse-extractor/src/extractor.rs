// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-based structured fact extraction from conversation rounds.
//!
//! A job covers the unextracted rounds of one session. The pipeline:
//! build a prompt from the rounds plus vector-recalled session facts, run
//! a structured-JSON completion, cluster candidates so only the
//! highest-confidence representative per near-duplicate group survives,
//! then gate each survivor (exact dedup, near-dedup skip, contradiction
//! cross-link) before a single-transaction insert. The session's
//! extraction marker advances only after the insert succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use memfuse_config::model::{ExtractorConfig, LlmConfig};
use memfuse_core::traits::{EmbeddingAdapter, ProviderAdapter};
use memfuse_core::types::{
    cosine_similarity, ChatMessage, EmbeddingInput, Fact, FactRelations, FactType,
    ProviderRequest, Speaker, Turn,
};
use memfuse_core::MemfuseError;
use memfuse_storage::models::now_iso;
use memfuse_storage::queries::{facts, sessions, turns};
use memfuse_storage::{Database, ExtractionJob};

/// Cap on candidates taken from a single completion.
const MAX_CANDIDATES: usize = 24;

/// How many related facts are quoted back into the prompt.
const RELATED_FACTS_IN_PROMPT: usize = 8;

const EXTRACTOR_SYSTEM_PROMPT: &str = "You are a precise information extractor. Given one or more conversation rounds (user + assistant) and optional related context, extract high-quality structured items as strict JSON. Do not include explanations.\n\
\n\
Principles:\n\
- Each item MUST be standalone and self-explanatory. Expand or define acronyms and references so the fact can be used alone.\n\
- Prefer concise, high-information sentences (MECE: mutually exclusive, collectively exhaustive).\n\
- Merge micro-facts about the same subject into one compact statement. Avoid repeating the same subject across multiple facts.\n\
- Write items in the same language as the conversation.\n\
- If the new information is redundant with the provided related facts, return an empty items list.\n\
- If a contradiction exists, favor the most recent information and reference the contradicted fact id in relations.contradicts.\n\
- Only include items that are grounded by the given rounds and related context.";

/// JSON Schema handed to `complete_json` for extraction output.
pub fn extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": ["Fact", "Decision", "Assumption", "UserPreference"]
                        },
                        "content": { "type": "string" },
                        "relations": {
                            "type": "object",
                            "properties": {
                                "based_on": { "type": "array", "items": { "type": "string" } },
                                "contradicts": { "type": "string" },
                                "supports": { "type": "array", "items": { "type": "string" } }
                            }
                        },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    },
                    "required": ["type", "content"]
                }
            }
        },
        "required": ["items"]
    })
}

/// One candidate item parsed from the completion.
#[derive(Debug, Clone, Deserialize)]
pub struct FactCandidate {
    #[serde(rename = "type", default)]
    pub item_type: String,
    pub content: String,
    #[serde(default)]
    pub relations: FactRelations,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl FactCandidate {
    pub fn fact_type(&self) -> FactType {
        FactType::from_str_value(&self.item_type)
    }
}

/// Parse the `items` list from a structured completion, dropping malformed
/// entries instead of failing the batch.
pub fn parse_candidates(value: &serde_json::Value) -> Vec<FactCandidate> {
    let Some(items) = value.get("items").and_then(|v| v.as_array()) else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            let candidate: FactCandidate = serde_json::from_value(item.clone()).ok()?;
            let content = candidate.content.trim();
            if content.is_empty() {
                return None;
            }
            Some(FactCandidate {
                content: content.to_string(),
                ..candidate
            })
        })
        .take(MAX_CANDIDATES)
        .collect()
}

/// Keep one representative per near-duplicate cluster of same-type
/// candidates: highest confidence first, later members similar at or above
/// `threshold` are dropped.
pub fn cluster_candidates(
    candidates: Vec<(FactCandidate, Vec<f32>)>,
    threshold: f32,
) -> Vec<(FactCandidate, Vec<f32>)> {
    let mut ordered = candidates;
    ordered.sort_by(|a, b| {
        b.0.confidence
            .partial_cmp(&a.0.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<(FactCandidate, Vec<f32>)> = Vec::new();
    for (candidate, embedding) in ordered {
        let duplicate = kept.iter().any(|(other, other_embedding)| {
            other.fact_type() == candidate.fact_type()
                && other_embedding.len() == embedding.len()
                && cosine_similarity(other_embedding, &embedding) >= threshold
        });
        if duplicate {
            debug!(content = %candidate.content, "candidate dropped in batch clustering");
        } else {
            kept.push((candidate, embedding));
        }
    }
    kept
}

/// Extracts and stores structured facts from conversation rounds.
pub struct MemoryExtractor {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingAdapter>,
    provider: Arc<dyn ProviderAdapter>,
    config: ExtractorConfig,
    llm: LlmConfig,
}

impl MemoryExtractor {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingAdapter>,
        provider: Arc<dyn ProviderAdapter>,
        config: ExtractorConfig,
        llm: LlmConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            provider,
            config,
            llm,
        }
    }

    /// Process one queue entry end to end. Returns the number of facts
    /// inserted. Advances the session marker on success.
    pub async fn process_job(&self, job: &ExtractionJob) -> Result<usize, MemfuseError> {
        let marker = sessions::last_extracted_round(&self.db, &job.session_id).await?;
        if marker >= job.round_id {
            debug!(
                session_id = %job.session_id,
                round_id = job.round_id,
                "job already covered by marker, skipping"
            );
            return Ok(0);
        }

        let pending: Vec<Turn> = turns::fetch_rounds_after(&self.db, &job.session_id, marker)
            .await?
            .into_iter()
            .filter(|t| t.round_id <= job.round_id)
            .collect();
        if pending.is_empty() {
            sessions::set_last_extracted_round(&self.db, &job.session_id, job.round_id).await?;
            return Ok(0);
        }

        // Vector-recall related session facts by the newest round's text.
        let last_round = pending.last().map(|t| t.round_id).unwrap_or(job.round_id);
        let last_text: String = pending
            .iter()
            .filter(|t| t.round_id == last_round)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let round_embedding = self.embed_one(&last_text).await?;
        let related =
            facts::search_similar(&self.db, &job.session_id, &round_embedding, self.config.context_facts)
                .await?;

        let user_prompt = build_user_prompt(&pending, &related);
        let completion = self
            .provider
            .complete_json(
                ProviderRequest {
                    model: self.llm.model.clone(),
                    messages: vec![
                        ChatMessage::system(EXTRACTOR_SYSTEM_PROMPT),
                        ChatMessage::user(user_prompt),
                    ],
                    max_tokens: self.llm.max_tokens,
                    temperature: self.llm.temperature,
                },
                &extraction_schema(),
            )
            .await?;

        let candidates = parse_candidates(&completion);
        if candidates.is_empty() {
            sessions::set_last_extracted_round(&self.db, &job.session_id, job.round_id).await?;
            return Ok(0);
        }

        // Embed all candidate contents in one batch.
        let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let output = self.embedder.embed(EmbeddingInput { texts }).await?;
        if output.embeddings.len() != candidates.len() {
            return Err(MemfuseError::Internal(
                "embedding count mismatch during extraction".to_string(),
            ));
        }
        let paired: Vec<(FactCandidate, Vec<f32>)> =
            candidates.into_iter().zip(output.embeddings).collect();

        let representatives = cluster_candidates(paired, self.config.dedup_sim_threshold);

        let existing = facts::session_embeddings(&self.db, &job.session_id).await?;
        let mut survivors: Vec<Fact> = Vec::new();
        for (candidate, embedding) in representatives {
            if let Some(fact) = self
                .gate_candidate(&job.session_id, last_round, candidate, embedding, &existing)
                .await?
            {
                survivors.push(fact);
            }
        }

        let inserted = if survivors.is_empty() {
            0
        } else {
            facts::insert_facts_tx(&self.db, &survivors).await?
        };

        sessions::set_last_extracted_round(&self.db, &job.session_id, job.round_id).await?;
        info!(
            session_id = %job.session_id,
            round_id = job.round_id,
            inserted,
            "extraction job completed"
        );
        Ok(inserted)
    }

    /// Apply the insert-time gates to one candidate.
    async fn gate_candidate(
        &self,
        session_id: &str,
        source_round_id: i64,
        candidate: FactCandidate,
        embedding: Vec<f32>,
        existing: &[(String, FactType, Vec<f32>)],
    ) -> Result<Option<Fact>, MemfuseError> {
        let fact_type = candidate.fact_type();

        if facts::exists_exact(&self.db, session_id, fact_type, &candidate.content).await? {
            debug!(content = %candidate.content, "exact duplicate skipped");
            return Ok(None);
        }

        // Closest existing same-type fact.
        let nearest = existing
            .iter()
            .filter(|(_, t, e)| *t == fact_type && e.len() == embedding.len())
            .map(|(id, _, e)| (id.as_str(), cosine_similarity(e, &embedding)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut relations = candidate.relations.clone();
        if let Some((nearest_id, similarity)) = nearest {
            if similarity >= self.config.dedup_sim_threshold {
                debug!(
                    content = %candidate.content,
                    nearest = nearest_id,
                    similarity,
                    usage_note = "near-duplicate absorbed",
                    "near-duplicate skipped"
                );
                return Ok(None);
            }
            if similarity >= self.config.contradiction_sim_threshold
                && relations.contradicts.is_some()
            {
                // Non-destructive: the new fact points at the old one.
                debug!(
                    content = %candidate.content,
                    contradicts = nearest_id,
                    similarity,
                    "contradiction linked"
                );
                relations.contradicts = Some(nearest_id.to_string());
            } else {
                relations.contradicts = None;
            }
        } else {
            relations.contradicts = None;
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "confidence".to_string(),
            serde_json::json!(candidate.confidence.clamp(0.0, 1.0)),
        );

        Ok(Some(Fact {
            fact_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source_round_id,
            fact_type,
            content: candidate.content,
            relations,
            metadata,
            embedding,
            created_at: now_iso(),
        }))
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemfuseError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemfuseError::Internal("embedding returned no results".to_string()))
    }
}

/// Render the rounds and related facts into the extraction user prompt.
fn build_user_prompt(rounds: &[Turn], related: &[memfuse_storage::ScoredFact]) -> String {
    let mut lines: Vec<String> = vec![
        "Extract structured items from these conversation rounds.".to_string(),
    ];

    let mut by_round: HashMap<i64, Vec<&Turn>> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();
    for turn in rounds {
        if !by_round.contains_key(&turn.round_id) {
            order.push(turn.round_id);
        }
        by_round.entry(turn.round_id).or_default().push(turn);
    }
    for round_id in order {
        for turn in &by_round[&round_id] {
            let role = match turn.speaker {
                Speaker::User => "User",
                Speaker::Assistant => "Assistant",
            };
            lines.push(format!("[{role} #{round_id}] {}", turn.content));
        }
    }

    if !related.is_empty() {
        lines.push("\n[Related Structured Memory]".to_string());
        for fact in related.iter().take(RELATED_FACTS_IN_PROMPT) {
            lines.push(format!(
                "- {} ({}): {}",
                fact.fact_id,
                fact.fact_type.as_str(),
                fact.content
            ));
        }
    }

    lines.join("\n")
}
