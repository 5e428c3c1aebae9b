// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid fused recall across chunks, facts, and workflows.
//!
//! Per stream: chunks come from an exact cosine scan (session-scoped when
//! preferred and populated), facts fuse a vector scan with an FTS5 keyword
//! query as `max(vector, 0.7 * keyword)`, workflows match on trigger
//! embeddings. Streams are interleaved in score order, deduped by content
//! hash, ties broken by recency, and capped by the caller's `top_k`.
//!
//! Empty-result fallbacks run in order: keyword-only facts, plain top-k
//! chunk fetch, then recent history turns as zero-score pseudo-chunks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use memfuse_config::model::RetrievalConfig;
use memfuse_core::traits::EmbeddingAdapter;
use memfuse_core::types::{EmbeddingInput, RecallKind, RecalledItem, Turn};
use memfuse_core::MemfuseError;
use memfuse_embedding::content_hash;
use memfuse_storage::queries::{chunks, facts, workflows};
use memfuse_storage::Database;

use crate::keywords::extract_keywords;

/// Weight applied to keyword scores when fusing with vector scores.
const KEYWORD_ALPHA: f32 = 0.7;

/// Maximum keyword terms extracted from a query.
const MAX_KEYWORD_TERMS: usize = 8;

/// How many recent turns become pseudo-chunks when recall is empty.
const HISTORY_FALLBACK_TURNS: usize = 3;

/// Parameters for one recall request.
#[derive(Debug, Clone)]
pub struct RecallRequest {
    /// Query text.
    pub query: String,
    /// Session scope; facts are always session-scoped, chunks optionally.
    pub session_id: Option<String>,
    /// Cap on the final fused list.
    pub top_k: usize,
    /// Include the chunk stream.
    pub include_chunks: bool,
    /// Include the fact stream.
    pub include_facts: bool,
    /// Include the workflow stream.
    pub include_workflows: bool,
    /// Score multiplier for workflow results (1.0 = unbiased).
    pub workflow_bias: f32,
}

impl RecallRequest {
    /// Default fused recall over chunks and facts.
    pub fn fused(query: impl Into<String>, session_id: Option<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            session_id,
            top_k,
            include_chunks: true,
            include_facts: true,
            include_workflows: false,
            workflow_bias: 1.0,
        }
    }
}

/// Hybrid retriever over the layered memory store.
pub struct HybridRetriever {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingAdapter>,
    config: RetrievalConfig,
    procedural_top_k: usize,
}

impl HybridRetriever {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingAdapter>,
        config: RetrievalConfig,
        procedural_top_k: usize,
    ) -> Self {
        Self {
            db,
            embedder,
            config,
            procedural_top_k,
        }
    }

    /// Run fused recall. `history` feeds the last-resort pseudo-chunk
    /// fallback and may be empty.
    pub async fn retrieve(
        &self,
        request: &RecallRequest,
        history: &[Turn],
    ) -> Result<Vec<RecalledItem>, MemfuseError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![request.query.clone()],
            })
            .await?;
        let query_embedding = output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemfuseError::Internal("embedding returned no results".to_string()))?;

        let mut items: Vec<RecalledItem> = Vec::new();

        if request.include_chunks {
            items.extend(self.recall_chunks(request, &query_embedding).await?);
        }
        if request.include_facts && self.config.structured_enabled {
            if let Some(session_id) = &request.session_id {
                items.extend(
                    self.recall_facts(session_id, &request.query, &query_embedding)
                        .await?,
                );
            }
        }
        if request.include_workflows {
            items.extend(
                self.recall_workflows(&query_embedding, request.workflow_bias)
                    .await?,
            );
        }

        let mut fused = fuse(items, request.top_k);

        if fused.is_empty() && !history.is_empty() {
            debug!("recall empty, falling back to recent history pseudo-chunks");
            fused = history
                .iter()
                .rev()
                .take(HISTORY_FALLBACK_TURNS)
                .map(|turn| RecalledItem {
                    kind: RecallKind::Chunk,
                    content: turn.content.clone(),
                    score: 0.0,
                    origin: format!("history#{}:{}", turn.round_id, turn.speaker.as_str()),
                    created_at: turn.created_at.clone(),
                })
                .collect();
            fused.reverse();
        }

        Ok(fused)
    }

    /// Chunk stream: session-preferred scan with a plain top-k fallback.
    async fn recall_chunks(
        &self,
        request: &RecallRequest,
        query_embedding: &[f32],
    ) -> Result<Vec<RecalledItem>, MemfuseError> {
        let session_source = request.session_id.as_ref().map(|id| format!("session:{id}"));

        let mut scope = None;
        if self.config.prefer_session {
            if let Some(source) = &session_source {
                if chunks::count_for_source(&self.db, source).await? > 0 {
                    scope = Some(source.as_str());
                }
            }
        }

        let mut rows = chunks::search_similar(
            &self.db,
            query_embedding,
            self.config.rag_top_k,
            scope,
        )
        .await?;

        if rows.is_empty() {
            // Degenerate corpus (or dimension mismatch): plain top-k fetch.
            let fallback_k = self.config.rag_top_k.min(3);
            rows = chunks::fetch_top_k(&self.db, fallback_k, scope).await?;
            if rows.is_empty() && scope.is_some() {
                rows = chunks::fetch_top_k(&self.db, fallback_k, None).await?;
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| RecalledItem {
                kind: RecallKind::Chunk,
                content: row.content,
                score: row.score,
                origin: row.document_source,
                created_at: row.created_at,
            })
            .collect())
    }

    /// Fact stream: vector scan fused with keyword match by fact id,
    /// `score = max(vector, 0.7 * keyword)`.
    async fn recall_facts(
        &self,
        session_id: &str,
        query: &str,
        query_embedding: &[f32],
    ) -> Result<Vec<RecalledItem>, MemfuseError> {
        let top_k = self.config.structured_top_k;
        let vector_rows =
            facts::search_similar(&self.db, session_id, query_embedding, top_k).await?;
        let terms = extract_keywords(query, MAX_KEYWORD_TERMS);
        let keyword_rows = facts::search_keyword(&self.db, session_id, &terms, top_k).await?;

        struct Merged {
            content: String,
            fact_type: String,
            score: f32,
            created_at: String,
        }

        let mut merged: HashMap<String, Merged> = HashMap::new();
        for row in vector_rows {
            merged.insert(
                row.fact_id.clone(),
                Merged {
                    content: row.content,
                    fact_type: row.fact_type.as_str().to_string(),
                    score: row.score,
                    created_at: row.created_at,
                },
            );
        }
        for row in keyword_rows {
            let keyword_score = KEYWORD_ALPHA * row.score;
            merged
                .entry(row.fact_id.clone())
                .and_modify(|m| m.score = m.score.max(keyword_score))
                .or_insert(Merged {
                    content: row.content,
                    fact_type: row.fact_type.as_str().to_string(),
                    score: keyword_score,
                    created_at: row.created_at,
                });
        }

        Ok(merged
            .into_values()
            .map(|m| RecalledItem {
                kind: RecallKind::Fact,
                content: m.content,
                score: m.score,
                origin: m.fact_type,
                created_at: m.created_at,
            })
            .collect())
    }

    /// Workflow stream: trigger-embedding similarity, optionally biased.
    async fn recall_workflows(
        &self,
        query_embedding: &[f32],
        bias: f32,
    ) -> Result<Vec<RecalledItem>, MemfuseError> {
        let rows =
            workflows::search_similar(&self.db, query_embedding, self.procedural_top_k).await?;
        Ok(rows
            .into_iter()
            .map(|(workflow, score)| RecalledItem {
                kind: RecallKind::Workflow,
                content: workflow.plan.goal.clone(),
                score: score * bias,
                origin: workflow.workflow_id,
                created_at: workflow.created_at,
            })
            .collect())
    }
}

/// Interleave streams in score order, dedupe by content hash, tie-break by
/// recency, cap at `top_k`.
fn fuse(items: Vec<RecalledItem>, top_k: usize) -> Vec<RecalledItem> {
    let mut items = items;
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    let mut seen = std::collections::HashSet::new();
    let mut fused = Vec::with_capacity(top_k);
    for item in items {
        if !seen.insert(content_hash(&item.content)) {
            continue;
        }
        fused.push(item);
        if fused.len() >= top_k {
            break;
        }
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfuse_core::types::{Chunk, Fact, FactRelations, FactType, Speaker};
    use memfuse_storage::models::now_iso;
    use memfuse_storage::queries::sessions::get_or_create_session;
    use memfuse_test_utils::MockEmbedder;
    use uuid::Uuid;

    const DIM: usize = 256;

    struct Fixture {
        db: Arc<Database>,
        embedder: Arc<MockEmbedder>,
        retriever: HybridRetriever,
        session_id: String,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let embedder = Arc::new(MockEmbedder::with_dim(DIM));
        let session = get_or_create_session(&db, "sess1", None).await.unwrap();
        let retriever = HybridRetriever::new(
            db.clone(),
            embedder.clone(),
            RetrievalConfig::default(),
            5,
        );
        Fixture {
            db,
            embedder,
            retriever,
            session_id: session.id,
        }
    }

    async fn seed_chunk(f: &Fixture, source: &str, content: &str) {
        let chunk = Chunk {
            chunk_id: Uuid::new_v4().to_string(),
            document_source: source.to_string(),
            content: content.to_string(),
            content_hash: memfuse_embedding::content_hash(content),
            embedding: f.embedder.embedding_for(content),
            created_at: now_iso(),
        };
        chunks::insert_chunk(&f.db, &chunk).await.unwrap();
    }

    async fn seed_fact(f: &Fixture, fact_type: FactType, content: &str) -> String {
        let fact = Fact {
            fact_id: Uuid::new_v4().to_string(),
            session_id: f.session_id.clone(),
            source_round_id: 1,
            fact_type,
            content: content.to_string(),
            relations: FactRelations::default(),
            metadata: serde_json::Map::new(),
            embedding: f.embedder.embedding_for(content),
            created_at: now_iso(),
        };
        facts::insert_fact(&f.db, &fact).await.unwrap();
        fact.fact_id
    }

    #[tokio::test]
    async fn recalls_seeded_chunk_for_related_query() {
        let f = fixture().await;
        seed_chunk(
            &f,
            "seed",
            "Plan B was rejected because of cost overruns of 40%.",
        )
        .await;
        seed_chunk(&f, "seed", "The kitchen menu lists seven soups.").await;

        let request = RecallRequest::fused("Why did we choose Plan B?", None, 5);
        let results = f.retriever.retrieve(&request, &[]).await.unwrap();

        assert!(!results.is_empty());
        assert!(
            results[0].content.contains("Plan B"),
            "seeded sentence must rank first: {results:?}"
        );
    }

    #[tokio::test]
    async fn session_scope_preferred_when_populated() {
        let f = fixture().await;
        let scoped = format!("session:{}", f.session_id);
        seed_chunk(&f, &scoped, "session scoped note about deployment").await;
        seed_chunk(&f, "global", "global note about deployment").await;

        let request =
            RecallRequest::fused("deployment", Some(f.session_id.clone()), 5);
        let results = f.retriever.retrieve(&request, &[]).await.unwrap();

        assert!(results.iter().all(|r| r.origin == scoped),
            "only session chunks expected: {results:?}");
    }

    #[tokio::test]
    async fn fact_stream_fuses_vector_and_keyword() {
        let f = fixture().await;
        seed_fact(&f, FactType::Decision, "We decided to ship on Monday").await;

        let request = RecallRequest {
            include_chunks: false,
            ..RecallRequest::fused("when do we ship", Some(f.session_id.clone()), 5)
        };
        let results = f.retriever.retrieve(&request, &[]).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, RecallKind::Fact);
        assert_eq!(results[0].origin, "Decision");
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn fused_list_dedupes_identical_content() {
        let f = fixture().await;
        seed_chunk(&f, "seed", "shared knowledge sentence").await;
        seed_fact(&f, FactType::Fact, "shared knowledge sentence").await;

        let request = RecallRequest::fused(
            "shared knowledge sentence",
            Some(f.session_id.clone()),
            10,
        );
        let results = f.retriever.retrieve(&request, &[]).await.unwrap();
        assert_eq!(
            results
                .iter()
                .filter(|r| r.content == "shared knowledge sentence")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn caller_top_k_caps_fused_list() {
        let f = fixture().await;
        for i in 0..10 {
            seed_chunk(&f, "seed", &format!("document chunk number {i}")).await;
        }
        let request = RecallRequest::fused("document chunk", None, 3);
        let results = f.retriever.retrieve(&request, &[]).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn empty_store_falls_back_to_history() {
        let f = fixture().await;
        let history = vec![
            Turn {
                session_id: f.session_id.clone(),
                round_id: 1,
                speaker: Speaker::User,
                content: "older question".to_string(),
                created_at: "2026-03-01T00:00:01.000Z".to_string(),
            },
            Turn {
                session_id: f.session_id.clone(),
                round_id: 1,
                speaker: Speaker::Assistant,
                content: "older answer".to_string(),
                created_at: "2026-03-01T00:00:02.000Z".to_string(),
            },
        ];
        let request = RecallRequest::fused("anything", Some(f.session_id.clone()), 5);
        let results = f.retriever.retrieve(&request, &history).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score == 0.0));
        assert!(results[0].origin.starts_with("history#"));
    }

    #[tokio::test]
    async fn workflow_bias_scales_scores() {
        use memfuse_core::types::{Workflow, WorkflowPlan, WorkflowStep};

        let f = fixture().await;
        let goal = "summarize the seed document";
        let workflow = Workflow {
            workflow_id: Uuid::new_v4().to_string(),
            trigger_embedding: f.embedder.embedding_for(goal),
            trigger_pattern: None,
            plan: WorkflowPlan {
                goal: goal.to_string(),
                steps: vec![WorkflowStep {
                    agent: "rag-query".to_string(),
                    params: serde_json::json!({}),
                }],
            },
            usage_count: 0,
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        workflows::insert_workflow(&f.db, &workflow).await.unwrap();

        let base = RecallRequest {
            include_chunks: false,
            include_facts: false,
            include_workflows: true,
            ..RecallRequest::fused(goal, None, 5)
        };
        let unbiased = f.retriever.retrieve(&base, &[]).await.unwrap();

        let biased_request = RecallRequest {
            workflow_bias: 1.25,
            ..base
        };
        let biased = f.retriever.retrieve(&biased_request, &[]).await.unwrap();

        assert_eq!(unbiased.len(), 1);
        assert_eq!(biased.len(), 1);
        assert!(biased[0].score > unbiased[0].score);
    }

    #[tokio::test]
    async fn retrieval_is_deterministic() {
        let f = fixture().await;
        seed_chunk(&f, "seed", "alpha chunk about planning").await;
        seed_chunk(&f, "seed", "beta chunk about planning").await;
        seed_fact(&f, FactType::Fact, "gamma fact about planning").await;

        let request = RecallRequest::fused("planning", Some(f.session_id.clone()), 5);
        let first = f.retriever.retrieve(&request, &[]).await.unwrap();
        let second = f.retriever.retrieve(&request, &[]).await.unwrap();

        let order1: Vec<&str> = first.iter().map(|r| r.content.as_str()).collect();
        let order2: Vec<&str> = second.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order1, order2);
    }
}
