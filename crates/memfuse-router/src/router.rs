// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request routing.
//!
//! The router owns session identity (string key -> stable uuid), decides
//! chat vs task per message, and exposes the query and ingest surfaces.
//! `tag=m3` on write forces the task path; `tag=m3` on query biases
//! recall toward workflows and lessons, promoting them to the head of the
//! fused list.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use memfuse_config::model::{RetrievalConfig, RouterConfig};
use memfuse_core::traits::EmbeddingAdapter;
use memfuse_core::types::{EmbeddingInput, RecallKind, RecalledItem};
use memfuse_core::MemfuseError;
use memfuse_extractor::ExtractionTrigger;
use memfuse_orchestrator::Orchestrator;
use memfuse_rag::RagService;
use memfuse_retrieval::{HybridRetriever, RecallRequest};
use memfuse_storage::queries::{lessons, sessions};
use memfuse_storage::Database;

use crate::classifier::TaskClassifier;

/// Tag value selecting the task path on write and the workflow bias on query.
const M3_TAG: &str = "m3";

/// Which path served a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Chat,
    Task,
}

/// Response to a write request.
#[derive(Debug, Clone)]
pub struct WriteResponse {
    /// Assistant reply or task output.
    pub content: String,
    /// Resolved session uuid.
    pub session_id: String,
    /// Round the exchange was persisted under.
    pub round_id: i64,
    /// Path taken.
    pub mode: RequestMode,
}

/// Entry point over the memory engine.
pub struct MemoryRouter {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingAdapter>,
    rag: Arc<RagService>,
    orchestrator: Arc<Orchestrator>,
    retriever: Arc<HybridRetriever>,
    trigger: Arc<ExtractionTrigger>,
    classifier: TaskClassifier,
    config: RouterConfig,
    retrieval: RetrievalConfig,
    procedural_top_k: usize,
}

impl MemoryRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingAdapter>,
        rag: Arc<RagService>,
        orchestrator: Arc<Orchestrator>,
        retriever: Arc<HybridRetriever>,
        trigger: Arc<ExtractionTrigger>,
        config: RouterConfig,
        retrieval: RetrievalConfig,
        procedural_top_k: usize,
    ) -> Self {
        Self {
            db,
            embedder,
            rag,
            orchestrator,
            retriever,
            trigger,
            classifier: TaskClassifier::new(),
            config,
            retrieval,
            procedural_top_k,
        }
    }

    /// Resolve a caller session string to its stable uuid (get-or-create).
    pub async fn resolve_session(
        &self,
        session_key: &str,
        user_id: Option<&str>,
    ) -> Result<String, MemfuseError> {
        let session = sessions::get_or_create_session(&self.db, session_key, user_id).await?;
        Ok(session.id)
    }

    /// Handle one inbound message: chat by default, task on `tag=m3` (or
    /// the opt-in classifier). Both paths persist the round to M1 and
    /// evaluate the extraction trigger afterwards.
    pub async fn write_message(
        &self,
        session_key: &str,
        user_id: Option<&str>,
        content: &str,
        tag: Option<&str>,
    ) -> Result<WriteResponse, MemfuseError> {
        let session_id = self.resolve_session(session_key, user_id).await?;

        let task_mode = tag == Some(M3_TAG)
            || (self.config.classifier_enabled && {
                let classification = self.classifier.classify(content);
                if classification.is_task {
                    debug!(
                        reason = classification.reason,
                        confidence = classification.confidence,
                        "classifier routed message to task path"
                    );
                }
                classification.is_task
            });

        let response = if task_mode {
            let outcome = self
                .orchestrator
                .handle_goal(&session_id, user_id, content, &CancellationToken::new())
                .await?;
            let round_id = self
                .rag
                .persist_round(&session_id, content, &outcome.output)
                .await?;
            info!(
                session_id = %session_id,
                round_id,
                reused = outcome.reused_workflow.is_some(),
                stored = outcome.stored_workflow.is_some(),
                "task request completed"
            );
            WriteResponse {
                content: outcome.output,
                session_id: session_id.clone(),
                round_id,
                mode: RequestMode::Task,
            }
        } else {
            let outcome = self.rag.chat(&session_id, content).await?;
            WriteResponse {
                content: outcome.answer,
                session_id: session_id.clone(),
                round_id: outcome.round_id,
                mode: RequestMode::Chat,
            }
        };

        // Extraction scheduling is asynchronous; a failed enqueue is a
        // background concern and never fails the request.
        if let Err(e) = self.trigger.on_round_persisted(&session_id).await {
            tracing::warn!(error = %e, "extraction trigger evaluation failed");
        }

        Ok(response)
    }

    /// Query the memory layers. Default: fused chunks + facts. `tag=m3`:
    /// workflow-biased recall with lessons, promoted to the head.
    pub async fn query(
        &self,
        session_key: Option<&str>,
        query: &str,
        top_k: usize,
        tag: Option<&str>,
    ) -> Result<Vec<RecalledItem>, MemfuseError> {
        let session_id = match session_key {
            Some(key) => Some(self.resolve_session(key, None).await?),
            None => None,
        };

        let m3 = tag == Some(M3_TAG);
        let request = RecallRequest {
            query: query.to_string(),
            session_id,
            top_k,
            include_chunks: true,
            include_facts: true,
            include_workflows: m3,
            workflow_bias: if m3 { self.config.workflow_bias } else { 1.0 },
        };
        let mut items = self.retriever.retrieve(&request, &[]).await?;

        if m3 {
            items.extend(self.recall_lessons(query).await?);
            // Procedural results lead; each group stays score-ordered.
            items.sort_by(|a, b| {
                let a_procedural = matches!(a.kind, RecallKind::Workflow | RecallKind::Lesson);
                let b_procedural = matches!(b.kind, RecallKind::Workflow | RecallKind::Lesson);
                b_procedural
                    .cmp(&a_procedural)
                    .then_with(|| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            });
            items.truncate(top_k);
        }

        Ok(items)
    }

    /// Embed-and-chunk ingest with content-hash idempotency.
    pub async fn ingest_document(
        &self,
        document_source: &str,
        content: &str,
    ) -> Result<usize, MemfuseError> {
        self.rag.ingest_document(document_source, content).await
    }

    async fn recall_lessons(&self, query: &str) -> Result<Vec<RecalledItem>, MemfuseError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![query.to_string()],
            })
            .await?;
        let embedding = output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemfuseError::Internal("embedding returned no results".to_string()))?;

        let rows = lessons::search_similar(&self.db, &embedding, self.procedural_top_k).await?;
        Ok(rows
            .into_iter()
            .map(|(lesson, score)| RecalledItem {
                kind: RecallKind::Lesson,
                content: format!(
                    "[{}] {} on goal: {}{}",
                    lesson.status.as_str(),
                    lesson.agent,
                    lesson.goal_text,
                    lesson
                        .fix_summary
                        .map(|f| format!(" (fix: {f})"))
                        .unwrap_or_default()
                ),
                score: score * self.config.workflow_bias,
                origin: lesson.lesson_id,
                created_at: lesson.created_at,
            })
            .collect())
    }

    /// Read access for collaborating services.
    pub fn retrieval_config(&self) -> &RetrievalConfig {
        &self.retrieval
    }
}
