// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document ingestion and the chat pipeline.
//!
//! `chat` is the M1 read-write path: fetch recent history, run fused
//! recall, compose the budgeted prompt, complete, then persist the round
//! under the session mutex. `ingest_document` is the idempotent
//! embed-and-chunk write path for external documents.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use memfuse_config::model::{ContextConfig, LlmConfig, RetrievalConfig};
use memfuse_context::ContextController;
use memfuse_core::traits::{EmbeddingAdapter, ProviderAdapter};
use memfuse_core::types::{Chunk, EmbeddingInput, ProviderRequest, Speaker, Turn};
use memfuse_core::MemfuseError;
use memfuse_embedding::content_hash;
use memfuse_retrieval::{HybridRetriever, RecallRequest};
use memfuse_storage::models::now_iso;
use memfuse_storage::queries::{chunks, turns};
use memfuse_storage::Database;

use crate::locks::SessionLocks;

/// Word-window size for document chunking.
const CHUNK_WORDS: usize = 800;

/// The result of one chat round.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Assistant reply returned to the caller.
    pub answer: String,
    /// Round id the exchange was persisted under.
    pub round_id: i64,
}

/// Ingestion plus the retrieve-compose-complete-persist chat pipeline.
pub struct RagService {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingAdapter>,
    provider: Arc<dyn ProviderAdapter>,
    retriever: Arc<HybridRetriever>,
    context: ContextController,
    locks: Arc<SessionLocks>,
    llm: LlmConfig,
    retrieval: RetrievalConfig,
    history_fetch_rounds: i64,
}

impl RagService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingAdapter>,
        provider: Arc<dyn ProviderAdapter>,
        retriever: Arc<HybridRetriever>,
        context_config: ContextConfig,
        llm: LlmConfig,
        retrieval: RetrievalConfig,
        locks: Arc<SessionLocks>,
    ) -> Self {
        let history_fetch_rounds = context_config.history_fetch_rounds;
        Self {
            db,
            embedder,
            provider,
            retriever,
            context: ContextController::new(context_config),
            locks,
            llm,
            retrieval,
            history_fetch_rounds,
        }
    }

    /// Chunk, embed, and upsert a document. Returns the number of chunk
    /// rows actually written; re-ingesting identical content writes none.
    pub async fn ingest_document(
        &self,
        document_source: &str,
        content: &str,
    ) -> Result<usize, MemfuseError> {
        let pieces = chunk_text(content, CHUNK_WORDS);
        if pieces.is_empty() {
            return Ok(0);
        }

        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: pieces.clone(),
            })
            .await?;
        if output.embeddings.len() != pieces.len() {
            return Err(MemfuseError::Internal(
                "embedding count mismatch during ingest".to_string(),
            ));
        }

        let mut inserted = 0;
        for (text, embedding) in pieces.into_iter().zip(output.embeddings) {
            let chunk = Chunk {
                chunk_id: Uuid::new_v4().to_string(),
                document_source: document_source.to_string(),
                content_hash: content_hash(&text),
                content: text,
                embedding,
                created_at: now_iso(),
            };
            if chunks::insert_chunk(&self.db, &chunk).await? {
                inserted += 1;
            }
        }

        info!(
            source = document_source,
            inserted, "document ingest completed"
        );
        Ok(inserted)
    }

    /// Index a session's conversation history as session-scoped chunks
    /// (`document_source = "session:<uuid>"`). Idempotent per turn content.
    pub async fn index_session_history(&self, session_id: &str) -> Result<usize, MemfuseError> {
        let history = turns::fetch_history(&self.db, session_id, None).await?;
        if history.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = history.iter().map(|t| t.content.clone()).collect();
        let output = self.embedder.embed(EmbeddingInput { texts }).await?;

        let source = format!("session:{session_id}");
        let mut added = 0;
        for (turn, embedding) in history.iter().zip(output.embeddings) {
            let chunk = Chunk {
                chunk_id: Uuid::new_v4().to_string(),
                document_source: source.clone(),
                content_hash: content_hash(&turn.content),
                content: turn.content.clone(),
                embedding,
                created_at: now_iso(),
            };
            if chunks::insert_chunk(&self.db, &chunk).await? {
                added += 1;
            }
        }
        debug!(session_id, added, "session history indexed");
        Ok(added)
    }

    /// Answer a query with recall and history context, without persisting
    /// anything. Used by the chat path (which persists afterwards) and by
    /// the RAG subagent inside task execution.
    pub async fn answer(&self, session_id: &str, query: &str) -> Result<String, MemfuseError> {
        let history =
            turns::fetch_history(&self.db, session_id, Some(self.history_fetch_rounds)).await?;

        let request = RecallRequest::fused(
            query,
            Some(session_id.to_string()),
            self.retrieval.rag_top_k + self.retrieval.structured_top_k,
        );
        let recalled = self.retriever.retrieve(&request, &history).await?;

        let composed = self.context.compose(query, &history, &recalled);
        debug!(
            session_id,
            total_tokens = composed.total_tokens,
            recalled = recalled.len(),
            "chat context composed"
        );

        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.llm.model.clone(),
                messages: composed.messages,
                max_tokens: self.llm.max_tokens,
                temperature: self.llm.temperature,
            })
            .await?;
        Ok(response.content)
    }

    /// Run one chat round for a resolved session.
    pub async fn chat(&self, session_id: &str, query: &str) -> Result<ChatOutcome, MemfuseError> {
        let answer = self.answer(session_id, query).await?;
        let round_id = self.persist_round(session_id, query, &answer).await?;
        Ok(ChatOutcome { answer, round_id })
    }

    /// Persist a user/assistant round under the session mutex, returning
    /// the dense round id it was written as.
    pub async fn persist_round(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<i64, MemfuseError> {
        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let round_id = turns::next_round_id(&self.db, session_id).await?;
        turns::insert_turn(
            &self.db,
            &Turn {
                session_id: session_id.to_string(),
                round_id,
                speaker: Speaker::User,
                content: user_text.to_string(),
                created_at: now_iso(),
            },
        )
        .await?;
        turns::insert_turn(
            &self.db,
            &Turn {
                session_id: session_id.to_string(),
                round_id,
                speaker: Speaker::Assistant,
                content: assistant_text.to_string(),
                created_at: now_iso(),
            },
        )
        .await?;
        Ok(round_id)
    }
}

/// Split text into word windows of roughly `chunk_words` words.
fn chunk_text(text: &str, chunk_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![];
    }
    words
        .chunks(chunk_words.max(1))
        .map(|window| window.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfuse_config::model::MemfuseConfig;
    use memfuse_storage::queries::sessions::get_or_create_session;
    use memfuse_test_utils::{MockEmbedder, MockProvider};

    struct Fixture {
        db: Arc<Database>,
        provider: Arc<MockProvider>,
        service: RagService,
        session_id: String,
    }

    async fn fixture() -> Fixture {
        let config = MemfuseConfig::default();
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let embedder = Arc::new(MockEmbedder::with_dim(256));
        let provider = Arc::new(MockProvider::new());
        let retriever = Arc::new(HybridRetriever::new(
            db.clone(),
            embedder.clone(),
            config.retrieval.clone(),
            config.procedural.top_k,
        ));
        let session = get_or_create_session(&db, "sess1", None).await.unwrap();
        let service = RagService::new(
            db.clone(),
            embedder,
            provider.clone(),
            retriever,
            config.context.clone(),
            config.llm.clone(),
            config.retrieval.clone(),
            Arc::new(SessionLocks::new()),
        );
        Fixture {
            db,
            provider,
            service,
            session_id: session.id,
        }
    }

    #[test]
    fn chunking_windows_words() {
        let text = "one two three four five six seven";
        let pieces = chunk_text(text, 3);
        assert_eq!(pieces, vec!["one two three", "four five six", "seven"]);
        assert!(chunk_text("", 3).is_empty());
    }

    #[tokio::test]
    async fn ingest_twice_writes_once() {
        let f = fixture().await;
        let content = "Plan B was rejected because of cost overruns of 40%.";

        let first = f.service.ingest_document("seed", content).await.unwrap();
        assert_eq!(first, 1);
        let second = f.service.ingest_document("seed", content).await.unwrap();
        assert_eq!(second, 0, "re-ingest must be a no-op");

        assert_eq!(chunks::count_for_source(&f.db, "seed").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chat_persists_round_and_returns_answer() {
        let f = fixture().await;
        f.provider.add_response("the answer is 42").await;

        let outcome = f.service.chat(&f.session_id, "what is the answer?").await.unwrap();
        assert_eq!(outcome.answer, "the answer is 42");
        assert_eq!(outcome.round_id, 1);

        let history = turns::fetch_history(&f.db, &f.session_id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].speaker, Speaker::User);
        assert_eq!(history[0].content, "what is the answer?");
        assert_eq!(history[1].speaker, Speaker::Assistant);
        assert_eq!(history[1].content, "the answer is 42");
    }

    #[tokio::test]
    async fn chat_rounds_increment_densely() {
        let f = fixture().await;
        for expected in 1..=3 {
            f.provider.add_response(format!("answer {expected}")).await;
            let outcome = f.service.chat(&f.session_id, "q").await.unwrap();
            assert_eq!(outcome.round_id, expected);
        }
    }

    #[tokio::test]
    async fn chat_prompt_includes_recalled_seed() {
        let f = fixture().await;
        f.service
            .ingest_document("seed", "Plan B was rejected because of cost overruns of 40%.")
            .await
            .unwrap();
        f.provider.add_response("because of cost overruns").await;

        f.service
            .chat(&f.session_id, "Why did we choose Plan B?")
            .await
            .unwrap();

        let requests = f.provider.recorded_requests().await;
        let prompt_text: String = requests[0]
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(
            prompt_text.contains("cost overruns"),
            "recalled chunk must reach the prompt"
        );
    }

    #[tokio::test]
    async fn session_history_indexing_is_idempotent() {
        let f = fixture().await;
        f.provider.add_response("first answer").await;
        f.service.chat(&f.session_id, "first question").await.unwrap();

        let added = f.service.index_session_history(&f.session_id).await.unwrap();
        assert_eq!(added, 2);
        let again = f.service.index_session_history(&f.session_id).await.unwrap();
        assert_eq!(again, 0);

        let source = format!("session:{}", f.session_id);
        assert_eq!(chunks::count_for_source(&f.db, &source).await.unwrap(), 2);
    }
}
