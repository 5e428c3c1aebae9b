// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction trigger rules.
//!
//! Called after each persisted round. A round whose own token count
//! exceeds the single-round threshold is enqueued immediately; smaller
//! rounds accumulate until the session's pending tokens cross the batch
//! threshold, then one job covering all of them is enqueued. Pending state
//! is derived from the durable extraction marker, so a crash re-triggers
//! outstanding rounds on the next persisted round.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use memfuse_config::model::ExtractorConfig;
use memfuse_context::count_tokens;
use memfuse_core::MemfuseError;
use memfuse_storage::queries::{queue, sessions, turns};
use memfuse_storage::Database;

/// Decides when a session's pending rounds become an extraction job.
pub struct ExtractionTrigger {
    db: Arc<Database>,
    config: ExtractorConfig,
}

impl ExtractionTrigger {
    pub fn new(db: Arc<Database>, config: ExtractorConfig) -> Self {
        Self { db, config }
    }

    /// Evaluate the trigger rules for a session after a round persisted.
    ///
    /// Returns the upper-bound round id of the enqueued job, or `None`
    /// when nothing was enqueued.
    pub async fn on_round_persisted(&self, session_id: &str) -> Result<Option<i64>, MemfuseError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let marker = sessions::last_extracted_round(&self.db, session_id).await?;
        let pending = turns::fetch_rounds_after(&self.db, session_id, marker).await?;
        if pending.is_empty() {
            return Ok(None);
        }

        // Group turn tokens per round, ordered by round id.
        let mut rounds: BTreeMap<i64, usize> = BTreeMap::new();
        for turn in &pending {
            *rounds.entry(turn.round_id).or_insert(0) += count_tokens(&turn.content);
        }

        let (&last_round, &last_tokens) = rounds.iter().next_back().expect("pending is non-empty");

        let enqueue_to = if last_tokens >= self.config.trigger_tokens_single {
            Some(last_round)
        } else {
            let total: usize = rounds.values().sum();
            (total >= self.config.trigger_tokens_batch).then_some(last_round)
        };

        let Some(round_id) = enqueue_to else {
            return Ok(None);
        };

        let entry = queue::enqueue(&self.db, session_id, round_id, self.config.max_attempts).await?;
        if entry.is_some() {
            debug!(
                session_id,
                round_id,
                single = last_tokens >= self.config.trigger_tokens_single,
                "extraction job enqueued"
            );
            Ok(Some(round_id))
        } else {
            // The same bound was already queued (crash replay).
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfuse_core::types::{Speaker, Turn};
    use memfuse_storage::models::now_iso;
    use memfuse_storage::queries::sessions::get_or_create_session;

    fn config(single: usize, batch: usize) -> ExtractorConfig {
        ExtractorConfig {
            trigger_tokens_single: single,
            trigger_tokens_batch: batch,
            ..ExtractorConfig::default()
        }
    }

    async fn persist_round(db: &Database, session_id: &str, round: i64, user: &str, assistant: &str) {
        for (speaker, content) in [(Speaker::User, user), (Speaker::Assistant, assistant)] {
            turns::insert_turn(
                db,
                &Turn {
                    session_id: session_id.to_string(),
                    round_id: round,
                    speaker,
                    content: content.to_string(),
                    created_at: now_iso(),
                },
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn big_round_triggers_immediately() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let session = get_or_create_session(&db, "s", None).await.unwrap();
        let trigger = ExtractionTrigger::new(db.clone(), config(5, 1000));

        persist_round(&db, &session.id, 1, "a very long user turn with many words", "and a long answer").await;
        let enqueued = trigger.on_round_persisted(&session.id).await.unwrap();
        assert_eq!(enqueued, Some(1));
        assert_eq!(queue::count_by_status(&db, "pending").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn small_rounds_accumulate_to_batch() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let session = get_or_create_session(&db, "s", None).await.unwrap();
        let trigger = ExtractionTrigger::new(db.clone(), config(1000, 12));

        persist_round(&db, &session.id, 1, "short", "tiny").await;
        assert_eq!(trigger.on_round_persisted(&session.id).await.unwrap(), None);

        persist_round(&db, &session.id, 2, "short again", "tiny again").await;
        persist_round(&db, &session.id, 3, "more words here", "and here").await;
        let enqueued = trigger.on_round_persisted(&session.id).await.unwrap();
        assert_eq!(enqueued, Some(3), "batch threshold crossed at round 3");
    }

    #[tokio::test]
    async fn disabled_extractor_never_enqueues() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let session = get_or_create_session(&db, "s", None).await.unwrap();
        let trigger = ExtractionTrigger::new(
            db.clone(),
            ExtractorConfig {
                enabled: false,
                trigger_tokens_single: 1,
                ..ExtractorConfig::default()
            },
        );

        persist_round(&db, &session.id, 1, "anything at all", "whatever").await;
        assert_eq!(trigger.on_round_persisted(&session.id).await.unwrap(), None);
        assert_eq!(queue::count_by_status(&db, "pending").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn extracted_rounds_do_not_retrigger() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let session = get_or_create_session(&db, "s", None).await.unwrap();
        let trigger = ExtractionTrigger::new(db.clone(), config(1, 1000));

        persist_round(&db, &session.id, 1, "long enough to trigger", "yes").await;
        assert_eq!(trigger.on_round_persisted(&session.id).await.unwrap(), Some(1));

        // Marker advanced by a completed job: nothing pending anymore.
        sessions::set_last_extracted_round(&db, &session.id, 1)
            .await
            .unwrap();
        assert_eq!(trigger.on_round_persisted(&session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_bound_is_not_reenqueued() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let session = get_or_create_session(&db, "s", None).await.unwrap();
        let trigger = ExtractionTrigger::new(db.clone(), config(1, 1000));

        persist_round(&db, &session.id, 1, "trigger words", "reply").await;
        assert_eq!(trigger.on_round_persisted(&session.id).await.unwrap(), Some(1));
        // Same pending state evaluated again (e.g. crash replay).
        assert_eq!(trigger.on_round_persisted(&session.id).await.unwrap(), None);
        assert_eq!(queue::count_by_status(&db, "pending").await.unwrap(), 1);
    }
}
