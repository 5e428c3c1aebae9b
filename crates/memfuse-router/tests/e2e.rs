// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios over a fully wired service with mock backends.

use std::sync::Arc;
use std::time::Duration;

use memfuse_config::MemfuseConfig;
use memfuse_core::types::{l2_normalize, FactType, RecallKind};
use memfuse_router::{MemfuseService, RequestMode};
use memfuse_storage::queries::{facts, queue, sessions, turns, workflows};
use memfuse_storage::Database;
use memfuse_test_utils::{MockEmbedder, MockProvider};

struct Harness {
    service: MemfuseService,
    provider: Arc<MockProvider>,
    embedder: Arc<MockEmbedder>,
    db: Arc<Database>,
}

async fn start(config: MemfuseConfig) -> Harness {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let provider = Arc::new(MockProvider::new());
    let embedder = Arc::new(MockEmbedder::new());
    let service = MemfuseService::start_with_db(
        config,
        db.clone(),
        provider.clone(),
        embedder.clone(),
    )
    .await
    .unwrap();
    Harness {
        service,
        provider,
        embedder,
        db,
    }
}

fn fast_extractor_config() -> MemfuseConfig {
    let mut config = MemfuseConfig::default();
    config.extractor.trigger_tokens_single = 1;
    config.extractor.poll_interval_ms = 10;
    config.extractor.workers = 1;
    config.extractor.contradiction_sim_threshold = 0.75;
    config
}

async fn wait_for_completed_jobs(db: &Database, expected: i64) {
    for _ in 0..300 {
        if queue::count_by_status(db, "completed").await.unwrap() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "extraction queue did not drain: {} completed",
        queue::count_by_status(db, "completed").await.unwrap()
    );
}

// E1: a fact seeded 25 unrelated turns ago is still recalled.
#[tokio::test]
async fn long_chat_recall_reaches_seeded_sentence() {
    let mut config = MemfuseConfig::default();
    config.extractor.enabled = false;
    let h = start(config).await;
    let router = h.service.router();

    router
        .ingest_document(
            "seed",
            "Plan B was rejected because of cost overruns of 40%.",
        )
        .await
        .unwrap();

    for word in ["a", "b", "c", "d", "e"].into_iter().cycle().take(25) {
        h.provider.add_response("ok").await;
        router
            .write_message("sess1", None, word, None)
            .await
            .unwrap();
    }

    h.provider
        .add_response("Plan B was rejected because of its cost overruns.")
        .await;
    let response = router
        .write_message("sess1", None, "Why did we choose Plan B?", None)
        .await
        .unwrap();

    assert_eq!(response.mode, RequestMode::Chat);
    assert!(response.content.contains("cost"));

    // The final prompt must carry the seeded chunk.
    let requests = h.provider.recorded_requests().await;
    let final_prompt: String = requests
        .last()
        .unwrap()
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(final_prompt.contains("cost overruns of 40%"));

    h.service.shutdown().await;
}

// E2: identical decisions in two rounds collapse to one fact.
#[tokio::test]
async fn extractor_dedups_identical_decisions() {
    let h = start(fast_extractor_config()).await;
    let router = h.service.router();

    for _ in 0..2 {
        h.provider.add_response("Understood.").await;
        h.provider
            .add_json_response(serde_json::json!({
                "items": [{
                    "type": "Decision",
                    "content": "We decided to ship on Monday.",
                    "confidence": 0.9
                }]
            }))
            .await;
        router
            .write_message("s", None, "We decided to ship on Monday.", None)
            .await
            .unwrap();
    }

    wait_for_completed_jobs(&h.db, 2).await;
    let session = sessions::get_or_create_session(&h.db, "s", None).await.unwrap();
    assert_eq!(
        facts::count_with_content(&h.db, &session.id, "We decided to ship on Monday.")
            .await
            .unwrap(),
        1
    );

    h.service.shutdown().await;
}

// E3: a contradicting decision links back to the earlier fact.
#[tokio::test]
async fn extractor_links_contradicting_decision() {
    let h = start(fast_extractor_config()).await;
    let router = h.service.router();

    h.provider.add_response("Understood.").await;
    h.provider
        .add_json_response(serde_json::json!({
            "items": [{
                "type": "Decision",
                "content": "We decided to ship on Monday.",
                "confidence": 0.9
            }]
        }))
        .await;
    router
        .write_message("s", None, "We decided to ship on Monday.", None)
        .await
        .unwrap();
    wait_for_completed_jobs(&h.db, 1).await;

    let session = sessions::get_or_create_session(&h.db, "s", None).await.unwrap();
    let monday = facts::search_keyword(&h.db, &session.id, &["monday".to_string()], 5)
        .await
        .unwrap();
    let monday_id = monday[0].fact_id.clone();

    h.provider.add_response("Understood.").await;
    h.provider
        .add_json_response(serde_json::json!({
            "items": [{
                "type": "Decision",
                "content": "We decided to ship on Tuesday.",
                "relations": {"contradicts": "earlier decision"},
                "confidence": 0.9
            }]
        }))
        .await;
    router
        .write_message("s", None, "We decided to ship on Tuesday.", None)
        .await
        .unwrap();
    wait_for_completed_jobs(&h.db, 2).await;

    let tuesday = facts::search_keyword(&h.db, &session.id, &["tuesday".to_string()], 5)
        .await
        .unwrap();
    assert_eq!(tuesday.len(), 1);
    let fact = facts::get_fact(&h.db, &tuesday[0].fact_id).await.unwrap().unwrap();
    assert_eq!(fact.fact_type, FactType::Decision);
    assert_eq!(
        fact.relations.contradicts.as_deref(),
        Some(monday_id.as_str()),
        "new decision must cross-link the contradicted fact"
    );
    // Non-destructive: the old fact is still there.
    assert!(facts::get_fact(&h.db, &monday_id).await.unwrap().is_some());

    h.service.shutdown().await;
}

// E4: a tagged goal plans, executes, and stores a workflow at usage 0.
#[tokio::test]
async fn task_plans_executes_and_stores_workflow() {
    let h = start(MemfuseConfig::default()).await;
    let router = h.service.router();

    router
        .ingest_document("seed", "The seed describes a migration plan with known risks.")
        .await
        .unwrap();

    h.provider
        .add_json_response(serde_json::json!({
            "steps": [
                {"agent": "rag-query", "params": {"query": "Summarize the ingested seed and list three risks."}},
                {"agent": "report", "params": {}}
            ]
        }))
        .await;
    h.provider.add_response("The seed is a migration plan.").await; // rag-query
    h.provider
        .add_response("Summary with three risks: scope, cost, time.")
        .await; // report

    let goal = "Summarize the ingested seed and list three risks.";
    let response = router
        .write_message("sess-task", None, goal, Some("m3"))
        .await
        .unwrap();

    assert_eq!(response.mode, RequestMode::Task);
    assert!(response.content.contains("three risks"));
    assert_eq!(h.provider.complete_json_calls(), 1, "one planner call");

    // The round is in M1.
    let history = turns::fetch_history(&h.db, &response.session_id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, goal);

    // The workflow is in M3 with usage_count = 0 and at least 2 steps.
    let trigger = h.embedder.embedding_for(goal);
    let stored = workflows::search_similar(&h.db, &trigger, 5).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0.usage_count, 0);
    assert!(stored[0].0.plan.steps.len() >= 2);

    h.service.shutdown().await;
}

// E5: a near-paraphrase reuses the stored workflow without planning.
#[tokio::test]
async fn near_paraphrase_takes_fast_path() {
    let h = start(MemfuseConfig::default()).await;
    let router = h.service.router();

    let goal = "Summarize the ingested seed and list three risks.";
    let paraphrase = "Give me a summary of seed.txt plus three risks.";
    // Pin near-identical trigger embeddings for the paraphrase pair.
    h.embedder.set_override(goal, {
        let mut v = vec![0.0; 1024];
        v[0] = 1.0;
        v
    });
    h.embedder.set_override(paraphrase, {
        let mut v = vec![0.0; 1024];
        v[0] = 0.99;
        v[1] = 0.141;
        l2_normalize(&v)
    });

    h.provider
        .add_json_response(serde_json::json!({
            "steps": [
                {"agent": "rag-query", "params": {"query": "Summarize the ingested seed and list three risks."}},
                {"agent": "report", "params": {}}
            ]
        }))
        .await;
    h.provider.add_response("seed summary").await;
    h.provider.add_response("report one").await;
    router
        .write_message("sess-task", None, goal, Some("m3"))
        .await
        .unwrap();
    assert_eq!(h.provider.complete_json_calls(), 1);

    let trigger = h.embedder.embedding_for(goal);
    let before = workflows::search_similar(&h.db, &trigger, 1).await.unwrap();
    let workflow_id = before[0].0.workflow_id.clone();
    let updated_before = before[0].0.updated_at.clone();

    h.provider.add_response("seed summary again").await; // rag-query
    h.provider.add_response("report two").await; // report
    let response = router
        .write_message("sess-task", None, paraphrase, Some("m3"))
        .await
        .unwrap();
    assert_eq!(response.mode, RequestMode::Task);
    assert_eq!(
        h.provider.complete_json_calls(),
        1,
        "fast path must not call the planner"
    );

    let after = workflows::get_workflow(&h.db, &workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.usage_count, 1, "reuse bumps usage exactly once");
    assert!(after.updated_at > updated_before);

    h.service.shutdown().await;
}

// E6: ingesting the same file twice leaves the chunk count unchanged.
#[tokio::test]
async fn repeated_ingest_is_idempotent() {
    let h = start(MemfuseConfig::default()).await;
    let router = h.service.router();

    let content = "Plan B was rejected because of cost overruns of 40%.";
    let first = router.ingest_document("seed", content).await.unwrap();
    assert_eq!(first, 1);

    let count_after_first =
        memfuse_storage::queries::chunks::count_for_source(&h.db, "seed")
            .await
            .unwrap();

    let second = router.ingest_document("seed", content).await.unwrap();
    assert_eq!(second, 0);
    assert_eq!(
        memfuse_storage::queries::chunks::count_for_source(&h.db, "seed")
            .await
            .unwrap(),
        count_after_first
    );

    h.service.shutdown().await;
}

// Query surface: default recall vs workflow-biased m3 recall.
#[tokio::test]
async fn m3_query_promotes_procedural_results() {
    let h = start(MemfuseConfig::default()).await;
    let router = h.service.router();

    router
        .ingest_document("seed", "notes about the quarterly report process")
        .await
        .unwrap();

    // Store a workflow whose trigger matches the query.
    h.provider
        .add_json_response(serde_json::json!({
            "steps": [{"agent": "report", "params": {}}]
        }))
        .await;
    h.provider.add_response("quarterly report brief").await;
    router
        .write_message("sess", None, "build the quarterly report process", Some("m3"))
        .await
        .unwrap();

    let default_results = router
        .query(Some("sess"), "quarterly report process", 10, None)
        .await
        .unwrap();
    assert!(default_results
        .iter()
        .all(|r| r.kind != RecallKind::Workflow));

    let m3_results = router
        .query(Some("sess"), "quarterly report process", 10, Some("m3"))
        .await
        .unwrap();
    let first_procedural = m3_results
        .first()
        .map(|r| matches!(r.kind, RecallKind::Workflow | RecallKind::Lesson))
        .unwrap_or(false);
    assert!(
        first_procedural,
        "m3 query must lead with procedural results: {m3_results:?}"
    );

    h.service.shutdown().await;
}

// Turn ordering: round ids strictly increase across mixed chat traffic.
#[tokio::test]
async fn round_ids_strictly_increase() {
    let mut config = MemfuseConfig::default();
    config.extractor.enabled = false;
    let h = start(config).await;
    let router = h.service.router();

    let mut last = 0;
    for i in 0..5 {
        h.provider.add_response(format!("reply {i}")).await;
        let response = router
            .write_message("ordered", None, &format!("message {i}"), None)
            .await
            .unwrap();
        assert!(response.round_id > last);
        last = response.round_id;
    }

    let session = sessions::get_or_create_session(&h.db, "ordered", None)
        .await
        .unwrap();
    let history = turns::fetch_history(&h.db, &session.id, None).await.unwrap();
    let rounds: Vec<i64> = history
        .iter()
        .filter(|t| t.speaker == memfuse_core::types::Speaker::User)
        .map(|t| t.round_id)
        .collect();
    assert_eq!(rounds, vec![1, 2, 3, 4, 5]);

    h.service.shutdown().await;
}
