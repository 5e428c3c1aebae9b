// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! M3 procedural workflow operations.

use memfuse_core::types::{blob_to_vec, cosine_similarity, vec_to_blob, Workflow, WorkflowPlan};
use memfuse_core::MemfuseError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::now_iso;

fn row_to_workflow(row: &rusqlite::Row) -> Result<Workflow, rusqlite::Error> {
    let blob: Vec<u8> = row.get(1)?;
    let plan_json: String = row.get(3)?;
    let plan: WorkflowPlan = serde_json::from_str(&plan_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(Workflow {
        workflow_id: row.get(0)?,
        trigger_embedding: blob_to_vec(&blob),
        trigger_pattern: row.get(2)?,
        plan,
        usage_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const WORKFLOW_COLUMNS: &str =
    "workflow_id, trigger_embedding, trigger_pattern, workflow, usage_count, created_at, updated_at";

/// Insert a freshly distilled workflow with `usage_count = 0`.
pub async fn insert_workflow(db: &Database, workflow: &Workflow) -> Result<(), MemfuseError> {
    let workflow = workflow.clone();
    let blob = vec_to_blob(&workflow.trigger_embedding);
    let plan_json = serde_json::to_string(&workflow.plan)
        .map_err(|e| MemfuseError::Internal(format!("workflow plan serialization failed: {e}")))?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO procedural_memory
                 (workflow_id, trigger_embedding, trigger_pattern, workflow, usage_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    workflow.workflow_id,
                    blob,
                    workflow.trigger_pattern,
                    plan_json,
                    workflow.usage_count,
                    workflow.created_at,
                    workflow.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Replace the stored plan of an existing workflow cluster representative.
pub async fn update_plan(
    db: &Database,
    workflow_id: &str,
    plan: &WorkflowPlan,
    trigger_pattern: Option<&str>,
) -> Result<(), MemfuseError> {
    let workflow_id = workflow_id.to_string();
    let trigger_pattern = trigger_pattern.map(str::to_string);
    let plan_json = serde_json::to_string(plan)
        .map_err(|e| MemfuseError::Internal(format!("workflow plan serialization failed: {e}")))?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE procedural_memory
                 SET workflow = ?1, trigger_pattern = ?2, updated_at = ?3
                 WHERE workflow_id = ?4",
                params![plan_json, trigger_pattern, now_iso(), workflow_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a workflow by id.
pub async fn get_workflow(db: &Database, id: &str) -> Result<Option<Workflow>, MemfuseError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WORKFLOW_COLUMNS} FROM procedural_memory WHERE workflow_id = ?1"
            ))?;
            let workflow = stmt
                .query_row(params![id], row_to_workflow)
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(e),
                })?;
            Ok(workflow)
        })
        .await
        .map_err(map_tr_err)
}

/// Exact cosine scan over workflow trigger embeddings.
///
/// Returns `(workflow, similarity)` pairs, best first, recency breaking ties.
pub async fn search_similar(
    db: &Database,
    query_embedding: &[f32],
    top_k: usize,
) -> Result<Vec<(Workflow, f32)>, MemfuseError> {
    let query = query_embedding.to_vec();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WORKFLOW_COLUMNS} FROM procedural_memory"
            ))?;
            let workflows: Vec<Workflow> = stmt
                .query_map([], row_to_workflow)?
                .collect::<Result<_, _>>()?;

            let mut scored: Vec<(Workflow, f32)> = workflows
                .into_iter()
                .filter(|w| w.trigger_embedding.len() == query.len())
                .map(|w| {
                    let score = cosine_similarity(&query, &w.trigger_embedding);
                    (w, score)
                })
                .collect();

            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.created_at.cmp(&a.0.created_at))
            });
            scored.truncate(top_k);
            Ok(scored)
        })
        .await
        .map_err(map_tr_err)
}

/// Bump `usage_count` and `updated_at` on fast-path reuse.
pub async fn bump_usage(db: &Database, workflow_id: &str) -> Result<(), MemfuseError> {
    let workflow_id = workflow_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE procedural_memory
                 SET usage_count = usage_count + 1, updated_at = ?1
                 WHERE workflow_id = ?2",
                params![now_iso(), workflow_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
