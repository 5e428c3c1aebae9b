// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step-level lesson operations.
//!
//! Lessons record individual step outcomes during task execution. They are
//! recalled by trigger similarity to bias future planning and surface as
//! workflow-adjacent results under `tag=m3` queries.

use memfuse_core::types::{blob_to_vec, cosine_similarity, vec_to_blob, Lesson, LessonStatus};
use memfuse_core::MemfuseError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};

fn row_to_lesson(row: &rusqlite::Row) -> Result<Lesson, rusqlite::Error> {
    let blob: Vec<u8> = row.get(1)?;
    let status: String = row.get(4)?;
    let working_params: Option<String> = row.get(7)?;
    Ok(Lesson {
        lesson_id: row.get(0)?,
        trigger_embedding: blob_to_vec(&blob),
        goal_text: row.get(2)?,
        agent: row.get(3)?,
        status: LessonStatus::from_str_value(&status),
        error: row.get(5)?,
        fix_summary: row.get(6)?,
        working_params: working_params.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(8)?,
    })
}

const LESSON_COLUMNS: &str = "lesson_id, trigger_embedding, goal_text, agent, status, error, \
                              fix_summary, working_params, created_at";

/// Record a lesson.
pub async fn insert_lesson(db: &Database, lesson: &Lesson) -> Result<(), MemfuseError> {
    let lesson = lesson.clone();
    let blob = vec_to_blob(&lesson.trigger_embedding);
    let working_params = lesson
        .working_params
        .as_ref()
        .map(|v| v.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO procedural_lessons
                 (lesson_id, trigger_embedding, goal_text, agent, status, error, fix_summary, working_params, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    lesson.lesson_id,
                    blob,
                    lesson.goal_text,
                    lesson.agent,
                    lesson.status.as_str(),
                    lesson.error,
                    lesson.fix_summary,
                    working_params,
                    lesson.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Exact cosine scan over lesson trigger embeddings, best first.
pub async fn search_similar(
    db: &Database,
    query_embedding: &[f32],
    top_k: usize,
) -> Result<Vec<(Lesson, f32)>, MemfuseError> {
    let query = query_embedding.to_vec();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LESSON_COLUMNS} FROM procedural_lessons"
            ))?;
            let lessons: Vec<Lesson> = stmt
                .query_map([], row_to_lesson)?
                .collect::<Result<_, _>>()?;

            let mut scored: Vec<(Lesson, f32)> = lessons
                .into_iter()
                .filter(|l| l.trigger_embedding.len() == query.len())
                .map(|l| {
                    let score = cosine_similarity(&query, &l.trigger_embedding);
                    (l, score)
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

/// Count lessons by status (test and diagnostics observability).
pub async fn count_by_status(db: &Database, status: LessonStatus) -> Result<i64, MemfuseError> {
    let status = status.as_str();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM procedural_lessons WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}
