// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! M1 document chunk operations.
//!
//! Similarity scans are exact: embeddings are decoded from their BLOBs and
//! scored with cosine similarity in-process. At the corpus sizes a single
//! deployment holds this is the correctness-over-performance choice; there
//! is no approximate index to miss on sparse data.

use memfuse_core::types::{blob_to_vec, cosine_similarity, Chunk};
use memfuse_core::MemfuseError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::ScoredChunk;

/// Insert a chunk. Returns `true` when a row was actually written;
/// re-ingesting identical `(document_source, content_hash)` is a no-op.
pub async fn insert_chunk(db: &Database, chunk: &Chunk) -> Result<bool, MemfuseError> {
    let chunk = chunk.clone();
    let blob = memfuse_core::types::vec_to_blob(&chunk.embedding);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO document_chunks
                 (chunk_id, document_source, content, content_hash, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chunk.chunk_id,
                    chunk.document_source,
                    chunk.content,
                    chunk.content_hash,
                    blob,
                    chunk.created_at,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Count chunks under a document source.
pub async fn count_for_source(db: &Database, source: &str) -> Result<i64, MemfuseError> {
    let source = source.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM document_chunks WHERE document_source = ?1",
                params![source],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}

/// Exact cosine scan over the whole corpus, or a single source when given.
///
/// Returns the `top_k` best rows sorted by similarity descending, recency
/// breaking ties.
pub async fn search_similar(
    db: &Database,
    query_embedding: &[f32],
    top_k: usize,
    source: Option<&str>,
) -> Result<Vec<ScoredChunk>, MemfuseError> {
    let query = query_embedding.to_vec();
    let source = source.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let (sql, source_param) = match &source {
                Some(s) => (
                    "SELECT content, document_source, content_hash, embedding, created_at
                     FROM document_chunks WHERE document_source = ?1",
                    Some(s.clone()),
                ),
                None => (
                    "SELECT content, document_source, content_hash, embedding, created_at
                     FROM document_chunks",
                    None,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row| -> Result<(ScoredChunk, Vec<u8>), rusqlite::Error> {
                Ok((
                    ScoredChunk {
                        content: row.get(0)?,
                        document_source: row.get(1)?,
                        content_hash: row.get(2)?,
                        score: 0.0,
                        created_at: row.get(4)?,
                    },
                    row.get(3)?,
                ))
            };
            let rows: Vec<(ScoredChunk, Vec<u8>)> = match source_param {
                Some(s) => stmt
                    .query_map(params![s], map_row)?
                    .collect::<Result<_, _>>()?,
                None => stmt.query_map([], map_row)?.collect::<Result<_, _>>()?,
            };

            let mut scored: Vec<ScoredChunk> = rows
                .into_iter()
                .filter_map(|(mut chunk, blob)| {
                    let embedding = blob_to_vec(&blob);
                    if embedding.len() != query.len() {
                        return None;
                    }
                    chunk.score = cosine_similarity(&query, &embedding);
                    Some(chunk)
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            scored.truncate(top_k);
            Ok(scored)
        })
        .await
        .map_err(map_tr_err)
}

/// Plain top-k fetch without similarity (empty-recall fallback).
pub async fn fetch_top_k(
    db: &Database,
    top_k: usize,
    source: Option<&str>,
) -> Result<Vec<ScoredChunk>, MemfuseError> {
    let source = source.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let map_row = |row: &rusqlite::Row| -> Result<ScoredChunk, rusqlite::Error> {
                Ok(ScoredChunk {
                    content: row.get(0)?,
                    document_source: row.get(1)?,
                    content_hash: row.get(2)?,
                    score: 0.0,
                    created_at: row.get(3)?,
                })
            };
            let mut chunks = Vec::new();
            match source {
                Some(s) => {
                    let mut stmt = conn.prepare(
                        "SELECT content, document_source, content_hash, created_at
                         FROM document_chunks WHERE document_source = ?1
                         ORDER BY chunk_id ASC LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![s, top_k as i64], map_row)?;
                    for row in rows {
                        chunks.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT content, document_source, content_hash, created_at
                         FROM document_chunks ORDER BY chunk_id ASC LIMIT ?1",
                    )?;
                    let rows = stmt.query_map(params![top_k as i64], map_row)?;
                    for row in rows {
                        chunks.push(row?);
                    }
                }
            }
            Ok(chunks)
        })
        .await
        .map_err(map_tr_err)
}
