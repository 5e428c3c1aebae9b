// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable extraction queue operations.
//!
//! At-least-once delivery with per-session single-flight: `dequeue` never
//! hands out an entry for a session that already has one processing, so
//! contradiction reasoning inside the extractor sees a serialized view of
//! each session.

use memfuse_core::MemfuseError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{now_iso, ExtractionJob};

fn row_to_job(row: &rusqlite::Row) -> Result<ExtractionJob, rusqlite::Error> {
    Ok(ExtractionJob {
        id: row.get(0)?,
        session_id: row.get(1)?,
        round_id: row.get(2)?,
        status: row.get(3)?,
        attempts: row.get(4)?,
        max_attempts: row.get(5)?,
        locked_until: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const JOB_COLUMNS: &str =
    "id, session_id, round_id, status, attempts, max_attempts, locked_until, created_at, updated_at";

/// Enqueue an extraction job covering rounds up to `round_id`.
///
/// Returns the entry id, or `None` when an identical `(session, round)`
/// entry already exists (re-trigger after crash).
pub async fn enqueue(
    db: &Database,
    session_id: &str,
    round_id: i64,
    max_attempts: i32,
) -> Result<Option<i64>, MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO extraction_queue (session_id, round_id, max_attempts)
                 VALUES (?1, ?2, ?3)",
                params![session_id, round_id, max_attempts],
            )?;
            if changed > 0 {
                Ok(Some(conn.last_insert_rowid()))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Dequeue the next pending entry whose session has nothing in flight.
///
/// Atomically selects the oldest eligible pending entry and marks it
/// "processing" with a 5-minute lock. Returns `None` when no entry is
/// eligible.
pub async fn dequeue(db: &Database) -> Result<Option<ExtractionJob>, MemfuseError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let result = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM extraction_queue q
                     WHERE q.status = 'pending'
                       AND NOT EXISTS (
                           SELECT 1 FROM extraction_queue p
                           WHERE p.session_id = q.session_id AND p.status = 'processing'
                       )
                     ORDER BY q.id ASC
                     LIMIT 1"
                ))?;
                stmt.query_row([], row_to_job)
            };

            match result {
                Ok(job) => {
                    tx.execute(
                        "UPDATE extraction_queue SET status = 'processing',
                         locked_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '+5 minutes'),
                         updated_at = ?1
                         WHERE id = ?2",
                        params![now_iso(), job.id],
                    )?;
                    tx.commit()?;
                    Ok(Some(ExtractionJob {
                        status: "processing".to_string(),
                        ..job
                    }))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    tx.commit()?;
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Acknowledge successful processing of a queue entry.
pub async fn ack(db: &Database, id: i64) -> Result<(), MemfuseError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE extraction_queue SET status = 'completed',
                 locked_until = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![now_iso(), id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a queue entry as failed.
///
/// Increments attempts. At `max_attempts` the entry is permanently failed;
/// otherwise it returns to "pending" for retry with the lock cleared.
pub async fn fail(db: &Database, id: i64) -> Result<(), MemfuseError> {
    db.connection()
        .call(move |conn| {
            let (attempts, max_attempts): (i32, i32) = conn.query_row(
                "SELECT attempts, max_attempts FROM extraction_queue WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let new_attempts = attempts + 1;
            let status = if new_attempts >= max_attempts {
                "failed"
            } else {
                "pending"
            };
            conn.execute(
                "UPDATE extraction_queue SET status = ?1, attempts = ?2,
                 locked_until = NULL, updated_at = ?3
                 WHERE id = ?4",
                params![status, new_attempts, now_iso(), id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Return stale "processing" entries (expired lock) to "pending".
///
/// Called at startup; a crashed worker's lock expires and its job is
/// re-delivered, preserving at-least-once semantics.
pub async fn reset_stale(db: &Database) -> Result<usize, MemfuseError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE extraction_queue SET status = 'pending', locked_until = NULL,
                 updated_at = ?1
                 WHERE status = 'processing'
                   AND (locked_until IS NULL OR locked_until < strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
                params![now_iso()],
            )?;
            Ok(changed)
        })
        .await
        .map_err(map_tr_err)
}

/// Count entries with the given status (shutdown drain + tests).
pub async fn count_by_status(db: &Database, status: &str) -> Result<i64, MemfuseError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM extraction_queue WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}
