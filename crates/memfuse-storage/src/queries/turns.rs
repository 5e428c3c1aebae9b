// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! M1 episodic turn operations.
//!
//! Turns are append-only; replaying the same `(session, round, speaker)`
//! updates content in place so retried requests stay idempotent.

use memfuse_core::types::{Speaker, Turn};
use memfuse_core::MemfuseError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};

fn row_to_turn(row: &rusqlite::Row) -> Result<Turn, rusqlite::Error> {
    let speaker: String = row.get(2)?;
    Ok(Turn {
        session_id: row.get(0)?,
        round_id: row.get(1)?,
        speaker: Speaker::from_str_value(&speaker),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Insert a turn, replacing content on replayed identity.
pub async fn insert_turn(db: &Database, turn: &Turn) -> Result<(), MemfuseError> {
    let turn = turn.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversation_turns (session_id, round_id, speaker, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (session_id, round_id, speaker) DO UPDATE SET content = excluded.content",
                params![
                    turn.session_id,
                    turn.round_id,
                    turn.speaker.as_str(),
                    turn.content,
                    turn.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Next dense round id for a session (1 when the session has no turns).
pub async fn next_round_id(db: &Database, session_id: &str) -> Result<i64, MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let max: Option<i64> = conn.query_row(
                "SELECT MAX(round_id) FROM conversation_turns WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(max.unwrap_or(0) + 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch conversation history ascending by round, user turn before reply.
///
/// With `limit_rounds`, only the latest N rounds are returned (both
/// speakers within them).
pub async fn fetch_history(
    db: &Database,
    session_id: &str,
    limit_rounds: Option<i64>,
) -> Result<Vec<Turn>, MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut turns = Vec::new();
            match limit_rounds {
                Some(limit) => {
                    let mut stmt = conn.prepare(
                        "WITH latest AS (
                             SELECT DISTINCT round_id FROM conversation_turns
                             WHERE session_id = ?1 ORDER BY round_id DESC LIMIT ?2
                         )
                         SELECT t.session_id, t.round_id, t.speaker, t.content, t.created_at
                         FROM conversation_turns t
                         JOIN latest l ON l.round_id = t.round_id
                         WHERE t.session_id = ?1
                         ORDER BY t.round_id ASC,
                                  CASE t.speaker WHEN 'user' THEN 0 ELSE 1 END ASC",
                    )?;
                    let rows = stmt.query_map(params![session_id, limit], row_to_turn)?;
                    for row in rows {
                        turns.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT session_id, round_id, speaker, content, created_at
                         FROM conversation_turns WHERE session_id = ?1
                         ORDER BY round_id ASC,
                                  CASE speaker WHEN 'user' THEN 0 ELSE 1 END ASC",
                    )?;
                    let rows = stmt.query_map(params![session_id], row_to_turn)?;
                    for row in rows {
                        turns.push(row?);
                    }
                }
            }
            Ok(turns)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch all turns with `round_id` strictly greater than `after_round`,
/// ascending. Used by the extractor to gather pending rounds.
pub async fn fetch_rounds_after(
    db: &Database,
    session_id: &str,
    after_round: i64,
) -> Result<Vec<Turn>, MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, round_id, speaker, content, created_at
                 FROM conversation_turns
                 WHERE session_id = ?1 AND round_id > ?2
                 ORDER BY round_id ASC,
                          CASE speaker WHEN 'user' THEN 0 ELSE 1 END ASC",
            )?;
            let rows = stmt.query_map(params![session_id, after_round], row_to_turn)?;
            let mut turns = Vec::new();
            for row in rows {
                turns.push(row?);
            }
            Ok(turns)
        })
        .await
        .map_err(map_tr_err)
}
