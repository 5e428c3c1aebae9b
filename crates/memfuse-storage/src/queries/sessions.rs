// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session identity: resolve caller session strings to stable uuids.

use memfuse_core::MemfuseError;
use rusqlite::params;
use uuid::Uuid;

use crate::database::{map_tr_err, Database};
use crate::models::{now_iso, Session};

fn row_to_session(row: &rusqlite::Row) -> Result<Session, rusqlite::Error> {
    Ok(Session {
        id: row.get(0)?,
        external_key: row.get(1)?,
        user_id: row.get(2)?,
        last_extracted_round_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, external_key, user_id, last_extracted_round_id, created_at, updated_at";

/// Resolve a caller-supplied session string to a stable session row,
/// creating one on first sight (get-or-create).
pub async fn get_or_create_session(
    db: &Database,
    external_key: &str,
    user_id: Option<&str>,
) -> Result<Session, MemfuseError> {
    let external_key = external_key.to_string();
    let user_id = user_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let existing = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE external_key = ?1"
                ))?;
                stmt.query_row(params![external_key], row_to_session)
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        e => Err(e),
                    })?
            };
            if let Some(session) = existing {
                return Ok(session);
            }

            let now = now_iso();
            let session = Session {
                id: Uuid::new_v4().to_string(),
                external_key: external_key.clone(),
                user_id,
                last_extracted_round_id: 0,
                created_at: now.clone(),
                updated_at: now,
            };
            conn.execute(
                "INSERT INTO sessions (id, external_key, user_id, last_extracted_round_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.external_key,
                    session.user_id,
                    session.last_extracted_round_id,
                    session.created_at,
                    session.updated_at,
                ],
            )?;
            Ok(session)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a session by its uuid.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<Session>, MemfuseError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let session = stmt
                .query_row(params![id], row_to_session)
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(e),
                })?;
            Ok(session)
        })
        .await
        .map_err(map_tr_err)
}

/// Read the session's extraction marker (highest extracted round id).
pub async fn last_extracted_round(db: &Database, session_id: &str) -> Result<i64, MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let marker: i64 = conn.query_row(
                "SELECT last_extracted_round_id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(marker)
        })
        .await
        .map_err(map_tr_err)
}

/// Advance the session's extraction marker. The marker never moves backwards.
pub async fn set_last_extracted_round(
    db: &Database,
    session_id: &str,
    round_id: i64,
) -> Result<(), MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET last_extracted_round_id = MAX(last_extracted_round_id, ?1),
                     updated_at = ?2
                 WHERE id = ?3",
                params![round_id, now_iso(), session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let db = Database::open_in_memory().await.unwrap();

        let first = get_or_create_session(&db, "sess1", Some("alice"))
            .await
            .unwrap();
        let second = get_or_create_session(&db, "sess1", None).await.unwrap();
        assert_eq!(first.id, second.id, "same key must resolve to same uuid");
        assert_eq!(second.user_id.as_deref(), Some("alice"));

        let other = get_or_create_session(&db, "sess2", None).await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn get_session_by_uuid() {
        let db = Database::open_in_memory().await.unwrap();
        let created = get_or_create_session(&db, "sess1", None).await.unwrap();

        let fetched = get_session(&db, &created.id).await.unwrap().unwrap();
        assert_eq!(fetched.external_key, "sess1");

        assert!(get_session(&db, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extraction_marker_advances_monotonically() {
        let db = Database::open_in_memory().await.unwrap();
        let session = get_or_create_session(&db, "sess1", None).await.unwrap();

        assert_eq!(last_extracted_round(&db, &session.id).await.unwrap(), 0);

        set_last_extracted_round(&db, &session.id, 3).await.unwrap();
        assert_eq!(last_extracted_round(&db, &session.id).await.unwrap(), 3);

        // A stale write must not move the marker backwards.
        set_last_extracted_round(&db, &session.id, 1).await.unwrap();
        assert_eq!(last_extracted_round(&db, &session.id).await.unwrap(), 3);
    }
}
