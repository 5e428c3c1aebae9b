// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use memfuse_core::MemfuseError;
use tokio_rusqlite::Connection;

use crate::migrations;

/// Helper to convert tokio_rusqlite errors into MemfuseError::Storage.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> MemfuseError {
    MemfuseError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the MemFuse SQLite database.
///
/// Opening runs PRAGMA setup and all pending migrations. The handle is
/// cheap to share via its inner connection; queries go through the typed
/// functions in [`crate::queries`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path`, apply PRAGMAs and migrations.
    pub async fn open(path: &str) -> Result<Self, MemfuseError> {
        let conn = Connection::open(path).await.map_err(map_tr_err)?;
        Self::initialize(conn).await
    }

    /// Open an in-memory database; used by tests.
    pub async fn open_in_memory() -> Result<Self, MemfuseError> {
        let conn = Connection::open_in_memory().await.map_err(map_tr_err)?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, MemfuseError> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;",
            )?;
            migrations::run_migrations(conn)
                .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the database, flushing WAL state.
    pub async fn close(self) -> Result<(), MemfuseError> {
        self.conn.close().await.map_err(map_tr_err)
    }
}
