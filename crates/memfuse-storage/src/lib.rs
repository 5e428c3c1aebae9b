// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed layered memory store for MemFuse.
//!
//! One writer connection (tokio-rusqlite) in WAL mode, refinery embedded
//! migrations, and typed query modules for the five memory tables plus the
//! durable extraction queue. Embedding vectors are BLOB columns scanned
//! exactly; keyword recall over facts goes through an FTS5 shadow table.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::{now_iso, ExtractionJob, ScoredChunk, ScoredFact, Session};
