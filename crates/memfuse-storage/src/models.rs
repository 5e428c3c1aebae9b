// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage-local row models and shared helpers.
//!
//! The memory entities themselves ([`memfuse_core::types::Turn`], `Fact`,
//! `Workflow`, ...) live in `memfuse-core`; this module holds the rows that
//! only the store knows about (sessions, queue entries) and the scored
//! projections returned by similarity scans.

use memfuse_core::types::FactType;
use serde::{Deserialize, Serialize};

/// Current ISO 8601 UTC timestamp with microsecond precision.
///
/// Microseconds keep `updated_at` strictly increasing across back-to-back
/// writes on the same row.
pub fn now_iso() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// A resolved conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable uuid.
    pub id: String,
    /// Caller-supplied session string the uuid was resolved from.
    pub external_key: String,
    /// Optional user identifier.
    pub user_id: Option<String>,
    /// Highest round id already covered by a successful extraction.
    pub last_extracted_round_id: i64,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-update timestamp.
    pub updated_at: String,
}

/// A durable extraction queue entry.
///
/// Covers the unextracted rounds of `session_id` up to and including
/// `round_id`; the worker derives the actual round set from the session's
/// extraction marker at processing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    /// Auto-increment queue entry id.
    pub id: i64,
    /// Session whose rounds are to be extracted.
    pub session_id: String,
    /// Inclusive upper bound round id for this job.
    pub round_id: i64,
    /// Status: "pending", "processing", "completed", "failed".
    pub status: String,
    /// Number of processing attempts so far.
    pub attempts: i32,
    /// Maximum allowed attempts before permanent failure.
    pub max_attempts: i32,
    /// ISO 8601 timestamp until which this entry is locked for processing.
    pub locked_until: Option<String>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-update timestamp.
    pub updated_at: String,
}

/// A chunk row scored by a similarity scan.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub content: String,
    pub document_source: String,
    pub content_hash: String,
    pub score: f32,
    pub created_at: String,
}

/// A fact row scored by a similarity or keyword scan.
#[derive(Debug, Clone)]
pub struct ScoredFact {
    pub fact_id: String,
    pub fact_type: FactType,
    pub content: String,
    pub score: f32,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_is_sortable() {
        let a = now_iso();
        let b = now_iso();
        assert!(a <= b, "timestamps must be lexicographically ordered");
        assert!(a.ends_with('Z'));
    }

    #[test]
    fn now_iso_has_microsecond_precision() {
        let ts = now_iso();
        // 2026-03-01T00:00:00.123456Z -- fractional part is 6 digits.
        let frac = ts.split('.').nth(1).expect("fractional seconds");
        assert_eq!(frac.len(), 7, "expected 6 digits + Z, got {frac}");
    }
}
