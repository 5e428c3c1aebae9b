// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid fused recall for MemFuse.
//!
//! Combines exact vector scans over chunks, facts, and workflow triggers
//! with FTS5 keyword matching on facts, fusing streams in score order with
//! content-hash dedup.

pub mod keywords;
pub mod retriever;

pub use keywords::extract_keywords;
pub use retriever::{HybridRetriever, RecallRequest};
