// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding access for MemFuse.
//!
//! [`HttpEmbedder`] wraps the external text-to-vector service;
//! [`CachingEmbedder`] layers a content-hash keyed LRU with single-flight
//! coalescing on top of any adapter. [`content_hash`] is the shared
//! dedup/idempotency key for chunk ingest and recall fusion.

pub mod cache;
pub mod client;

pub use cache::{content_hash, CachingEmbedder};
pub use client::HttpEmbedder;
