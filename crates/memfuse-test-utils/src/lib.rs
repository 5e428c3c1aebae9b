// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic mock adapters for MemFuse tests.
//!
//! [`MockProvider`] scripts LLM responses through FIFO queues and records
//! call counts; [`MockEmbedder`] produces stable bag-of-words embeddings
//! so similarity-dependent behavior is testable without a network.

pub mod mock_embedder;
pub mod mock_provider;

pub use mock_embedder::{MockEmbedder, MOCK_DIM};
pub use mock_provider::MockProvider;
