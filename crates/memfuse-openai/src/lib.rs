// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible LLM provider for MemFuse.
//!
//! [`OpenAiProvider`] implements the two-operation provider contract
//! (`complete`, `complete_json`); [`RetryingProvider`] layers transient
//! retry with exponential backoff on top of any provider.

pub mod client;
pub mod retry;

pub use client::{parse_json_response, OpenAiProvider};
pub use retry::{RetryConfig, RetryingProvider};
