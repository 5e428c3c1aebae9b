// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document ingestion and the chat pipeline for MemFuse.

pub mod locks;
pub mod service;

pub use locks::SessionLocks;
pub use service::{ChatOutcome, RagService};
