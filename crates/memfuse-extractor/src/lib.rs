// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous M2 extraction for MemFuse.
//!
//! [`ExtractionTrigger`] decides when persisted rounds become jobs on the
//! durable queue; [`ExtractorWorkerPool`] drains the queue in the
//! background; [`MemoryExtractor`] runs the structured completion and the
//! dedup/contradiction gates.

pub mod extractor;
pub mod trigger;
pub mod worker;

pub use extractor::{extraction_schema, MemoryExtractor};
pub use trigger::ExtractionTrigger;
pub use worker::ExtractorWorkerPool;
