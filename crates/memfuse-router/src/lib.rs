// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request routing and service assembly for MemFuse.
//!
//! [`MemoryRouter`] is the engine's inbound contract: write (chat or
//! task), query (fused or workflow-biased), and ingest. [`MemfuseService`]
//! wires every component from configuration with injected provider and
//! embedder backends.

pub mod classifier;
pub mod router;
pub mod service;

pub use classifier::TaskClassifier;
pub use router::{MemoryRouter, RequestMode, WriteResponse};
pub use service::MemfuseService;
