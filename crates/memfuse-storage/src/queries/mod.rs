// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table family.

pub mod chunks;
pub mod facts;
pub mod lessons;
pub mod queue;
pub mod sessions;
pub mod turns;
pub mod workflows;
