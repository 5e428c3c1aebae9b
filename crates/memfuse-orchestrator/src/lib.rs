// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task orchestration for MemFuse.
//!
//! The planner decomposes goals over the subagent registry, the
//! orchestrator executes plans with parameter repair and lesson
//! recording, and the learner distills successful runs into reusable M3
//! workflows with fast-path reuse.

pub mod agents;
pub mod learner;
pub mod orchestrator;
pub mod planner;
pub mod registry;

pub use learner::{ExecutedStep, WorkflowLearner};
pub use orchestrator::{Orchestrator, TaskOutcome};
pub use planner::{fallback_plan, plan_schema, Planner};
pub use registry::SubagentRegistry;
