// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subagent registry, indexed by name.
//!
//! The registry provides agent lookup for the executor and generates the
//! agent roster the planner prompt advertises.

use std::collections::HashMap;
use std::sync::Arc;

use memfuse_core::traits::Subagent;
use memfuse_core::MemfuseError;

/// Registry of available subagents.
pub struct SubagentRegistry {
    agents: HashMap<String, Arc<dyn Subagent>>,
}

impl SubagentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Registers a subagent, indexed by its `name()`.
    pub fn register(&mut self, agent: Arc<dyn Subagent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    /// Looks up a subagent by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Subagent>> {
        self.agents.get(name).cloned()
    }

    /// Looks up a subagent, surfacing the logic-invariant error on miss.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Subagent>, MemfuseError> {
        self.get(name).ok_or_else(|| MemfuseError::AgentNotFound {
            name: name.to_string(),
        })
    }

    /// `(name, description)` pairs for all registered agents, sorted.
    pub fn roster(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .agents
            .values()
            .map(|a| (a.name(), a.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for SubagentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
