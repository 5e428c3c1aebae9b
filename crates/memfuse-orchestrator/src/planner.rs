// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task planning via structured-JSON completion.
//!
//! The planner advertises the subagent roster, asks for an ordered step
//! list, and validates the result against the registry. An invalid plan
//! gets exactly one repair round-trip; a second invalid plan is fatal for
//! the task. If the provider itself is unavailable the planner degrades
//! to a built-in default plan so the goal can still be served.

use std::sync::Arc;

use tracing::{debug, warn};

use memfuse_config::model::LlmConfig;
use memfuse_core::traits::ProviderAdapter;
use memfuse_core::types::{ChatMessage, Lesson, ProviderRequest, WorkflowStep};
use memfuse_core::MemfuseError;

use crate::registry::SubagentRegistry;

/// How many lessons are quoted into the planning prompt.
const LESSONS_IN_PROMPT: usize = 3;

/// JSON Schema for planner output.
pub fn plan_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "minItems": 1,
                "maxItems": 6,
                "items": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "params": { "type": "object" }
                    },
                    "required": ["agent"]
                }
            }
        },
        "required": ["steps"]
    })
}

/// Produces ordered step lists for complex goals.
pub struct Planner {
    provider: Arc<dyn ProviderAdapter>,
    llm: LlmConfig,
}

impl Planner {
    pub fn new(provider: Arc<dyn ProviderAdapter>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// Plan `goal` against the registered agents, biased by recent lessons.
    pub async fn plan(
        &self,
        goal: &str,
        registry: &SubagentRegistry,
        lessons: &[Lesson],
    ) -> Result<Vec<WorkflowStep>, MemfuseError> {
        let system = build_system_prompt(registry, lessons);
        let request = ProviderRequest {
            model: self.llm.model.clone(),
            messages: vec![
                ChatMessage::system(system.clone()),
                ChatMessage::user(format!("Goal: {goal}\nProduce steps now.")),
            ],
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
        };

        let value = match self.provider.complete_json(request.clone(), &plan_schema()).await {
            Ok(value) => value,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "planner LLM unavailable, using default plan");
                return Ok(fallback_plan(goal));
            }
            Err(e) => return Err(e),
        };

        let steps = parse_plan(&value);
        match validate_plan(&steps, registry) {
            Ok(()) => {
                debug!(steps = steps.len(), "plan accepted");
                return Ok(steps);
            }
            Err(reason) => {
                warn!(reason = %reason, "plan invalid, attempting repair");
                let mut repair = request;
                repair.messages.push(ChatMessage::assistant(value.to_string()));
                repair.messages.push(ChatMessage::user(format!(
                    "That plan is invalid: {reason}. \
                     Produce a corrected plan using only the listed agents."
                )));

                let repaired_value = match self
                    .provider
                    .complete_json(repair, &plan_schema())
                    .await
                {
                    Ok(value) => value,
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "planner repair unavailable, using default plan");
                        return Ok(fallback_plan(goal));
                    }
                    Err(e) => return Err(e),
                };
                let repaired = parse_plan(&repaired_value);
                validate_plan(&repaired, registry).map_err(|second| {
                    MemfuseError::Validation(format!(
                        "plan invalid after repair: {second} (first failure: {reason})"
                    ))
                })?;
                Ok(repaired)
            }
        }
    }
}

/// Default plan used when the planner LLM is unreachable.
pub fn fallback_plan(goal: &str) -> Vec<WorkflowStep> {
    vec![
        WorkflowStep {
            agent: "web-search".to_string(),
            params: serde_json::json!({"query": goal}),
        },
        WorkflowStep {
            agent: "rag-query".to_string(),
            params: serde_json::json!({"query": goal}),
        },
        WorkflowStep {
            agent: "report".to_string(),
            params: serde_json::json!({}),
        },
    ]
}

fn build_system_prompt(registry: &SubagentRegistry, lessons: &[Lesson]) -> String {
    let mut lines = vec![
        "You are a task planner. Decompose the high-level goal into ordered steps.".to_string(),
        "Available agents:".to_string(),
    ];
    for (name, description) in registry.roster() {
        lines.push(format!("- {name}: {description}"));
    }
    lines.push(
        "Return strict JSON: {\"steps\":[{\"agent\":\"<name>\",\"params\":{...}}]}".to_string(),
    );
    lines.push(
        "Rules: keep 2-6 steps. Use rag-query for indexed knowledge, web-search for the \
         live web, db-query for SQL, report for final summarization. Reference a prior \
         step's output as {{step_N.output}} in params when needed."
            .to_string(),
    );

    if !lessons.is_empty() {
        lines.push("\nLessons from similar past goals:".to_string());
        for lesson in lessons.iter().take(LESSONS_IN_PROMPT) {
            let outcome = match lesson.status {
                memfuse_core::types::LessonStatus::Success => "succeeded",
                memfuse_core::types::LessonStatus::Fail => "failed",
            };
            let mut line = format!("- {} {outcome}", lesson.agent);
            if let Some(error) = &lesson.error {
                line.push_str(&format!(" ({error})"));
            }
            if let Some(fix) = &lesson.fix_summary {
                line.push_str(&format!("; fix: {fix}"));
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Parse steps leniently: entries without an agent name are dropped,
/// missing params become empty objects.
fn parse_plan(value: &serde_json::Value) -> Vec<WorkflowStep> {
    let Some(steps) = value.get("steps").and_then(|v| v.as_array()) else {
        return vec![];
    };
    steps
        .iter()
        .filter_map(|step| {
            let agent = step.get("agent")?.as_str()?.trim().to_string();
            if agent.is_empty() {
                return None;
            }
            let params = match step.get("params") {
                Some(serde_json::Value::Object(map)) => {
                    serde_json::Value::Object(map.clone())
                }
                _ => serde_json::json!({}),
            };
            Some(WorkflowStep { agent, params })
        })
        .collect()
}

/// A valid plan is non-empty and references only registered agents.
fn validate_plan(steps: &[WorkflowStep], registry: &SubagentRegistry) -> Result<(), String> {
    if steps.is_empty() {
        return Err("plan has no steps".to_string());
    }
    for step in steps {
        if !registry.contains(&step.agent) {
            return Err(format!("unknown agent '{}'", step.agent));
        }
        if !step.params.is_object() {
            return Err(format!("params for '{}' is not an object", step.agent));
        }
    }
    Ok(())
}
