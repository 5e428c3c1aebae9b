// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end handling of a complex-task request.
//!
//! State machine: Reuse-Lookup -> (Plan | Fast-Path) -> Execute ->
//! (Success | Fail). Reuse looks up M3 by trigger similarity and skips the
//! planner entirely on a hit. Execution runs steps sequentially, feeding
//! each step the prior outputs; a failing step gets parameter repair up to
//! `step_retries` times. Recovered and exhausted steps both leave lessons.
//! On success the learner distills the plan into M3.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use memfuse_config::model::{LlmConfig, ProceduralConfig};
use memfuse_core::traits::{EmbeddingAdapter, ProviderAdapter, Subagent};
use memfuse_core::types::{
    ChatMessage, EmbeddingInput, Lesson, LessonStatus, ProviderRequest, SubagentContext,
    WorkflowStep,
};
use memfuse_core::MemfuseError;
use memfuse_storage::models::now_iso;
use memfuse_storage::queries::{lessons, workflows};
use memfuse_storage::Database;

use crate::learner::{ExecutedStep, WorkflowLearner};
use crate::planner::Planner;
use crate::registry::SubagentRegistry;

/// How many lessons are recalled to bias planning.
const LESSONS_FOR_PLANNING: usize = 5;

/// The result of a completed task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Final output returned to the user.
    pub output: String,
    /// Workflow id reused via the fast path, if any.
    pub reused_workflow: Option<String>,
    /// Workflow id stored by distillation, if any.
    pub stored_workflow: Option<String>,
    /// The executed step list.
    pub steps: Vec<WorkflowStep>,
}

/// Orchestrates planning, execution, and learning for complex goals.
pub struct Orchestrator {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingAdapter>,
    provider: Arc<dyn ProviderAdapter>,
    planner: Planner,
    registry: Arc<SubagentRegistry>,
    learner: WorkflowLearner,
    config: ProceduralConfig,
    llm: LlmConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingAdapter>,
        provider: Arc<dyn ProviderAdapter>,
        registry: Arc<SubagentRegistry>,
        config: ProceduralConfig,
        llm: LlmConfig,
    ) -> Self {
        let planner = Planner::new(provider.clone(), llm.clone());
        let learner = WorkflowLearner::new(db.clone(), config.clone());
        Self {
            db,
            embedder,
            provider,
            planner,
            registry,
            learner,
            config,
            llm,
        }
    }

    /// Handle one complex-task goal for a resolved session.
    ///
    /// `cancel` is observed at step boundaries; mid-step cancellation is
    /// best-effort (the current step finishes or fails on its own).
    pub async fn handle_goal(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, MemfuseError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.task_timeout_secs);
        let goal_embedding = self.embed_one(goal).await?;

        // Reuse-Lookup.
        let reused = if self.config.m3_enabled {
            self.lookup_reusable(goal, &goal_embedding).await?
        } else {
            None
        };

        let (plan, reused_workflow) = match reused {
            Some(workflow) => {
                info!(
                    workflow_id = %workflow.0,
                    "fast-path reuse, skipping planner"
                );
                workflows::bump_usage(&self.db, &workflow.0).await?;
                (workflow.1, Some(workflow.0))
            }
            None => {
                let recalled =
                    lessons::search_similar(&self.db, &goal_embedding, LESSONS_FOR_PLANNING)
                        .await?;
                let lesson_rows: Vec<Lesson> =
                    recalled.into_iter().map(|(lesson, _)| lesson).collect();
                let plan = self.planner.plan(goal, &self.registry, &lesson_rows).await?;
                (plan, None)
            }
        };

        // Execute.
        let executed = self
            .execute_plan(session_id, user_id, goal, &goal_embedding, &plan, deadline, cancel)
            .await?;

        let output = final_output(&executed);

        // Success: distill unless this was already a reused workflow.
        let stored_workflow = if self.config.m3_enabled && reused_workflow.is_none() {
            match self.learner.distill(goal, &goal_embedding, &executed).await {
                Ok(id) => Some(id),
                Err(e) => {
                    // Learning failures never fail a finished task.
                    warn!(error = %e, "workflow distillation failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(TaskOutcome {
            output,
            reused_workflow,
            stored_workflow,
            steps: executed
                .into_iter()
                .map(|s| WorkflowStep {
                    agent: s.agent,
                    params: s.params,
                })
                .collect(),
        })
    }

    /// Best reusable workflow: trigger similarity at or above the reuse
    /// threshold and a matching trigger pattern when one is set.
    async fn lookup_reusable(
        &self,
        goal: &str,
        goal_embedding: &[f32],
    ) -> Result<Option<(String, Vec<WorkflowStep>)>, MemfuseError> {
        let candidates =
            workflows::search_similar(&self.db, goal_embedding, self.config.top_k).await?;
        for (workflow, similarity) in candidates {
            if similarity < self.config.reuse_threshold {
                break;
            }
            if !pattern_matches(workflow.trigger_pattern.as_deref(), goal) {
                debug!(
                    workflow_id = %workflow.workflow_id,
                    "trigger pattern mismatch, skipping reuse candidate"
                );
                continue;
            }
            return Ok(Some((workflow.workflow_id, workflow.plan.steps)));
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_plan(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        goal: &str,
        goal_embedding: &[f32],
        plan: &[WorkflowStep],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutedStep>, MemfuseError> {
        let mut prior_outputs = serde_json::Map::new();
        let mut executed: Vec<ExecutedStep> = Vec::with_capacity(plan.len());

        for (index, step) in plan.iter().enumerate() {
            let step_number = index + 1;
            if cancel.is_cancelled() {
                return Err(MemfuseError::Internal(
                    "task cancelled at step boundary".to_string(),
                ));
            }
            if Instant::now() >= deadline {
                return Err(MemfuseError::Timeout {
                    duration: Duration::from_secs(self.config.task_timeout_secs),
                });
            }

            let agent = self.registry.require(&step.agent)?;
            let mut params = resolve_params(&step.params, goal, &prior_outputs);
            let ctx = SubagentContext {
                session_id: session_id.to_string(),
                user_id: user_id.map(str::to_string),
                prior_outputs: prior_outputs.clone(),
            };

            let mut first_error: Option<String> = None;
            let mut attempt = 0u32;
            let output = loop {
                match agent.execute(params.clone(), &ctx).await {
                    Ok(output) => break output,
                    Err(e) => {
                        if attempt >= self.config.step_retries {
                            warn!(
                                agent = %step.agent,
                                step = step_number,
                                error = %e,
                                "step failed after repair attempts"
                            );
                            self.record_lesson(
                                goal,
                                goal_embedding,
                                &step.agent,
                                LessonStatus::Fail,
                                Some(e.to_string()),
                                Some(format!(
                                    "exhausted {} parameter repair attempts",
                                    self.config.step_retries
                                )),
                                None,
                            )
                            .await;
                            return Err(e);
                        }
                        warn!(
                            agent = %step.agent,
                            step = step_number,
                            attempt,
                            error = %e,
                            "step failed, repairing parameters"
                        );
                        first_error.get_or_insert_with(|| e.to_string());
                        params = self
                            .repair_params(agent.as_ref(), &params, &e, goal)
                            .await?;
                        attempt += 1;
                    }
                }
            };

            if let Some(error) = first_error {
                // The step recovered: remember what worked.
                self.record_lesson(
                    goal,
                    goal_embedding,
                    &step.agent,
                    LessonStatus::Success,
                    Some(error),
                    Some("parameter repair recovered the step".to_string()),
                    Some(params.clone()),
                )
                .await;
            }

            prior_outputs.insert(
                format!("step_{step_number}_{}", step.agent),
                output.output.clone(),
            );
            executed.push(ExecutedStep {
                agent: step.agent.clone(),
                params,
                output: output.output,
            });
        }

        Ok(executed)
    }

    /// One parameter-repair completion for a failing step.
    async fn repair_params(
        &self,
        agent: &dyn Subagent,
        params: &serde_json::Value,
        error: &MemfuseError,
        goal: &str,
    ) -> Result<serde_json::Value, MemfuseError> {
        let system = format!(
            "You repair tool parameters. Agent '{}': {}\n\
             Parameter schema:\n{}\n\
             Return only the corrected parameters object.",
            agent.name(),
            agent.description(),
            agent.parameters_schema()
        );
        let user = format!(
            "Goal: {goal}\nFailing params: {params}\nError: {error}\nCorrected params:"
        );
        let repaired = self
            .provider
            .complete_json(
                ProviderRequest {
                    model: self.llm.model.clone(),
                    messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
                    max_tokens: self.llm.max_tokens,
                    temperature: 0.0,
                },
                &agent.parameters_schema(),
            )
            .await?;
        if !repaired.is_object() {
            return Err(MemfuseError::Validation(
                "repair did not produce a parameters object".to_string(),
            ));
        }
        Ok(repaired)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_lesson(
        &self,
        goal: &str,
        goal_embedding: &[f32],
        agent: &str,
        status: LessonStatus,
        error: Option<String>,
        fix_summary: Option<String>,
        working_params: Option<serde_json::Value>,
    ) {
        let lesson = Lesson {
            lesson_id: Uuid::new_v4().to_string(),
            trigger_embedding: goal_embedding.to_vec(),
            goal_text: goal.to_string(),
            agent: agent.to_string(),
            status,
            error,
            fix_summary,
            working_params,
            created_at: now_iso(),
        };
        if let Err(e) = lessons::insert_lesson(&self.db, &lesson).await {
            warn!(error = %e, "failed to record lesson");
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemfuseError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemfuseError::Internal("embedding returned no results".to_string()))
    }
}

/// An optional trigger pattern gates reuse as a case-insensitive substring.
fn pattern_matches(pattern: Option<&str>, goal: &str) -> bool {
    match pattern {
        None => true,
        Some(p) if p.is_empty() => true,
        Some(p) => goal.to_lowercase().contains(&p.to_lowercase()),
    }
}

/// Resolve `{{goal}}` and `{{step_N.output}}` placeholders in a params tree.
fn resolve_params(
    params: &serde_json::Value,
    goal: &str,
    prior_outputs: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    match params {
        serde_json::Value::String(s) => resolve_string(s, goal, prior_outputs),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_params(v, goal, prior_outputs)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| resolve_params(v, goal, prior_outputs))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(
    s: &str,
    goal: &str,
    prior_outputs: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    // A string that is exactly one step placeholder resolves to the full
    // output value, preserving structure.
    if let Some(step_number) = parse_step_placeholder(s) {
        let prefix = format!("step_{step_number}_");
        if let Some((_, value)) = prior_outputs.iter().find(|(k, _)| k.starts_with(&prefix)) {
            return value.clone();
        }
    }

    let mut resolved = s.replace("{{goal}}", goal);
    // Inline step references render as strings.
    let keys: Vec<&String> = prior_outputs.keys().collect();
    for key in keys {
        if let Some(step_number) = key
            .strip_prefix("step_")
            .and_then(|rest| rest.split('_').next())
        {
            let placeholder = format!("{{{{step_{step_number}.output}}}}");
            if resolved.contains(&placeholder) {
                let rendered = match &prior_outputs[key] {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                resolved = resolved.replace(&placeholder, &rendered);
            }
        }
    }
    serde_json::Value::String(resolved)
}

/// `{{step_N.output}}` and nothing else.
fn parse_step_placeholder(s: &str) -> Option<usize> {
    let inner = s.strip_prefix("{{step_")?.strip_suffix(".output}}")?;
    inner.parse().ok()
}

/// The task's user-facing output: the final step's report when present,
/// otherwise the full output map rendered as JSON.
fn final_output(executed: &[ExecutedStep]) -> String {
    if let Some(last) = executed.last() {
        if let Some(report) = last.output.get("report").and_then(|v| v.as_str()) {
            return report.to_string();
        }
    }
    let map: serde_json::Map<String, serde_json::Value> = executed
        .iter()
        .enumerate()
        .map(|(i, step)| (format!("step_{}_{}", i + 1, step.agent), step.output.clone()))
        .collect();
    serde_json::to_string_pretty(&serde_json::Value::Object(map))
        .unwrap_or_else(|_| "{}".to_string())
}
