// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workflow distillation.
//!
//! On task success the learner turns the executed steps into a reusable
//! template: concrete goal text becomes `{{goal}}`, values copied from a
//! prior step's output become `{{step_N.output}}`. Upserts are serialized
//! by a named lock keyed on a quantized trigger embedding so two
//! near-duplicate successful runs produce one workflow, not two.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use memfuse_config::model::ProceduralConfig;
use memfuse_core::types::{Workflow, WorkflowPlan, WorkflowStep};
use memfuse_core::MemfuseError;
use memfuse_storage::models::now_iso;
use memfuse_storage::queries::workflows;
use memfuse_storage::Database;

/// One executed step with its final (working) params and output.
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    pub agent: String,
    pub params: serde_json::Value,
    pub output: serde_json::Value,
}

/// Distills successful executions into M3 workflows.
pub struct WorkflowLearner {
    db: Arc<Database>,
    config: ProceduralConfig,
    cluster_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkflowLearner {
    pub fn new(db: Arc<Database>, config: ProceduralConfig) -> Self {
        Self {
            db,
            config,
            cluster_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Distill and store a workflow for `goal`. Returns the stored
    /// workflow id (an existing cluster representative on dedup).
    pub async fn distill(
        &self,
        goal: &str,
        trigger_embedding: &[f32],
        steps: &[ExecutedStep],
    ) -> Result<String, MemfuseError> {
        let plan = WorkflowPlan {
            goal: goal.to_string(),
            steps: templatize(goal, steps),
        };

        // Named lock per trigger cluster: near-duplicate goals quantize to
        // the same key, so only one writer races the similarity check.
        let cluster_key = quantize_embedding(trigger_embedding);
        let lock = self.cluster_lock(cluster_key);
        let _guard = lock.lock().await;

        let nearest = workflows::search_similar(&self.db, trigger_embedding, 1).await?;
        if let Some((existing, similarity)) = nearest.into_iter().next() {
            if similarity >= self.config.distill_dedup_threshold {
                debug!(
                    workflow_id = %existing.workflow_id,
                    similarity,
                    "near-duplicate workflow, refreshing plan"
                );
                workflows::update_plan(
                    &self.db,
                    &existing.workflow_id,
                    &plan,
                    existing.trigger_pattern.as_deref(),
                )
                .await?;
                return Ok(existing.workflow_id);
            }
        }

        let workflow = Workflow {
            workflow_id: Uuid::new_v4().to_string(),
            trigger_embedding: trigger_embedding.to_vec(),
            trigger_pattern: None,
            plan,
            usage_count: 0,
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        workflows::insert_workflow(&self.db, &workflow).await?;
        info!(workflow_id = %workflow.workflow_id, goal, "workflow distilled");
        Ok(workflow.workflow_id)
    }

    fn cluster_lock(&self, key: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.cluster_locks
            .lock()
            .expect("cluster lock map poisoned")
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Quantize an embedding into a 64-bit cluster key from the sign bits of
/// its leading dimensions.
pub fn quantize_embedding(embedding: &[f32]) -> u64 {
    let mut key = 0u64;
    for (i, value) in embedding.iter().take(64).enumerate() {
        if *value > 0.0 {
            key |= 1 << i;
        }
    }
    key
}

/// Replace concrete arguments with slot placeholders.
fn templatize(goal: &str, steps: &[ExecutedStep]) -> Vec<WorkflowStep> {
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let prior: Vec<(usize, String)> = steps[..index]
                .iter()
                .enumerate()
                .map(|(i, s)| (i + 1, rendered_output(&s.output)))
                .collect();
            WorkflowStep {
                agent: step.agent.clone(),
                params: templatize_value(&step.params, goal, &prior),
            }
        })
        .collect()
}

/// The string form of a step output used for placeholder matching.
fn rendered_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn templatize_value(
    value: &serde_json::Value,
    goal: &str,
    prior: &[(usize, String)],
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            for (step_number, output) in prior {
                if !output.is_empty() && s == output {
                    return serde_json::Value::String(format!("{{{{step_{step_number}.output}}}}"));
                }
            }
            if s.contains(goal) && !goal.is_empty() {
                return serde_json::Value::String(s.replace(goal, "{{goal}}"));
            }
            value.clone()
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), templatize_value(v, goal, prior)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| templatize_value(v, goal, prior))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfuse_core::types::l2_normalize;

    fn step(agent: &str, params: serde_json::Value, output: serde_json::Value) -> ExecutedStep {
        ExecutedStep {
            agent: agent.to_string(),
            params,
            output,
        }
    }

    #[test]
    fn goal_text_becomes_placeholder() {
        let steps = vec![step(
            "web-search",
            serde_json::json!({"query": "summarize the seed"}),
            serde_json::json!({"abstract": "stuff"}),
        )];
        let template = templatize("summarize the seed", &steps);
        assert_eq!(template[0].params["query"], "{{goal}}");
    }

    #[test]
    fn goal_inside_longer_string_is_replaced() {
        let steps = vec![step(
            "rag-query",
            serde_json::json!({"query": "context for: summarize the seed"}),
            serde_json::json!({}),
        )];
        let template = templatize("summarize the seed", &steps);
        assert_eq!(template[0].params["query"], "context for: {{goal}}");
    }

    #[test]
    fn prior_output_becomes_step_placeholder() {
        let first_output = serde_json::json!({"answer": "the findings"});
        let steps = vec![
            step("rag-query", serde_json::json!({"query": "q"}), first_output.clone()),
            step(
                "report",
                serde_json::json!({"points": first_output.to_string()}),
                serde_json::json!({"report": "done"}),
            ),
        ];
        let template = templatize("goal text", &steps);
        assert_eq!(template[1].params["points"], "{{step_1.output}}");
    }

    #[test]
    fn quantization_is_stable_and_sign_based() {
        let a = l2_normalize(&[1.0, -1.0, 1.0, 1.0]);
        let b = l2_normalize(&[2.0, -3.0, 0.5, 0.1]);
        assert_eq!(quantize_embedding(&a), quantize_embedding(&b));

        let c = l2_normalize(&[-1.0, 1.0, 1.0, 1.0]);
        assert_ne!(quantize_embedding(&a), quantize_embedding(&c));
    }

    #[tokio::test]
    async fn distill_inserts_then_dedupes_cluster() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let learner = WorkflowLearner::new(db.clone(), ProceduralConfig::default());
        let embedding = l2_normalize(&vec![0.3; 128]);

        let steps = vec![step(
            "rag-query",
            serde_json::json!({"query": "the goal"}),
            serde_json::json!({"answer": "a"}),
        )];
        let first = learner.distill("the goal", &embedding, &steps).await.unwrap();
        // Identical trigger embedding: similarity 1.0 >= 0.97, same row.
        let second = learner.distill("the goal", &embedding, &steps).await.unwrap();
        assert_eq!(first, second);

        let stored = workflows::search_similar(&db, &embedding, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0.usage_count, 0);
    }

    #[tokio::test]
    async fn distant_goals_create_separate_workflows() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let learner = WorkflowLearner::new(db.clone(), ProceduralConfig::default());

        let mut a = vec![0.0; 128];
        a[0] = 1.0;
        let mut b = vec![0.0; 128];
        b[1] = 1.0;

        let steps = vec![step("report", serde_json::json!({}), serde_json::json!({}))];
        let first = learner.distill("goal a", &a, &steps).await.unwrap();
        let second = learner.distill("goal b", &b, &steps).await.unwrap();
        assert_ne!(first, second);
    }
}
