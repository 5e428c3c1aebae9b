// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heuristic multi-step-goal classification.
//!
//! Classifies an untagged message as a complex task or plain chat using
//! zero-cost heuristic rules. No LLM pre-call, no network, no latency.
//! Disabled by default; explicit `tag=m3` always routes to the task path.

/// Multi-step indicator patterns (contains, case-insensitive).
const TASK_INDICATORS: &[&str] = &[
    "and then",
    "after that",
    "step by step",
    "first ",
    "finally",
    "summarize",
    "compile a report",
    "generate a report",
    "research",
    "compare",
    "analyze",
    "gather",
    "and list",
    "then list",
    "search the web",
    "run a query",
];

/// Conversational patterns that stay on the chat path (exact match).
const CHAT_EXACT: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "bye", "ok", "okay", "yes", "no", "sure",
];

/// Result of classifying a message.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    /// Whether the message should take the task path.
    pub is_task: bool,
    /// Confidence in the classification (0.0-1.0).
    pub confidence: f32,
    /// Human-readable reason for the decision.
    pub reason: &'static str,
}

/// Heuristic chat-vs-task classifier.
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a message.
    pub fn classify(&self, message: &str) -> ClassificationResult {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return ClassificationResult {
                is_task: false,
                confidence: 1.0,
                reason: "empty message",
            };
        }

        let lower = trimmed.to_lowercase();
        if CHAT_EXACT.iter().any(|p| lower == *p) {
            return ClassificationResult {
                is_task: false,
                confidence: 1.0,
                reason: "conversational exact match",
            };
        }

        let mut score: i32 = 0;

        // Signal 1: explicit multi-step indicators.
        let indicator_hits = TASK_INDICATORS
            .iter()
            .filter(|p| lower.contains(*p))
            .count() as i32;
        score += indicator_hits * 2;

        // Signal 2: conjunction chains suggest multiple actions.
        let conjunctions = lower.matches(" and ").count() + lower.matches(", then ").count();
        if conjunctions >= 1 {
            score += 1;
        }

        // Signal 3: enumeration markers ("list three", "1.", "2)").
        if lower.contains("list ")
            || trimmed.lines().any(|l| {
                let l = l.trim_start();
                l.starts_with("1.") || l.starts_with("1)") || l.starts_with("- ")
            })
        {
            score += 1;
        }

        // Signal 4: very short messages rarely need orchestration.
        let word_count = trimmed.split_whitespace().count();
        if word_count <= 4 {
            score -= 2;
        }

        let is_task = score >= 3;
        let confidence = (score.unsigned_abs() as f32 / 6.0).min(1.0);
        ClassificationResult {
            is_task,
            confidence,
            reason: if is_task {
                "multi-step goal indicators"
            } else {
                "no strong task signals"
            },
        }
    }
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new()
    }
}
