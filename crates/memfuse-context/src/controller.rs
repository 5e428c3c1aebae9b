// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-budgeted prompt composition.
//!
//! Produces `[system, ...history..., recall block, user]` under three
//! budgets: the user query is middle-truncated to `user_input_max_tokens`,
//! history is admitted newest-first in whole turns up to
//! `history_max_tokens`, and a final pass enforces
//! `total_context_max_tokens` by trimming recall tail-first, then history
//! oldest-first. The system prompt and the (truncated) user query are
//! never trimmed.

use std::collections::HashSet;

use tracing::debug;

use memfuse_config::model::ContextConfig;
use memfuse_core::types::{ChatMessage, RecalledItem, Speaker, Turn};
use memfuse_embedding::content_hash;

use crate::tokenizer::{count_tokens, truncate_middle};

/// Flat per-message token overhead (role framing and separators).
const MESSAGE_OVERHEAD: usize = 4;

/// Budgeted prompt composer.
pub struct ContextController {
    config: ContextConfig,
}

/// A composed prompt plus accounting for observability and tests.
#[derive(Debug, Clone)]
pub struct ComposedContext {
    /// Final ordered message list.
    pub messages: Vec<ChatMessage>,
    /// Total tokens across all messages, overhead included.
    pub total_tokens: usize,
    /// Recall items dropped by the final budget pass.
    pub dropped_recall: usize,
    /// History turns dropped by the final budget pass.
    pub dropped_history: usize,
}

impl ContextController {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Compose the final prompt for a chat completion.
    ///
    /// `history` is chronological (oldest first); `recalled` is the fused
    /// recall output in descending score order.
    pub fn compose(
        &self,
        query: &str,
        history: &[Turn],
        recalled: &[RecalledItem],
    ) -> ComposedContext {
        let query_text = truncate_middle(query, self.config.user_input_max_tokens);

        // Admit whole turns newest-first until the history budget is spent.
        let mut kept_history: Vec<&Turn> = Vec::new();
        let mut history_tokens = 0;
        for turn in history.iter().rev() {
            let tokens = count_tokens(&turn.content) + MESSAGE_OVERHEAD;
            if history_tokens + tokens > self.config.history_max_tokens {
                break;
            }
            kept_history.push(turn);
            history_tokens += tokens;
        }
        kept_history.reverse();

        // Order recall by score (input order) and drop duplicate content.
        let mut seen = HashSet::new();
        let mut kept_recall: Vec<&RecalledItem> = recalled
            .iter()
            .filter(|item| seen.insert(content_hash(&item.content)))
            .collect();

        // Final budget pass: recall tail-first, then history oldest-first.
        let mut dropped_recall = 0;
        let mut dropped_history = 0;
        let mut history_start = 0;
        loop {
            let total = self.total_tokens(&query_text, &kept_history[history_start..], &kept_recall);
            if total <= self.config.total_context_max_tokens {
                break;
            }
            if !kept_recall.is_empty() {
                kept_recall.pop();
                dropped_recall += 1;
            } else if history_start < kept_history.len() {
                history_start += 1;
                dropped_history += 1;
            } else {
                // Only the system prompt and the query remain; both are
                // inviolable, so this is as small as the prompt gets.
                break;
            }
        }
        let kept_history = &kept_history[history_start..];

        if dropped_recall > 0 || dropped_history > 0 {
            debug!(
                dropped_recall,
                dropped_history, "total context budget forced trimming"
            );
        }

        let mut messages = Vec::with_capacity(kept_history.len() + 3);
        messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        for turn in kept_history {
            let message = match turn.speaker {
                Speaker::User => ChatMessage::user(turn.content.clone()),
                Speaker::Assistant => ChatMessage::assistant(turn.content.clone()),
            };
            messages.push(message);
        }
        if let Some(block) = render_recall_block(&kept_recall) {
            messages.push(ChatMessage::system(block));
        }
        messages.push(ChatMessage::user(query_text.clone()));

        let total_tokens = messages
            .iter()
            .map(|m| count_tokens(&m.content) + MESSAGE_OVERHEAD)
            .sum();

        ComposedContext {
            messages,
            total_tokens,
            dropped_recall,
            dropped_history,
        }
    }

    fn total_tokens(&self, query: &str, history: &[&Turn], recall: &[&RecalledItem]) -> usize {
        let mut total = count_tokens(&self.config.system_prompt) + MESSAGE_OVERHEAD;
        total += count_tokens(query) + MESSAGE_OVERHEAD;
        for turn in history {
            total += count_tokens(&turn.content) + MESSAGE_OVERHEAD;
        }
        if let Some(block) = render_recall_block(recall) {
            total += count_tokens(&block) + MESSAGE_OVERHEAD;
        }
        total
    }
}

/// Render recall items into a single system context block, best first.
fn render_recall_block(items: &[&RecalledItem]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let body = items
        .iter()
        .map(|item| {
            format!(
                "[{} | {} | score {:.3}]\n{}",
                item.kind.as_str(),
                item.origin,
                item.score,
                item.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(format!("Relevant knowledge:\n{body}"))
}
