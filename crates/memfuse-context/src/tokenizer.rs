// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic token counting over the cl100k_base BPE vocabulary.
//!
//! All budgets in the engine are measured with this module so counts are
//! stable across runs and across components.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is embedded"))
}

/// Count cl100k_base tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    bpe().encode_ordinary(text).len()
}

/// Truncate `text` to at most `max_tokens`, dropping tokens from the
/// middle so both the opening and the trailing suffix survive for natural
/// continuation.
///
/// Re-tokenization at the join seam can merge tokens differently, so the
/// result is re-counted and shrunk until it actually fits the budget.
pub fn truncate_middle(text: &str, max_tokens: usize) -> String {
    let tokens = bpe().encode_ordinary(text);
    if tokens.len() <= max_tokens {
        return text.to_string();
    }
    if max_tokens == 0 {
        return String::new();
    }

    let mut budget = max_tokens;
    while budget > 0 {
        let head = budget / 2;
        let tail = budget - head;
        let mut kept = tokens[..head].to_vec();
        kept.extend_from_slice(&tokens[tokens.len() - tail..]);

        match bpe().decode(kept) {
            Ok(candidate) if count_tokens(&candidate) <= max_tokens => return candidate,
            // Either the seam merged into an over-budget tokenization or
            // the cut landed mid-codepoint; shrink and retry.
            _ => budget -= 1,
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_deterministic() {
        let text = "Plan B was rejected because of cost overruns of 40%.";
        assert_eq!(count_tokens(text), count_tokens(text));
        assert!(count_tokens(text) > 0);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn short_text_passes_through() {
        let text = "hello world";
        assert_eq!(truncate_middle(text, 100), text);
    }

    #[test]
    fn truncation_respects_budget() {
        let text = "alpha beta gamma delta ".repeat(200);
        for budget in [1, 5, 17, 64] {
            let out = truncate_middle(&text, budget);
            assert!(
                count_tokens(&out) <= budget,
                "budget {budget} violated: {} tokens",
                count_tokens(&out)
            );
        }
    }

    #[test]
    fn truncation_preserves_head_and_tail() {
        let mut text = String::from("BEGIN marker ");
        text.push_str(&"filler words in the middle ".repeat(300));
        text.push_str("END marker");

        let out = truncate_middle(&text, 40);
        assert!(out.starts_with("BEGIN"), "head must survive: {out:?}");
        assert!(out.ends_with("END marker"), "tail must survive: {out:?}");
    }

    #[test]
    fn zero_budget_yields_empty() {
        assert_eq!(truncate_middle("some text here", 0), "");
    }
}
