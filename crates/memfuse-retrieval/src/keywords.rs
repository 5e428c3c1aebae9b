// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword extraction for the fact keyword-match stream.
//!
//! Naive multilingual tokenization: latin alphanumeric runs plus CJK
//! sequences, lowercased, stopword-filtered, first-seen order, capped.

/// English stopwords filtered out of keyword queries.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "because", "but", "by", "can", "did", "do", "does",
    "for", "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me",
    "my", "no", "not", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "until", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "you", "your",
];

/// Extract up to `max_terms` keyword tokens from `text`.
pub fn extract_keywords(text: &str, max_terms: usize) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for token in tokenize(text) {
        let lower = token.to_lowercase();
        if lower.chars().count() <= 1 {
            continue;
        }
        if STOPWORDS.contains(&lower.as_str()) {
            continue;
        }
        if !seen.contains(&lower) {
            seen.push(lower);
        }
        if seen.len() >= max_terms {
            break;
        }
    }
    seen
}

/// Split into latin alphanumeric runs and CJK character sequences (len >= 2).
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut latin = String::new();
    let mut cjk = String::new();

    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            if !cjk.is_empty() {
                push_cjk(&mut tokens, &mut cjk);
            }
            latin.push(c);
        } else if is_cjk(c) {
            if !latin.is_empty() {
                tokens.push(std::mem::take(&mut latin));
            }
            cjk.push(c);
        } else {
            if !latin.is_empty() {
                tokens.push(std::mem::take(&mut latin));
            }
            if !cjk.is_empty() {
                push_cjk(&mut tokens, &mut cjk);
            }
        }
    }
    if !latin.is_empty() {
        tokens.push(latin);
    }
    if !cjk.is_empty() {
        push_cjk(&mut tokens, &mut cjk);
    }
    tokens
}

fn push_cjk(tokens: &mut Vec<String>, cjk: &mut String) {
    if cjk.chars().count() >= 2 {
        tokens.push(std::mem::take(cjk));
    } else {
        cjk.clear();
    }
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}
