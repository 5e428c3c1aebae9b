// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the MemFuse memory engine.

use thiserror::Error;

/// The primary error type used across all MemFuse adapter traits and core operations.
#[derive(Debug, Error)]
pub enum MemfuseError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Embedding service errors (API failure, dimension mismatch, network).
    #[error("embedding error: {message}")]
    Embedding {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// LLM provider errors (API failure, token limits, model not found).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Boundary validation errors (bad plan, bad tool params, malformed JSON).
    ///
    /// Raised only after the single structured repair attempt has been spent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested subagent was not found in the registry.
    #[error("unknown agent: {name}")]
    AgentNotFound { name: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors (broken invariants, missing embeddings).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemfuseError {
    /// Whether this error class is worth retrying with backoff.
    ///
    /// Only transient external failures qualify; validation and invariant
    /// errors will not improve on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemfuseError::Embedding { .. }
                | MemfuseError::Provider { .. }
                | MemfuseError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MemfuseError::Timeout {
            duration: std::time::Duration::from_secs(30)
        }
        .is_transient());
        assert!(MemfuseError::Provider {
            message: "503".into(),
            source: None
        }
        .is_transient());
        assert!(!MemfuseError::Validation("bad plan".into()).is_transient());
        assert!(!MemfuseError::AgentNotFound {
            name: "nope".into()
        }
        .is_transient());
    }

    #[test]
    fn error_display_includes_context() {
        let err = MemfuseError::AgentNotFound {
            name: "sql-query".into(),
        };
        assert_eq!(err.to_string(), "unknown agent: sql-query");

        let err = MemfuseError::Config("missing embedding.api_key".into());
        assert!(err.to_string().contains("missing embedding.api_key"));
    }
}
