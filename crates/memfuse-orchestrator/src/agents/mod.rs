// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in subagents.

pub mod database_query;
pub mod rag_query;
pub mod report;
pub mod shell;
pub mod web_search;

pub use database_query::DatabaseQueryAgent;
pub use rag_query::RagQueryAgent;
pub use report::ReportGenerationAgent;
pub use shell::ShellCommandAgent;
pub use web_search::WebSearchAgent;
