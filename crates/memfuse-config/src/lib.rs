// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading and modeling for the MemFuse engine.
//!
//! The configuration is built once at startup from layered TOML files and
//! `MEMFUSE_`-prefixed environment variables, validated, then passed
//! explicitly into the router and every component.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::MemfuseConfig;
