//! CLI command implementations for the Plinth broker.

pub mod actions;
pub mod audit;
pub mod run;

use anyhow::{Context, Result};
use plinth_core::PlinthConfig;
use std::path::Path;

/// Load configuration, resolving relative paths against the file's directory.
pub fn load_config(path: &Path) -> Result<PlinthConfig> {
    PlinthConfig::load_with_context(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))
}
