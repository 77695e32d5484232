//! Validate command - resolve and check the configuration document.

use anyhow::{Context, Result};
use std::path::Path;

use super::resolve_config_path;
use crate::config::BuildConfig;

/// Execute the validate command.
pub fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = BuildConfig::resolve_file(&path)
        .with_context(|| format!("Configuration {} is invalid", path.display()))?;

    config.print();
    println!("[PASS] {} is valid", path.display());
    Ok(())
}
