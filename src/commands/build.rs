//! Build command - runs the full pipeline.

use anyhow::{Context, Result};
use std::path::Path;

use super::resolve_config_path;
use crate::config::BuildConfig;
use crate::pipeline::BuildPipeline;

/// Execute the build command.
pub fn cmd_build(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = BuildConfig::resolve_file(&path)
        .with_context(|| format!("Failed to resolve configuration {}", path.display()))?;

    let result = BuildPipeline::with_defaults(&config).run()?;

    if result.empty {
        println!("[WARN] empty build: the capsule contains no entries");
    }
    Ok(())
}
