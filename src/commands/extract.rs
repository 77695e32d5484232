//! Extract command - unpack capsule entries into a directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::archive;

/// Execute the extract command.
pub fn cmd_extract(capsule_path: &Path, dir: &Path) -> Result<()> {
    let capsule = archive::read(capsule_path)
        .with_context(|| format!("Failed to read capsule {}", capsule_path.display()))?;

    for (relative_path, bytes) in &capsule.entries {
        let target = dir.join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&target, bytes)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("  {} -> {}", relative_path, target.display());
    }

    println!(
        "Extracted {} entr{} to {}",
        capsule.entries.len(),
        if capsule.entries.len() == 1 { "y" } else { "ies" },
        dir.display()
    );
    Ok(())
}
