//! Info command - display capsule metadata and contents.

use anyhow::{Context, Result};
use std::path::Path;

use crate::archive;

/// Execute the info command.
pub fn cmd_info(capsule_path: &Path) -> Result<()> {
    let capsule = archive::read(capsule_path)
        .with_context(|| format!("Failed to read capsule {}", capsule_path.display()))?;

    println!("Capsule: {}", capsule_path.display());
    println!("  alias:       {}", capsule.footer.alias);
    println!("  compression: {}", capsule.compression);
    println!(
        "  checksum:    {} {}",
        capsule.footer.checksum.algorithm,
        if capsule.checksum_ok() { "(ok)" } else { "(MISMATCH)" }
    );
    match &capsule.footer.signature {
        Some(signature) => println!("  signature:   {}", signature.algorithm),
        None => println!("  signature:   (none)"),
    }

    println!("  entries:     {}", capsule.entries.len());
    for record in &capsule.footer.entries {
        println!("    {:>8}  {}", record.size, record.path);
    }

    if let Some(metadata) = &capsule.footer.metadata {
        let pretty = serde_json::to_string_pretty(metadata)?;
        println!("  metadata:");
        for line in pretty.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}
