//! Edit commands - add/replace or remove a single capsule entry.
//!
//! Edits rewrite the container in place, preserving alias, stub,
//! metadata and compression. A later entry may only overwrite an earlier
//! one when `--replace` is passed. Editing invalidates an existing
//! signature: the signature is dropped with a warning and a rebuild is
//! needed to re-sign.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::archive::{self, ArchiveWriter, Capsule, CapsuleWriter};
use crate::config::SignatureAlgorithm;

/// Add or replace one entry.
pub fn cmd_add(capsule_path: &Path, file: &Path, relative_path: &str, replace: bool) -> Result<()> {
    let capsule = archive::read(capsule_path)
        .with_context(|| format!("Failed to read capsule {}", capsule_path.display()))?;

    let exists = capsule
        .entries
        .iter()
        .any(|(path, _)| path == relative_path);
    if exists && !replace {
        bail!("entry `{relative_path}` already exists (pass --replace to overwrite)");
    }

    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut entries = capsule.entries.clone();
    if exists {
        for entry in entries.iter_mut() {
            if entry.0 == relative_path {
                entry.1 = bytes.clone();
            }
        }
    } else {
        entries.push((relative_path.to_string(), bytes));
    }

    rewrite(capsule_path, &capsule, entries)?;
    println!(
        "{} `{}` in {}",
        if exists { "Replaced" } else { "Added" },
        relative_path,
        capsule_path.display()
    );
    Ok(())
}

/// Remove one entry.
pub fn cmd_remove(capsule_path: &Path, relative_path: &str) -> Result<()> {
    let capsule = archive::read(capsule_path)
        .with_context(|| format!("Failed to read capsule {}", capsule_path.display()))?;

    let before = capsule.entries.len();
    let entries: Vec<_> = capsule
        .entries
        .iter()
        .filter(|(path, _)| path != relative_path)
        .cloned()
        .collect();
    if entries.len() == before {
        bail!("entry `{relative_path}` not found in capsule");
    }

    rewrite(capsule_path, &capsule, entries)?;
    println!("Removed `{}` from {}", relative_path, capsule_path.display());
    Ok(())
}

fn rewrite(
    on_disk: &Path,
    capsule: &Capsule,
    entries: Vec<(String, Vec<u8>)>,
) -> Result<()> {
    let algorithm = match capsule.footer.checksum.algorithm.as_str() {
        "sha512" => SignatureAlgorithm::Sha512,
        _ => SignatureAlgorithm::Sha256,
    };
    if capsule.footer.signature.is_some() {
        println!("[WARN] edit invalidates the existing signature; rebuild with the key to re-sign");
    }

    let output = capsule.base_output_path(on_disk);
    let mut writer = CapsuleWriter::new();
    writer.open(&output, &capsule.footer.alias, algorithm)?;
    writer.set_stub(capsule.stub.clone())?;
    for (path, bytes) in entries {
        writer.append(&path, bytes)?;
    }
    if let Some(metadata) = capsule.footer.metadata.clone() {
        writer.set_metadata(metadata)?;
    }
    writer.set_compression(capsule.compression)?;
    writer.commit()?;
    Ok(())
}
