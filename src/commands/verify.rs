//! Verify command - check capsule checksum and signature.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::archive;
use crate::signing;

/// Execute the verify command.
pub fn cmd_verify(capsule_path: &Path) -> Result<()> {
    let capsule = archive::read(capsule_path)
        .with_context(|| format!("Failed to read capsule {}", capsule_path.display()))?;

    if !capsule.checksum_ok() {
        bail!(
            "checksum mismatch: footer records {} but body hashes to {}",
            capsule.footer.checksum.digest,
            capsule.computed_digest
        );
    }
    println!(
        "[PASS] {} checksum ok",
        capsule.footer.checksum.algorithm
    );

    match &capsule.footer.signature {
        Some(signature) => {
            // Prefer the exported sidecar; fall back to the embedded key.
            let sidecar = signing::pubkey_path(&capsule.base_output_path(capsule_path));
            let public_key_pem = if sidecar.is_file() {
                std::fs::read_to_string(&sidecar)
                    .with_context(|| format!("Failed to read {}", sidecar.display()))?
            } else {
                signature.public_key.clone()
            };
            let raw_signature = hex::decode(&signature.signature)
                .context("signature record is not valid hex")?;
            if !signing::verify(&public_key_pem, &capsule.body, &raw_signature)? {
                bail!("signature verification failed");
            }
            println!("[PASS] {} signature ok", signature.algorithm);
        }
        None => println!("  capsule is unsigned"),
    }
    Ok(())
}
