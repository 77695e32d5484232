//! The build pipeline.
//!
//! A linear state machine: CleanPrevious → Open → Populate → Stub →
//! Metadata → Compress → Sign → Finalize. Any step's error aborts the
//! build immediately; whatever partial output exists stays on disk
//! (callers needing atomicity build to a temporary path and rename).
//! Collaborators are injected at construction; the pipeline never
//! resolves them by name.

use std::fmt;
use std::io::{BufRead, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use thiserror::Error;

use crate::archive::{self, ArchiveError, ArchiveWriter, CapsuleWriter, SignatureRecord};
use crate::config::{BuildConfig, Compression};
use crate::signing::{
    self, Ed25519Signer, SigningError, SigningMaterial, SigningProvider,
};
use crate::source::{SourceError, SourceSet};
use crate::stub::{self, StubError};
use crate::transform::{CompactionHook, TransformError, Transformer};

/// The pipeline step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CleanPrevious,
    Open,
    Populate,
    Stub,
    Metadata,
    Compress,
    Sign,
    Finalize,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CleanPrevious => "clean-previous",
            Self::Open => "open",
            Self::Populate => "populate",
            Self::Stub => "stub",
            Self::Metadata => "metadata",
            Self::Compress => "compress",
            Self::Sign => "sign",
            Self::Finalize => "finalize",
        };
        write!(f, "{name}")
    }
}

/// What went wrong inside a step.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Stub(#[from] StubError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// A build abort, carrying the failing step.
#[derive(Debug, Error)]
#[error("build aborted during {step}: {source}")]
pub struct BuildError {
    pub step: Step,
    #[source]
    pub source: StageError,
}

impl BuildError {
    fn at<E: Into<StageError>>(step: Step) -> impl FnOnce(E) -> Self {
        move |e| Self {
            step,
            source: e.into(),
        }
    }
}

/// Outcome of a completed build.
#[derive(Debug)]
pub struct BuildResult {
    pub output_path: PathBuf,
    pub entry_count: usize,
    pub compression: Compression,
    /// Signature descriptor: the configured algorithm name.
    pub signature: String,
    /// True when the pipeline completed but added zero entries.
    pub empty: bool,
}

/// Orchestrates one build from a resolved configuration.
pub struct BuildPipeline<'a> {
    config: &'a BuildConfig,
    writer: Box<dyn ArchiveWriter>,
    signer: Box<dyn SigningProvider>,
    hooks: Vec<CompactionHook>,
    prompt: Box<dyn Fn() -> std::io::Result<String>>,
}

impl<'a> BuildPipeline<'a> {
    /// Construct with explicit collaborators.
    pub fn new(
        config: &'a BuildConfig,
        writer: Box<dyn ArchiveWriter>,
        signer: Box<dyn SigningProvider>,
    ) -> Self {
        Self {
            config,
            writer,
            signer,
            hooks: Vec::new(),
            prompt: Box::new(stdin_prompt),
        }
    }

    /// Construct with the shipped capsule writer and Ed25519 signer.
    pub fn with_defaults(config: &'a BuildConfig) -> Self {
        Self::new(config, Box::new(CapsuleWriter::new()), Box::new(Ed25519Signer))
    }

    /// Register a custom compaction hook, run in registration order.
    pub fn add_compaction_hook(&mut self, hook: CompactionHook) {
        self.hooks.push(hook);
    }

    /// Replace the interactive passphrase prompt.
    pub fn set_passphrase_prompt(&mut self, prompt: Box<dyn Fn() -> std::io::Result<String>>) {
        self.prompt = prompt;
    }

    /// Run the pipeline to completion or first error.
    pub fn run(mut self) -> Result<BuildResult, BuildError> {
        let config = self.config;
        println!("=== Building {} ===", config.output_path.display());

        // CleanPrevious: stale outputs and sidecars go away so rebuilds
        // are idempotent. A missing previous output is not an error.
        clean_previous(config).map_err(BuildError::at(Step::CleanPrevious))?;

        // Open
        self.writer
            .open(&config.output_path, &config.alias, config.algorithm)
            .map_err(BuildError::at(Step::Open))?;

        // Populate
        let entries = SourceSet::resolve(config).map_err(BuildError::at(Step::Populate))?;
        let mut transformer = Transformer::new(config);
        for hook in self.hooks.drain(..) {
            transformer.add_hook(hook);
        }
        for entry in &entries {
            let bytes = std::fs::read(&entry.absolute_path)
                .map_err(|source| TransformError::Read {
                    path: entry.absolute_path.clone(),
                    source,
                })
                .map_err(BuildError::at(Step::Populate))?;
            let bytes = transformer
                .transform(entry, bytes)
                .map_err(BuildError::at(Step::Populate))?;
            self.writer
                .append(&entry.relative_path, bytes)
                .map_err(BuildError::at(Step::Populate))?;
            println!("  + {}", entry.relative_path);
        }
        let empty = entries.is_empty();
        if empty {
            println!("[WARN] no sources resolved; building an empty capsule");
        }

        // Stub
        let stub_bytes = stub::synthesize(config).map_err(BuildError::at(Step::Stub))?;
        self.writer
            .set_stub(stub_bytes)
            .map_err(BuildError::at(Step::Stub))?;

        // Metadata
        if let Some(metadata) = &config.metadata {
            self.writer
                .set_metadata(metadata.clone())
                .map_err(BuildError::at(Step::Metadata))?;
        }

        // Compress
        if config.compression != Compression::None {
            self.writer
                .set_compression(config.compression)
                .map_err(BuildError::at(Step::Compress))?;
            if config.main.is_some() {
                println!(
                    "[NOTE] main script will not be directly runnable with compression `{}`",
                    config.compression
                );
            }
        }

        // Sign: material is acquired here, used once, and zeroed when it
        // drops at the end of the block.
        if let Some(key_path) = &config.private_key_path {
            let material = SigningMaterial::load(
                key_path,
                config.private_key_pass.as_ref(),
                &*self.prompt,
            )
            .map_err(BuildError::at(Step::Sign))?;
            let body = self
                .writer
                .body_bytes()
                .map_err(BuildError::at(Step::Sign))?;
            let block = self
                .signer
                .sign(&material, &body)
                .map_err(BuildError::at(Step::Sign))?;
            let sidecar = signing::pubkey_path(&config.output_path);
            std::fs::write(&sidecar, block.public_key_pem.as_bytes())
                .map_err(|source| SigningError::PubkeyWrite {
                    path: sidecar.clone(),
                    source,
                })
                .map_err(BuildError::at(Step::Sign))?;
            self.writer
                .set_signature(SignatureRecord {
                    algorithm: block.algorithm,
                    signature: hex::encode(&block.signature),
                    public_key: block.public_key_pem,
                })
                .map_err(BuildError::at(Step::Sign))?;
            println!("  signed; public key at {}", sidecar.display());
        }

        // Finalize
        let output_path = self.writer.commit().map_err(BuildError::at(Step::Finalize))?;
        if let Some(mode) = config.chmod {
            std::fs::set_permissions(&output_path, std::fs::Permissions::from_mode(mode))
                .map_err(BuildError::at(Step::Finalize))?;
        }

        println!("=== Build complete ===");
        println!("  output:  {}", output_path.display());
        println!("  entries: {}", entries.len());

        Ok(BuildResult {
            output_path,
            entry_count: entries.len(),
            compression: config.compression,
            signature: config.algorithm.to_string(),
            empty,
        })
    }
}

/// Remove a previous output and its known sidecar variants.
fn clean_previous(config: &BuildConfig) -> Result<(), std::io::Error> {
    let mut targets = vec![config.output_path.clone()];
    for ext in ["gz", "bz2", "zip"] {
        targets.push(archive::path_with_suffix(&config.output_path, ext));
    }
    targets.push(signing::pubkey_path(&config.output_path));
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => println!("  removed stale {}", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn stdin_prompt() -> std::io::Result<String> {
    eprint!("Private key passphrase: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_display_names() {
        assert_eq!(Step::CleanPrevious.to_string(), "clean-previous");
        assert_eq!(Step::Sign.to_string(), "sign");
    }

    #[test]
    fn build_error_names_the_step() {
        let err = BuildError {
            step: Step::Populate,
            source: StageError::Source(SourceError::Duplicate("a.sh".to_string())),
        };
        let message = err.to_string();
        assert!(message.contains("populate"));
    }
}
