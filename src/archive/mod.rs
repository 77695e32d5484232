//! Capsule container encoding.
//!
//! A capsule is laid out as: stub bytes ending in the terminator marker,
//! a deterministic tar stream of the entries, a JSON footer (alias, entry
//! index, metadata, checksum, optional signature), and a fixed 8-byte
//! trailer (`u32` footer length + `CAPS` magic) so readers can locate the
//! footer from the end of the file. The checksum and signature cover the
//! stub plus the entry stream.
//!
//! The build pipeline consumes the [`ArchiveWriter`] trait; the concrete
//! [`CapsuleWriter`]/reader pair lives here so the CLI works end-to-end.

pub mod reader;
pub mod writer;

pub use reader::{read, Capsule};
pub use writer::CapsuleWriter;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{Compression, SignatureAlgorithm};

/// Trailer magic closing every capsule file.
pub const TRAILER_MAGIC: &[u8; 4] = b"CAPS";

/// Errors surfaced by the container writer and reader.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is not open")]
    NotOpen,

    #[error("duplicate entry `{0}`")]
    DuplicateEntry(String),

    #[error("failed to encode entry stream: {0}")]
    Encode(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a capsule (bad trailer)")]
    BadTrailer(PathBuf),

    #[error("corrupt capsule footer: {0}")]
    BadFooter(String),

    #[error("corrupt entry stream: {0}")]
    BadEntryStream(String),

    #[error("unsupported compression in {0}")]
    UnknownCompression(PathBuf),
}

/// One line of the central index stored in the footer, in archive order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryRecord {
    pub path: String,
    pub size: u64,
}

/// Container-level checksum over stub + entry stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub algorithm: String,
    pub digest: String,
}

/// Detached signature stored in the footer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureRecord {
    pub algorithm: String,
    /// Hex-encoded signature over stub + entry stream.
    pub signature: String,
    /// PEM-encoded verifying key, also exported as the `.pubkey` sidecar.
    pub public_key: String,
}

/// The capsule footer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Footer {
    pub alias: String,
    pub entries: Vec<EntryRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub checksum: ChecksumRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureRecord>,
}

/// Archive-writing capability consumed by the build pipeline.
pub trait ArchiveWriter {
    /// Bind a new, empty archive to the given output path.
    fn open(
        &mut self,
        output: &Path,
        alias: &str,
        algorithm: SignatureAlgorithm,
    ) -> Result<(), ArchiveError>;

    /// Append one entry under its relative path, in order.
    fn append(&mut self, relative_path: &str, bytes: Vec<u8>) -> Result<(), ArchiveError>;

    /// Set the bootstrap stub bytes.
    fn set_stub(&mut self, stub: Vec<u8>) -> Result<(), ArchiveError>;

    /// Attach opaque metadata.
    fn set_metadata(&mut self, metadata: Value) -> Result<(), ArchiveError>;

    /// Record the compression applied at commit time.
    fn set_compression(&mut self, compression: Compression) -> Result<(), ArchiveError>;

    /// Record a signature over the current body bytes.
    fn set_signature(&mut self, signature: SignatureRecord) -> Result<(), ArchiveError>;

    /// Number of appended entries.
    fn entry_count(&self) -> usize;

    /// The bytes the checksum and signature cover: stub + entry stream.
    fn body_bytes(&self) -> Result<Vec<u8>, ArchiveError>;

    /// Serialize and write the capsule; returns the final on-disk path
    /// (the compressed variant when compression is configured).
    fn commit(&mut self) -> Result<PathBuf, ArchiveError>;
}

/// `path` with an extra suffix appended after the existing extension.
pub fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// The on-disk path for a given compression choice.
pub fn output_path_for(output: &Path, compression: Compression) -> PathBuf {
    match compression.extension() {
        Some(ext) => path_with_suffix(output, ext),
        None => output.to_path_buf(),
    }
}
