//! The capsule writer.
//!
//! Entries accumulate in memory and nothing touches the disk until
//! `commit`, which serializes stub + entry stream + footer + trailer and
//! writes either the plain capsule or a single compressed variant.

use flate2::write::GzEncoder;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{
    output_path_for, ArchiveError, ArchiveWriter, ChecksumRecord, EntryRecord, Footer,
    SignatureRecord, TRAILER_MAGIC,
};
use crate::config::{Compression, SignatureAlgorithm};
use crate::stub::STUB_TERMINATOR;

struct OpenState {
    output: PathBuf,
    alias: String,
    algorithm: SignatureAlgorithm,
    entries: Vec<(String, Vec<u8>)>,
    names: BTreeSet<String>,
    stub: Vec<u8>,
    metadata: Option<serde_json::Value>,
    compression: Compression,
    signature: Option<SignatureRecord>,
}

/// In-memory capsule writer; the shipped [`ArchiveWriter`] implementation.
#[derive(Default)]
pub struct CapsuleWriter {
    state: Option<OpenState>,
}

impl CapsuleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_state(&self) -> Result<&OpenState, ArchiveError> {
        self.state.as_ref().ok_or(ArchiveError::NotOpen)
    }

    fn open_state_mut(&mut self) -> Result<&mut OpenState, ArchiveError> {
        self.state.as_mut().ok_or(ArchiveError::NotOpen)
    }
}

impl ArchiveWriter for CapsuleWriter {
    fn open(
        &mut self,
        output: &Path,
        alias: &str,
        algorithm: SignatureAlgorithm,
    ) -> Result<(), ArchiveError> {
        self.state = Some(OpenState {
            output: output.to_path_buf(),
            alias: alias.to_string(),
            algorithm,
            entries: Vec::new(),
            names: BTreeSet::new(),
            stub: Vec::new(),
            metadata: None,
            compression: Compression::None,
            signature: None,
        });
        Ok(())
    }

    fn append(&mut self, relative_path: &str, bytes: Vec<u8>) -> Result<(), ArchiveError> {
        let state = self.open_state_mut()?;
        if !state.names.insert(relative_path.to_string()) {
            return Err(ArchiveError::DuplicateEntry(relative_path.to_string()));
        }
        state.entries.push((relative_path.to_string(), bytes));
        Ok(())
    }

    fn set_stub(&mut self, stub: Vec<u8>) -> Result<(), ArchiveError> {
        self.open_state_mut()?.stub = stub;
        Ok(())
    }

    fn set_metadata(&mut self, metadata: serde_json::Value) -> Result<(), ArchiveError> {
        self.open_state_mut()?.metadata = Some(metadata);
        Ok(())
    }

    fn set_compression(&mut self, compression: Compression) -> Result<(), ArchiveError> {
        self.open_state_mut()?.compression = compression;
        Ok(())
    }

    fn set_signature(&mut self, signature: SignatureRecord) -> Result<(), ArchiveError> {
        self.open_state_mut()?.signature = Some(signature);
        Ok(())
    }

    fn entry_count(&self) -> usize {
        self.state.as_ref().map(|s| s.entries.len()).unwrap_or(0)
    }

    fn body_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        body(self.open_state()?)
    }

    fn commit(&mut self) -> Result<PathBuf, ArchiveError> {
        let state = self.open_state()?;
        let body = body(state)?;

        let digest = match state.algorithm {
            SignatureAlgorithm::Sha512 => hex::encode(Sha512::digest(&body)),
            _ => hex::encode(Sha256::digest(&body)),
        };
        let checksum_name = match state.algorithm {
            SignatureAlgorithm::Sha512 => "sha512",
            _ => "sha256",
        };

        let footer = Footer {
            alias: state.alias.clone(),
            entries: state
                .entries
                .iter()
                .map(|(path, bytes)| EntryRecord {
                    path: path.clone(),
                    size: bytes.len() as u64,
                })
                .collect(),
            metadata: state.metadata.clone(),
            checksum: ChecksumRecord {
                algorithm: checksum_name.to_string(),
                digest,
            },
            signature: state.signature.clone(),
        };
        let footer_bytes =
            serde_json::to_vec(&footer).map_err(|e| ArchiveError::Encode(e.to_string()))?;

        let mut full = body;
        full.extend_from_slice(&footer_bytes);
        full.extend_from_slice(&(footer_bytes.len() as u32).to_le_bytes());
        full.extend_from_slice(TRAILER_MAGIC);

        let final_path = output_path_for(&state.output, state.compression);
        write_out(&final_path, &full, state.compression, &state.output)?;
        Ok(final_path)
    }
}

/// The checksum-covered bytes: stub (terminator guaranteed) + tar stream.
fn body(state: &OpenState) -> Result<Vec<u8>, ArchiveError> {
    let mut out = state.stub.clone();
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    if !contains(&out, STUB_TERMINATOR.as_bytes()) {
        out.extend_from_slice(STUB_TERMINATOR.as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(&entry_stream(&state.entries)?);
    Ok(out)
}

/// Deterministic tar stream: pinned mode/uid/gid, zero mtime.
fn entry_stream(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ArchiveError> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, path, bytes.as_slice())
            .map_err(|e| ArchiveError::Encode(e.to_string()))?;
    }
    builder
        .into_inner()
        .map_err(|e| ArchiveError::Encode(e.to_string()))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn write_out(
    final_path: &Path,
    full: &[u8],
    compression: Compression,
    output: &Path,
) -> Result<(), ArchiveError> {
    let io_err = |source: std::io::Error| ArchiveError::Write {
        path: final_path.to_path_buf(),
        source,
    };
    match compression {
        Compression::None => std::fs::write(final_path, full).map_err(io_err),
        Compression::Gz => {
            let file = File::create(final_path).map_err(io_err)?;
            let mut encoder = GzEncoder::new(file, flate2::Compression::default());
            encoder.write_all(full).map_err(io_err)?;
            encoder.finish().map(|_| ()).map_err(io_err)
        }
        Compression::Bz2 => {
            let file = File::create(final_path).map_err(io_err)?;
            let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::best());
            encoder.write_all(full).map_err(io_err)?;
            encoder.finish().map(|_| ()).map_err(io_err)
        }
        Compression::Zip => {
            let file = File::create(final_path).map_err(io_err)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            let member = output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "capsule".to_string());
            zip.start_file(member, options)
                .map_err(|e| ArchiveError::Encode(e.to_string()))?;
            zip.write_all(full).map_err(io_err)?;
            zip.finish()
                .map(|_| ())
                .map_err(|e| ArchiveError::Encode(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_writer(output: &Path) -> CapsuleWriter {
        let mut writer = CapsuleWriter::new();
        writer
            .open(output, "test.capsule", SignatureAlgorithm::Sha256)
            .unwrap();
        writer
    }

    #[test]
    fn append_rejects_duplicates() {
        let tmp = TempDir::new().unwrap();
        let mut writer = open_writer(&tmp.path().join("out.capsule"));
        writer.append("a.sh", b"echo a\n".to_vec()).unwrap();
        let err = writer.append("a.sh", b"echo again\n".to_vec()).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateEntry(_)));
    }

    #[test]
    fn unopened_writer_errors() {
        let mut writer = CapsuleWriter::new();
        assert!(matches!(
            writer.append("a", Vec::new()),
            Err(ArchiveError::NotOpen)
        ));
        assert!(matches!(writer.commit(), Err(ArchiveError::NotOpen)));
    }

    #[test]
    fn body_guarantees_terminator() {
        let tmp = TempDir::new().unwrap();
        let mut writer = open_writer(&tmp.path().join("out.capsule"));
        writer.set_stub(b"#!/bin/sh\necho stub".to_vec()).unwrap();
        let body = writer.body_bytes().unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(STUB_TERMINATOR));
    }

    #[test]
    fn commit_writes_trailer_magic() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out.capsule");
        let mut writer = open_writer(&output);
        writer.append("a.sh", b"echo a\n".to_vec()).unwrap();
        let path = writer.commit().unwrap();
        assert_eq!(path, output);
        let raw = std::fs::read(&output).unwrap();
        assert_eq!(&raw[raw.len() - 4..], TRAILER_MAGIC);
    }

    #[test]
    fn identical_input_produces_identical_bytes() {
        let tmp = TempDir::new().unwrap();
        let build = |name: &str| {
            let output = tmp.path().join(name);
            let mut writer = open_writer(&output);
            writer.set_stub(b"#!/bin/sh\n".to_vec()).unwrap();
            writer.append("a.sh", b"echo a\n".to_vec()).unwrap();
            writer.append("b.sh", b"echo b\n".to_vec()).unwrap();
            writer.commit().unwrap();
            std::fs::read(output).unwrap()
        };
        assert_eq!(build("one.capsule"), build("two.capsule"));
    }

    #[test]
    fn gz_commit_writes_only_the_sidecar() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out.capsule");
        let mut writer = open_writer(&output);
        writer.append("a.sh", b"echo a\n".to_vec()).unwrap();
        writer.set_compression(Compression::Gz).unwrap();
        let path = writer.commit().unwrap();
        assert_eq!(path, tmp.path().join("out.capsule.gz"));
        assert!(path.exists());
        assert!(!output.exists());
    }
}
