//! The capsule reader.
//!
//! Used by the edit, extract, verify and info commands. Compression is
//! sniffed from magic bytes, the footer located through the fixed
//! trailer, and the entry stream decoded back into (path, bytes) pairs.

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256, Sha512};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use super::{ArchiveError, Footer, TRAILER_MAGIC};
use crate::config::Compression;
use crate::stub::STUB_TERMINATOR;

/// A fully-decoded capsule.
#[derive(Debug)]
pub struct Capsule {
    pub stub: Vec<u8>,
    /// Entries in archive order.
    pub entries: Vec<(String, Vec<u8>)>,
    pub footer: Footer,
    /// Compression detected on the on-disk file.
    pub compression: Compression,
    /// The checksum-covered bytes (stub + entry stream).
    pub body: Vec<u8>,
    /// Digest recomputed from `body` with the footer's algorithm.
    pub computed_digest: String,
}

impl Capsule {
    /// Whether the recorded checksum matches the body.
    pub fn checksum_ok(&self) -> bool {
        self.footer.checksum.digest == self.computed_digest
    }

    /// The output path the capsule was built for: the on-disk path minus
    /// the compression suffix.
    pub fn base_output_path(&self, on_disk: &Path) -> PathBuf {
        match self.compression.extension() {
            Some(ext) => {
                let name = on_disk.to_string_lossy();
                let suffix = format!(".{ext}");
                match name.strip_suffix(&suffix) {
                    Some(stripped) => PathBuf::from(stripped),
                    None => on_disk.to_path_buf(),
                }
            }
            None => on_disk.to_path_buf(),
        }
    }
}

/// Read and decode a capsule file.
pub fn read(path: &Path) -> Result<Capsule, ArchiveError> {
    let raw = std::fs::read(path).map_err(|source| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let (compression, data) = decompress(&raw, path)?;

    if data.len() < 8 {
        return Err(ArchiveError::BadTrailer(path.to_path_buf()));
    }
    let (rest, magic) = data.split_at(data.len() - 4);
    if magic != TRAILER_MAGIC {
        return Err(ArchiveError::BadTrailer(path.to_path_buf()));
    }
    let (rest, len_bytes) = rest.split_at(rest.len() - 4);
    let mut len = [0u8; 4];
    len.copy_from_slice(len_bytes);
    let footer_len = u32::from_le_bytes(len) as usize;
    if footer_len > rest.len() {
        return Err(ArchiveError::BadTrailer(path.to_path_buf()));
    }
    let (body, footer_bytes) = rest.split_at(rest.len() - footer_len);

    let footer: Footer = serde_json::from_slice(footer_bytes)
        .map_err(|e| ArchiveError::BadFooter(e.to_string()))?;

    let computed_digest = match footer.checksum.algorithm.as_str() {
        "sha512" => hex::encode(Sha512::digest(body)),
        "sha256" => hex::encode(Sha256::digest(body)),
        other => {
            return Err(ArchiveError::BadFooter(format!(
                "unknown checksum algorithm `{other}`"
            )))
        }
    };

    let stub_end = find_stub_end(body)
        .ok_or_else(|| ArchiveError::BadEntryStream("stub terminator not found".to_string()))?;
    let stub = body[..stub_end].to_vec();
    let entries = decode_entries(&body[stub_end..])?;

    Ok(Capsule {
        stub,
        entries,
        footer,
        compression,
        body: body.to_vec(),
        computed_digest,
    })
}

fn decompress(raw: &[u8], path: &Path) -> Result<(Compression, Vec<u8>), ArchiveError> {
    let io_err = |source: std::io::Error| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    };
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut data = Vec::new();
        GzDecoder::new(raw).read_to_end(&mut data).map_err(io_err)?;
        Ok((Compression::Gz, data))
    } else if raw.starts_with(b"BZh") {
        let mut data = Vec::new();
        bzip2::read::BzDecoder::new(raw)
            .read_to_end(&mut data)
            .map_err(io_err)?;
        Ok((Compression::Bz2, data))
    } else if raw.starts_with(b"PK\x03\x04") {
        let mut zip = zip::ZipArchive::new(Cursor::new(raw))
            .map_err(|_| ArchiveError::UnknownCompression(path.to_path_buf()))?;
        if zip.len() == 0 {
            return Err(ArchiveError::UnknownCompression(path.to_path_buf()));
        }
        let mut member = zip
            .by_index(0)
            .map_err(|_| ArchiveError::UnknownCompression(path.to_path_buf()))?;
        let mut data = Vec::new();
        member.read_to_end(&mut data).map_err(io_err)?;
        Ok((Compression::Zip, data))
    } else {
        Ok((Compression::None, raw.to_vec()))
    }
}

/// Index just past the terminator marker line.
fn find_stub_end(body: &[u8]) -> Option<usize> {
    let needle = STUB_TERMINATOR.as_bytes();
    body.windows(needle.len())
        .position(|w| w == needle)
        .map(|idx| {
            let mut end = idx + needle.len();
            if body.get(end) == Some(&b'\n') {
                end += 1;
            }
            end
        })
}

fn decode_entries(stream: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let mut archive = tar::Archive::new(stream);
    let mut entries = Vec::new();
    if stream.is_empty() {
        return Ok(entries);
    }
    let iter = archive
        .entries()
        .map_err(|e| ArchiveError::BadEntryStream(e.to_string()))?;
    for entry in iter {
        let mut entry = entry.map_err(|e| ArchiveError::BadEntryStream(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| ArchiveError::BadEntryStream(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| ArchiveError::BadEntryStream(e.to_string()))?;
        entries.push((path, bytes));
    }
    Ok(entries)
}
