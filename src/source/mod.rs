//! Source-set resolution.
//!
//! Turns the configuration's source declarations into an ordered,
//! deduplicated list of [`SourceEntry`] records. The set is recomputed
//! fresh on every build; there is no cross-build cache. Ordering is
//! deterministic for identical filesystem state: declaration order first,
//! then sorted traversal order, ties broken by lexicographic relative
//! path.

pub mod finder;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{BuildConfig, DirDecl, FileDecl, FinderDecl, SourceDecl};

/// File extensions treated as guest-language sources during directory
/// scans that are not marked binary.
pub const SOURCE_EXTENSIONS: &[&str] = &["sh"];

/// Errors produced while resolving the source set.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("declared source {0} does not exist")]
    Missing(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read metadata for {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} lies outside base-path and has no rename")]
    OutsideBase(PathBuf),

    #[error("duplicate relative path `{0}`")]
    Duplicate(String),

    #[error("invalid ignore pattern `{0}`")]
    BadIgnorePattern(String),

    #[error("unknown finder operation `{0}`")]
    UnknownFinderOp(String),

    #[error("invalid finder `{op}` argument: {message}")]
    BadFinderArg { op: &'static str, message: String },

    #[error("main script `{0}` is not among the resolved sources")]
    MainMissing(String),
}

/// One file destined for the capsule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Unique key inside the capsule, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub is_binary: bool,
    pub is_main: bool,
}

/// Resolver for the configured source declarations.
pub struct SourceSet;

impl SourceSet {
    /// Resolve all declarations into an ordered entry list.
    pub fn resolve(config: &BuildConfig) -> Result<Vec<SourceEntry>, SourceError> {
        Self::resolve_with_predicate(config, None)
    }

    /// Like [`SourceSet::resolve`], with a caller-supplied predicate
    /// applied to every file found by a directory scan.
    pub fn resolve_with_predicate(
        config: &BuildConfig,
        predicate: Option<&dyn Fn(&Path) -> bool>,
    ) -> Result<Vec<SourceEntry>, SourceError> {
        let base = &config.base_path;
        let mut entries: Vec<SourceEntry> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for decl in &config.sources {
            match decl {
                SourceDecl::File(file) => {
                    resolve_file(base, file, &mut entries, &mut seen)?;
                }
                SourceDecl::Directory(dir) => {
                    resolve_directory(base, dir, predicate, &mut entries, &mut seen)?;
                }
                SourceDecl::Finder(decl) => {
                    resolve_finder(base, decl, &mut entries, &mut seen)?;
                }
            }
        }

        // The blacklist removes matching relative paths after mapping.
        entries.retain(|e| !config.blacklist.contains(&e.relative_path));

        if let Some(main) = &config.main {
            place_main(&mut entries, main)?;
        }

        Ok(entries)
    }
}

fn resolve_file(
    base: &Path,
    file: &FileDecl,
    entries: &mut Vec<SourceEntry>,
    seen: &mut BTreeSet<String>,
) -> Result<(), SourceError> {
    let abs = absolutize(base, &file.path);
    if !abs.is_file() {
        return Err(SourceError::Missing(abs));
    }
    let rel = match &file.rename {
        Some(rename) => rename.clone(),
        None => relative_string(&abs, base)?,
    };
    push_entry(entries, seen, rel, abs, file.binary)
}

fn resolve_directory(
    base: &Path,
    dir: &DirDecl,
    predicate: Option<&dyn Fn(&Path) -> bool>,
    entries: &mut Vec<SourceEntry>,
    seen: &mut BTreeSet<String>,
) -> Result<(), SourceError> {
    let abs_dir = absolutize(base, &dir.path);
    if !abs_dir.is_dir() {
        return Err(SourceError::NotADirectory(abs_dir));
    }
    let ignore: Vec<glob::Pattern> = dir
        .ignore
        .iter()
        .map(|raw| glob::Pattern::new(raw).map_err(|_| SourceError::BadIgnorePattern(raw.clone())))
        .collect::<Result<_, _>>()?;

    for item in WalkDir::new(&abs_dir).sort_by_file_name() {
        let item = item.map_err(|source| SourceError::Walk {
            path: abs_dir.clone(),
            source,
        })?;
        if !item.file_type().is_file() {
            continue;
        }
        let path = item.path();
        let rel_in_dir = relative_string(path, &abs_dir)?;
        if ignore
            .iter()
            .any(|p| p.matches(&rel_in_dir) || rel_in_dir.starts_with(p.as_str()))
        {
            continue;
        }
        // Without the binary flag only recognized source extensions pass.
        if !dir.binary && !has_source_extension(path) {
            continue;
        }
        if let Some(pred) = predicate {
            if !pred(path) {
                continue;
            }
        }
        let rel = match &dir.rename {
            Some(prefix) => join_relative(prefix, &rel_in_dir),
            None => relative_string(path, base)?,
        };
        push_entry(entries, seen, rel, path.to_path_buf(), dir.binary)?;
    }
    Ok(())
}

fn resolve_finder(
    base: &Path,
    decl: &FinderDecl,
    entries: &mut Vec<SourceEntry>,
    seen: &mut BTreeSet<String>,
) -> Result<(), SourceError> {
    let ops = finder::parse_ops(&decl.ops)?;
    for abs in finder::run(base, &ops)? {
        let rel = relative_string(&abs, base)?;
        push_entry(entries, seen, rel, abs, decl.binary)?;
    }
    Ok(())
}

fn push_entry(
    entries: &mut Vec<SourceEntry>,
    seen: &mut BTreeSet<String>,
    relative_path: String,
    absolute_path: PathBuf,
    is_binary: bool,
) -> Result<(), SourceError> {
    if !seen.insert(relative_path.clone()) {
        return Err(SourceError::Duplicate(relative_path));
    }
    entries.push(SourceEntry {
        relative_path,
        absolute_path,
        is_binary,
        is_main: false,
    });
    Ok(())
}

/// Mark the main entry and move it after the last text entry, confirming
/// it exists exactly once.
fn place_main(entries: &mut Vec<SourceEntry>, main: &str) -> Result<(), SourceError> {
    let idx = entries
        .iter()
        .position(|e| e.relative_path == main)
        .ok_or_else(|| SourceError::MainMissing(main.to_string()))?;
    let mut entry = entries.remove(idx);
    entry.is_main = true;
    let insert_at = entries
        .iter()
        .rposition(|e| !e.is_binary)
        .map(|i| i + 1)
        .unwrap_or(entries.len());
    entries.insert(insert_at, entry);
    Ok(())
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Relative `/`-separated form of `path` under `base`.
pub(crate) fn relative_string(path: &Path, base: &Path) -> Result<String, SourceError> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| SourceError::OutsideBase(path.to_path_buf()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn join_relative(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}
