//! Configuration resolution for capsa.
//!
//! Reads a declarative JSON build document (`capsa.json`, with
//! `capsa.dist.json` as fallback), validates it against the canonical
//! schema, and normalizes it into a fully-defaulted [`BuildConfig`].
//! Unknown top-level fields are a hard error; absence of a field always
//! means its documented default, never absence of behavior.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::process::Cmd;

/// Default self-referential name the capsule uses for its own contents.
pub const DEFAULT_ALIAS: &str = "default.capsule";

/// Default interpreter directive for generated stubs.
pub const DEFAULT_SHEBANG: &str = "#!/bin/sh";

/// File names probed when no explicit configuration path is given.
pub const CONFIG_CANDIDATES: &[&str] = &["capsa.json", "capsa.dist.json"];

/// Errors produced while loading or validating a build configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (looked for {0})")]
    Missing(String),

    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration schema violation: {0}")]
    Schema(String),

    #[error("invalid {field} value `{value}` (expected one of: {expected})")]
    InvalidEnum {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("base-path `{0}` is not an existing directory")]
    BadBasePath(PathBuf),

    #[error("invalid chmod value `{0}`: expected octal digits")]
    BadChmod(String),

    #[error("algorithm `ed25519` requires a private key (`key`)")]
    KeyRequired,

    #[error("`key` is set but `algorithm` is `{0}`; signing requires ed25519")]
    KeyAlgorithmMismatch(String),

    #[error("web stub requires a `main` script or an explicit web index")]
    WebIndexMissing,

    #[error("invalid replacement key `{0}`: expected letters, digits, `_` or `-`")]
    BadReplacementKey(String),

    #[error("failed to resolve git version: {0}")]
    GitVersion(String),
}

/// Compression applied to the finished capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gz,
    Bz2,
    Zip,
}

impl Compression {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "none" => Ok(Self::None),
            "gz" => Ok(Self::Gz),
            "bz2" => Ok(Self::Bz2),
            "zip" => Ok(Self::Zip),
            other => Err(ConfigError::InvalidEnum {
                field: "compression",
                value: other.to_string(),
                expected: "none, gz, bz2, zip",
            }),
        }
    }

    /// Conventional file extension suffix, or None for uncompressed.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gz => Some("gz"),
            Self::Bz2 => Some("bz2"),
            Self::Zip => Some("zip"),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gz => "gz",
            Self::Bz2 => "bz2",
            Self::Zip => "zip",
        };
        write!(f, "{name}")
    }
}

/// Integrity/signature scheme recorded in the capsule.
///
/// `Sha256` and `Sha512` are container-level digests; `Ed25519` is an
/// asymmetric signature and requires a private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Ed25519,
}

impl SignatureAlgorithm {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(ConfigError::InvalidEnum {
                field: "algorithm",
                value: other.to_string(),
                expected: "sha256, sha512, ed25519",
            }),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Ed25519 => "ed25519",
        };
        write!(f, "{name}")
    }
}

/// Private-key passphrase: a literal, or resolved interactively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPass {
    Literal(String),
    Prompt,
}

/// How the bootstrap stub is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubPolicy {
    /// Minimal bootstrap: shebang, alias mapping, main require, terminator.
    Default,
    /// Generated bootstrap with the configured extras.
    Generated(GeneratedStub),
    /// User-supplied stub file, substituted when replacements are configured.
    CustomFile { path: PathBuf },
}

/// Parameters of a generated bootstrap stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedStub {
    pub intercept: bool,
    pub banner: Option<String>,
    pub shebang: String,
    pub mimetypes: BTreeMap<String, String>,
    pub mung: Vec<String>,
    pub web: Option<WebStub>,
}

/// Web-serving stub data; encoded into the stub, never executed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebStub {
    pub index: String,
    pub not_found: Option<String>,
    pub rewrite: Option<String>,
}

/// An explicit file declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDecl {
    pub path: PathBuf,
    /// Relative capsule path overriding the base-path-relative mapping.
    pub rename: Option<String>,
    pub binary: bool,
}

/// A recursive directory scan declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirDecl {
    pub path: PathBuf,
    /// Relative paths (globs allowed) inside the directory to skip.
    pub ignore: Vec<String>,
    /// Relative capsule prefix replacing the directory's own mapping.
    pub rename: Option<String>,
    pub binary: bool,
}

/// One named operation inside a finder declaration.
///
/// Operation names are validated during source resolution, not here, so
/// an unknown name surfaces as a source-resolution error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinderOpRaw {
    pub name: String,
    pub value: Value,
}

/// A finder declaration: an ordered list of filtering operations applied
/// against a fresh recursive walk of the base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinderDecl {
    pub ops: Vec<FinderOpRaw>,
    pub binary: bool,
}

/// A single source declaration, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDecl {
    File(FileDecl),
    Directory(DirDecl),
    Finder(FinderDecl),
}

/// Fully-resolved, validated build configuration. Immutable after
/// resolution; the pipeline never mutates it.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub alias: String,
    pub base_path: PathBuf,
    pub output_path: PathBuf,
    pub compression: Compression,
    pub algorithm: SignatureAlgorithm,
    pub private_key_path: Option<PathBuf>,
    pub private_key_pass: Option<KeyPass>,
    pub metadata: Option<Value>,
    pub replacements: BTreeMap<String, Value>,
    /// Relative capsule path of the main script, if any.
    pub main: Option<String>,
    pub blacklist: BTreeSet<String>,
    pub chmod: Option<u32>,
    pub stub: StubPolicy,
    pub sources: Vec<SourceDecl>,
}

// ---------------------------------------------------------------------------
// Raw document schema
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawConfig {
    alias: Option<String>,
    base_path: Option<PathBuf>,
    output: Option<PathBuf>,
    compression: Option<String>,
    algorithm: Option<String>,
    files: Option<Vec<RawFile>>,
    files_bin: Option<Vec<RawFile>>,
    directories: Option<Vec<RawDirectory>>,
    directories_bin: Option<Vec<RawDirectory>>,
    finder: Option<Vec<BTreeMap<String, Value>>>,
    finder_bin: Option<Vec<BTreeMap<String, Value>>>,
    blacklist: Option<Vec<String>>,
    main: Option<String>,
    stub: Option<RawStub>,
    intercept: Option<bool>,
    banner: Option<String>,
    shebang: Option<String>,
    mimetypes: Option<BTreeMap<String, String>>,
    mung: Option<Vec<String>>,
    not_found: Option<String>,
    web: Option<RawWeb>,
    metadata: Option<Value>,
    chmod: Option<String>,
    key: Option<PathBuf>,
    key_pass: Option<String>,
    replacements: Option<BTreeMap<String, Value>>,
    git_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFile {
    Plain(PathBuf),
    Renamed {
        path: PathBuf,
        #[serde(rename = "as")]
        rename: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDirectory {
    Plain(PathBuf),
    Detailed {
        path: PathBuf,
        #[serde(default)]
        ignore: Vec<String>,
        #[serde(rename = "as")]
        rename: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStub {
    Flag(bool),
    Path(PathBuf),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWeb {
    Flag(bool),
    Detailed {
        index: Option<String>,
        rewrite: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

impl BuildConfig {
    /// Locate a configuration document in `dir` using the conventional
    /// candidate names.
    pub fn discover(dir: &Path) -> Result<PathBuf, ConfigError> {
        for name in CONFIG_CANDIDATES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(ConfigError::Missing(CONFIG_CANDIDATES.join(", ")))
    }

    /// Load and resolve a configuration document from disk.
    pub fn resolve_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Schema(e.to_string()))?;
        let default_base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::resolve_raw(raw, &default_base)
    }

    /// Resolve a programmatically-constructed document. `default_base` is
    /// used when the document does not set `base-path`.
    pub fn resolve_value(value: Value, default_base: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Schema(e.to_string()))?;
        Self::resolve_raw(raw, default_base)
    }

    fn resolve_raw(raw: RawConfig, default_base: &Path) -> Result<Self, ConfigError> {
        let base_path = match &raw.base_path {
            Some(p) => {
                if !p.is_dir() {
                    return Err(ConfigError::BadBasePath(p.clone()));
                }
                p.clone()
            }
            None => {
                if !default_base.is_dir() {
                    return Err(ConfigError::BadBasePath(default_base.to_path_buf()));
                }
                default_base.to_path_buf()
            }
        };
        let base_path = base_path
            .canonicalize()
            .map_err(|_| ConfigError::BadBasePath(base_path.clone()))?;

        let stub = resolve_stub(&raw, &base_path)?;

        let alias = raw.alias.unwrap_or_else(|| DEFAULT_ALIAS.to_string());

        let output_path = match raw.output {
            Some(p) if p.is_absolute() => p,
            Some(p) => base_path.join(p),
            None => base_path.join(DEFAULT_ALIAS),
        };

        let compression = match raw.compression.as_deref() {
            Some(value) => Compression::parse(value)?,
            None => Compression::None,
        };

        let algorithm = match (raw.algorithm.as_deref(), raw.key.is_some()) {
            (Some(value), has_key) => {
                let parsed = SignatureAlgorithm::parse(value)?;
                match (parsed, has_key) {
                    (SignatureAlgorithm::Ed25519, false) => return Err(ConfigError::KeyRequired),
                    (SignatureAlgorithm::Ed25519, true) => parsed,
                    (other, true) => {
                        return Err(ConfigError::KeyAlgorithmMismatch(other.to_string()))
                    }
                    (other, false) => other,
                }
            }
            // A configured key implies ed25519.
            (None, true) => SignatureAlgorithm::Ed25519,
            (None, false) => SignatureAlgorithm::Sha256,
        };

        let private_key_path = raw.key.map(|p| {
            if p.is_absolute() {
                p
            } else {
                base_path.join(p)
            }
        });

        let private_key_pass = raw.key_pass.map(|s| {
            if s == "prompt" {
                KeyPass::Prompt
            } else {
                KeyPass::Literal(s)
            }
        });

        let chmod = match raw.chmod {
            Some(s) => Some(parse_chmod(&s)?),
            None => None,
        };

        let mut replacements = raw.replacements.unwrap_or_default();
        for key in replacements.keys() {
            if key.is_empty() || !key.chars().all(is_replacement_ident) {
                return Err(ConfigError::BadReplacementKey(key.clone()));
            }
        }
        if let Some(token) = raw.git_version {
            if token.is_empty() || !token.chars().all(is_replacement_ident) {
                return Err(ConfigError::BadReplacementKey(token));
            }
            // User-supplied values win over the injected version string.
            if !replacements.contains_key(&token) {
                let version = resolve_git_version(&base_path)?;
                replacements.insert(token, Value::String(version));
            }
        }

        let mut sources = Vec::new();
        push_files(&mut sources, raw.files, false);
        push_files(&mut sources, raw.files_bin, true);
        push_directories(&mut sources, raw.directories, false);
        push_directories(&mut sources, raw.directories_bin, true);
        push_finders(&mut sources, raw.finder, false);
        push_finders(&mut sources, raw.finder_bin, true);

        Ok(Self {
            alias,
            base_path,
            output_path,
            compression,
            algorithm,
            private_key_path,
            private_key_pass,
            metadata: raw.metadata,
            replacements,
            main: raw.main,
            blacklist: raw.blacklist.unwrap_or_default().into_iter().collect(),
            chmod,
            stub,
            sources,
        })
    }

    /// Print the effective configuration, one field per line.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  alias:       {}", self.alias);
        println!("  base-path:   {}", self.base_path.display());
        println!("  output:      {}", self.output_path.display());
        println!("  compression: {}", self.compression);
        println!("  algorithm:   {}", self.algorithm);
        match &self.private_key_path {
            Some(p) => println!("  key:         {}", p.display()),
            None => println!("  key:         (none)"),
        }
        match &self.main {
            Some(m) => println!("  main:        {m}"),
            None => println!("  main:        (none)"),
        }
        println!("  sources:     {} declaration(s)", self.sources.len());
        println!("  blacklist:   {} path(s)", self.blacklist.len());
        println!("  replacements: {} token(s)", self.replacements.len());
    }
}

fn is_replacement_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_chmod(value: &str) -> Result<u32, ConfigError> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    if digits.is_empty() {
        return Err(ConfigError::BadChmod(value.to_string()));
    }
    u32::from_str_radix(digits, 8).map_err(|_| ConfigError::BadChmod(value.to_string()))
}

fn resolve_stub(raw: &RawConfig, base_path: &Path) -> Result<StubPolicy, ConfigError> {
    match &raw.stub {
        None | Some(RawStub::Flag(false)) => Ok(StubPolicy::Default),
        Some(RawStub::Flag(true)) => {
            let web = match &raw.web {
                None | Some(RawWeb::Flag(false)) => None,
                Some(RawWeb::Flag(true)) => Some(WebStub {
                    index: raw
                        .main
                        .clone()
                        .ok_or(ConfigError::WebIndexMissing)?,
                    not_found: raw.not_found.clone(),
                    rewrite: None,
                }),
                Some(RawWeb::Detailed { index, rewrite }) => Some(WebStub {
                    index: index
                        .clone()
                        .or_else(|| raw.main.clone())
                        .ok_or(ConfigError::WebIndexMissing)?,
                    not_found: raw.not_found.clone(),
                    rewrite: rewrite.clone(),
                }),
            };
            Ok(StubPolicy::Generated(GeneratedStub {
                intercept: raw.intercept.unwrap_or(false),
                banner: raw.banner.clone(),
                shebang: raw
                    .shebang
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SHEBANG.to_string()),
                mimetypes: raw.mimetypes.clone().unwrap_or_default(),
                mung: raw.mung.clone().unwrap_or_default(),
                web,
            }))
        }
        Some(RawStub::Path(p)) => {
            let path = if p.is_absolute() {
                p.clone()
            } else {
                base_path.join(p)
            };
            Ok(StubPolicy::CustomFile { path })
        }
    }
}

fn push_files(sources: &mut Vec<SourceDecl>, files: Option<Vec<RawFile>>, binary: bool) {
    for file in files.unwrap_or_default() {
        let decl = match file {
            RawFile::Plain(path) => FileDecl {
                path,
                rename: None,
                binary,
            },
            RawFile::Renamed { path, rename } => FileDecl {
                path,
                rename: Some(rename),
                binary,
            },
        };
        sources.push(SourceDecl::File(decl));
    }
}

fn push_directories(
    sources: &mut Vec<SourceDecl>,
    directories: Option<Vec<RawDirectory>>,
    binary: bool,
) {
    for dir in directories.unwrap_or_default() {
        let decl = match dir {
            RawDirectory::Plain(path) => DirDecl {
                path,
                ignore: Vec::new(),
                rename: None,
                binary,
            },
            RawDirectory::Detailed {
                path,
                ignore,
                rename,
            } => DirDecl {
                path,
                ignore,
                rename,
                binary,
            },
        };
        sources.push(SourceDecl::Directory(decl));
    }
}

fn push_finders(
    sources: &mut Vec<SourceDecl>,
    finders: Option<Vec<BTreeMap<String, Value>>>,
    binary: bool,
) {
    for finder in finders.unwrap_or_default() {
        let ops = finder
            .into_iter()
            .map(|(name, value)| FinderOpRaw { name, value })
            .collect();
        sources.push(SourceDecl::Finder(FinderDecl { ops, binary }));
    }
}

/// Resolve a version string from the working tree: an exact tag when HEAD
/// sits on one, else the short revision id.
fn resolve_git_version(base: &Path) -> Result<String, ConfigError> {
    let tag = Cmd::new("git")
        .args(["describe", "--tags", "--exact-match", "HEAD"])
        .dir(base)
        .allow_fail()
        .run()
        .map_err(|e| ConfigError::GitVersion(e.to_string()))?;
    if tag.success() {
        return Ok(tag.stdout_trimmed().to_string());
    }

    let rev = Cmd::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .dir(base)
        .allow_fail()
        .run()
        .map_err(|e| ConfigError::GitVersion(e.to_string()))?;
    if rev.success() {
        Ok(rev.stdout_trimmed().to_string())
    } else {
        Err(ConfigError::GitVersion(rev.stderr_trimmed().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(doc: Value) -> Result<BuildConfig, ConfigError> {
        BuildConfig::resolve_value(doc, Path::new("/tmp"))
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = resolve(json!({})).unwrap();
        assert_eq!(config.alias, DEFAULT_ALIAS);
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.algorithm, SignatureAlgorithm::Sha256);
        assert_eq!(config.stub, StubPolicy::Default);
        assert!(config.private_key_path.is_none());
        assert!(config.private_key_pass.is_none());
        assert!(config.metadata.is_none());
        assert!(config.replacements.is_empty());
        assert!(config.main.is_none());
        assert!(config.blacklist.is_empty());
        assert!(config.chmod.is_none());
        assert!(config.sources.is_empty());
        assert!(config.output_path.ends_with(DEFAULT_ALIAS));
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let err = resolve(json!({ "no-such-field": 1 })).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(_)));
    }

    #[test]
    fn invalid_compression_is_rejected() {
        let err = resolve(json!({ "compression": "lzma" })).unwrap_err();
        match err {
            ConfigError::InvalidEnum { field, value, .. } => {
                assert_eq!(field, "compression");
                assert_eq!(value, "lzma");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ed25519_without_key_is_rejected() {
        let err = resolve(json!({ "algorithm": "ed25519" })).unwrap_err();
        assert!(matches!(err, ConfigError::KeyRequired));
    }

    #[test]
    fn key_implies_ed25519() {
        let config = resolve(json!({ "key": "signing.pem" })).unwrap();
        assert_eq!(config.algorithm, SignatureAlgorithm::Ed25519);
        assert!(config
            .private_key_path
            .as_ref()
            .unwrap()
            .ends_with("signing.pem"));
    }

    #[test]
    fn key_with_digest_algorithm_is_rejected() {
        let err = resolve(json!({ "key": "k.pem", "algorithm": "sha256" })).unwrap_err();
        assert!(matches!(err, ConfigError::KeyAlgorithmMismatch(_)));
    }

    #[test]
    fn chmod_parses_octal() {
        let config = resolve(json!({ "chmod": "0755" })).unwrap();
        assert_eq!(config.chmod, Some(0o755));
        let config = resolve(json!({ "chmod": "644" })).unwrap();
        assert_eq!(config.chmod, Some(0o644));
        let err = resolve(json!({ "chmod": "9xyz" })).unwrap_err();
        assert!(matches!(err, ConfigError::BadChmod(_)));
    }

    #[test]
    fn key_pass_prompt_sentinel() {
        let config = resolve(json!({ "key": "k.pem", "key-pass": "prompt" })).unwrap();
        assert_eq!(config.private_key_pass, Some(KeyPass::Prompt));
        let config = resolve(json!({ "key": "k.pem", "key-pass": "hunter2" })).unwrap();
        assert_eq!(
            config.private_key_pass,
            Some(KeyPass::Literal("hunter2".to_string()))
        );
    }

    #[test]
    fn declaration_order_is_preserved() {
        let config = resolve(json!({
            "files": ["a.sh"],
            "files-bin": ["blob.dat"],
            "directories": ["src"],
            "finder": [{ "name": "*.sh" }]
        }))
        .unwrap();
        assert_eq!(config.sources.len(), 4);
        assert!(matches!(
            &config.sources[0],
            SourceDecl::File(f) if !f.binary
        ));
        assert!(matches!(
            &config.sources[1],
            SourceDecl::File(f) if f.binary
        ));
        assert!(matches!(&config.sources[2], SourceDecl::Directory(_)));
        assert!(matches!(&config.sources[3], SourceDecl::Finder(_)));
    }

    #[test]
    fn file_rename_is_carried() {
        let config = resolve(json!({
            "files": [{ "path": "scripts/run.sh", "as": "bin/run.sh" }]
        }))
        .unwrap();
        match &config.sources[0] {
            SourceDecl::File(f) => assert_eq!(f.rename.as_deref(), Some("bin/run.sh")),
            other => panic!("unexpected declaration: {other:?}"),
        }
    }

    #[test]
    fn generated_stub_collects_extras() {
        let config = resolve(json!({
            "stub": true,
            "intercept": true,
            "banner": "built by capsa",
            "shebang": "#!/usr/bin/env bash",
            "mimetypes": { "html": "text/html" },
            "mung": ["PATH_INFO"],
            "main": "index.sh",
            "web": true,
            "not-found": "404.sh"
        }))
        .unwrap();
        match &config.stub {
            StubPolicy::Generated(stub) => {
                assert!(stub.intercept);
                assert_eq!(stub.banner.as_deref(), Some("built by capsa"));
                assert_eq!(stub.shebang, "#!/usr/bin/env bash");
                assert_eq!(stub.mimetypes.get("html").unwrap(), "text/html");
                assert_eq!(stub.mung, vec!["PATH_INFO".to_string()]);
                let web = stub.web.as_ref().unwrap();
                assert_eq!(web.index, "index.sh");
                assert_eq!(web.not_found.as_deref(), Some("404.sh"));
            }
            other => panic!("unexpected stub policy: {other:?}"),
        }
    }

    #[test]
    fn web_without_main_or_index_is_rejected() {
        let err = resolve(json!({ "stub": true, "web": true })).unwrap_err();
        assert!(matches!(err, ConfigError::WebIndexMissing));
    }

    #[test]
    fn bad_replacement_key_is_rejected() {
        let err = resolve(json!({ "replacements": { "a b": 1 } })).unwrap_err();
        assert!(matches!(err, ConfigError::BadReplacementKey(_)));
    }

    #[test]
    fn explicit_base_path_must_exist() {
        let err = resolve(json!({ "base-path": "/nonexistent_dir_12345" })).unwrap_err();
        assert!(matches!(err, ConfigError::BadBasePath(_)));
    }

    #[test]
    fn user_replacement_wins_over_git_version() {
        // A user-supplied value for the token suppresses git resolution
        // entirely, so this passes even outside a repository.
        let config = resolve(json!({
            "git-version": "version",
            "replacements": { "version": "1.2.3" }
        }))
        .unwrap();
        assert_eq!(
            config.replacements.get("version").unwrap(),
            &Value::String("1.2.3".to_string())
        );
    }
}
