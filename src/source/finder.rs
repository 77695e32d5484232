//! Finder declarations: named filtering operations applied against a
//! fresh recursive walk of the base path.
//!
//! Supported operations: `name`, `not-name` (globs on the file name),
//! `in` (restrict the walk to subdirectories), `exclude` (globs on the
//! relative path), `size` (e.g. `">= 4K"`), `date` (RFC3339 bound on the
//! modification time). Unknown operation names are a resolution error.

use glob::Pattern;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use super::SourceError;
use crate::config::FinderOpRaw;

#[derive(Debug, Clone)]
pub enum FinderOp {
    Name(Vec<Pattern>),
    NotName(Vec<Pattern>),
    In(Vec<PathBuf>),
    Exclude(Vec<Pattern>),
    Size(SizeFilter),
    Date(DateFilter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl CmpOp {
    fn matches<T: PartialOrd>(self, left: T, right: T) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SizeFilter {
    pub op: CmpOp,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DateFilter {
    pub op: CmpOp,
    pub when: SystemTime,
}

/// Parse raw finder operations, rejecting unknown operation names.
pub fn parse_ops(raw: &[FinderOpRaw]) -> Result<Vec<FinderOp>, SourceError> {
    raw.iter()
        .map(|op| match op.name.as_str() {
            "name" => Ok(FinderOp::Name(patterns("name", &op.value)?)),
            "not-name" => Ok(FinderOp::NotName(patterns("not-name", &op.value)?)),
            "in" => Ok(FinderOp::In(
                strings("in", &op.value)?.into_iter().map(PathBuf::from).collect(),
            )),
            "exclude" => Ok(FinderOp::Exclude(patterns("exclude", &op.value)?)),
            "size" => Ok(FinderOp::Size(parse_size(single("size", &op.value)?)?)),
            "date" => Ok(FinderOp::Date(parse_date(single("date", &op.value)?)?)),
            other => Err(SourceError::UnknownFinderOp(other.to_string())),
        })
        .collect()
}

/// Walk the base path (or the `in` subdirectories) and return the absolute
/// paths accepted by every operation, ordered by relative path.
pub fn run(base: &Path, ops: &[FinderOp]) -> Result<Vec<PathBuf>, SourceError> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for op in ops {
        if let FinderOp::In(dirs) = op {
            for dir in dirs {
                let abs = if dir.is_absolute() {
                    dir.clone()
                } else {
                    base.join(dir)
                };
                if !abs.is_dir() {
                    return Err(SourceError::NotADirectory(abs));
                }
                roots.push(abs);
            }
        }
    }
    if roots.is_empty() {
        roots.push(base.to_path_buf());
    }

    let mut found: Vec<(String, PathBuf)> = Vec::new();
    for root in &roots {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| SourceError::Walk {
                path: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = super::relative_string(path, base)?;
            if accepts(ops, path, &rel)? {
                found.push((rel, path.to_path_buf()));
            }
        }
    }

    // Two `in` roots may overlap; keep one hit per relative path and order
    // the result lexicographically.
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found.dedup_by(|a, b| a.0 == b.0);
    Ok(found.into_iter().map(|(_, abs)| abs).collect())
}

fn accepts(ops: &[FinderOp], path: &Path, rel: &str) -> Result<bool, SourceError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for op in ops {
        let ok = match op {
            FinderOp::In(_) => true, // handled through the walk roots
            FinderOp::Name(patterns) => patterns.iter().any(|p| p.matches(&file_name)),
            FinderOp::NotName(patterns) => !patterns.iter().any(|p| p.matches(&file_name)),
            FinderOp::Exclude(patterns) => !patterns.iter().any(|p| p.matches(rel)),
            FinderOp::Size(filter) => {
                let meta = path.metadata().map_err(|source| SourceError::Metadata {
                    path: path.to_path_buf(),
                    source,
                })?;
                filter.op.matches(meta.len(), filter.bytes)
            }
            FinderOp::Date(filter) => {
                let meta = path.metadata().map_err(|source| SourceError::Metadata {
                    path: path.to_path_buf(),
                    source,
                })?;
                let modified = meta.modified().map_err(|source| SourceError::Metadata {
                    path: path.to_path_buf(),
                    source,
                })?;
                filter.op.matches(modified, filter.when)
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn strings(op: &'static str, value: &Value) -> Result<Vec<String>, SourceError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| bad_arg(op, "expected a string or array of strings"))
            })
            .collect(),
        _ => Err(bad_arg(op, "expected a string or array of strings")),
    }
}

fn single(op: &'static str, value: &Value) -> Result<String, SourceError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| bad_arg(op, "expected a string"))
}

fn patterns(op: &'static str, value: &Value) -> Result<Vec<Pattern>, SourceError> {
    strings(op, value)?
        .into_iter()
        .map(|s| Pattern::new(&s).map_err(|e| bad_arg(op, &e.to_string())))
        .collect()
}

fn bad_arg(op: &'static str, message: &str) -> SourceError {
    SourceError::BadFinderArg {
        op,
        message: message.to_string(),
    }
}

fn split_cmp(value: &str) -> (CmpOp, &str) {
    let value = value.trim();
    for (prefix, op) in [
        (">=", CmpOp::Ge),
        ("<=", CmpOp::Le),
        (">", CmpOp::Gt),
        ("<", CmpOp::Lt),
        ("=", CmpOp::Eq),
    ] {
        if let Some(rest) = value.strip_prefix(prefix) {
            return (op, rest.trim());
        }
    }
    // A bare bound means "at least".
    (CmpOp::Ge, value)
}

fn parse_size(value: String) -> Result<SizeFilter, SourceError> {
    let (op, rest) = split_cmp(&value);
    let rest = rest.trim();
    let (digits, multiplier) = match rest.chars().last() {
        Some('K') | Some('k') => (&rest[..rest.len() - 1], 1024u64),
        Some('M') | Some('m') => (&rest[..rest.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&rest[..rest.len() - 1], 1024 * 1024 * 1024),
        _ => (rest, 1),
    };
    let number: u64 = digits
        .trim()
        .parse()
        .map_err(|_| bad_arg("size", &format!("cannot parse `{value}`")))?;
    Ok(SizeFilter {
        op,
        bytes: number * multiplier,
    })
}

fn parse_date(value: String) -> Result<DateFilter, SourceError> {
    let (op, rest) = split_cmp(&value);
    // Accept a bare date by pinning it to midnight UTC.
    let expanded = if rest.len() == 10 && !rest.contains('T') {
        format!("{rest}T00:00:00Z")
    } else {
        rest.to_string()
    };
    let when = humantime::parse_rfc3339(&expanded)
        .map_err(|e| bad_arg("date", &format!("cannot parse `{rest}`: {e}")))?;
    Ok(DateFilter { op, when })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn op(name: &str, value: Value) -> FinderOpRaw {
        FinderOpRaw {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = parse_ops(&[op("frobnicate", json!("x"))]).unwrap_err();
        match err {
            SourceError::UnknownFinderOp(name) => assert_eq!(name, "frobnicate"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn size_filter_parses_units() {
        let ops = parse_ops(&[op("size", json!(">= 4K"))]).unwrap();
        match &ops[0] {
            FinderOp::Size(filter) => {
                assert_eq!(filter.op, CmpOp::Ge);
                assert_eq!(filter.bytes, 4096);
            }
            other => panic!("unexpected op: {other:?}"),
        }
        let ops = parse_ops(&[op("size", json!("< 1M"))]).unwrap();
        match &ops[0] {
            FinderOp::Size(filter) => {
                assert_eq!(filter.op, CmpOp::Lt);
                assert_eq!(filter.bytes, 1024 * 1024);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn date_filter_accepts_bare_dates() {
        assert!(parse_ops(&[op("date", json!(">= 2024-01-01"))]).is_ok());
        assert!(parse_ops(&[op("date", json!(">= 2024-01-01T12:30:00Z"))]).is_ok());
        assert!(parse_ops(&[op("date", json!("yesterday"))]).is_err());
    }

    #[test]
    fn name_glob_selects_matching_files() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::create_dir_all(base.join("src")).unwrap();
        fs::write(base.join("src/a.sh"), "#!/bin/sh\n").unwrap();
        fs::write(base.join("src/b.txt"), "text\n").unwrap();
        fs::write(base.join("top.sh"), "#!/bin/sh\n").unwrap();

        let ops = parse_ops(&[op("name", json!("*.sh"))]).unwrap();
        let found = run(base, &ops).unwrap();
        let rels: Vec<String> = found
            .iter()
            .map(|p| super::super::relative_string(p, base).unwrap())
            .collect();
        assert_eq!(rels, vec!["src/a.sh".to_string(), "top.sh".to_string()]);
    }

    #[test]
    fn in_restricts_walk_roots() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::create_dir_all(base.join("src")).unwrap();
        fs::create_dir_all(base.join("other")).unwrap();
        fs::write(base.join("src/a.sh"), "#!/bin/sh\n").unwrap();
        fs::write(base.join("other/b.sh"), "#!/bin/sh\n").unwrap();

        let ops = parse_ops(&[op("name", json!("*.sh")), op("in", json!("src"))]).unwrap();
        let found = run(base, &ops).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("src/a.sh"));
    }

    #[test]
    fn exclude_drops_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::create_dir_all(base.join("src")).unwrap();
        fs::create_dir_all(base.join("tests")).unwrap();
        fs::write(base.join("src/a.sh"), "#!/bin/sh\n").unwrap();
        fs::write(base.join("tests/t.sh"), "#!/bin/sh\n").unwrap();

        let ops =
            parse_ops(&[op("name", json!("*.sh")), op("exclude", json!("tests/*"))]).unwrap();
        let found = run(base, &ops).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("src/a.sh"));
    }
}
