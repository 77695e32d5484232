//! Per-entry source transformation.
//!
//! Text entries that carry the guest-language marker go through the
//! compaction pipeline (comments stripped, whitespace normalized, line
//! count preserved), then any registered compaction hooks, then
//! placeholder substitution. Binary entries and unmarked text entries pass
//! through unchanged, except that the designated main script always
//! receives placeholder substitution and loses its leading interpreter
//! directive (the capsule's stub supplies the entry point instead).

pub mod compact;

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::BuildConfig;
use crate::source::SourceEntry;

/// Errors produced while transforming an entry's content.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Utf8 { path: PathBuf },

    #[error("compaction hook {index} failed: {message}")]
    Hook { index: usize, message: String },
}

/// A custom compaction hook: receives the already-compacted text, returns
/// the reworked text or an error message that aborts the build.
pub type CompactionHook = Box<dyn Fn(&str) -> Result<String, String>>;

/// Applies the compaction and substitution pipeline to source entries.
pub struct Transformer<'a> {
    config: &'a BuildConfig,
    hooks: Vec<CompactionHook>,
}

impl<'a> Transformer<'a> {
    pub fn new(config: &'a BuildConfig) -> Self {
        Self {
            config,
            hooks: Vec::new(),
        }
    }

    /// Register a custom compaction hook. Hooks run in registration order
    /// after compaction and before placeholder substitution.
    pub fn add_hook(&mut self, hook: CompactionHook) {
        self.hooks.push(hook);
    }

    /// Transform one entry's raw bytes into its final archived form.
    pub fn transform(
        &self,
        entry: &SourceEntry,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>, TransformError> {
        if entry.is_binary {
            return Ok(bytes);
        }

        if compact::is_script_source(&bytes) {
            let text = decode(entry, bytes)?;
            let text = if entry.is_main {
                strip_shebang(&text).to_string()
            } else {
                text
            };
            let mut text = compact::compact(&text);
            for (index, hook) in self.hooks.iter().enumerate() {
                text = hook(&text).map_err(|message| TransformError::Hook { index, message })?;
            }
            let text = substitute(&text, &self.config.replacements);
            Ok(text.into_bytes())
        } else if entry.is_main {
            // No marker, but the main script still gets substitution.
            let text = decode(entry, bytes)?;
            Ok(substitute(&text, &self.config.replacements).into_bytes())
        } else {
            Ok(bytes)
        }
    }
}

fn decode(entry: &SourceEntry, bytes: Vec<u8>) -> Result<String, TransformError> {
    String::from_utf8(bytes).map_err(|_| TransformError::Utf8 {
        path: entry.absolute_path.clone(),
    })
}

/// Remove a single leading interpreter-directive line, if present.
fn strip_shebang(text: &str) -> &str {
    if !text.starts_with("#!") {
        return text;
    }
    match text.find('\n') {
        Some(idx) => &text[idx + 1..],
        None => "",
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// String form of a replacement value: strings verbatim, everything else
/// in JSON notation.
pub fn replacement_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `@name@` token whose name is in `replacements`.
///
/// A single pass over the text: replacement values are spliced in and
/// never rescanned, so a value containing `@token@` syntax is not
/// re-expanded.
pub fn substitute(input: &str, replacements: &BTreeMap<String, Value>) -> String {
    if replacements.is_empty() {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(offset) = input[pos..].find('@') {
        let at = pos + offset;
        out.push_str(&input[pos..at]);
        let rest = &input[at + 1..];
        match rest.find('@') {
            Some(end) if end > 0 && rest[..end].chars().all(is_ident_char) => {
                let name = &rest[..end];
                if let Some(value) = replacements.get(name) {
                    out.push_str(&replacement_text(value));
                    pos = at + 1 + end + 1;
                } else {
                    out.push('@');
                    pos = at + 1;
                }
            }
            _ => {
                out.push('@');
                pos = at + 1;
            }
        }
    }
    out.push_str(&input[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn replacements(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn config_with(pairs: &[(&str, Value)]) -> BuildConfig {
        let mut config =
            BuildConfig::resolve_value(json!({}), Path::new("/tmp")).expect("resolve");
        config.replacements = replacements(pairs);
        config
    }

    fn entry(is_binary: bool, is_main: bool) -> SourceEntry {
        SourceEntry {
            relative_path: "test.sh".to_string(),
            absolute_path: PathBuf::from("/tmp/test.sh"),
            is_binary,
            is_main,
        }
    }

    #[test]
    fn substitute_replaces_known_tokens() {
        let map = replacements(&[("name", json!("world"))]);
        assert_eq!(
            substitute("echo \"Hi, @name@!\"", &map),
            "echo \"Hi, world!\""
        );
    }

    #[test]
    fn substitute_leaves_unknown_tokens() {
        let map = replacements(&[("name", json!("world"))]);
        assert_eq!(substitute("@other@ @name@", &map), "@other@ world");
    }

    #[test]
    fn substitute_is_single_pass() {
        // A replacement value containing @token@ syntax is not re-expanded.
        let map = replacements(&[("a", json!("@b@")), ("b", json!("x"))]);
        assert_eq!(substitute("@a@", &map), "@b@");
        assert_eq!(substitute("@a@ @b@", &map), "@b@ x");
    }

    #[test]
    fn substitute_is_idempotent_without_token_values() {
        let map = replacements(&[("name", json!("world"))]);
        let once = substitute("Hi @name@, bye @name@", &map);
        assert_eq!(substitute(&once, &map), once);
    }

    #[test]
    fn substitute_stringifies_non_strings() {
        let map = replacements(&[("port", json!(8080)), ("debug", json!(false))]);
        assert_eq!(substitute("@port@/@debug@", &map), "8080/false");
    }

    #[test]
    fn substitute_handles_email_like_text() {
        let map = replacements(&[("name", json!("world"))]);
        assert_eq!(substitute("mail me@example.org", &map), "mail me@example.org");
    }

    #[test]
    fn binary_entries_pass_through() {
        let config = config_with(&[("name", json!("world"))]);
        let transformer = Transformer::new(&config);
        let bytes = b"#!/bin/sh\n@name@\n".to_vec();
        let out = transformer.transform(&entry(true, false), bytes.clone()).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn unmarked_text_passes_through() {
        let config = config_with(&[("name", json!("world"))]);
        let transformer = Transformer::new(&config);
        let bytes = b"plain data @name@\n".to_vec();
        let out = transformer.transform(&entry(false, false), bytes.clone()).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn marked_source_is_compacted_and_substituted() {
        let config = config_with(&[("name", json!("world"))]);
        let transformer = Transformer::new(&config);
        let input = b"#!/bin/sh\n# greeting\necho \"Hi, @name@!\"\n".to_vec();
        let out = transformer.transform(&entry(false, false), input).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("#!/bin/sh\n"));
        assert!(!text.contains("greeting"));
        assert!(text.contains("echo \"Hi, world!\""));
    }

    #[test]
    fn main_script_loses_its_shebang() {
        let config = config_with(&[("name", json!("world"))]);
        let transformer = Transformer::new(&config);
        let input = b"#!/bin/sh\necho \"Hi, @name@!\"\n".to_vec();
        let out = transformer.transform(&entry(false, true), input).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "echo \"Hi, world!\"\n");
    }

    #[test]
    fn hooks_run_in_order_after_compaction() {
        let config = config_with(&[]);
        let mut transformer = Transformer::new(&config);
        transformer.add_hook(Box::new(|text| Ok(text.replace("one", "two"))));
        transformer.add_hook(Box::new(|text| Ok(text.replace("two", "three"))));
        let out = transformer
            .transform(&entry(false, false), b"#!/bin/sh\necho one\n".to_vec())
            .unwrap();
        assert!(String::from_utf8(out).unwrap().contains("echo three"));
    }

    #[test]
    fn hook_failure_aborts() {
        let config = config_with(&[]);
        let mut transformer = Transformer::new(&config);
        transformer.add_hook(Box::new(|_| Err("boom".to_string())));
        let err = transformer
            .transform(&entry(false, false), b"#!/bin/sh\necho hi\n".to_vec())
            .unwrap_err();
        match err {
            TransformError::Hook { index, message } => {
                assert_eq!(index, 0);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_utf8_in_marked_source_is_an_error() {
        let config = config_with(&[]);
        let transformer = Transformer::new(&config);
        let mut bytes = b"#!/bin/sh\n".to_vec();
        bytes.extend([0xff, 0xfe]);
        let err = transformer.transform(&entry(false, false), bytes).unwrap_err();
        assert!(matches!(err, TransformError::Utf8 { .. }));
    }
}
