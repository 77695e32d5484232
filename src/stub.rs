//! Bootstrap stub synthesis.
//!
//! The stub is the loader prepended to the capsule that makes it directly
//! executable. Generated stubs are shell-style: a shebang, optional banner
//! comments, the alias self-mapping, optional interception and
//! web-serving data, an optional require of the main script, and the
//! terminator marker separating stub from archived content. Custom stub
//! files are used verbatim, with placeholder substitution applied when
//! replacements are configured.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{BuildConfig, GeneratedStub, StubPolicy, WebStub, DEFAULT_SHEBANG};
use crate::transform;

/// Marker line separating the stub from the archived content.
pub const STUB_TERMINATOR: &str = "# @@CAPSA-STUB-END@@";

/// Errors produced while synthesizing the stub.
#[derive(Debug, Error)]
pub enum StubError {
    #[error("failed to read custom stub {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("custom stub {0} is not valid UTF-8 (required for placeholder substitution)")]
    Utf8(PathBuf),
}

/// Produce the stub bytes for the configured policy.
pub fn synthesize(config: &BuildConfig) -> Result<Vec<u8>, StubError> {
    match &config.stub {
        StubPolicy::Default => {
            let minimal = GeneratedStub {
                intercept: false,
                banner: None,
                shebang: DEFAULT_SHEBANG.to_string(),
                mimetypes: BTreeMap::new(),
                mung: Vec::new(),
                web: None,
            };
            Ok(render(config, &minimal).into_bytes())
        }
        StubPolicy::Generated(stub) => Ok(render(config, stub).into_bytes()),
        StubPolicy::CustomFile { path } => {
            let bytes = std::fs::read(path).map_err(|source| StubError::Read {
                path: path.clone(),
                source,
            })?;
            if config.replacements.is_empty() {
                Ok(bytes)
            } else {
                let text =
                    String::from_utf8(bytes).map_err(|_| StubError::Utf8(path.clone()))?;
                Ok(transform::substitute(&text, &config.replacements).into_bytes())
            }
        }
    }
}

fn render(config: &BuildConfig, stub: &GeneratedStub) -> String {
    let mut out = String::new();
    out.push_str(&stub.shebang);
    out.push('\n');

    if let Some(banner) = &stub.banner {
        for line in banner.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }

    out.push_str(&format!("CAPSA_ALIAS={}\n", quote(&config.alias)));

    if stub.intercept {
        out.push_str("CAPSA_INTERCEPT=1\n");
    }

    if !stub.mung.is_empty() {
        out.push_str(&format!("CAPSA_MUNG={}\n", quote(&stub.mung.join(" "))));
    }

    for (ext, mime) in &stub.mimetypes {
        out.push_str(&format!("CAPSA_MIME_{}={}\n", var_name(ext), quote(mime)));
    }

    if let Some(web) = &stub.web {
        render_web(&mut out, web);
    }

    if let Some(main) = &config.main {
        out.push_str(&format!("CAPSA_MAIN={}\n", quote(main)));
        out.push_str(". \"$CAPSA_MAIN\"\n");
    }

    out.push_str(STUB_TERMINATOR);
    out.push('\n');
    out
}

fn render_web(out: &mut String, web: &WebStub) {
    out.push_str(&format!("CAPSA_WEB_INDEX={}\n", quote(&web.index)));
    if let Some(not_found) = &web.not_found {
        out.push_str(&format!("CAPSA_WEB_NOT_FOUND={}\n", quote(not_found)));
    }
    if let Some(rewrite) = &web.rewrite {
        out.push_str(&format!("CAPSA_WEB_REWRITE={}\n", quote(rewrite)));
    }
}

/// Single-quote a value for the shell, escaping embedded quotes.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Mangle a mimetype extension into a variable-name suffix.
fn var_name(ext: &str) -> String {
    ext.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
