//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Run the build pipeline
//! - `edit` - Add/replace or remove a single entry
//! - `extract` - Unpack capsule entries to a directory
//! - `validate` - Resolve and check the configuration document
//! - `verify` - Check capsule checksum and signature
//! - `info` - Display capsule metadata and contents

pub mod build;
pub mod edit;
pub mod extract;
pub mod info;
pub mod validate;
pub mod verify;

pub use build::cmd_build;
pub use edit::{cmd_add, cmd_remove};
pub use extract::cmd_extract;
pub use info::cmd_info;
pub use validate::cmd_validate;
pub use verify::cmd_verify;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;

/// The explicit `-c` path, or the conventional candidates in the current
/// directory.
pub(crate) fn resolve_config_path(given: Option<&Path>) -> Result<PathBuf> {
    match given {
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("cannot determine current directory")?;
            Ok(BuildConfig::discover(&cwd)?)
        }
    }
}
