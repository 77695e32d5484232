//! Shared test utilities for capsa tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use capsa::config::BuildConfig;
use capsa::pipeline::{BuildError, BuildPipeline, BuildResult};

/// Test environment with a temporary project tree.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project base directory
    pub base: PathBuf,
}

impl TestEnv {
    /// Create a new test environment.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            base,
        }
    }

    /// Write a file under the project base, creating parent directories.
    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.base.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write test file");
        path
    }

    /// Resolve a configuration document against the project base.
    pub fn config(&self, doc: serde_json::Value) -> BuildConfig {
        BuildConfig::resolve_value(doc, &self.base).expect("configuration resolves")
    }

    /// Path under the project base.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.base.join(relative)
    }
}

/// Run a full build with the shipped collaborators.
pub fn build(config: &BuildConfig) -> Result<BuildResult, BuildError> {
    BuildPipeline::with_defaults(config).run()
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file does not exist.
pub fn assert_file_absent(path: &Path) {
    assert!(
        !path.exists(),
        "Expected file to be absent: {}",
        path.display()
    );
}
