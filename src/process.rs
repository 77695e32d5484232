//! Command execution with consistent error handling.
//!
//! capsa shells out for exactly one thing: resolving a version string from
//! the working tree when `git-version` is configured. All invocations
//! capture stderr so failures carry a useful message.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<std::path::PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("'{}' failed (exit code {})", self.program, result.code());
            } else {
                bail!(
                    "'{}' failed (exit code {}):\n{}",
                    self.program,
                    result.code(),
                    stderr
                );
            }
        }

        Ok(result)
    }
}

/// Run a command in a specific directory.
pub fn run_in<I, S>(program: &str, args: I, dir: &Path) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Cmd::new(program).args(args).dir(dir).run()
}

/// Check if a program exists in PATH.
pub fn exists(program: &str) -> bool {
    Cmd::new("which")
        .arg(program)
        .allow_fail()
        .run()
        .map(|r| r.success() && !r.stdout_trimmed().is_empty())
        .unwrap_or(false)
}
