//! Host command execution with consistent error handling.
//!
//! Package-manager and packing steps are long running, so command lists
//! stream their output to the terminal; single queries capture stdout.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use crate::error::BuildError;

/// Result of a captured command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

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

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        tracing::debug!("exec: {} {}", self.program, self.args.join(" "));

        let output = self
            .command()
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                anyhow::bail!("{} (exit code {})", prefix, result.code());
            } else {
                anyhow::bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Run the command with inherited stdio.
    ///
    /// Output goes directly to the terminal. Use for long-running commands
    /// where the user should see progress (e.g., `emerge`).
    pub fn run_interactive(self) -> Result<ExitStatus> {
        tracing::debug!("exec: {} {}", self.program, self.args.join(" "));

        let mut cmd = self.command();
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        if !self.allow_fail && !status.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));
            anyhow::bail!("{} (exit code {})", prefix, status.code().unwrap_or(-1));
        }

        Ok(status)
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Run a shell command and return its stdout regardless of exit status.
///
/// Used for queries whose output is parsed; a parse failure reports far
/// better than the exit code would.
pub fn shell_output(command: &str) -> Result<String> {
    Ok(Cmd::new("sh").args(["-c", command]).allow_fail().run()?.stdout)
}

/// Run each shell command in order, streaming output, stopping at the first
/// one that exits non-zero. Empty entries are skipped.
pub fn run_command_list<S: AsRef<str>>(commands: &[S]) -> Result<()> {
    for command in commands.iter().map(AsRef::as_ref) {
        if command.trim().is_empty() {
            continue;
        }
        let status = Cmd::new("sh")
            .args(["-c", command])
            .allow_fail()
            .run_interactive()?;
        if !status.success() {
            return Err(BuildError::CommandFailed {
                command: command.to_string(),
                code: status.code().unwrap_or(-1),
            }
            .into());
        }
    }
    Ok(())
}

/// Quote a path for interpolation into a `sh -c` command line.
pub fn sh_quote(path: &Path) -> String {
    let s = path.to_string_lossy();
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%,=".contains(c))
    {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

// =============================================================================
// Tests
// =============================================================================
