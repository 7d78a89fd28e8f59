//! Subprocess execution
//!
//! [`CommandRunner`] is the seam between rule programming and the host.
//! [`ExecRunner`] runs real binaries through `tokio::process` and bounds
//! every call with a timeout; tests substitute a recording fake.

use crate::error::{IptablesError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Result of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success, -1 when killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for error messages
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs a program with arguments and optional stdin.
///
/// A non-zero exit status is reported through [`CommandOutput`], not as an
/// error; only spawn failures and timeouts are errors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>)
        -> Result<CommandOutput>;
}

/// Render a command line for logs and error messages
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// [`CommandRunner`] backed by real subprocesses
pub struct ExecRunner {
    timeout: Duration,
}

impl ExecRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn spawn_and_wait(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<std::process::Output> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data).await?;
            // dropping the pipe closes it so the child sees EOF
            drop(pipe);
        }

        child.wait_with_output().await
    }
}

impl Default for ExecRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CommandRunner for ExecRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let command = display_command(program, args);
        tracing::debug!(command = %command, "Executing command");

        let pending = self.spawn_and_wait(program, args, stdin);
        let output = match tokio::time::timeout(self.timeout, pending).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(IptablesError::Spawn { command, source }),
            Err(_) => {
                tracing::warn!(command = %command, timeout = ?self.timeout, "Command timed out");
                return Err(IptablesError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if result.success() {
            tracing::trace!(command = %command, "Command succeeded");
        } else {
            tracing::debug!(
                command = %command,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Command exited non-zero"
            );
        }

        Ok(result)
    }
}
