//! External command execution honoring the configured transport.
//!
//! Every backend that shells out (helm, aws, eksctl) goes through a
//! [`CommandRunner`], so the choice between running on the host and running
//! inside a toolbox container is made once, from configuration.

use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use lakeforge_common::{Error, Transport};

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with exit code 1 and the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            status: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Whether stderr contains any of the given markers
    pub fn stderr_contains(&self, markers: &[&str]) -> bool {
        markers.iter().any(|m| self.stderr.contains(m))
    }
}

/// Runs external programs
///
/// A non-zero exit is returned as output, not as an error; only a command
/// that could not be started at all is an `Err`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally writing `stdin`
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<CommandOutput, Error>;
}

/// Runs commands as child processes through a [`Transport`]
pub struct ProcessRunner {
    transport: Transport,
}

impl ProcessRunner {
    /// Create a runner for the given transport
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<CommandOutput, Error> {
        let (binary, prefix) = self.transport.wrap(program);
        trace!(program = %binary, args = ?args, "running command");

        let mut child = Command::new(&binary)
            .args(&prefix)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::command_permanent(program, format!("failed to start {}: {}", binary, e)))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())
                    .await
                    .map_err(|e| Error::command(program, format!("failed to write stdin: {}", e)))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::command(program, format!("failed to wait: {}", e)))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and turn a non-zero exit into [`Error::Command`]
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    stdin: Option<String>,
) -> Result<CommandOutput, Error> {
    let output = runner.run(program, args, stdin).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(Error::command(program, output.stderr.trim().to_string()))
    }
}

/// Owned argument vector from string slices
pub fn args<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items.iter().map(|s| s.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_checked_surfaces_stderr() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _| Ok(CommandOutput::failed("Error: release not found\n")));

        let err = run_checked(&runner, "helm", &args(&["status", "x"]), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "command `helm` failed: Error: release not found");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_binary_is_permanent() {
        let runner = ProcessRunner::new(Transport::Host);
        let err = runner
            .run("lakeforge-no-such-binary", &[], None)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn stdin_reaches_the_child() {
        let runner = ProcessRunner::new(Transport::Host);
        let output = runner
            .run("cat", &[], Some("values: {}\n".to_string()))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "values: {}\n");
    }

    #[test]
    fn stderr_markers() {
        let output = CommandOutput::failed("An error occurred (NoSuchEntity)");
        assert!(output.stderr_contains(&["NotFound", "NoSuchEntity"]));
        assert!(!output.stderr_contains(&["AlreadyExists"]));
    }
}
