//! Builder for executing short external tool commands with timeout and
//! cancellation support.
//!
//! This is for tools whose whole output is wanted at once (ffprobe, version
//! checks). Long-running, streaming ffmpeg runs go through
//! [`Converter`](crate::Converter) instead.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::cancel::CancelReason;
use crate::process::tool_name;
use crate::{Error, Result};

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use streamforge_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> streamforge_av::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Abort the command when `token` is cancelled.
    pub fn cancel_on(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// The child is killed if the timeout expires or the token fires.
    ///
    /// # Errors
    ///
    /// - [`Error::Launch`] if spawning the process fails.
    /// - [`Error::Canceled`] on timeout or cancellation.
    /// - [`Error::ToolFailed`] if the process exits with a non-zero status
    ///   (message includes stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let program_name = tool_name(&self.program);
        let cancel = self.cancel.clone().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(Error::Canceled(CancelReason::External));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::launch(program_name.clone(), e))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!("{program_name} timed out after {:?}", self.timeout);
                return Err(Error::Canceled(CancelReason::Timeout));
            }
            _ = cancel.cancelled() => return Err(Error::Canceled(CancelReason::External)),
        };

        let output = output?;
        let tool_output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            return Err(Error::tool_failed(
                program_name,
                output.status.code(),
                tool_output.stderr.trim(),
            ));
        }

        Ok(tool_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert!(matches!(result, Err(Error::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_fires() {
        // `sleep 10` should be killed well before 10 seconds.
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"), "unexpected error: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_aborts() {
        let token = CancellationToken::new();
        let mut cmd = ToolCommand::new(PathBuf::from("sleep"));
        cmd.arg("10").cancel_on(token.clone());

        let run = tokio::spawn(async move { cmd.execute().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Canceled(CancelReason::External)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let err = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo broken >&2; exit 3"])
            .execute()
            .await
            .unwrap_err();
        match err {
            Error::ToolFailed {
                exit_code, message, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(message, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
