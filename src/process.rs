//! External command execution.
//!
//! [`Cmd`] builds an argument vector (never a shell string), runs it as a
//! child process, captures both output streams and enforces an upper bound on
//! runtime. On timeout the child is killed.

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// What a finished command left behind.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The most useful diagnostic text: stderr if non-empty, otherwise stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

#[derive(Debug, Error)]
pub enum CmdError {
    #[error("{0}")]
    Spawn(#[source] std::io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl Cmd {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run to completion. A nonzero exit is *not* an error here; callers
    /// inspect [`CommandOutput::status`].
    pub async fn run(&self) -> Result<CommandOutput, CmdError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CmdError::Spawn)?;

        // Dropping the in-flight future drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CmdError::TimedOut(self.timeout))?
            .map_err(CmdError::Spawn)?;

        Ok(CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_run_captures_output() {
        let out = Cmd::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .run()
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.diagnostic(), "err");
    }

    #[tokio::test]
    async fn test_diagnostic_falls_back_to_stdout() {
        let out = Cmd::new("sh").args(["-c", "echo only-stdout"]).run().await.unwrap();
        assert!(out.success());
        assert_eq!(out.diagnostic(), "only-stdout");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let out = Cmd::new("echo").arg("$(whoami) && rm -rf /").run().await.unwrap();
        assert_eq!(out.stdout.trim(), "$(whoami) && rm -rf /");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let start = Instant::now();
        let err = Cmd::new("sleep")
            .arg("10")
            .timeout(Duration::from_millis(200))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, CmdError::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = Cmd::new("definitely_not_a_real_command_12345")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, CmdError::Spawn(_)));
    }
}
