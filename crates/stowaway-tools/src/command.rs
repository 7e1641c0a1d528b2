//! Running external commands
//!
//! Every adapter goes through a [`CommandRunner`] so tests can script tool
//! behavior without touching the host. [`ProcessRunner`] is the real thing:
//! it spawns the program with piped stdio and feeds secrets over stdin so they
//! never appear in a process listing.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

use crate::error::{Diagnosis, Result, ToolError};

/// A program with its arguments and optional stdin payload
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Data written to the program's stdin (typically a password)
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_data(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Command line for logs and reports; stdin is never included
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is not an error at this level.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Spawns real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(command = %invocation, "running");

        let spawn_error = |source: std::io::Error| ToolError::Spawn {
            program: invocation.program().to_string(),
            source,
        };

        let mut child = tokio::process::Command::new(invocation.program())
            .args(invocation.arguments())
            .stdin(if invocation.stdin_data().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(input) = invocation.stdin_data() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await.map_err(spawn_error)?;
                // Dropping closes the pipe so the program sees EOF
                drop(stdin);
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

static MISSING_REPO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)no repo named").expect("valid regex"));
static REMOTE_UNAVAILABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)repository not found|could not resolve host|no such host").expect("valid regex")
});

/// Classify a failure from its diagnostic output
pub fn diagnose(stderr: &str) -> Diagnosis {
    if MISSING_REPO.is_match(stderr) {
        Diagnosis::MissingRepo
    } else if REMOTE_UNAVAILABLE.is_match(stderr) {
        Diagnosis::RemoteUnavailable
    } else {
        Diagnosis::Other
    }
}

/// Run and turn a non-zero exit into [`ToolError::CommandFailed`]
pub async fn run_checked(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
    message: &str,
) -> Result<CommandOutput> {
    let output = runner.run(invocation).await?;
    if output.is_success() {
        return Ok(output);
    }

    let diagnosis = diagnose(&output.stderr);
    match diagnosis {
        Diagnosis::MissingRepo => {
            tracing::debug!(command = %invocation, "repository does not exist, ignoring")
        }
        Diagnosis::RemoteUnavailable => tracing::warn!(
            command = %invocation,
            stderr = %output.stderr.trim(),
            "remote repository not found or host unreachable"
        ),
        Diagnosis::Other => tracing::warn!(
            command = %invocation,
            stderr = %output.stderr.trim(),
            "{}", message
        ),
    }

    Err(ToolError::CommandFailed {
        command: invocation.command_line(),
        message: message.to_string(),
        code: output.code,
        stderr: output.stderr,
        diagnosis,
    })
}
