//! Process execution engine for the Homebrew CLI.
//!
//! A [`Runner`] owns the path to the `brew` binary and the environment
//! overrides applied to every launch. It exposes two execution modes:
//!
//! - **Buffered** ([`Runner::run_buffered`]): run to completion and return a
//!   single [`ProcessResult`].
//! - **Streaming** ([`Runner::run_streaming`]): relay stdout chunks as they
//!   arrive through an [`OutputStream`].
//!
//! # Pipe draining
//!
//! Both stdout and stderr are piped. A child that fills an unread pipe blocks
//! on write, so both pipes are always drained concurrently and the exit status
//! is only awaited once both have reached end-of-stream.
//!
//! # Examples
//!
//! ```no_run
//! use taproom::Runner;
//!
//! #[tokio::main]
//! async fn main() -> taproom::Result<()> {
//!     let runner = Runner::new("/opt/homebrew/bin/brew");
//!     let result = runner.run_buffered(&["--version"], &[]).await?;
//!     println!("{}", result.stdout.trim());
//!     Ok(())
//! }
//! ```

use crate::error::{ExecutionError, Result};
use crate::stream::OutputStream;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// Keeps brew from running `brew update` before the requested command
pub const NO_AUTO_UPDATE: (&str, &str) = ("HOMEBREW_NO_AUTO_UPDATE", "1");

/// Keeps brew from running `brew cleanup` after install/upgrade
pub const NO_INSTALL_CLEANUP: (&str, &str) = ("HOMEBREW_NO_INSTALL_CLEANUP", "1");

/// Immutable record of a completed buffered execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl ProcessResult {
    /// Exit status zero means success, whatever was written to stderr
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Convert a non-zero exit into [`ExecutionError::NonZeroExit`]
    pub fn into_success(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecutionError::NonZeroExit {
                code: self.status,
                stderr: self.stderr,
            })
        }
    }
}

/// Launches the package manager binary with a fixed environment policy
#[derive(Debug, Clone)]
pub struct Runner {
    program: PathBuf,
    env: Vec<(String, String)>,
}

impl Runner {
    /// Create a runner for `program`.
    ///
    /// The parent environment is inherited, with auto-update and
    /// post-install cleanup disabled on top of it.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            env: [NO_AUTO_UPDATE, NO_INSTALL_CLEANUP]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Add an environment override applied to every launch
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command<S: AsRef<OsStr>>(&self, args: &[S], env: &[(&str, &str)]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn<S: AsRef<OsStr>>(&self, args: &[S], env: &[(&str, &str)]) -> Result<Child> {
        let display_args: Vec<_> = args.iter().map(|a| a.as_ref().to_string_lossy()).collect();
        tracing::debug!(
            program = %self.program.display(),
            args = %display_args.join(" "),
            "spawning"
        );

        self.command(args, env).spawn().map_err(|err| {
            tracing::debug!(program = %self.program.display(), %err, "launch failed");
            ExecutionError::NotFound {
                program: self.program.display().to_string(),
            }
        })
    }

    /// Run to completion without interpreting the exit status.
    ///
    /// Callers that treat some non-zero statuses as findings rather than
    /// failures use this directly; everyone else wants [`Runner::run_buffered`].
    pub async fn output<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        env: &[(&str, &str)],
    ) -> Result<ProcessResult> {
        let mut child = self.spawn(args, env)?;

        let (stdout, stderr) = tokio::try_join!(
            read_pipe(child.stdout.take(), "stdout"),
            read_pipe(child.stderr.take(), "stderr"),
        )?;

        let status = child
            .wait()
            .await
            .map_err(|err| ExecutionError::decode(format!("waiting for process: {err}")))?;
        let status = exit_code(status);
        tracing::debug!(
            status,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "process exited"
        );

        Ok(ProcessResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
        })
    }

    /// Run to completion; a non-zero exit is returned as an error
    pub async fn run_buffered<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        env: &[(&str, &str)],
    ) -> Result<ProcessResult> {
        self.output(args, env).await?.into_success()
    }

    /// [`Runner::run_buffered`] bounded by a timer.
    ///
    /// When the timer fires the in-flight future is dropped, which kills the
    /// child through `kill_on_drop`.
    pub async fn run_buffered_timeout<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ProcessResult> {
        match tokio::time::timeout(timeout, self.run_buffered(args, env)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(program = %self.program.display(), ?timeout, "process timed out");
                Err(ExecutionError::Timeout)
            }
        }
    }

    /// Launch and relay stdout chunks as they arrive.
    ///
    /// Must be called from within a Tokio runtime. A launch failure yields a
    /// stream whose only item is [`ExecutionError::NotFound`].
    pub fn run_streaming<S: AsRef<OsStr>>(&self, args: &[S], env: &[(&str, &str)]) -> OutputStream {
        match self.spawn(args, env) {
            Ok(child) => OutputStream::spawn(child),
            Err(err) => OutputStream::failed(err),
        }
    }
}

/// Read a child pipe to end-of-stream
pub(crate) async fn read_pipe<R>(pipe: Option<R>, name: &str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)
            .await
            .map_err(|err| ExecutionError::decode(format!("reading {name}: {err}")))?;
    }
    Ok(buf)
}

/// Integer exit status; signal deaths map to `128 + signal` like a shell
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
