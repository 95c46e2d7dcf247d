//! External process capability used by the probes.
//!
//! Mechanism only: start a command, read stdout in bounded chunks, kill, wait.
//! Retry and timeout policy live in the probes.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Stderr beyond this many bytes is dropped from diagnostics
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// How long to wait for stderr to close once the process has exited.
/// Descendants of the tool can keep the pipe open after it dies.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Errors raised by a process backend
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{0} is not installed or not on PATH")]
    ToolNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture {0} pipe")]
    PipeUnavailable(&'static str),

    #[error("Process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    /// Captured standard error, lossily decoded
    pub stderr: String,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Starts external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Start `command`. Fails with [`ProcessError::ToolNotFound`] if the executable is absent.
    async fn start(&self, command: &ToolCommand) -> Result<Box<dyn ProcessHandle>, ProcessError>;
}

/// A running (or finished) external process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Read up to `max_bytes` of stdout. `Ok(None)` is end of stream.
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, ProcessError>;

    /// Forcibly terminate. Idempotent and safe after natural exit.
    async fn kill(&mut self) -> Result<(), ProcessError>;

    /// Wait for exit and collect diagnostics
    async fn wait(&mut self) -> Result<ExitInfo, ProcessError>;
}

/// Native backend on top of `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn start(&self, command: &ToolCommand) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::ToolNotFound(command.program.clone())
                } else {
                    ProcessError::Spawn {
                        program: command.program.clone(),
                        source: e,
                    }
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::PipeUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::PipeUnavailable("stderr"))?;

        // Drain stderr concurrently so a chatty tool cannot block on a full pipe
        let stderr_task = tokio::spawn(collect_bounded(stderr, MAX_STDERR_BYTES));

        tracing::debug!(command = %command.display(), pid = ?child.id(), "Spawned tool");

        Ok(Box::new(TokioProcessHandle {
            child,
            stdout,
            stderr_task: Some(stderr_task),
            exit: None,
        }))
    }
}

struct TokioProcessHandle {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    exit: Option<ExitInfo>,
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, ProcessError> {
        let mut buf = vec![0u8; max_bytes.max(1)];
        let n = self.stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        if self.exit.is_some() {
            return Ok(());
        }
        // Already reaped or exited: nothing left to kill
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait(&mut self) -> Result<ExitInfo, ProcessError> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(mut task) => match tokio::time::timeout(STDERR_DRAIN_GRACE, &mut task).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    task.abort();
                    String::new()
                }
            },
            None => String::new(),
        };
        let exit = ExitInfo {
            code: status.code(),
            stderr,
        };
        self.exit = Some(exit.clone());
        Ok(exit)
    }
}

async fn collect_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(collected.len());
                collected.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&collected).trim().to_string()
}
