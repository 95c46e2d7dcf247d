//! Scripted in-memory process backend for probe tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::runner::{ExitInfo, ProcessError, ProcessHandle, ProcessRunner, ToolCommand};

/// What one started process will do
#[derive(Debug, Clone)]
pub(crate) enum Script {
    Output {
        chunks: Vec<Vec<u8>>,
        exit_code: Option<i32>,
        stderr: String,
        hang: bool,
    },
    NotFound,
    Panic,
}

impl Script {
    /// Emit `text` as a single chunk and exit 0
    pub(crate) fn output(text: &str) -> Self {
        Script::Output {
            chunks: vec![text.as_bytes().to_vec()],
            exit_code: Some(0),
            stderr: String::new(),
            hang: false,
        }
    }

    /// Emit each line (newline-terminated) as its own chunk and exit 0
    pub(crate) fn lines(lines: &[&str]) -> Self {
        Script::Output {
            chunks: lines.iter().map(|l| format!("{}\n", l).into_bytes()).collect(),
            exit_code: Some(0),
            stderr: String::new(),
            hang: false,
        }
    }

    pub(crate) fn chunks(chunks: Vec<Vec<u8>>) -> Self {
        Script::Output {
            chunks,
            exit_code: Some(0),
            stderr: String::new(),
            hang: false,
        }
    }

    /// Produce no output and exit with `code`
    pub(crate) fn exit(code: i32, stderr: &str) -> Self {
        Script::Output {
            chunks: Vec::new(),
            exit_code: Some(code),
            stderr: stderr.to_string(),
            hang: false,
        }
    }

    /// Produce no output and never exit
    pub(crate) fn hang() -> Self {
        Script::Output {
            chunks: Vec::new(),
            exit_code: None,
            stderr: String::new(),
            hang: true,
        }
    }

    /// Keep the stream open after the scripted output
    pub(crate) fn then_hang(self) -> Self {
        match self {
            Script::Output {
                chunks,
                exit_code,
                stderr,
                ..
            } => Script::Output {
                chunks,
                exit_code,
                stderr,
                hang: true,
            },
            other => other,
        }
    }

    pub(crate) fn with_exit(self, code: i32, stderr_text: &str) -> Self {
        match self {
            Script::Output { chunks, hang, .. } => Script::Output {
                chunks,
                exit_code: Some(code),
                stderr: stderr_text.to_string(),
                hang,
            },
            other => other,
        }
    }
}

/// Replays scripts in order; the last one repeats
pub(crate) struct FakeRunner {
    scripts: Mutex<VecDeque<Script>>,
    starts: AtomicUsize,
    kills: Arc<AtomicUsize>,
    commands: Mutex<Vec<ToolCommand>>,
}

impl FakeRunner {
    pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            starts: AtomicUsize::new(0),
            kills: Arc::new(AtomicUsize::new(0)),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub(crate) fn last_command(&self) -> Option<ToolCommand> {
        self.commands.lock().unwrap().last().cloned()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().unwrap_or_else(Script::hang)
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn start(&self, command: &ToolCommand) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.clone());

        match self.next_script() {
            Script::NotFound => Err(ProcessError::ToolNotFound(command.program.clone())),
            Script::Panic => panic!("scripted runner panic"),
            Script::Output {
                chunks,
                exit_code,
                stderr,
                hang,
            } => Ok(Box::new(FakeHandle {
                chunks: chunks.into(),
                exit_code,
                stderr,
                hang,
                killed: false,
                kills: Arc::clone(&self.kills),
            })),
        }
    }
}

struct FakeHandle {
    chunks: VecDeque<Vec<u8>>,
    exit_code: Option<i32>,
    stderr: String,
    hang: bool,
    killed: bool,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    async fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, ProcessError> {
        if self.killed {
            return Ok(None);
        }
        match self.chunks.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > max_bytes {
                    let rest = chunk.split_off(max_bytes);
                    self.chunks.push_front(rest);
                }
                Ok(Some(chunk))
            }
            None if self.hang => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        if !self.killed {
            self.killed = true;
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitInfo, ProcessError> {
        if self.killed {
            return Ok(ExitInfo {
                code: None,
                stderr: self.stderr.clone(),
            });
        }
        if self.hang {
            return std::future::pending().await;
        }
        Ok(ExitInfo {
            code: self.exit_code,
            stderr: self.stderr.clone(),
        })
    }
}
