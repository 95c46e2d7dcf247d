//! Failure taxonomy shared by the probes

use std::time::Duration;

use super::runner::ProcessError;
use crate::Status;

/// Why a probe attempt did not produce a clean result.
///
/// Every variant maps to exactly one terminal [`Status`]; callers branch on
/// [`ProbeError::status`] and [`ProbeError::is_retryable`] instead of on
/// caught faults.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{tool} not installed")]
    ToolNotFound { tool: String },

    #[error("{tool} exceeded its {}s deadline", .limit.as_secs())]
    ToolTimeout { tool: String, limit: Duration },

    #[error("{tool} exited with {}: {stderr}", describe_exit(.code))]
    ToolNonZeroExit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Malformed {tool} output: {message}")]
    MalformedOutput {
        tool: String,
        message: String,
        /// Set when bounded recovery produced usable data
        recoverable: bool,
    },

    #[error("{tool} cancelled")]
    Cancelled { tool: String },

    #[error("{tool} I/O failure: {source}")]
    Io {
        tool: String,
        #[source]
        source: ProcessError,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "a signal".to_string(),
    }
}

impl ProbeError {
    pub fn from_process(tool: &str, err: ProcessError) -> Self {
        match err {
            ProcessError::ToolNotFound(_) => ProbeError::ToolNotFound {
                tool: tool.to_string(),
            },
            other => ProbeError::Io {
                tool: tool.to_string(),
                source: other,
            },
        }
    }

    /// Terminal status this failure resolves to
    pub fn status(&self) -> Status {
        match self {
            ProbeError::ToolTimeout { .. } | ProbeError::Cancelled { .. } => Status::Timeout,
            ProbeError::MalformedOutput {
                recoverable: true, ..
            } => Status::Partial,
            ProbeError::ToolNotFound { .. }
            | ProbeError::ToolNonZeroExit { .. }
            | ProbeError::MalformedOutput { .. }
            | ProbeError::Io { .. } => Status::Failed,
        }
    }

    /// Whether another attempt might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::ToolNonZeroExit { .. } | ProbeError::Io { .. })
    }
}
