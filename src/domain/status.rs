use serde::{Deserialize, Serialize};

/// Lifecycle status of a probe or of a whole scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Work is in flight. Never appears on a returned result.
    Running,
    /// Finished with all data usable
    Completed,
    /// Finished without usable data
    Failed,
    /// Finished with some data lost or recovered from corrupted output
    Partial,
    /// A deadline elapsed before the work finished. Never retried.
    Timeout,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Partial => "partial",
            Status::Timeout => "timeout",
        }
    }

    /// Whether this status may be handed back to a caller
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Running)
    }

    /// Completed or partial results carry usable data
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Completed | Status::Partial)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
