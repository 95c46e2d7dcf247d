use serde::{Deserialize, Serialize};

use super::{HostInfo, PortRecord, Status, VulnerabilityRecord};

/// Terminal outcome of one probe invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult<R> {
    pub status: Status,
    pub target: String,
    pub records: Vec<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProbeStats>,
}

pub type PortResult = ProbeResult<PortRecord>;
pub type VulnResult = ProbeResult<VulnerabilityRecord>;

/// Execution statistics attached to a probe result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_errors: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_overflows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Why the tool was stopped before it exited on its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl<R> ProbeResult<R> {
    pub fn new(status: Status, target: impl Into<String>, records: Vec<R>) -> Self {
        Self {
            status,
            target: target.into(),
            records,
            error: None,
            stats: None,
        }
    }

    pub fn completed(target: impl Into<String>, records: Vec<R>) -> Self {
        Self::new(Status::Completed, target, records)
    }

    pub fn failed(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(Status::Failed, target, Vec::new()).with_error(error)
    }

    pub fn timeout(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(Status::Timeout, target, Vec::new()).with_error(error)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_stats(mut self, stats: ProbeStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }
}
