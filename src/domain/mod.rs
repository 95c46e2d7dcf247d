//! Core domain types for Xenora

mod outcome;
mod probe_result;
mod records;
mod severity;
mod status;
mod target;

pub use outcome::{RiskLevel, ScanOutcome, ScanSummary, SeverityDistribution};
pub use probe_result::{PortResult, ProbeResult, ProbeStats, VulnResult};
pub use records::{HostInfo, PortRecord, VulnerabilityRecord};
pub use severity::Severity;
pub use status::Status;
pub use target::{is_loopback_host, TargetMetadata};
