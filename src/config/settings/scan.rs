//! Scan coordinator settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Admission and deadline settings for whole scans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Maximum number of scans executing at the same time (process-wide)
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,

    /// Wall-clock budget for one scan, both probes combined
    #[serde(default = "default_global_scan_timeout_secs")]
    pub global_scan_timeout_secs: u64,

    /// Run the port and vulnerability probes concurrently (true) or one after the other
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

impl ScanSettings {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_scan_timeout_secs)
    }
}

fn default_max_concurrent_scans() -> usize {
    3
}

fn default_global_scan_timeout_secs() -> u64 {
    600
}

fn default_parallel() -> bool {
    true
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_concurrent_scans(),
            global_scan_timeout_secs: default_global_scan_timeout_secs(),
            parallel: default_parallel(),
        }
    }
}
