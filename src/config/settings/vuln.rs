//! Vulnerability probe (nuclei) settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnProbeSettings {
    /// Executable to launch
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Wall-clock deadline for the whole probe run
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Requests per second (`-rl`)
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Rate limit substituted when the target URL points at loopback
    #[serde(default = "default_loopback_rate_limit")]
    pub loopback_rate_limit: u32,

    /// Per-request timeout handed to the tool (`-timeout`)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-request retries handed to the tool (`-retries`)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Hard cap on parsed findings; reaching it kills the tool
    #[serde(default = "default_max_vulnerabilities")]
    pub max_vulnerabilities: usize,

    /// Bytes requested per read from the tool's stdout
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upper bound on unparsed output held in memory
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Only report these severities (`-severity`). Empty means all.
    #[serde(default)]
    pub severity_filter: Vec<String>,

    /// Template path or directory (`-t`)
    #[serde(default)]
    pub templates: Option<String>,
}

impl VulnProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_binary() -> String {
    "nuclei".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_rate_limit() -> u32 {
    50
}

fn default_loopback_rate_limit() -> u32 {
    200
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    1
}

fn default_max_vulnerabilities() -> usize {
    1000
}

fn default_chunk_size() -> usize {
    8192
}

fn default_max_buffer_size() -> usize {
    1024 * 1024
}

impl Default for VulnProbeSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_secs: default_timeout_secs(),
            rate_limit: default_rate_limit(),
            loopback_rate_limit: default_loopback_rate_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            max_vulnerabilities: default_max_vulnerabilities(),
            chunk_size: default_chunk_size(),
            max_buffer_size: default_max_buffer_size(),
            severity_filter: Vec::new(),
            templates: None,
        }
    }
}
