//! Port probe (nmap) settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortProbeSettings {
    /// Executable to launch
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Per-host timeout handed to the tool (`--host-timeout`)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Timing template, e.g. "T4"
    #[serde(default = "default_timing")]
    pub timing: String,

    /// Timing template substituted for loopback targets
    #[serde(default = "default_loopback_timing")]
    pub loopback_timing: String,

    /// Attempts per scan; also passed to the tool as `--max-retries`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Added to `timeout_secs` to get the wall-clock deadline of one attempt
    #[serde(default = "default_attempt_grace_secs")]
    pub attempt_grace_secs: u64,

    /// Output beyond this size stops the tool and is treated as truncated markup
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl PortProbeSettings {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + self.attempt_grace_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn default_binary() -> String {
    "nmap".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_timing() -> String {
    "T4".to_string()
}

fn default_loopback_timing() -> String {
    "T5".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_attempt_grace_secs() -> u64 {
    10
}

fn default_max_output_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for PortProbeSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_secs: default_timeout_secs(),
            timing: default_timing(),
            loopback_timing: default_loopback_timing(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            attempt_grace_secs: default_attempt_grace_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}
