//! Init command implementation

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use xenora::config::Config;

/// Default configuration content for xenora init
pub const DEFAULT_CONFIG: &str = r#"# Xenora Configuration
# =====================
#
# Every key is optional; missing keys fall back to the values shown here.

# ============================================================================
# SCAN - Admission control and global deadline
# ============================================================================
#
#   max_concurrent_scans     - Scans allowed to run at the same time (default: 3)
#   global_scan_timeout_secs - Budget for one scan, both probes combined (default: 600)
#   parallel                 - Run both probes concurrently (default: true)

[scan]
max_concurrent_scans = 3
global_scan_timeout_secs = 600
parallel = true

# ============================================================================
# PORT - Port and service discovery (nmap)
# ============================================================================
#
# An attempt that exits non-zero is retried after retry_delay_secs.
# Each attempt is killed after timeout_secs + attempt_grace_secs.

[port]
binary = "nmap"
timeout_secs = 180
timing = "T4"
# Used instead of `timing` for localhost / 127.0.0.0/8 targets
loopback_timing = "T5"
max_retries = 2
retry_delay_secs = 2
attempt_grace_secs = 10
max_output_bytes = 16777216

# ============================================================================
# VULN - Vulnerability templates (nuclei)
# ============================================================================
#
# Findings are parsed while the tool runs. Reaching max_vulnerabilities or
# timeout_secs stops the tool and keeps what was parsed so far.

[vuln]
binary = "nuclei"
timeout_secs = 300
rate_limit = 50
loopback_rate_limit = 200
request_timeout_secs = 5
max_retries = 1
max_vulnerabilities = 1000
chunk_size = 8192
max_buffer_size = 1048576
# Restrict reported severities, e.g. ["critical", "high"]. Empty means all.
severity_filter = []
# templates = "/path/to/templates"

# ============================================================================
# RISK - Score = 10 * raw / (raw + normalization_k)
# ============================================================================

[risk]
cvss_multiplier = 0.15
open_port_factor = 0.05
max_port_contribution = 1.0
normalization_k = 15.0

[risk.weights]
critical = 5.0
high = 3.0
medium = 2.0
low = 1.0
info = 0.5
unknown = 0.5
"#;

/// Write the default configuration file (global unless `--config` is given)
pub async fn init_command(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Config::global_config_path);
    write_default_config(&config_path, force)?;
    println!("Created: {}", config_path.display());
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration already exists: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::from_toml_str(DEFAULT_CONFIG).context("Built-in default config is invalid")?;
    Config::write_atomic(path, DEFAULT_CONFIG)?;
    tracing::info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}
