//! Configuration loading and management

mod io;
mod settings;

pub use settings::{PortProbeSettings, RiskSettings, ScanSettings, SeverityWeights, VulnProbeSettings};

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Error type for invalid tunables
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Admission and global deadline
    #[serde(default)]
    pub scan: ScanSettings,

    /// Port/service discovery probe
    #[serde(default)]
    pub port: PortProbeSettings,

    /// Vulnerability template probe
    #[serde(default)]
    pub vuln: VulnProbeSettings,

    /// Risk score weights
    #[serde(default)]
    pub risk: RiskSettings,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration for a working directory.
    ///
    /// Looks for: explicit path, then `<dir>/.xenora/config.toml`, then
    /// `~/.xenora/config.toml`. Falls back to defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local_path = dir.join(".xenora/config.toml");
        if local_path.exists() {
            return Self::from_file(&local_path);
        }

        let global_path = Self::global_config_path();
        if global_path.exists() {
            return Self::from_file(&global_path);
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Reject tunables that would make the probes misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.max_concurrent_scans == 0 {
            return Err(ConfigError::invalid("scan.max_concurrent_scans", "must be at least 1"));
        }
        if self.scan.global_scan_timeout_secs == 0 {
            return Err(ConfigError::invalid("scan.global_scan_timeout_secs", "must be positive"));
        }

        if self.port.binary.trim().is_empty() {
            return Err(ConfigError::invalid("port.binary", "must not be empty"));
        }
        if self.port.timeout_secs == 0 {
            return Err(ConfigError::invalid("port.timeout_secs", "must be positive"));
        }
        if self.port.max_retries == 0 {
            return Err(ConfigError::invalid("port.max_retries", "must be at least 1"));
        }
        if self.port.max_output_bytes == 0 {
            return Err(ConfigError::invalid("port.max_output_bytes", "must be positive"));
        }

        if self.vuln.binary.trim().is_empty() {
            return Err(ConfigError::invalid("vuln.binary", "must not be empty"));
        }
        if self.vuln.timeout_secs == 0 {
            return Err(ConfigError::invalid("vuln.timeout_secs", "must be positive"));
        }
        if self.vuln.rate_limit == 0 || self.vuln.loopback_rate_limit == 0 {
            return Err(ConfigError::invalid("vuln.rate_limit", "must be positive"));
        }
        if self.vuln.max_vulnerabilities == 0 {
            return Err(ConfigError::invalid("vuln.max_vulnerabilities", "must be at least 1"));
        }
        if self.vuln.chunk_size == 0 {
            return Err(ConfigError::invalid("vuln.chunk_size", "must be positive"));
        }
        if self.vuln.chunk_size > self.vuln.max_buffer_size {
            return Err(ConfigError::invalid(
                "vuln.chunk_size",
                format!(
                    "{} exceeds vuln.max_buffer_size ({})",
                    self.vuln.chunk_size, self.vuln.max_buffer_size
                ),
            ));
        }

        let weights = &self.risk.weights;
        let all_weights = [
            weights.critical,
            weights.high,
            weights.medium,
            weights.low,
            weights.info,
            weights.unknown,
            self.risk.cvss_multiplier,
            self.risk.open_port_factor,
            self.risk.max_port_contribution,
        ];
        if all_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::invalid("risk", "weights must be finite and non-negative"));
        }
        if !self.risk.normalization_k.is_finite() || self.risk.normalization_k <= 0.0 {
            return Err(ConfigError::invalid("risk.normalization_k", "must be positive"));
        }

        Ok(())
    }
}
