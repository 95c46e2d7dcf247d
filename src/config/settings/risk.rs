//! Risk scoring weights

use serde::{Deserialize, Serialize};

use crate::Severity;

/// Weight contributed by one finding of each severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    #[serde(default = "default_critical")]
    pub critical: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
    #[serde(default = "default_low")]
    pub low: f64,
    #[serde(default = "default_info")]
    pub info: f64,
    #[serde(default = "default_unknown")]
    pub unknown: f64,
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
            Severity::Unknown => self.unknown,
        }
    }
}

fn default_critical() -> f64 {
    5.0
}

fn default_high() -> f64 {
    3.0
}

fn default_medium() -> f64 {
    2.0
}

fn default_low() -> f64 {
    1.0
}

fn default_info() -> f64 {
    0.5
}

fn default_unknown() -> f64 {
    0.5
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: default_critical(),
            high: default_high(),
            medium: default_medium(),
            low: default_low(),
            info: default_info(),
            unknown: default_unknown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default)]
    pub weights: SeverityWeights,

    /// Multiplier applied to each positive CVSS score
    #[serde(default = "default_cvss_multiplier")]
    pub cvss_multiplier: f64,

    /// Contribution of each open port
    #[serde(default = "default_open_port_factor")]
    pub open_port_factor: f64,

    /// Ceiling on the combined open-port contribution
    #[serde(default = "default_max_port_contribution")]
    pub max_port_contribution: f64,

    /// `K` in `10 * raw / (raw + K)`
    #[serde(default = "default_normalization_k")]
    pub normalization_k: f64,
}

fn default_cvss_multiplier() -> f64 {
    0.15
}

fn default_open_port_factor() -> f64 {
    0.05
}

fn default_max_port_contribution() -> f64 {
    1.0
}

fn default_normalization_k() -> f64 {
    15.0
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            cvss_multiplier: default_cvss_multiplier(),
            open_port_factor: default_open_port_factor(),
            max_port_contribution: default_max_port_contribution(),
            normalization_k: default_normalization_k(),
        }
    }
}
