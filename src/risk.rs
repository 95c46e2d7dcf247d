//! Risk scoring across both probes' findings

use crate::config::RiskSettings;
use crate::{
    PortResult, RiskLevel, ScanSummary, Severity, SeverityDistribution, VulnResult,
    VulnerabilityRecord,
};

/// Score plus the summary it was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    /// Normalized into `[0, 10]`, two decimals
    pub risk_score: f64,
    pub summary: ScanSummary,
}

/// Pure aggregation of findings into a bounded risk score.
///
/// `raw = Σ weight(severity) + Σ cvss × multiplier + min(ports × factor, cap)`,
/// normalized as `10 × raw / (raw + K)` so large finding counts saturate
/// smoothly instead of clipping.
#[derive(Debug, Clone, Default)]
pub struct RiskAggregator {
    settings: RiskSettings,
}

impl RiskAggregator {
    pub fn new(settings: RiskSettings) -> Self {
        Self { settings }
    }

    pub fn aggregate(&self, port: &PortResult, vuln: &VulnResult) -> RiskAssessment {
        let open_ports = port.records.len();
        let risk_score = self.score(&vuln.records, open_ports);
        let severity_distribution = SeverityDistribution::from_records(&vuln.records);

        RiskAssessment {
            risk_score,
            summary: ScanSummary {
                total_vulnerabilities: vuln.records.len(),
                open_ports,
                critical_count: severity_distribution.critical,
                high_count: severity_distribution.high,
                severity_distribution,
                risk_level: RiskLevel::from_score(risk_score),
            },
        }
    }

    /// Normalized score for a set of findings and an open-port count
    pub fn score(&self, records: &[VulnerabilityRecord], open_ports: usize) -> f64 {
        let raw = self.raw_score(records, open_ports);
        if raw.is_nan() || raw <= 0.0 {
            return 0.0;
        }
        let normalized = 10.0 * raw / (raw + self.settings.normalization_k);
        if !normalized.is_finite() {
            // raw overflowed, the curve has saturated
            return 10.0;
        }
        round2(normalized.clamp(0.0, 10.0))
    }

    fn raw_score(&self, records: &[VulnerabilityRecord], open_ports: usize) -> f64 {
        let weights: f64 = records
            .iter()
            .map(|r| self.settings.weights.weight(r.severity))
            .sum();
        let cvss: f64 = records
            .iter()
            .filter_map(VulnerabilityRecord::effective_cvss)
            .map(|c| c * self.settings.cvss_multiplier)
            .sum();
        let ports = (open_ports as f64 * self.settings.open_port_factor)
            .min(self.settings.max_port_contribution);

        weights + cvss + ports
    }

    /// Weight for a raw severity string; unrecognized values get the `unknown` weight
    pub fn severity_weight(&self, severity: &str) -> f64 {
        self.settings.weights.weight(Severity::parse(severity))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
