//! Settings configuration types

mod port;
mod risk;
mod scan;
mod vuln;

pub use port::PortProbeSettings;
pub use risk::{RiskSettings, SeverityWeights};
pub use scan::ScanSettings;
pub use vuln::VulnProbeSettings;
