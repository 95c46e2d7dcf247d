//! Normalized target metadata handed in by the target-validation layer

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Metadata describing a validated scan target.
///
/// Extraction of the hostname and scheme from user input happens before this
/// point; here the values are only consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMetadata {
    /// Bare hostname or IP literal (never a URL)
    pub hostname: String,
    /// URL scheme of the original input, if it had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default)]
    pub is_ip: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_loopback: bool,
}

impl TargetMetadata {
    /// Build metadata for an already-extracted host, deriving the IP flags
    pub fn for_host(hostname: impl Into<String>, scheme: Option<String>) -> Self {
        let hostname = hostname.into();
        let ip = hostname.parse::<IpAddr>().ok();
        Self {
            is_ip: ip.is_some(),
            is_private: ip.map(is_private_ip).unwrap_or(false),
            is_loopback: is_loopback_host(&hostname),
            hostname,
            scheme,
        }
    }

    /// Target for the port probe: the hostname alone
    pub fn port_target(&self) -> &str {
        &self.hostname
    }

    /// Target for the vulnerability probe: a full URL, `http` unless a scheme was given
    pub fn vuln_target(&self) -> String {
        let scheme = self.scheme.as_deref().unwrap_or("http");
        let host = match self.hostname.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]", self.hostname),
            _ => self.hostname.clone(),
        };
        format!("{}://{}", scheme, host)
    }
}

/// `localhost`, anything under 127.0.0.0/8, or a loopback IP literal
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.starts_with("127.") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}
