//! Nmap XML output parsing with bounded recovery of truncated documents

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;

use crate::{HostInfo, PortRecord};

const ROOT_ELEMENT: &str = "nmaprun";

// Minimal Nmap XML schema: only the parts turned into records

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
struct Host {
    status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    hostnames: Option<Hostnames>,
    ports: Option<Ports>,
}

#[derive(Debug, Deserialize)]
struct HostStatus {
    #[serde(rename = "@state")]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "@addr")]
    addr: Option<String>,
    #[serde(rename = "@addrtype")]
    addr_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hostnames {
    #[serde(rename = "hostname", default)]
    entries: Vec<Hostname>,
}

#[derive(Debug, Deserialize)]
struct Hostname {
    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    entries: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@portid")]
    portid: u16,
    #[serde(rename = "@protocol")]
    protocol: String,
    state: Option<PortState>,
    service: Option<Service>,
}

#[derive(Debug, Deserialize)]
struct PortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@product")]
    product: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
    #[serde(rename = "@extrainfo")]
    extra_info: Option<String>,
}

/// Records extracted from one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScan {
    /// Open ports only
    pub ports: Vec<PortRecord>,
    pub hosts: Vec<HostInfo>,
}

/// Result of parsing tool output, recovery included
#[derive(Debug, Clone, PartialEq)]
pub enum MarkupParse {
    /// The document parsed as-is
    Clean(ParsedScan),
    /// The document was truncated and a repaired prefix parsed
    Recovered { scan: ParsedScan, error: String },
    /// Neither the document nor its repair parsed. Carries the original error.
    Unrecoverable { error: String },
}

/// Parse output, attempting a single repair of truncated markup on failure
pub fn parse_with_recovery(xml: &str) -> MarkupParse {
    let error = match parse_document(xml) {
        Ok(scan) => return MarkupParse::Clean(scan),
        Err(e) => e,
    };

    let Some(repaired) = repair_truncated(xml) else {
        return MarkupParse::Unrecoverable { error };
    };

    match parse_document(&repaired) {
        Ok(scan) => MarkupParse::Recovered { scan, error },
        Err(recovery_error) => {
            tracing::debug!(error = %recovery_error, "XML recovery failed");
            MarkupParse::Unrecoverable { error }
        }
    }
}

/// Parse a complete document. Truncated or ill-formed markup is an error.
pub fn parse_document(xml: &str) -> Result<ParsedScan, String> {
    let outline = outline(xml)?;
    match outline.root.as_deref() {
        None => return Err(format!("no {} element found", ROOT_ELEMENT)),
        Some(ROOT_ELEMENT) => {}
        Some(other) => return Err(format!("unexpected root element <{}>", other)),
    }
    if let Some(innermost) = outline.open.last() {
        return Err(format!(
            "unexpected end of document with <{}> still open",
            innermost
        ));
    }

    let run: NmapRun = quick_xml::de::from_str(xml).map_err(|e| e.to_string())?;
    Ok(extract(run))
}

/// Cut the document after its last complete closing tag and close every
/// element still open at that point.
///
/// Returns `None` when no closing tag survives or the prefix is itself
/// ill-formed, so callers make exactly one repair attempt.
pub fn repair_truncated(xml: &str) -> Option<String> {
    let end = last_closing_tag_end(xml)?;
    let mut repaired = xml[..end].to_string();

    let outline = outline(&repaired).ok()?;
    outline.root.as_ref()?;
    for name in outline.open.iter().rev() {
        repaired.push_str("</");
        repaired.push_str(name);
        repaired.push('>');
    }
    Some(repaired)
}

/// Byte offset just past the last complete `</name>` in `xml`
fn last_closing_tag_end(xml: &str) -> Option<usize> {
    let mut search_end = xml.len();
    while let Some(start) = xml[..search_end].rfind("</") {
        if let Some(close) = xml[start..].find('>') {
            let name = &xml[start + 2..start + close];
            if !name.is_empty() && !name.contains('<') {
                return Some(start + close + 1);
            }
        }
        search_end = start;
    }
    None
}

/// Element structure of a (possibly truncated) document
struct Outline {
    root: Option<String>,
    /// Elements still open at end of input, outermost first
    open: Vec<String>,
}

fn outline(xml: &str) -> Result<Outline, String> {
    let mut reader = Reader::from_str(xml);
    let mut root = None;
    let mut open: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if root.is_none() {
                    root = Some(name.clone());
                }
                open.push(name);
            }
            Ok(Event::Empty(e)) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
            }
            Ok(Event::End(_)) => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(Outline { root, open })
}

fn extract(run: NmapRun) -> ParsedScan {
    let mut scan = ParsedScan::default();

    for host in run.hosts {
        let address = host.addresses.into_iter().next();
        scan.hosts.push(HostInfo {
            status: host.status.and_then(|s| s.state),
            address: address.as_ref().and_then(|a| a.addr.clone()),
            address_type: address.and_then(|a| a.addr_type),
            hostnames: host
                .hostnames
                .map(|h| h.entries.into_iter().filter_map(|n| n.name).collect())
                .unwrap_or_default(),
        });

        let ports = host.ports.map(|p| p.entries).unwrap_or_default();
        for port in ports {
            let is_open = port.state.as_ref().is_some_and(|s| s.state == "open");
            if !is_open {
                continue;
            }
            let service = port.service;
            scan.ports.push(PortRecord {
                port: port.portid,
                protocol: port.protocol,
                service: service.as_ref().and_then(|s| s.name.clone()),
                product: service.as_ref().and_then(|s| s.product.clone()),
                version: service.as_ref().and_then(|s| s.version.clone()),
                extra_info: service.and_then(|s| s.extra_info),
            });
        }
    }

    scan
}
