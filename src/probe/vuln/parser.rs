//! Nuclei JSONL line parsing and normalization
//!
//! Each finding is one JSON object per line. Fields that nuclei emits either
//! as a string or as a list are accepted in both shapes. Secondary fields with
//! an unexpected JSON type are dropped instead of rejecting the whole finding.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{Severity, VulnerabilityRecord};

/// Nuclei finding output (per-line JSON)
#[derive(Debug, Deserialize)]
pub struct NucleiFinding {
    #[serde(rename = "template-id")]
    pub template_id: Option<String>,

    /// Older releases emit `template` instead of `template-id`
    pub template: Option<String>,

    pub info: Option<NucleiInfo>,

    pub host: Option<String>,

    #[serde(rename = "matched-at")]
    pub matched_at: Option<String>,

    /// Protocol of the match (http, dns, network, ...)
    #[serde(rename = "type")]
    pub kind: Option<String>,

    #[serde(rename = "matcher-name", default, deserialize_with = "lenient_text")]
    pub matcher_name: Option<String>,

    #[serde(rename = "extracted-results")]
    pub extracted_results: Option<StringOrList>,
}

/// Nuclei template info block
#[derive(Debug, Deserialize)]
pub struct NucleiInfo {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    pub tags: Option<StringOrList>,
    pub reference: Option<StringOrList>,
    pub classification: Option<NucleiClassification>,
}

#[derive(Debug, Deserialize)]
pub struct NucleiClassification {
    #[serde(rename = "cve-id")]
    pub cve_id: Option<StringOrList>,

    #[serde(rename = "cwe-id")]
    pub cwe_id: Option<StringOrList>,

    #[serde(rename = "cvss-metrics", default, deserialize_with = "lenient_text")]
    pub cvss_metrics: Option<String>,

    #[serde(rename = "cvss-score")]
    pub cvss_score: Option<CvssScore>,
}

/// A value nuclei writes as either a string or an array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    Multiple(Vec<Value>),
    /// Any other shape contributes no items
    Other(Value),
}

impl StringOrList {
    /// Items as written, trimmed, blanks dropped. Scalar list entries are
    /// rendered as text, nested values skipped. A single string stays whole.
    pub fn items(&self) -> Vec<String> {
        match self {
            StringOrList::Single(s) => non_blank([s.as_str()]),
            StringOrList::Multiple(values) => {
                let texts: Vec<String> = values.iter().filter_map(scalar_text).collect();
                non_blank(texts.iter().map(String::as_str))
            }
            StringOrList::Other(_) => Vec::new(),
        }
    }

    /// Like [`items`](Self::items), but a single string is a comma-delimited list
    pub fn split_items(&self) -> Vec<String> {
        match self {
            StringOrList::Single(s) => non_blank(s.split(',')),
            _ => self.items(),
        }
    }

    fn joined(&self) -> Option<String> {
        let items = self.items();
        if items.is_empty() {
            None
        } else {
            Some(items.join(", "))
        }
    }
}

fn non_blank<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Optional text field that tolerates numbers and booleans and drops
/// anything else
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_text))
}

/// CVSS score as a number or a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CvssScore {
    Number(f64),
    Text(String),
    /// Not coercible; ignored
    Other(Value),
}

impl CvssScore {
    pub fn value(&self) -> Option<f64> {
        let score = match self {
            CvssScore::Number(n) => *n,
            CvssScore::Text(s) => s.trim().parse::<f64>().ok()?,
            CvssScore::Other(_) => return None,
        };
        score.is_finite().then_some(score)
    }
}

/// Outcome of handling one output line
#[derive(Debug)]
pub enum LineParse {
    /// Not a finding (blank, banner, progress output)
    Ignored,
    Finding(Box<VulnerabilityRecord>),
    Malformed(String),
}

/// Parse one line of tool output
pub fn parse_line(line: &str) -> LineParse {
    let line = line.trim();
    if !line.starts_with('{') {
        return LineParse::Ignored;
    }
    match serde_json::from_str::<NucleiFinding>(line) {
        Ok(finding) => LineParse::Finding(Box::new(normalize(finding))),
        Err(e) => LineParse::Malformed(e.to_string()),
    }
}

/// Map a raw finding into the shared record shape
pub fn normalize(finding: NucleiFinding) -> VulnerabilityRecord {
    let info = finding.info;
    let classification = info.as_ref().and_then(|i| i.classification.as_ref());

    VulnerabilityRecord {
        template_id: finding.template_id.or(finding.template),
        name: info.as_ref().and_then(|i| i.name.clone()),
        severity: info
            .as_ref()
            .and_then(|i| i.severity.as_deref())
            .map(Severity::parse)
            .unwrap_or_default(),
        matched_at: finding.matched_at.or(finding.host),
        description: info.as_ref().and_then(|i| i.description.clone()),
        kind: finding.kind,
        cve: classification
            .and_then(|c| c.cve_id.as_ref())
            .and_then(StringOrList::joined),
        cvss: classification
            .and_then(|c| c.cvss_score.as_ref())
            .and_then(CvssScore::value),
        cvss_metrics: classification.and_then(|c| c.cvss_metrics.clone()),
        cwe: classification
            .and_then(|c| c.cwe_id.as_ref())
            .and_then(StringOrList::joined),
        tags: info
            .as_ref()
            .and_then(|i| i.tags.as_ref())
            .map(StringOrList::split_items),
        references: info
            .as_ref()
            .and_then(|i| i.reference.as_ref())
            .map(StringOrList::items),
        matcher: finding.matcher_name,
        extracted: finding
            .extracted_results
            .as_ref()
            .map(StringOrList::items)
            .filter(|v| !v.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG4J: &str = r#"{"template-id":"cve-2021-44228-log4j","info":{"name":"Apache Log4j RCE","author":"pdteam","severity":"critical","description":"Apache Log4j2 is vulnerable to RCE via JNDI lookup.","reference":["https://nvd.nist.gov/vuln/detail/CVE-2021-44228"],"classification":{"cve-id":["CVE-2021-44228"],"cwe-id":"CWE-502","cvss-metrics":"CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H","cvss-score":10.0},"tags":"cve,cve2021,rce,log4j,apache"},"host":"https://target.com","matched-at":"https://target.com/api/login","type":"http","matcher-name":"dns","timestamp":"2024-01-15T10:30:00Z"}"#;

    fn finding(line: &str) -> VulnerabilityRecord {
        match parse_line(line) {
            LineParse::Finding(record) => *record,
            other => panic!("expected a finding, got {:?}", other),
        }
    }

    #[test]
    fn test_full_finding() {
        let record = finding(LOG4J);
        assert_eq!(record.template_id.as_deref(), Some("cve-2021-44228-log4j"));
        assert_eq!(record.name.as_deref(), Some("Apache Log4j RCE"));
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(record.matched_at.as_deref(), Some("https://target.com/api/login"));
        assert_eq!(record.kind.as_deref(), Some("http"));
        assert_eq!(record.cve.as_deref(), Some("CVE-2021-44228"));
        assert_eq!(record.cwe.as_deref(), Some("CWE-502"));
        assert_eq!(record.cvss, Some(10.0));
        assert_eq!(record.matcher.as_deref(), Some("dns"));
        assert_eq!(record.tags.as_ref().unwrap().len(), 5);
        assert_eq!(record.references.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_fallback_fields() {
        let record = finding(
            r#"{"template":"legacy-id","host":"http://a.example","info":{"severity":"HIGH"}}"#,
        );
        assert_eq!(record.template_id.as_deref(), Some("legacy-id"));
        assert_eq!(record.matched_at.as_deref(), Some("http://a.example"));
        assert_eq!(record.severity, Severity::High);
    }

    #[test]
    fn test_missing_or_unknown_severity() {
        assert_eq!(finding(r#"{"template-id":"x"}"#).severity, Severity::Unknown);
        assert_eq!(
            finding(r#"{"template-id":"x","info":{"severity":"urgent"}}"#).severity,
            Severity::Unknown
        );
    }

    #[test]
    fn test_cvss_as_string() {
        let record = finding(
            r#"{"template-id":"x","info":{"classification":{"cvss-score":"7.5"}}}"#,
        );
        assert_eq!(record.cvss, Some(7.5));

        let record = finding(
            r#"{"template-id":"x","info":{"classification":{"cvss-score":"n/a"}}}"#,
        );
        assert_eq!(record.cvss, None);
    }

    #[test]
    fn test_tags_as_list() {
        let record = finding(r#"{"template-id":"x","info":{"tags":["panel"," exposure",""]}}"#);
        assert_eq!(record.tags, Some(vec!["panel".to_string(), "exposure".to_string()]));
    }

    #[test]
    fn test_uncoercible_cvss_keeps_finding() {
        for cvss in ["true", r#"{"base":9.8}"#, "[9.8]"] {
            let line = format!(
                r#"{{"template-id":"x","info":{{"severity":"critical","classification":{{"cve-id":"CVE-2024-1","cvss-score":{}}}}}}}"#,
                cvss
            );
            let record = finding(&line);
            assert_eq!(record.severity, Severity::Critical);
            assert_eq!(record.cve.as_deref(), Some("CVE-2024-1"));
            assert_eq!(record.cvss, None, "cvss-score {cvss}");
        }
    }

    #[test]
    fn test_non_string_match_metadata() {
        let record = finding(
            r#"{"template-id":"x","matcher-name":7,"extracted-results":[8080,"admin",true,{"k":1},null]}"#,
        );
        assert_eq!(record.matcher.as_deref(), Some("7"));
        assert_eq!(
            record.extracted,
            Some(vec!["8080".to_string(), "admin".to_string(), "true".to_string()])
        );

        let record = finding(r#"{"template-id":"x","matcher-name":{"a":1},"extracted-results":{}}"#);
        assert_eq!(record.matcher, None);
        assert_eq!(record.extracted, None);
    }

    #[test]
    fn test_odd_list_items_are_skipped() {
        let record = finding(
            r#"{"template-id":"x","info":{"tags":["panel",3,{"x":1}],"reference":42,"severity":["high"]}}"#,
        );
        assert_eq!(record.tags, Some(vec!["panel".to_string(), "3".to_string()]));
        assert_eq!(record.references, Some(vec![]));
        assert_eq!(record.severity, Severity::Unknown);
    }

    #[test]
    fn test_single_reference_is_not_split() {
        let record = finding(
            r#"{"template-id":"x","info":{"reference":"https://example.com/a?x=1,2","tags":"a, b"}}"#,
        );
        assert_eq!(
            record.references,
            Some(vec!["https://example.com/a?x=1,2".to_string()])
        );
        assert_eq!(record.tags, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_non_json_lines_are_ignored() {
        assert!(matches!(parse_line(""), LineParse::Ignored));
        assert!(matches!(parse_line("[INF] Templates loaded"), LineParse::Ignored));
    }

    #[test]
    fn test_broken_json_is_malformed() {
        assert!(matches!(parse_line("{\"template-id\": "), LineParse::Malformed(_)));
        assert!(matches!(
            parse_line(r#"{"template-id": 42}"#),
            LineParse::Malformed(_)
        ));
    }
}
