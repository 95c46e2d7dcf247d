//! Shared test utilities: stand-in nmap/nuclei executables

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use xenora::config::Config;

pub const NMAP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sT -sV -T5 -Pn --open -oX - 127.0.0.1" version="7.94" xmloutputversion="1.05">
<scaninfo type="connect" protocol="tcp" numservices="1000" services="1-1000"/>
<host><status state="up" reason="user-set" reason_ttl="0"/>
<address addr="127.0.0.1" addrtype="ipv4"/>
<hostnames>
<hostname name="localhost" type="PTR"/>
</hostnames>
<ports>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack" reason_ttl="0"/><service name="ssh" product="OpenSSH" version="9.6p1" method="probed" conf="10"/></port>
<port protocol="tcp" portid="8080"><state state="open" reason="syn-ack" reason_ttl="0"/><service name="http" product="nginx" version="1.24.0" method="probed" conf="10"/></port>
</ports>
</host>
<runstats><finished time="1700000020" elapsed="1.50" exit="success"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>
"#;

pub const NUCLEI_JSONL: &str = r#"[INF] Current nuclei version: v3.1.0
{"template-id":"git-config","info":{"name":"Git Config File Exposure","severity":"medium","tags":["config","git","exposure"]},"type":"http","host":"http://127.0.0.1","matched-at":"http://127.0.0.1/.git/config"}
{"template-id":"CVE-2023-0001","info":{"name":"Example RCE","severity":"critical","classification":{"cve-id":["CVE-2023-0001"],"cvss-score":9.8}},"type":"http","host":"http://127.0.0.1","matched-at":"http://127.0.0.1/api"}
"#;

/// Directory holding executable stand-ins for the scanning tools
pub struct FakeTools {
    pub dir: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Write an executable `/bin/sh` script named `name`
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
        let mut perms = fs::metadata(&path).expect("Failed to stat script").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("Failed to chmod script");
        path
    }

    /// A tool that prints `output` verbatim and exits 0
    pub fn printing(&self, name: &str, output: &str) -> PathBuf {
        let data = self.dir.path().join(format!("{}.out", name));
        fs::write(&data, output).expect("Failed to write tool output");
        self.script(name, &format!("cat '{}'", data.display()))
    }

    /// A tool that never finishes on its own
    pub fn hanging(&self, name: &str) -> PathBuf {
        self.script(name, "exec sleep 30")
    }

    /// A tool that appends to `<name>.count` and fails each run
    pub fn failing(&self, name: &str, stderr: &str) -> PathBuf {
        let counter = self.counter_path(name);
        self.script(
            name,
            &format!("echo run >> '{}'\necho '{}' >&2\nexit 1", counter.display(), stderr),
        )
    }

    pub fn counter_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{}.count", name))
    }

    /// Number of times a `failing` tool was started
    pub fn runs(&self, name: &str) -> usize {
        fs::read_to_string(self.counter_path(name))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

/// Config pointing both probes at the given executables, with short timers
pub fn config_with_tools(nmap: &Path, nuclei: &Path) -> Config {
    let mut config = Config::default();
    config.port.binary = nmap.display().to_string();
    config.port.retry_delay_secs = 0;
    config.port.timeout_secs = 5;
    config.port.attempt_grace_secs = 1;
    config.vuln.binary = nuclei.display().to_string();
    config.vuln.timeout_secs = 10;
    config.scan.global_scan_timeout_secs = 20;
    config
}
