//! Vulnerability detection driven by nuclei, parsed while the tool runs

mod buffer;
mod parser;

pub use buffer::LineBuffer;
pub use parser::{LineParse, NucleiFinding, normalize, parse_line};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::ProbeError;
use super::runner::{ProcessError, ProcessHandle, ProcessRunner, ToolCommand};
use crate::config::VulnProbeSettings;
use crate::{ProbeStats, Status, VulnResult, VulnerabilityRecord, is_loopback_host};

const TOOL: &str = "nuclei";

/// Parse failures above this share of processed lines downgrade the result to partial
const PARSE_ERROR_RATIO: f64 = 0.2;

/// Only the first few malformed lines are logged individually
const MAX_PARSE_ERROR_LOGS: usize = 5;

/// Runs nuclei against a URL and parses findings incrementally.
///
/// Output is consumed in bounded chunks through a [`LineBuffer`]; parsed
/// records survive if the run is cut short by the deadline, the finding cap,
/// or cancellation. The probe never reports `timeout` itself.
pub struct VulnProbe {
    runner: Arc<dyn ProcessRunner>,
    settings: VulnProbeSettings,
    timeout: Duration,
}

/// Why the read loop stopped
enum StreamEnd {
    Eof,
    CapReached,
    Deadline,
    Cancelled,
    ReadFailed(ProcessError),
}

/// Incremental parse state for one run
struct StreamState {
    buffer: LineBuffer,
    records: Vec<VulnerabilityRecord>,
    lines_processed: usize,
    parse_errors: usize,
    max_records: usize,
}

impl StreamState {
    fn new(max_buffer: usize, max_records: usize) -> Self {
        Self {
            buffer: LineBuffer::new(max_buffer),
            records: Vec::new(),
            lines_processed: 0,
            parse_errors: 0,
            max_records,
        }
    }

    fn cap_reached(&self) -> bool {
        self.records.len() >= self.max_records
    }

    /// Feed a chunk; returns false once the finding cap is reached
    fn ingest(&mut self, chunk: &[u8]) -> bool {
        if self.buffer.push(chunk) {
            tracing::warn!(
                overflows = self.buffer.overflows(),
                "nuclei output buffer overflow, discarded older data"
            );
        }
        for line in self.buffer.drain_lines() {
            self.handle_line(&line);
            if self.cap_reached() {
                return false;
            }
        }
        true
    }

    /// Parse a trailing line that had no terminator when the stream closed
    fn finish(&mut self) {
        if let Some(rest) = self.buffer.take_remainder() {
            if !self.cap_reached() {
                self.handle_line(&rest);
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        match parse_line(line) {
            LineParse::Ignored => {}
            LineParse::Finding(record) => {
                self.lines_processed += 1;
                self.records.push(*record);
            }
            LineParse::Malformed(error) => {
                self.lines_processed += 1;
                self.parse_errors += 1;
                if self.parse_errors <= MAX_PARSE_ERROR_LOGS {
                    tracing::debug!(error = %error, "Skipping malformed nuclei line");
                }
            }
        }
    }

    /// Completed unless too large a share of lines failed to parse
    fn status(&self) -> Status {
        if self.lines_processed > 0
            && self.parse_errors as f64 > self.lines_processed as f64 * PARSE_ERROR_RATIO
        {
            Status::Partial
        } else {
            Status::Completed
        }
    }
}

impl VulnProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: VulnProbeSettings) -> Self {
        let timeout = settings.timeout();
        Self {
            runner,
            settings,
            timeout,
        }
    }

    /// Override the wall-clock deadline of a run
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn rate_limit_for(&self, url: &str) -> u32 {
        if is_loopback_host(url_host(url)) {
            self.settings.loopback_rate_limit
        } else {
            self.settings.rate_limit
        }
    }

    /// Full command line for a run against `url`
    pub fn build_command(&self, url: &str) -> ToolCommand {
        let mut command = ToolCommand::new(&self.settings.binary)
            .args(["-u", url, "-jsonl", "-silent", "-no-color"])
            .arg("-rl")
            .arg(self.rate_limit_for(url).to_string())
            .arg("-timeout")
            .arg(self.settings.request_timeout_secs.to_string())
            .arg("-retries")
            .arg(self.settings.max_retries.to_string())
            .arg("-no-interactsh");

        if !self.settings.severity_filter.is_empty() {
            command = command
                .arg("-severity")
                .arg(self.settings.severity_filter.join(","));
        }
        if let Some(templates) = &self.settings.templates {
            command = command.arg("-t").arg(templates);
        }
        command
    }

    /// Scan `url` (must carry a scheme). Always returns a terminal result.
    pub async fn scan(&self, url: &str, cancel: &CancellationToken) -> VulnResult {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let command = self.build_command(url);

        tracing::info!(
            target_url = %url,
            rate_limit = self.rate_limit_for(url),
            timeout_secs = self.timeout.as_secs(),
            "Starting vulnerability probe"
        );
        tracing::debug!(command = %command.display(), "Launching nuclei");

        let mut handle = match self.runner.start(&command).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = ProbeError::from_process(TOOL, e);
                tracing::error!(target_url = %url, error = %err, "Vulnerability probe failed to start");
                return VulnResult::failed(url, err.to_string());
            }
        };

        let mut state = StreamState::new(
            self.settings.max_buffer_size,
            self.settings.max_vulnerabilities,
        );

        let end = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break StreamEnd::Deadline,
                read = handle.read_chunk(self.settings.chunk_size) => read,
            };
            match read {
                Ok(Some(chunk)) => {
                    if !state.ingest(&chunk) {
                        break StreamEnd::CapReached;
                    }
                }
                Ok(None) => break StreamEnd::Eof,
                Err(e) => break StreamEnd::ReadFailed(e),
            }
        };

        let mut error = None;
        let mut note = None;
        match end {
            StreamEnd::Eof => {
                state.finish();
                match tokio::time::timeout_at(deadline, handle.wait()).await {
                    Ok(Ok(exit)) if !exit.success() => {
                        let err = ProbeError::ToolNonZeroExit {
                            tool: TOOL.to_string(),
                            code: exit.code,
                            stderr: exit.stderr,
                        };
                        if state.records.is_empty() {
                            error = Some(err);
                        } else {
                            tracing::warn!(
                                target_url = %url,
                                error = %err,
                                "nuclei exited non-zero after reporting findings"
                            );
                            note = Some(err.to_string());
                        }
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to reap nuclei");
                    }
                    Err(_) => {
                        stop(handle.as_mut()).await;
                        note = Some(self.deadline_note());
                    }
                }
            }
            StreamEnd::CapReached => {
                stop(handle.as_mut()).await;
                tracing::warn!(
                    target_url = %url,
                    cap = self.settings.max_vulnerabilities,
                    "Finding cap reached, stopping nuclei"
                );
                note = Some(format!(
                    "Stopped after reaching the cap of {} findings",
                    self.settings.max_vulnerabilities
                ));
            }
            StreamEnd::Deadline => {
                stop(handle.as_mut()).await;
                tracing::warn!(
                    target_url = %url,
                    findings = state.records.len(),
                    "nuclei deadline reached, keeping parsed findings"
                );
                note = Some(self.deadline_note());
            }
            StreamEnd::Cancelled => {
                stop(handle.as_mut()).await;
                note = Some("Cancelled before nuclei finished".to_string());
            }
            StreamEnd::ReadFailed(e) => {
                stop(handle.as_mut()).await;
                error = Some(ProbeError::from_process(TOOL, e));
            }
        }

        let duration = started.elapsed().as_secs_f64();
        let stats = ProbeStats {
            lines_processed: Some(state.lines_processed),
            parse_errors: Some(state.parse_errors),
            buffer_overflows: Some(state.buffer.overflows()),
            duration_secs: Some((duration * 100.0).round() / 100.0),
            note,
            ..Default::default()
        };

        let result = match error {
            Some(err) => {
                tracing::error!(target_url = %url, error = %err, "Vulnerability probe failed");
                VulnResult::new(err.status(), url, state.records).with_error(err.to_string())
            }
            None => VulnResult::new(state.status(), url, state.records),
        };

        tracing::info!(
            target_url = %url,
            status = %result.status,
            findings = result.records.len(),
            lines = state.lines_processed,
            parse_errors = state.parse_errors,
            "Vulnerability probe finished"
        );

        result.with_stats(stats)
    }

    fn deadline_note(&self) -> String {
        format!(
            "Deadline of {}s reached, results may be incomplete",
            self.timeout.as_secs()
        )
    }
}

async fn stop(handle: &mut dyn ProcessHandle) {
    if let Err(e) = handle.kill().await {
        tracing::warn!(error = %e, "Failed to kill nuclei");
    }
}

/// Host portion of a URL, brackets stripped from IPv6 literals
fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    if let Some(v6) = authority.strip_prefix('[') {
        return v6.split(']').next().unwrap_or(v6);
    }
    authority.split(':').next().unwrap_or(authority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use crate::probe::testing::{FakeRunner, Script};

    const CRITICAL: &str = r#"{"template-id":"cve-2021-44228","info":{"name":"Log4j RCE","severity":"critical","classification":{"cvss-score":10.0}},"matched-at":"http://example.com/"}"#;
    const HIGH: &str = r#"{"template-id":"git-config","info":{"name":"Git Config","severity":"high"},"matched-at":"http://example.com/.git/config"}"#;

    fn probe(runner: Arc<FakeRunner>, settings: VulnProbeSettings) -> VulnProbe {
        VulnProbe::new(runner, settings)
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("http://example.com/path"), "example.com");
        assert_eq!(url_host("https://127.0.0.1:8443"), "127.0.0.1");
        assert_eq!(url_host("http://[::1]:8080/"), "::1");
        assert_eq!(url_host("http://user@localhost"), "localhost");
    }

    #[test]
    fn test_command_line() {
        let settings = VulnProbeSettings {
            severity_filter: vec!["critical".to_string(), "high".to_string()],
            templates: Some("cves/".to_string()),
            ..Default::default()
        };
        let cmd = probe(FakeRunner::new(vec![]), settings).build_command("http://example.com");
        assert_eq!(cmd.program, "nuclei");
        assert_eq!(
            cmd.args,
            vec![
                "-u",
                "http://example.com",
                "-jsonl",
                "-silent",
                "-no-color",
                "-rl",
                "50",
                "-timeout",
                "5",
                "-retries",
                "1",
                "-no-interactsh",
                "-severity",
                "critical,high",
                "-t",
                "cves/"
            ]
        );
    }

    #[test]
    fn test_loopback_rate_limit() {
        let p = probe(FakeRunner::new(vec![]), VulnProbeSettings::default());
        let args = p.build_command("http://localhost:3000").args;
        let rl = args.iter().position(|a| a == "-rl").unwrap();
        assert_eq!(args[rl + 1], "200");
    }

    #[tokio::test]
    async fn test_streams_findings() {
        let runner = FakeRunner::new(vec![Script::lines(&[
            "[INF] Using Nuclei Engine",
            CRITICAL,
            HIGH,
        ])]);
        let result = probe(runner.clone(), VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Completed);
        assert_eq!(result.total(), 2);
        assert_eq!(result.records[0].severity, Severity::Critical);
        assert_eq!(result.records[0].cvss, Some(10.0));
        let stats = result.stats.unwrap();
        assert_eq!(stats.lines_processed, Some(2));
        assert_eq!(stats.parse_errors, Some(0));
        assert!(stats.note.is_none());
        assert_eq!(runner.kills(), 0);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let runner = FakeRunner::new(vec![Script::output(CRITICAL)]);
        let result = probe(runner, VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;
        assert_eq!(result.total(), 1);
    }

    #[tokio::test]
    async fn test_cap_kills_tool() {
        let lines = [CRITICAL, HIGH, CRITICAL, HIGH, CRITICAL];
        let runner = FakeRunner::new(vec![Script::lines(&lines).then_hang()]);
        let settings = VulnProbeSettings {
            max_vulnerabilities: 3,
            ..Default::default()
        };
        let result = probe(runner.clone(), settings)
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Completed);
        assert_eq!(result.total(), 3);
        assert_eq!(runner.kills(), 1);
        assert!(result.stats.unwrap().note.unwrap().contains("cap of 3"));
    }

    #[tokio::test]
    async fn test_deadline_keeps_parsed_findings() {
        let runner = FakeRunner::new(vec![Script::lines(&[CRITICAL, HIGH]).then_hang()]);
        let result = probe(runner.clone(), VulnProbeSettings::default())
            .with_timeout(Duration::from_millis(100))
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Completed);
        assert_eq!(result.total(), 2);
        assert_eq!(runner.kills(), 1);
        assert!(result.stats.unwrap().note.unwrap().starts_with("Deadline"));
    }

    #[tokio::test]
    async fn test_many_malformed_lines_is_partial() {
        let runner = FakeRunner::new(vec![Script::lines(&[
            CRITICAL,
            HIGH,
            CRITICAL,
            "{\"template-id\": ",
            "{not json}",
        ])]);
        let result = probe(runner, VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Partial);
        assert_eq!(result.total(), 3);
        let stats = result.stats.unwrap();
        assert_eq!(stats.lines_processed, Some(5));
        assert_eq!(stats.parse_errors, Some(2));
    }

    #[tokio::test]
    async fn test_few_malformed_lines_is_completed() {
        let runner = FakeRunner::new(vec![Script::lines(&[
            CRITICAL, HIGH, CRITICAL, HIGH, CRITICAL, "{oops",
        ])]);
        let result = probe(runner, VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Completed);
        assert_eq!(result.total(), 5);
    }

    #[tokio::test]
    async fn test_buffer_overflow_is_survived() {
        let mut chunks = vec![vec![b'x'; 100], b"\n".to_vec()];
        let short = r#"{"template-id":"a","info":{"severity":"high"}}"#;
        chunks.push(format!("{}\n", short).into_bytes());
        let runner = FakeRunner::new(vec![Script::chunks(chunks)]);
        let settings = VulnProbeSettings {
            chunk_size: 32,
            max_buffer_size: 64,
            ..Default::default()
        };
        let result = probe(runner, settings)
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.total(), 1);
        assert_eq!(result.records[0].severity, Severity::High);
        assert_eq!(result.stats.unwrap().buffer_overflows, Some(1));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let runner = FakeRunner::new(vec![Script::NotFound]);
        let result = probe(runner, VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.error.as_deref(), Some("nuclei not installed"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_findings_fails() {
        let runner = FakeRunner::new(vec![Script::exit(1, "could not load templates")]);
        let result = probe(runner, VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Failed);
        assert!(result.error.unwrap().contains("could not load templates"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_with_findings_keeps_them() {
        let runner = FakeRunner::new(vec![Script::lines(&[CRITICAL]).with_exit(1, "late error")]);
        let result = probe(runner, VulnProbeSettings::default())
            .scan("http://example.com", &CancellationToken::new())
            .await;

        assert_eq!(result.status, Status::Completed);
        assert_eq!(result.total(), 1);
        assert!(result.error.is_none());
        let note = result.stats.unwrap().note.unwrap();
        assert!(note.contains("exited with code 1"), "{note}");
        assert!(note.contains("late error"), "{note}");
    }

    #[tokio::test]
    async fn test_cancellation_kills_tool() {
        let runner = FakeRunner::new(vec![Script::lines(&[HIGH]).then_hang()]);
        let cancel = CancellationToken::new();
        let probe = probe(runner.clone(), VulnProbeSettings::default());
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { probe.scan("http://example.com", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = task.await.unwrap();

        assert_eq!(result.total(), 1);
        assert_eq!(runner.kills(), 1);
    }
}
