//! Port and service discovery driven by nmap

mod xml;

pub use xml::{MarkupParse, ParsedScan, parse_document, parse_with_recovery, repair_truncated};

#[cfg(test)]
pub(crate) use xml::tests::SAMPLE as NMAP_SAMPLE;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::ProbeError;
use super::runner::{ExitInfo, ProcessError, ProcessHandle, ProcessRunner, ToolCommand};
use crate::config::PortProbeSettings;
use crate::{PortResult, ProbeStats, Status, is_loopback_host};

const TOOL: &str = "nmap";

/// Bytes requested per read of the XML stream
const READ_CHUNK: usize = 64 * 1024;

/// Runs nmap against a bare hostname and turns its XML report into open-port records.
///
/// Each attempt has a wall-clock deadline of the tool's host timeout plus a
/// grace period. Attempts that exit non-zero are retried after a fixed delay;
/// a timed-out, missing or unparseable tool is not.
pub struct PortProbe {
    runner: Arc<dyn ProcessRunner>,
    settings: PortProbeSettings,
    attempt_timeout: Duration,
    retry_delay: Duration,
}

/// What one attempt's reader produced
struct AttemptOutput {
    stdout: Vec<u8>,
    /// Output hit the size cap and the tool was stopped
    truncated: bool,
    exit: ExitInfo,
}

enum AttemptEnd {
    Finished(Result<AttemptOutput, ProcessError>),
    TimedOut,
    Cancelled,
}

impl PortProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: PortProbeSettings) -> Self {
        let attempt_timeout = settings.attempt_timeout();
        let retry_delay = settings.retry_delay();
        Self {
            runner,
            settings,
            attempt_timeout,
            retry_delay,
        }
    }

    /// Override the per-attempt wall-clock deadline
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Override the pause between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn timing_for(&self, hostname: &str) -> &str {
        let timing = if is_loopback_host(hostname) {
            &self.settings.loopback_timing
        } else {
            &self.settings.timing
        };
        timing.trim_start_matches('-')
    }

    /// Full command line for one attempt against `hostname`
    pub fn build_command(&self, hostname: &str) -> ToolCommand {
        ToolCommand::new(&self.settings.binary)
            .args(["-sT", "-sV"])
            .arg(format!("-{}", self.timing_for(hostname)))
            .args(["-Pn", "--open", "-oX", "-"])
            .arg("--max-retries")
            .arg(self.settings.max_retries.to_string())
            .arg("--host-timeout")
            .arg(format!("{}s", self.settings.timeout_secs))
            .arg(hostname)
    }

    /// Scan `hostname` (never a URL). Always returns a terminal result.
    pub async fn scan(&self, hostname: &str, cancel: &CancellationToken) -> PortResult {
        let command = self.build_command(hostname);
        let max_attempts = self.settings.max_retries.max(1);

        tracing::info!(
            target_host = %hostname,
            timing = self.timing_for(hostname),
            max_attempts,
            "Starting port probe"
        );

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.run_attempt(hostname, &command, cancel).await {
                Ok(mut result) => {
                    if let Some(stats) = result.stats.as_mut() {
                        stats.attempts = Some(attempt);
                    }
                    tracing::info!(
                        target_host = %hostname,
                        status = %result.status,
                        open_ports = result.records.len(),
                        attempt,
                        "Port probe finished"
                    );
                    return result;
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                tracing::error!(target_host = %hostname, attempt, error = %err, "Port probe failed");
                return failure_result(hostname, &err, attempt);
            }

            tracing::warn!(
                target_host = %hostname,
                attempt,
                max_attempts,
                error = %err,
                "Port probe attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let err = ProbeError::Cancelled { tool: TOOL.to_string() };
                    return failure_result(hostname, &err, attempt);
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn run_attempt(
        &self,
        hostname: &str,
        command: &ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<PortResult, ProbeError> {
        tracing::debug!(command = %command.display(), "Launching nmap");

        let mut handle = self
            .runner
            .start(command)
            .await
            .map_err(|e| ProbeError::from_process(TOOL, e))?;

        let end = tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptEnd::Cancelled,
            res = tokio::time::timeout(
                self.attempt_timeout,
                collect_output(handle.as_mut(), self.settings.max_output_bytes),
            ) => match res {
                Ok(output) => AttemptEnd::Finished(output),
                Err(_) => AttemptEnd::TimedOut,
            },
        };

        let output = match end {
            AttemptEnd::Finished(Ok(output)) => output,
            AttemptEnd::Finished(Err(e)) => {
                stop(handle.as_mut()).await;
                return Err(ProbeError::from_process(TOOL, e));
            }
            AttemptEnd::TimedOut => {
                stop(handle.as_mut()).await;
                return Err(ProbeError::ToolTimeout {
                    tool: TOOL.to_string(),
                    limit: self.attempt_timeout,
                });
            }
            AttemptEnd::Cancelled => {
                stop(handle.as_mut()).await;
                return Err(ProbeError::Cancelled {
                    tool: TOOL.to_string(),
                });
            }
        };

        if !output.truncated && !output.exit.success() {
            let stderr = if output.exit.stderr.is_empty() {
                "nmap scan failed".to_string()
            } else {
                output.exit.stderr
            };
            return Err(ProbeError::ToolNonZeroExit {
                tool: TOOL.to_string(),
                code: output.exit.code,
                stderr,
            });
        }

        if output.truncated {
            tracing::warn!(
                target_host = %hostname,
                limit = self.settings.max_output_bytes,
                "nmap output exceeded size limit, treating as truncated"
            );
        }

        let text = String::from_utf8_lossy(&output.stdout);
        match parse_with_recovery(&text) {
            MarkupParse::Clean(scan) => {
                let stats = ProbeStats {
                    hosts: scan.hosts,
                    ..Default::default()
                };
                Ok(PortResult::completed(hostname, scan.ports).with_stats(stats))
            }
            MarkupParse::Recovered { scan, error } => {
                tracing::warn!(
                    target_host = %hostname,
                    error = %error,
                    recovered_ports = scan.ports.len(),
                    "Recovered partial nmap output"
                );
                let stats = ProbeStats {
                    hosts: scan.hosts,
                    ..Default::default()
                };
                let err = ProbeError::MalformedOutput {
                    tool: TOOL.to_string(),
                    message: error,
                    recoverable: true,
                };
                Ok(PortResult::new(err.status(), hostname, scan.ports)
                    .with_error(err.to_string())
                    .with_stats(stats))
            }
            MarkupParse::Unrecoverable { error } => Err(ProbeError::MalformedOutput {
                tool: TOOL.to_string(),
                message: error,
                recoverable: false,
            }),
        }
    }
}

/// Read stdout to the end (or until `limit` bytes) and reap the process
async fn collect_output(
    handle: &mut dyn ProcessHandle,
    limit: usize,
) -> Result<AttemptOutput, ProcessError> {
    let mut stdout = Vec::new();
    let mut truncated = false;

    while let Some(chunk) = handle.read_chunk(READ_CHUNK).await? {
        let room = limit.saturating_sub(stdout.len());
        if chunk.len() > room {
            stdout.extend_from_slice(&chunk[..room]);
            truncated = true;
            handle.kill().await?;
            break;
        }
        stdout.extend_from_slice(&chunk);
    }

    let exit = handle.wait().await?;
    Ok(AttemptOutput {
        stdout,
        truncated,
        exit,
    })
}

async fn stop(handle: &mut dyn ProcessHandle) {
    if let Err(e) = handle.kill().await {
        tracing::warn!(error = %e, "Failed to kill nmap");
    }
}

fn failure_result(hostname: &str, err: &ProbeError, attempts: u32) -> PortResult {
    let stats = ProbeStats {
        attempts: Some(attempts),
        ..Default::default()
    };
    let status = err.status();
    debug_assert!(status != Status::Completed);
    PortResult::new(status, hostname, Vec::new())
        .with_error(err.to_string())
        .with_stats(stats)
}
