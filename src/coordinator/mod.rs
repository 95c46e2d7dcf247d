//! Scan coordination: admission, global deadline, probe fan-out and merge

mod admission;

pub use admission::{AdmissionController, AdmissionError, AdmissionPermit, QueueInfo};

use chrono::Utc;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Config, ScanSettings};
use crate::probe::{PortProbe, ProcessRunner, VulnProbe};
use crate::risk::RiskAggregator;
use crate::{PortResult, ProbeResult, ScanOutcome, ScanSummary, Status, TargetMetadata, VulnResult};

/// How long cancelled probes get to stop their tools after the global deadline
const CANCEL_GRACE: Duration = Duration::from_secs(5);

const GLOBAL_TIMEOUT_MESSAGE: &str = "Global timeout";

/// Top-level entry point: runs both probes against one target and returns a
/// single [`ScanOutcome`].
///
/// Never fails: probe errors and panics become `failed` probe results, the
/// global deadline becomes a `timeout` outcome. The admission permit is held
/// for the whole scan and released on every exit path.
pub struct ScanCoordinator {
    port_probe: Arc<PortProbe>,
    vuln_probe: Arc<VulnProbe>,
    risk: RiskAggregator,
    admission: AdmissionController,
    parallel: bool,
    global_timeout: Duration,
}

impl ScanCoordinator {
    /// Build probes and scoring from configuration over a shared process backend
    pub fn new(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        Self::from_parts(
            PortProbe::new(Arc::clone(&runner), config.port.clone()),
            VulnProbe::new(runner, config.vuln.clone()),
            RiskAggregator::new(config.risk.clone()),
            &config.scan,
        )
    }

    pub fn from_parts(
        port_probe: PortProbe,
        vuln_probe: VulnProbe,
        risk: RiskAggregator,
        settings: &ScanSettings,
    ) -> Self {
        Self {
            port_probe: Arc::new(port_probe),
            vuln_probe: Arc::new(vuln_probe),
            risk,
            admission: AdmissionController::new(settings.max_concurrent_scans),
            parallel: settings.parallel,
            global_timeout: settings.global_timeout(),
        }
    }

    /// Share an admission pool with other coordinators
    pub fn with_admission(mut self, admission: AdmissionController) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn queue_info(&self) -> QueueInfo {
        self.admission.queue_info()
    }

    /// Wait for an admission slot (FIFO), then scan
    pub async fn scan(&self, target: &str, metadata: &TargetMetadata) -> ScanOutcome {
        match self.admission.acquire().await {
            Ok(permit) => self.run_admitted(target, metadata, permit).await,
            Err(e) => {
                tracing::error!(target_host = %metadata.hostname, error = %e, "Scan not admitted");
                let port = PortResult::failed(metadata.port_target(), e.to_string());
                let vuln = VulnResult::failed(metadata.vuln_target(), e.to_string());
                ScanOutcome {
                    scan_id: Uuid::new_v4(),
                    target: target.to_string(),
                    status: Status::Failed,
                    risk_score: 0.0,
                    summary: ScanSummary::default(),
                    port,
                    vuln,
                    duration: 0.0,
                    started_at: Utc::now(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Scan only if a slot is free right now
    pub async fn try_scan(
        &self,
        target: &str,
        metadata: &TargetMetadata,
    ) -> Result<ScanOutcome, AdmissionError> {
        let permit = self.admission.try_acquire()?;
        Ok(self.run_admitted(target, metadata, permit).await)
    }

    async fn run_admitted(
        &self,
        target: &str,
        metadata: &TargetMetadata,
        _permit: AdmissionPermit,
    ) -> ScanOutcome {
        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        // Dropping this scan future cancels the probes it started
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        tracing::info!(
            %scan_id,
            target_host = %metadata.hostname,
            parallel = self.parallel,
            "Scan started"
        );

        let probes = self.run_probes(metadata, &cancel);
        tokio::pin!(probes);

        let (port, vuln) = match tokio::time::timeout(self.global_timeout, &mut probes).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(
                    %scan_id,
                    target_host = %metadata.hostname,
                    timeout_secs = self.global_timeout.as_secs(),
                    "Scan exceeded global timeout, cancelling probes"
                );
                cancel.cancel();
                if tokio::time::timeout(CANCEL_GRACE, &mut probes).await.is_err() {
                    tracing::warn!(%scan_id, "Probes did not stop within grace period");
                }

                let error = format!(
                    "Scan exceeded global timeout of {}s",
                    self.global_timeout.as_secs()
                );
                return ScanOutcome {
                    scan_id,
                    target: target.to_string(),
                    status: Status::Timeout,
                    risk_score: 0.0,
                    summary: ScanSummary::default(),
                    port: PortResult::timeout(metadata.port_target(), GLOBAL_TIMEOUT_MESSAGE),
                    vuln: VulnResult::timeout(metadata.vuln_target(), GLOBAL_TIMEOUT_MESSAGE),
                    duration: round2(started.elapsed().as_secs_f64()),
                    started_at,
                    error: Some(error),
                };
            }
        };

        let status = merge_status(port.status, vuln.status);
        let assessment = self.risk.aggregate(&port, &vuln);
        let error = compose_error(status, &port, &vuln);
        let duration = round2(started.elapsed().as_secs_f64());

        tracing::info!(
            %scan_id,
            target_host = %metadata.hostname,
            status = %status,
            port_status = %port.status,
            vuln_status = %vuln.status,
            risk_score = assessment.risk_score,
            duration,
            "Scan finished"
        );

        ScanOutcome {
            scan_id,
            target: target.to_string(),
            status,
            risk_score: assessment.risk_score,
            summary: assessment.summary,
            port,
            vuln,
            duration,
            started_at,
            error,
        }
    }

    /// Run both probes as separate tasks so a panic in one stays contained
    async fn run_probes(
        &self,
        metadata: &TargetMetadata,
        cancel: &CancellationToken,
    ) -> (PortResult, VulnResult) {
        let hostname = metadata.port_target().to_string();
        let url = metadata.vuln_target();

        let port_task = {
            let probe = Arc::clone(&self.port_probe);
            let cancel = cancel.clone();
            let hostname = hostname.clone();
            async move { probe.scan(&hostname, &cancel).await }
        };
        let vuln_task = {
            let probe = Arc::clone(&self.vuln_probe);
            let cancel = cancel.clone();
            let url = url.clone();
            async move { probe.scan(&url, &cancel).await }
        };

        if self.parallel {
            let (port, vuln) = tokio::join!(tokio::spawn(port_task), tokio::spawn(vuln_task));
            (settle(port, &hostname, "port"), settle(vuln, &url, "vuln"))
        } else {
            let port = settle(tokio::spawn(port_task).await, &hostname, "port");
            let vuln = settle(tokio::spawn(vuln_task).await, &url, "vuln");
            (port, vuln)
        }
    }
}

/// Turn a crashed probe task into a `failed` result
fn settle<R>(
    joined: Result<ProbeResult<R>, JoinError>,
    target: &str,
    probe: &str,
) -> ProbeResult<R> {
    match joined {
        Ok(result) => result,
        Err(e) => {
            let message = join_error_message(e);
            tracing::error!(probe, error = %message, "Probe task crashed");
            ProbeResult::failed(target, message)
        }
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        "probe task cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe panicked".to_string()
    }
}

/// Combine the two probe statuses into the scan status
pub fn merge_status(port: Status, vuln: Status) -> Status {
    use Status::*;
    match (port, vuln) {
        (Failed, Failed) => Failed,
        (Timeout, _) | (_, Timeout) => Timeout,
        (Partial, _) | (_, Partial) => Partial,
        (Completed, Completed) => Completed,
        _ => Partial,
    }
}

fn compose_error(status: Status, port: &PortResult, vuln: &VulnResult) -> Option<String> {
    if status == Status::Completed {
        return None;
    }
    let parts: Vec<String> = [("port", &port.error), ("vuln", &vuln.error)]
        .into_iter()
        .filter_map(|(name, error)| error.as_ref().map(|e| format!("{} probe: {}", name, e)))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
