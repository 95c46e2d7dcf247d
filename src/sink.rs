//! Persistence of scan outcomes

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::ScanCoordinator;
use crate::{ScanOutcome, Status, TargetMetadata};

/// Receives finished scans
#[async_trait]
pub trait ScanSink: Send + Sync {
    /// Persist a `completed` or `partial` outcome
    async fn store(&self, outcome: &ScanOutcome) -> Result<()>;

    /// Record a scan that ended without usable results
    async fn mark_failed(
        &self,
        scan_id: Uuid,
        target: &str,
        status: Status,
        error: &str,
    ) -> Result<()>;
}

/// What gets written for a failed or timed-out scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedScanRecord {
    pub scan_id: Uuid,
    pub target: String,
    pub status: Status,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Run one scan and hand the outcome to `sink`.
///
/// Usable outcomes are stored; failed and timed-out ones go through
/// `mark_failed`. A failing store is downgraded to `mark_failed` as well.
/// Sink errors are logged, never returned.
pub async fn run_and_store(
    coordinator: &ScanCoordinator,
    sink: &dyn ScanSink,
    target: &str,
    metadata: &TargetMetadata,
) -> ScanOutcome {
    let outcome = coordinator.scan(target, metadata).await;

    match outcome.status {
        Status::Completed | Status::Partial => {
            if let Err(e) = sink.store(&outcome).await {
                tracing::error!(scan_id = %outcome.scan_id, error = %e, "Failed to store scan outcome");
                let message = format!("Failed to store results: {:#}", e);
                mark_failed(sink, &outcome, Status::Failed, &message).await;
            }
        }
        status => {
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| format!("Scan ended with status {}", status));
            mark_failed(sink, &outcome, status, &message).await;
        }
    }

    outcome
}

async fn mark_failed(sink: &dyn ScanSink, outcome: &ScanOutcome, status: Status, error: &str) {
    if let Err(e) = sink
        .mark_failed(outcome.scan_id, &outcome.target, status, error)
        .await
    {
        tracing::error!(scan_id = %outcome.scan_id, error = %e, "Failed to mark scan as failed");
    }
}

/// Writes one pretty-printed JSON document per scan into a directory
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the document for `scan_id`
    pub fn path_for(&self, scan_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", scan_id))
    }

    async fn write(&self, scan_id: Uuid, content: String) -> Result<()> {
        let dir = self.dir.clone();
        let path = self.path_for(scan_id);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, content.as_bytes()))
            .await
            .context("Sink writer task failed")??;
        Ok(())
    }
}

#[async_trait]
impl ScanSink for JsonFileSink {
    async fn store(&self, outcome: &ScanOutcome) -> Result<()> {
        let content =
            serde_json::to_string_pretty(outcome).context("Failed to serialize scan outcome")?;
        self.write(outcome.scan_id, content).await?;
        tracing::debug!(scan_id = %outcome.scan_id, dir = %self.dir.display(), "Stored scan outcome");
        Ok(())
    }

    async fn mark_failed(
        &self,
        scan_id: Uuid,
        target: &str,
        status: Status,
        error: &str,
    ) -> Result<()> {
        let record = FailedScanRecord {
            scan_id,
            target: target.to_string(),
            status,
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        let content =
            serde_json::to_string_pretty(&record).context("Failed to serialize failure record")?;
        self.write(scan_id, content).await
    }
}

/// Temp file + rename under an exclusive lock on the directory's lock file
fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let lock_path = dir.join(".xenora-sink.lock");
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
    lock_file
        .lock_exclusive()
        .with_context(|| "Failed to acquire sink lock")?;

    let temp_path = path.with_extension("json.tmp");
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    temp_file
        .write_all(content)
        .with_context(|| "Failed to write scan document")?;
    temp_file
        .sync_all()
        .with_context(|| "Failed to sync scan document")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename scan document: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::config::{PortProbeSettings, ScanSettings, VulnProbeSettings};
    use crate::probe::port::NMAP_SAMPLE;
    use crate::probe::testing::{FakeRunner, Script};
    use crate::probe::{PortProbe, VulnProbe};
    use crate::risk::RiskAggregator;

    #[derive(Default)]
    struct RecordingSink {
        fail_store: bool,
        stored: Mutex<Vec<Uuid>>,
        failed: Mutex<Vec<(Uuid, Status, String)>>,
    }

    #[async_trait]
    impl ScanSink for RecordingSink {
        async fn store(&self, outcome: &ScanOutcome) -> Result<()> {
            if self.fail_store {
                anyhow::bail!("disk full");
            }
            self.stored.lock().unwrap().push(outcome.scan_id);
            Ok(())
        }

        async fn mark_failed(
            &self,
            scan_id: Uuid,
            _target: &str,
            status: Status,
            error: &str,
        ) -> Result<()> {
            self.failed
                .lock()
                .unwrap()
                .push((scan_id, status, error.to_string()));
            Ok(())
        }
    }

    fn coordinator(port: Script, vuln: Script) -> ScanCoordinator {
        ScanCoordinator::from_parts(
            PortProbe::new(FakeRunner::new(vec![port]), PortProbeSettings::default()),
            VulnProbe::new(FakeRunner::new(vec![vuln]), VulnProbeSettings::default()),
            RiskAggregator::default(),
            &ScanSettings::default(),
        )
    }

    fn meta() -> TargetMetadata {
        TargetMetadata::for_host("example.com", None)
    }

    #[tokio::test]
    async fn test_completed_outcome_is_stored() {
        let sink = RecordingSink::default();
        let c = coordinator(Script::output(NMAP_SAMPLE), Script::lines(&[]));
        let outcome = run_and_store(&c, &sink, "example.com", &meta()).await;

        assert_eq!(outcome.status, Status::Completed);
        assert_eq!(*sink.stored.lock().unwrap(), vec![outcome.scan_id]);
        assert!(sink.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_outcome_is_marked() {
        let sink = RecordingSink::default();
        let c = coordinator(Script::NotFound, Script::NotFound);
        let outcome = run_and_store(&c, &sink, "example.com", &meta()).await;

        assert!(sink.stored.lock().unwrap().is_empty());
        let failed = sink.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, outcome.scan_id);
        assert_eq!(failed[0].1, Status::Failed);
        assert!(failed[0].2.contains("not installed"));
    }

    #[tokio::test]
    async fn test_store_error_falls_back_to_mark_failed() {
        let sink = RecordingSink {
            fail_store: true,
            ..Default::default()
        };
        let c = coordinator(Script::output(NMAP_SAMPLE), Script::lines(&[]));
        run_and_store(&c, &sink, "example.com", &meta()).await;

        let failed = sink.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].1, Status::Failed);
        assert!(failed[0].2.contains("disk full"));
    }

    #[tokio::test]
    async fn test_json_sink_writes_documents() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("scans"));
        let c = coordinator(Script::output(NMAP_SAMPLE), Script::lines(&[]));

        let outcome = run_and_store(&c, &sink, "example.com", &meta()).await;
        let path = sink.path_for(outcome.scan_id);
        let stored: ScanOutcome =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.scan_id, outcome.scan_id);
        assert_eq!(stored.summary.open_ports, 2);
        assert!(!path.with_extension("json.tmp").exists());

        let id = Uuid::new_v4();
        sink.mark_failed(id, "example.com", Status::Timeout, "too slow")
            .await
            .unwrap();
        let record: FailedScanRecord =
            serde_json::from_str(&std::fs::read_to_string(sink.path_for(id)).unwrap()).unwrap();
        assert_eq!(record.status, Status::Timeout);
        assert_eq!(record.error, "too slow");
    }
}
