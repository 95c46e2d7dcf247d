//! Scan command implementation

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use xenora::coordinator::ScanCoordinator;
use xenora::config::Config;
use xenora::probe::TokioProcessRunner;
use xenora::sink::{JsonFileSink, run_and_store};
use xenora::{ScanOutcome, Severity, TargetMetadata};

/// Options for one `xenora scan` invocation
pub struct ScanArgs {
    pub host: String,
    pub scheme: Option<String>,
    pub sequential: bool,
    pub output_dir: Option<PathBuf>,
    pub json: bool,
}

/// Run one scan against `host` and print the outcome
pub async fn scan_command(work_dir: &Path, config_path: Option<&Path>, args: ScanArgs) -> Result<()> {
    let mut config = Config::load(config_path, work_dir)?;
    if args.sequential {
        config.scan.parallel = false;
    }

    let host = args.host.trim();
    if host.is_empty() || host.contains("://") || host.contains('/') {
        bail!("Expected a bare hostname or IP address, got: {}", args.host);
    }
    let scheme = match args.scheme.as_deref() {
        None => None,
        Some(s @ ("http" | "https")) => Some(s.to_string()),
        Some(other) => bail!("Unsupported scheme: {} (expected http or https)", other),
    };

    let metadata = TargetMetadata::for_host(host, scheme);
    let coordinator = ScanCoordinator::new(&config, Arc::new(TokioProcessRunner::new()));

    let outcome = match &args.output_dir {
        Some(dir) => {
            let sink = JsonFileSink::new(dir);
            let outcome = run_and_store(&coordinator, &sink, &args.host, &metadata).await;
            tracing::info!(path = %sink.path_for(outcome.scan_id).display(), "Scan saved");
            outcome
        }
        None => coordinator.scan(&args.host, &metadata).await,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
        println!("{}", json);
    } else {
        print_summary(&outcome);
    }

    Ok(())
}

fn print_summary(outcome: &ScanOutcome) {
    println!("Scan {} of {}", outcome.scan_id, outcome.target);
    println!(
        "  Status: {}  Risk: {:.2} ({})  Duration: {:.2}s",
        outcome.status, outcome.risk_score, outcome.summary.risk_level, outcome.duration
    );
    if let Some(error) = &outcome.error {
        println!("  Error: {}", error);
    }

    println!("\nOpen ports ({}, {}):", outcome.port.records.len(), outcome.port.status);
    for port in &outcome.port.records {
        let service = [
            port.service.as_deref(),
            port.product.as_deref(),
            port.version.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        println!("  {}/{}  {}", port.port, port.protocol, service);
    }

    let dist = &outcome.summary.severity_distribution;
    println!(
        "\nVulnerabilities ({}, {}):",
        outcome.summary.total_vulnerabilities, outcome.vuln.status
    );
    for severity in Severity::ALL {
        let count = dist.get(severity);
        if count > 0 {
            println!("  {:<8} {}", severity.as_str(), count);
        }
    }
    for vuln in &outcome.vuln.records {
        let name = vuln
            .name
            .as_deref()
            .or(vuln.template_id.as_deref())
            .unwrap_or("unnamed");
        let location = vuln.matched_at.as_deref().unwrap_or("-");
        println!("  [{}] {} at {}", vuln.severity, name, location);
    }
}
