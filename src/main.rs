use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "xenora")]
#[command(about = "Port and vulnerability probe orchestration with risk scoring")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to .xenora/config.toml, then ~/.xenora/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the port and vulnerability probes against a host
    Scan {
        /// Bare hostname or IP address
        host: String,

        /// URL scheme for the vulnerability probe (http or https)
        #[arg(long)]
        scheme: Option<String>,

        /// Run the probes one after the other instead of concurrently
        #[arg(long)]
        sequential: bool,

        /// Directory to write the outcome JSON into
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays clean
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let work_dir = PathBuf::from(".");

    match cli.command {
        Commands::Scan {
            host,
            scheme,
            sequential,
            output_dir,
            json,
        } => {
            let args = cli::scan::ScanArgs {
                host,
                scheme,
                sequential,
                output_dir,
                json,
            };
            cli::scan::scan_command(&work_dir, cli.config.as_deref(), args).await?;
        }
        Commands::Init { force } => {
            cli::init::init_command(cli.config, force).await?;
        }
    }

    Ok(())
}
