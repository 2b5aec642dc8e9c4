//! StreamScan CLI
//!
//! Scan files and URLs with the streaming verdict engine.
//!
//! # Usage
//!
//! ```bash
//! streamscan file ./download.exe ./invoice.pdf
//! streamscan url https://example.com/setup.msi --no-early-termination
//! streamscan batch ./packets/*.bin --format json
//! streamscan config show
//! ```
//!
//! Exit status is 0 when everything is clean, 2 when a threat was blocked
//! and 1 on usage or setup errors.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "streamscan")]
#[command(author = "OpenSASE")]
#[command(version)]
#[command(about = "Streaming malware verdicts for downloads and uploads", long_about = None)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, short, env = "CONFIG_PATH")]
    config: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan files on disk
    File {
        paths: Vec<String>,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Stream and scan a URL
    Url {
        url: String,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Classify complete items with size-dependent thresholds
    Batch { paths: Vec<String> },
    /// Inspect or create engine config
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(clap::Args, Clone, Copy)]
pub struct ScanArgs {
    /// Force fast block mode on for this scan
    #[arg(long, conflicts_with = "no_early_termination")]
    early_termination: bool,

    /// Force fast block mode off for this scan
    #[arg(long)]
    no_early_termination: bool,

    /// Override the standard confidence threshold
    #[arg(long)]
    threshold: Option<f64>,
}

impl ScanArgs {
    fn early_override(&self) -> Option<bool> {
        match (self.early_termination, self.no_early_termination) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective config (file + environment)
    Show,
    /// Write the default config to a file
    Init { path: String },
    /// Check a config file
    Validate { path: String },
}

/// `RUST_LOG` when set, otherwise info
fn log_directive(env: Option<String>) -> String {
    env.unwrap_or_else(|| "info".into())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_directive(
            std::env::var("RUST_LOG").ok(),
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::File { paths, scan } => {
            commands::scan::files(cli.config.as_deref(), &paths, scan, cli.format).await
        }
        Commands::Url { url, scan } => {
            commands::scan::url(cli.config.as_deref(), &url, scan, cli.format).await
        }
        Commands::Batch { paths } => {
            commands::batch::handle(cli.config.as_deref(), &paths, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::handle(action, cli.config.as_deref(), cli.format).map(|_| false)
        }
    };

    match result {
        Ok(false) => {}
        Ok(true) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
