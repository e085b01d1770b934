//! Threat correlator CLI.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use threat_correlator::{Config, CorrelationEngine, ReportFormat};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "threat-correlator.yaml";

#[derive(Parser, Debug)]
#[command(name = "threat-correlator")]
#[command(about = "Correlate web server visitors against a malicious-network block list and rank the threats")]
#[command(version)]
struct Args {
    /// Path to configuration file [default: threat-correlator.yaml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Block-list file (overrides feed.path)
    #[arg(long, value_name = "PATH")]
    feed: Option<PathBuf>,

    /// Access log file (overrides access_log.path)
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Use the local block-list file instead of downloading it
    #[arg(long)]
    no_download: bool,

    /// Report format (overrides report.format)
    #[arg(long, value_enum)]
    format: Option<ReportFormat>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            Config::parse(path)?
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!(config = DEFAULT_CONFIG_PATH, "Loading configuration");
            Config::parse(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => {
            info!("No configuration file, using defaults");
            Config::default()
        }
    };

    if let Some(feed) = &args.feed {
        config.feed.path = feed.clone();
    }
    if let Some(log) = &args.log {
        config.access_log.path = log.clone();
    }
    if args.no_download {
        config.feed.download = false;
    }
    if let Some(format) = args.format {
        config.report.format = format;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout carries only the report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let engine = CorrelationEngine::from_config(&config)?;

    info!("Starting threat correlation");
    let report = engine.run_with_config(&config).await?;
    info!(matches = report.len(), "Correlation complete");

    print!("{}", report.render(config.report.format)?);

    Ok(())
}
