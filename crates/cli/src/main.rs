//! Waypoint CLI - Main Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use waypoint_cli::commands::{probe, run, verify};
use waypoint_cli::output::{self, print_error};
use waypoint_engine::WaypointConfig;

/// Waypoint - checkpointed desktop and web workflow runner
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, default_value = "waypoint.toml", global = true, env = "WAYPOINT_CONFIG")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Log format
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run(run::RunArgs),

    /// Run a workflow step by step with a decision after each step
    Verify(verify::VerifyArgs),

    /// Check that the automation backends start and respond
    Probe(probe::ProbeArgs),
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);
    debug!("waypoint v{}", env!("CARGO_PKG_VERSION"));

    let config = WaypointConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, &config, cli.format).await,
        Commands::Verify(args) => verify::execute(args, &config, cli.format).await,
        Commands::Probe(args) => probe::execute(args, &config, cli.format).await,
    };

    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
