//! # gacp CLI entry point
//!
//! Parses command-line arguments, initializes tracing, resolves the
//! workflow configuration and dispatches to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gacp_cli::config::{run_config, ConfigArgs};
use gacp_cli::fees::{run_fees, FeesArgs};
use gacp_cli::load_config;
use gacp_cli::simulate::{run_simulate, SimulateArgs};
use gacp_cli::table::{run_table, TableArgs};

/// GACP certification workflow tooling.
///
/// Inspects the transition table, quotes milestone fees, manages the
/// workflow configuration, and replays reference scenarios in memory.
#[derive(Parser, Debug)]
#[command(name = "gacp", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to a workflow configuration file (defaults to $GACP_WORKFLOW_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the transition table and check its structure.
    Table(TableArgs),

    /// Quote milestone fees for a set of herbs.
    Fees(FeesArgs),

    /// Print the default or effective configuration, or check a file.
    Config(ConfigArgs),

    /// Run a certification scenario against in-memory collaborators.
    Simulate(SimulateArgs),
}

/// `-v` flags win over `RUST_LOG`; an unparsable `RUST_LOG` falls back to `warn`.
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    match verbose {
        0 => rust_log
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(cli.verbose, rust_log.as_deref());
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::debug!("gacp CLI {} starting", env!("CARGO_PKG_VERSION"));

    let result = load_config(cli.config.as_deref()).and_then(|config| match &cli.command {
        Commands::Table(args) => run_table(args),
        Commands::Fees(args) => run_fees(args, &config),
        Commands::Config(args) => run_config(args, &config),
        Commands::Simulate(args) => run_simulate(args, &config),
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
