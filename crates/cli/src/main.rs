//! Caduceus CLI: the main entry point.
//!
//! Commands:
//! - `assess`  — Run one clinical task through the agent loop
//! - `config`  — Print the default config, or check the effective one
//! - `doctor`  — Diagnose configuration and provider health

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "caduceus",
    about = "Caduceus — clinical decision-support agent runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.caduceus/config.toml
    #[arg(long, global = true, env = "CADUCEUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task through the think/act/observe loop
    Assess(commands::assess::AssessArgs),

    /// Print the default configuration file
    Config {
        /// Load and validate the effective configuration instead
        #[arg(long)]
        check: bool,
    },

    /// Diagnose configuration and provider health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only results
    let level = if cli.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
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

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Assess(args) => commands::assess::run(config_path, args).await?,
        Commands::Config { check } => {
            if check {
                commands::config_cmd::check(config_path)?
            } else {
                commands::config_cmd::print_default()
            }
        }
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
