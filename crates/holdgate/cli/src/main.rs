//! Holdgate CLI
//!
//! - `verify`: recompute a JSON-lines ledger export from genesis, without any
//!   writer state
//! - `config`: print the effective layered configuration
//! - `demo`: drive the full pipeline against a simulated clock

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use holdgate_service::{HoldgateConfig, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{config, demo, verify};

/// Holdgate CLI application
#[derive(Parser)]
#[command(name = "holdgate")]
#[command(about = "Holdgate - human-in-the-loop execution authorization", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HOLDGATE_CONFIG", global = true)]
    config: Option<String>,

    /// Log level (overrides `logging.level`)
    #[arg(long, env = "HOLDGATE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging (overrides `logging.json`)
    #[arg(long, env = "HOLDGATE_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a ledger export
    Verify(verify::VerifyArgs),

    /// Show the effective configuration
    Config,

    /// Run a scripted authorization session
    Demo(demo::DemoArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        HoldgateConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Command-line flags override the file and environment.
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    init_tracing(&config.logging);

    match cli.command {
        Commands::Verify(args) => verify::execute(&config, args),
        Commands::Config => {
            config::execute(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Demo(args) => {
            demo::execute(config, args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();
    }
}
