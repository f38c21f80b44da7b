//! upctl — command-line client for the upgrade orchestrator.
//!
//! ## Commands
//!
//! - `upctl upgrade kyma` - submit a Kyma upgrade orchestration
//! - `upctl orchestrations list|get|operations|operation|cancel|retry`
//! - `upctl runtimes list` - runtime inventory with upgrade history
//! - `upctl stats` - operation counts by kind and state
//!
//! ## Configuration
//!
//! - `UPCTL_API_URL` - API endpoint (default: `http://localhost:8080`)
//!
//! ## Exit codes
//!
//! `0` success, `1` invalid input or rejected request, `2` server or
//! transport failure, `3` interrupted while waiting (the orchestration is
//! canceled).

pub mod client;
pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

pub use client::{ApiClient, ClientError};
pub use output::OutputFormat;

pub const EXIT_OK: i32 = 0;
pub const EXIT_USER_ERROR: i32 = 1;
pub const EXIT_SERVER_ERROR: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 3;

/// Command-line client for the runtime upgrade orchestrator.
#[derive(Debug, Parser)]
#[command(name = "upctl", version, about, long_about = None)]
pub struct Cli {
    /// Orchestrator API URL.
    #[arg(
        long,
        global = true,
        env = "UPCTL_API_URL",
        default_value = "http://localhost:8080"
    )]
    pub api_url: String,

    /// Output format.
    #[arg(long, short = 'o', global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config(&self) -> Config {
        Config {
            api_url: self.api_url.trim_end_matches('/').to_string(),
            output: self.output,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit an upgrade orchestration.
    Upgrade {
        #[command(subcommand)]
        target: commands::upgrade::UpgradeTarget,
    },
    /// Inspect and control orchestrations.
    #[command(alias = "orc")]
    Orchestrations {
        #[command(subcommand)]
        action: commands::orchestrations::OrchestrationAction,
    },
    /// Inspect the runtime inventory.
    Runtimes {
        #[command(subcommand)]
        action: commands::runtimes::RuntimeAction,
    },
    /// Operation counts by kind and state.
    Stats,
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub output: OutputFormat,
}

/// Run a parsed command line and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let config = cli.config();
    let result = match cli.command {
        Commands::Upgrade { target } => commands::upgrade::execute(target, &config).await,
        Commands::Orchestrations { action } => {
            commands::orchestrations::execute(action, &config).await
        }
        Commands::Runtimes { action } => commands::runtimes::execute(action, &config).await,
        Commands::Stats => commands::stats::execute(&config).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code(&e)
        }
    }
}

/// Server-side and transport failures exit with 2; everything else the
/// user can fix exits with 1.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<ClientError>() {
        Some(e) if e.is_server_error() => EXIT_SERVER_ERROR,
        _ => EXIT_USER_ERROR,
    }
}
