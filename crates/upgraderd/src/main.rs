//! upgraderd — the runtime upgrade orchestrator daemon.
//!
//! Single binary that assembles the orchestrator:
//! - State store (redb)
//! - Runtime inventory fed through `PUT /runtimes/{id}`
//! - Step executor with the `upgrade-kyma` chain
//! - Orchestration manager (resumes unfinished work on start)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! upgraderd serve --config /etc/upgrader/upgrader.toml --port 8080 --data-dir /var/lib/upgrader
//! ```

mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use upgrader_core::Config;

#[derive(Parser)]
#[command(name = "upgraderd", about = "Runtime upgrade orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and serve its REST API.
    Serve {
        /// TOML configuration file. Defaults apply when omitted.
        #[arg(long, env = "UPGRADER_CONFIG")]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Log line format.
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,upgraderd=debug,upgrader=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load the config file (if any) and apply command-line overrides.
fn load_config(
    path: Option<&PathBuf>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_format,
        } => {
            init_tracing(log_format);
            let config = load_config(config.as_ref(), port, data_dir)?;
            server::run(config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrader.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\ndata_dir = \"/srv/upgrader\"\n\n[orchestration]\ndefault_workers = 3\n",
        )
        .unwrap();

        let config = load_config(Some(&path), Some(9100), None).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.data_dir, PathBuf::from("/srv/upgrader"));
        assert_eq!(config.orchestration.default_workers, 3);
    }

    #[test]
    fn defaults_without_config_file() {
        let config = load_config(None, None, Some(PathBuf::from("/tmp/up"))).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.data_dir, PathBuf::from("/tmp/up"));
    }

    #[test]
    fn serve_command_parses() {
        let cli = Cli::try_parse_from([
            "upgraderd",
            "serve",
            "--port",
            "8081",
            "--log-format",
            "json",
        ])
        .unwrap();
        let Command::Serve {
            port, log_format, ..
        } = cli.command;
        assert_eq!(port, Some(8081));
        assert_eq!(log_format, LogFormat::Json);
    }
}
