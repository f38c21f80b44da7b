//! `upctl upgrade kyma` - submit an upgrade orchestration and optionally
//! follow it to completion.

use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use upgrader_inventory::parse_selector;
use upgrader_state::{
    OrchestrationParameters, OrchestrationState, OrchestrationType, ScheduleType, StrategySpec,
    StrategyType, TargetSpec,
};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use crate::{Config, EXIT_INTERRUPTED, EXIT_OK, EXIT_SERVER_ERROR};

#[derive(Debug, Subcommand)]
pub enum UpgradeTarget {
    /// Upgrade Kyma on the selected runtimes.
    ///
    /// Selectors are comma-separated lists of `all`, `account=<REGEX>`,
    /// `subaccount=<REGEX>`, `region=<REGEX>` and `runtime-id=<ID>`.
    Kyma(KymaArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Parallel,
    Canary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScheduleArg {
    Immediate,
    Maintenance,
    Now,
}

#[derive(Debug, Args)]
pub struct KymaArgs {
    /// Runtimes to include. Repeatable.
    #[arg(short = 't', long = "target", value_name = "SELECTOR", required = true)]
    pub targets: Vec<String>,

    /// Runtimes to leave out. Repeatable; `all` is not allowed.
    #[arg(short = 'e', long = "target-exclude", value_name = "SELECTOR")]
    pub excludes: Vec<String>,

    #[arg(long, value_enum, default_value_t = StrategyArg::Parallel)]
    pub strategy: StrategyArg,

    /// Number of runtimes upgraded concurrently.
    #[arg(long, value_name = "N")]
    pub parallel_workers: Option<u32>,

    #[arg(long, value_enum, default_value_t = ScheduleArg::Immediate)]
    pub schedule: ScheduleArg,

    /// Share of runtimes upgraded first with the canary strategy (1-100).
    #[arg(long, value_name = "PERCENT")]
    pub canary_percent: Option<u8>,

    /// Walk the step chain without triggering upgrades.
    #[arg(long)]
    pub dry_run: bool,

    /// Follow the orchestration until it finishes.
    #[arg(long)]
    pub wait: bool,

    /// Seconds between status polls with `--wait`.
    #[arg(long, default_value = "5", value_name = "SECS")]
    pub poll_interval: u64,
}

impl KymaArgs {
    /// Build the request parameters, rejecting invalid selectors and
    /// strategy combinations before anything is sent.
    pub fn parameters(&self) -> Result<OrchestrationParameters> {
        if self.targets.is_empty() {
            bail!("at least one --target is required");
        }
        let include = self
            .targets
            .iter()
            .map(|t| parse_selector(t, true))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = self
            .excludes
            .iter()
            .map(|t| parse_selector(t, false))
            .collect::<Result<Vec<_>, _>>()?;

        let strategy = StrategySpec {
            kind: match self.strategy {
                StrategyArg::Parallel => StrategyType::Parallel,
                StrategyArg::Canary => StrategyType::Canary,
            },
            workers: self.parallel_workers,
            maintenance_window: None,
            schedule: match self.schedule {
                ScheduleArg::Immediate => ScheduleType::Immediate,
                ScheduleArg::Maintenance => ScheduleType::Maintenance,
                ScheduleArg::Now => ScheduleType::Now,
            },
            canary_percent: self.canary_percent,
        };
        strategy.validate().map_err(anyhow::Error::msg)?;

        Ok(OrchestrationParameters {
            targets: TargetSpec { include, exclude },
            strategy,
            dry_run: self.dry_run,
            ..Default::default()
        })
    }
}

pub async fn execute(target: UpgradeTarget, config: &Config) -> Result<i32> {
    let UpgradeTarget::Kyma(args) = target;
    let parameters = args.parameters()?;
    let client = ApiClient::new(&config.api_url)?;

    let id = client
        .create_orchestration(OrchestrationType::UpgradeKyma, parameters)
        .await?;

    if !args.wait {
        match config.output {
            OutputFormat::Json => output::print_json(&serde_json::json!({ "id": id }))?,
            OutputFormat::Table => println!("Orchestration {id} submitted"),
        }
        return Ok(EXIT_OK);
    }

    eprintln!("Orchestration {id} submitted, waiting for completion");
    wait_for(&client, &id, Duration::from_secs(args.poll_interval.max(1)), config).await
}

/// Poll until the orchestration settles. Ctrl-C cancels it and exits with
/// [`EXIT_INTERRUPTED`].
async fn wait_for(client: &ApiClient, id: &str, interval: Duration, config: &Config) -> Result<i32> {
    let mut ticker = tokio::time::interval(interval);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            signal = &mut interrupt => {
                signal?;
                eprintln!("Interrupted, canceling orchestration {id}");
                client.cancel_orchestration(id).await?;
                return Ok(EXIT_INTERRUPTED);
            }
            _ = ticker.tick() => {
                let status = client.get_orchestration(id).await?;
                let state = status.orchestration.state;
                eprintln!("{state}: {}", output::stats_line(&status.stats));
                if !state.is_terminal() {
                    continue;
                }
                match config.output {
                    OutputFormat::Json => output::print_json(&status)?,
                    OutputFormat::Table => output::orchestration(&status),
                }
                return Ok(if state == OrchestrationState::Succeeded {
                    EXIT_OK
                } else {
                    EXIT_SERVER_ERROR
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use upgrader_state::{RuntimeMatcher, TargetSelector};

    use super::*;
    use crate::{Cli, Commands};

    fn kyma_args(argv: &[&str]) -> KymaArgs {
        let mut full = vec!["upctl", "upgrade", "kyma"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Upgrade {
                target: UpgradeTarget::Kyma(args),
            } => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn selectors_become_targets() {
        let args = kyma_args(&[
            "-t",
            "account=CA.*,region=eu-.*",
            "--target",
            "runtime-id=rt-1",
            "-e",
            "subaccount=SA-9",
            "--parallel-workers",
            "4",
        ]);
        let params = args.parameters().unwrap();
        assert_eq!(params.targets.include.len(), 2);
        assert_eq!(
            params.targets.include[0],
            TargetSelector::Match(RuntimeMatcher {
                global_account: Some("CA.*".into()),
                region: Some("eu-.*".into()),
                ..Default::default()
            })
        );
        assert_eq!(params.targets.exclude.len(), 1);
        assert_eq!(params.strategy.workers, Some(4));
        assert_eq!(params.strategy.kind, StrategyType::Parallel);
        assert!(!params.dry_run);
    }

    #[test]
    fn target_is_required() {
        let mut argv = vec!["upctl", "upgrade", "kyma"];
        argv.push("--dry-run");
        let err = Cli::try_parse_from(argv).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn exclude_all_is_rejected() {
        let args = kyma_args(&["-t", "all", "-e", "all"]);
        assert!(args.parameters().is_err());
    }

    #[test]
    fn selector_without_value_is_rejected() {
        let args = kyma_args(&["-t", "account="]);
        let err = args.parameters().unwrap_err();
        assert!(err.to_string().contains("missing required value"), "{err}");
    }

    #[test]
    fn unknown_selector_is_rejected() {
        let args = kyma_args(&["-t", "cluster=x"]);
        assert!(args.parameters().is_err());
    }

    #[test]
    fn canary_needs_a_percentage() {
        let args = kyma_args(&["-t", "all", "--strategy", "canary"]);
        assert!(args.parameters().is_err());

        let args = kyma_args(&[
            "-t",
            "all",
            "--strategy",
            "canary",
            "--canary-percent",
            "20",
            "--schedule",
            "maintenance",
        ]);
        let params = args.parameters().unwrap();
        assert_eq!(params.strategy.kind, StrategyType::Canary);
        assert_eq!(params.strategy.canary_percent, Some(20));
        assert_eq!(params.strategy.schedule, ScheduleType::Maintenance);
        assert_eq!(params.targets.include, vec![TargetSelector::All]);
    }

    #[test]
    fn unknown_strategy_is_rejected_by_the_parser() {
        let err = Cli::try_parse_from(["upctl", "upgrade", "kyma", "-t", "all", "--strategy", "blue"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
