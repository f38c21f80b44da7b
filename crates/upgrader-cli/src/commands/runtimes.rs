//! `upctl runtimes`

use anyhow::Result;
use clap::Subcommand;

use super::PageArgs;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use crate::{Config, EXIT_OK};

#[derive(Debug, Subcommand)]
pub enum RuntimeAction {
    /// List runtimes with their upgrade history.
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

pub async fn execute(action: RuntimeAction, config: &Config) -> Result<i32> {
    let client = ApiClient::new(&config.api_url)?;
    match action {
        RuntimeAction::List { page } => {
            let listed = client.list_runtimes(&page.options(&[])).await?;
            match config.output {
                OutputFormat::Json => output::print_json(&listed)?,
                OutputFormat::Table => output::runtimes(&listed.data, listed.total_count),
            }
        }
    }
    Ok(EXIT_OK)
}
