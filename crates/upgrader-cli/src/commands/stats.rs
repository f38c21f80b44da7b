//! `upctl stats`

use anyhow::Result;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use crate::{Config, EXIT_OK};

pub async fn execute(config: &Config) -> Result<i32> {
    let client = ApiClient::new(&config.api_url)?;
    let stats = client.operation_stats().await?;
    match config.output {
        OutputFormat::Json => output::print_json(&stats)?,
        OutputFormat::Table => output::stats(&stats),
    }
    Ok(EXIT_OK)
}
