//! `upctl orchestrations`

use anyhow::Result;
use clap::Subcommand;

use super::PageArgs;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use crate::{Config, EXIT_OK};

#[derive(Debug, Subcommand)]
pub enum OrchestrationAction {
    /// List orchestrations.
    List {
        /// Only orchestrations in these states (comma-separated).
        #[arg(long, value_delimiter = ',')]
        state: Vec<String>,

        #[command(flatten)]
        page: PageArgs,
    },
    /// Show one orchestration with its operation counts.
    Get { id: String },
    /// List the operations of an orchestration.
    Operations {
        id: String,

        /// Only operations in these states (comma-separated).
        #[arg(long, value_delimiter = ',')]
        state: Vec<String>,

        #[command(flatten)]
        page: PageArgs,
    },
    /// Show a single operation.
    Operation { id: String, operation_id: String },
    /// Request cancellation of an orchestration.
    Cancel { id: String },
    /// Retry failed operations. Without `--operation-id` every failed
    /// operation is retried.
    Retry {
        id: String,

        #[arg(long = "operation-id", value_name = "ID")]
        operation_ids: Vec<String>,
    },
}

pub async fn execute(action: OrchestrationAction, config: &Config) -> Result<i32> {
    let client = ApiClient::new(&config.api_url)?;
    let json = config.output == OutputFormat::Json;

    match action {
        OrchestrationAction::List { state, page } => {
            let listed = client.list_orchestrations(&page.options(&state)).await?;
            if json {
                output::print_json(&listed)?;
            } else {
                output::orchestrations(&listed.items, listed.total_count);
            }
        }
        OrchestrationAction::Get { id } => {
            let status = client.get_orchestration(&id).await?;
            if json {
                output::print_json(&status)?;
            } else {
                output::orchestration(&status);
            }
        }
        OrchestrationAction::Operations { id, state, page } => {
            let listed = client.list_operations(&id, &page.options(&state)).await?;
            if json {
                output::print_json(&listed)?;
            } else {
                output::operations(&listed.items, listed.total_count);
            }
        }
        OrchestrationAction::Operation { id, operation_id } => {
            let op = client.get_operation(&id, &operation_id).await?;
            if json {
                output::print_json(&op)?;
            } else {
                output::operation(&op);
            }
        }
        OrchestrationAction::Cancel { id } => {
            client.cancel_orchestration(&id).await?;
            if json {
                output::print_json(&serde_json::json!({ "id": id, "canceling": true }))?;
            } else {
                println!("Cancellation of orchestration {id} requested");
            }
        }
        OrchestrationAction::Retry { id, operation_ids } => {
            let outcome = client.retry_orchestration(&id, operation_ids).await?;
            if json {
                output::print_json(&outcome)?;
            } else {
                println!(
                    "Retrying {} operation(s) of orchestration {id}",
                    outcome.retried.len()
                );
                if !outcome.invalid.is_empty() {
                    println!("Skipped invalid operation ids: {}", outcome.invalid.join(", "));
                }
            }
        }
    }
    Ok(EXIT_OK)
}
