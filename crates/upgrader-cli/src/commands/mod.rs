//! Subcommand implementations. Each `execute` returns the process exit
//! code on success.

pub mod orchestrations;
pub mod runtimes;
pub mod stats;
pub mod upgrade;

use clap::Args;

use crate::client::ListOptions;

/// Paging flags shared by list commands.
#[derive(Debug, Clone, Default, Args)]
pub struct PageArgs {
    /// Page number, starting at 1.
    #[arg(long)]
    pub page: Option<u32>,

    /// Items per page.
    #[arg(long)]
    pub page_size: Option<u32>,
}

impl PageArgs {
    pub fn options(&self, states: &[String]) -> ListOptions {
        ListOptions {
            states: states.to_vec(),
            page: self.page,
            page_size: self.page_size,
        }
    }
}
