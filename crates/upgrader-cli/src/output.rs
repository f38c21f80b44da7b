//! Table and JSON rendering of API responses.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::{Table, Tabled};
use upgrader_state::wire::{OrchestrationStatus, RuntimeView};
use upgrader_state::{
    OperationKind, OperationState, OperationStats, Orchestration, RuntimeOperation,
};

use crate::client::count;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Pretty-printed JSON.
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_rows<R: Tabled>(rows: Vec<R>, empty: &str) {
    if rows.is_empty() {
        println!("{empty}");
    } else {
        println!("{}", Table::new(rows));
    }
}

// ── Orchestrations ─────────────────────────────────────────────────

#[derive(Tabled)]
struct OrchestrationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "CREATED")]
    created: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

impl From<&Orchestration> for OrchestrationRow {
    fn from(o: &Orchestration) -> Self {
        Self {
            id: o.id.clone(),
            kind: o.kind.to_string(),
            state: o.state.to_string(),
            created: timestamp(&o.created_at),
            description: o.description.clone(),
        }
    }
}

pub fn orchestrations(items: &[Orchestration], total: usize) {
    let rows: Vec<OrchestrationRow> = items.iter().map(OrchestrationRow::from).collect();
    print_rows(rows, "No orchestrations found");
    if total > items.len() {
        println!("Showing {} of {total}", items.len());
    }
}

pub fn orchestration(status: &OrchestrationStatus) {
    let o = &status.orchestration;
    println!("ID:          {}", o.id);
    println!("State:       {}", o.state);
    println!("Description: {}", o.description);
    println!("Created:     {}", timestamp(&o.created_at));
    println!("Updated:     {}", timestamp(&o.updated_at));
    println!("Strategy:    {:?}", o.parameters.strategy.kind);
    println!("Dry run:     {}", o.parameters.dry_run);
    println!();
    println!("{}", stats_line(&status.stats));
}

/// One-line summary of operation counts, e.g. for progress output.
pub fn stats_line(stats: &OperationStats) -> String {
    [
        OperationState::Pending,
        OperationState::InProgress,
        OperationState::Succeeded,
        OperationState::Failed,
        OperationState::Canceled,
    ]
    .iter()
    .map(|state| format!("{state}: {}", count(stats, *state)))
    .collect::<Vec<_>>()
    .join(", ")
}

// ── Operations ─────────────────────────────────────────────────────

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "RUNTIME")]
    runtime: String,
    #[tabled(rename = "ACCOUNT")]
    account: String,
    #[tabled(rename = "REGION")]
    region: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "ERROR")]
    error: String,
}

impl From<&RuntimeOperation> for OperationRow {
    fn from(op: &RuntimeOperation) -> Self {
        Self {
            id: op.id.clone(),
            runtime: op.runtime_id.clone(),
            account: op.global_account_id.clone(),
            region: op.region.clone(),
            state: op.state.to_string(),
            step: op.step_cursor.clone().unwrap_or_default(),
            error: op.error_message.clone().unwrap_or_default(),
        }
    }
}

pub fn operations(items: &[RuntimeOperation], total: usize) {
    let rows: Vec<OperationRow> = items.iter().map(OperationRow::from).collect();
    print_rows(rows, "No operations found");
    if total > items.len() {
        println!("Showing {} of {total}", items.len());
    }
}

pub fn operation(op: &RuntimeOperation) {
    print_rows(vec![OperationRow::from(op)], "");
}

// ── Runtimes ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct RuntimeRow {
    #[tabled(rename = "RUNTIME")]
    runtime: String,
    #[tabled(rename = "ACCOUNT")]
    account: String,
    #[tabled(rename = "SUBACCOUNT")]
    sub_account: String,
    #[tabled(rename = "REGION")]
    region: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "LAST UPGRADE")]
    last_upgrade: String,
}

impl From<&RuntimeView> for RuntimeRow {
    fn from(view: &RuntimeView) -> Self {
        let runtime = &view.runtime;
        let last_upgrade = view
            .operations
            .iter()
            .rev()
            .find(|op| op.kind == OperationKind::UpgradeKyma)
            .map(|op| format!("{} ({})", op.state, timestamp(&op.updated_at)))
            .unwrap_or_default();
        Self {
            runtime: runtime.runtime_id.clone(),
            account: runtime.global_account_id.clone(),
            sub_account: runtime.sub_account_id.clone(),
            region: runtime.region.clone(),
            state: runtime.state.to_string(),
            last_upgrade,
        }
    }
}

pub fn runtimes(items: &[RuntimeView], total: usize) {
    let rows: Vec<RuntimeRow> = items.iter().map(RuntimeRow::from).collect();
    print_rows(rows, "No runtimes found");
    if total > items.len() {
        println!("Showing {} of {total}", items.len());
    }
}

// ── Stats ──────────────────────────────────────────────────────────

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "COUNT")]
    count: u64,
}

pub fn stats(stats: &BTreeMap<OperationKind, OperationStats>) {
    let rows: Vec<StatsRow> = stats
        .iter()
        .flat_map(|(kind, by_state)| {
            by_state.iter().map(move |(state, count)| StatsRow {
                kind: kind.to_string(),
                state: state.to_string(),
                count: *count,
            })
        })
        .collect();
    print_rows(rows, "No operations recorded");
}
