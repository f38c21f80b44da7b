//! Domain types for the orchestrator state store.
//!
//! These types represent orchestrations, the per-runtime operations they
//! fan out into, and the runtime inventory snapshot. All types are
//! serializable to/from JSON, both for storage in redb tables and for the
//! REST surface (hence the camelCase field names).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Unique identifier for an orchestration.
pub type OrchestrationId = String;

/// Unique identifier for an operation, unique across all operation kinds.
pub type OperationId = String;

/// Identifier of a managed runtime.
pub type RuntimeId = String;

/// Count of operations per state.
pub type OperationStats = BTreeMap<OperationState, u64>;

// ── Orchestration ──────────────────────────────────────────────────

/// A bulk upgrade request tracked as a single entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Orchestration {
    pub id: OrchestrationId,
    #[serde(rename = "type")]
    pub kind: OrchestrationType,
    pub state: OrchestrationState,
    pub parameters: OrchestrationParameters,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by the store on every successful write.
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestrationType {
    UpgradeKyma,
}

impl fmt::Display for OrchestrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpgradeKyma => f.write_str("upgrade-kyma"),
        }
    }
}

/// Lifecycle state of an orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestrationState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Canceling,
    Canceled,
    Retrying,
}

impl OrchestrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Whether `self -> next` is an edge of the orchestration state machine.
    ///
    /// `failed -> retrying` is the only edge leaving a terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrchestrationState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Succeeded)
                | (Pending, Failed)
                | (Pending, Canceling)
                | (InProgress, Succeeded)
                | (InProgress, Failed)
                | (InProgress, Canceling)
                | (InProgress, Retrying)
                | (Failed, Retrying)
                | (Retrying, InProgress)
                | (Retrying, Canceling)
                | (Canceling, Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-supplied description of what to upgrade and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationParameters {
    pub targets: TargetSpec,
    #[serde(default)]
    pub strategy: StrategySpec,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub maintenance: MaintenancePolicy,
}

// ── Targets ────────────────────────────────────────────────────────

/// Include/exclude selection over the runtime inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TargetSpec {
    #[serde(default)]
    pub include: Vec<TargetSelector>,
    #[serde(default)]
    pub exclude: Vec<TargetSelector>,
}

/// A single selector: either every eligible runtime, or a conjunction of
/// regex predicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TargetSelector {
    All,
    Match(RuntimeMatcher),
}

/// Regex predicates over runtime attributes. An absent predicate matches
/// anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
}

// ── Strategy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    #[serde(rename = "type", default)]
    pub kind: StrategyType,
    /// Worker count; `None` uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    /// Overrides every runtime's advertised maintenance window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<MaintenanceWindow>,
    #[serde(default)]
    pub schedule: ScheduleType,
    /// Share of runtimes in the canary batch, `0 < p <= 100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_percent: Option<u8>,
}

impl Default for StrategySpec {
    fn default() -> Self {
        Self {
            kind: StrategyType::Parallel,
            workers: None,
            maintenance_window: None,
            schedule: ScheduleType::Immediate,
            canary_percent: None,
        }
    }
}

impl StrategySpec {
    /// Check the invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("strategy.workers must be at least 1".to_string());
        }
        match (self.kind, self.canary_percent) {
            (StrategyType::Canary, None) => {
                Err("strategy.canaryPercent is required for canary".to_string())
            }
            (StrategyType::Canary, Some(p)) if p == 0 || p > 100 => Err(format!(
                "strategy.canaryPercent must be within 1..=100, got {p}"
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    #[default]
    Parallel,
    Canary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    #[default]
    Immediate,
    Maintenance,
    Now,
}

/// Daily time-of-day interval `[start, end)`, plus whole days on which the
/// window is open regardless of the time. Wraps past midnight when
/// `start > end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_days: Vec<Weekday>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePolicy {
    /// Window used for runtimes that advertise none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_window: Option<MaintenanceWindow>,
    /// Overrides the configured orchestration deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// ── Runtime inventory ──────────────────────────────────────────────

/// Inventory snapshot of a managed runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    pub runtime_id: RuntimeId,
    pub instance_id: String,
    pub global_account_id: String,
    pub sub_account_id: String,
    pub region: String,
    pub state: RuntimeState,
    /// IANA timezone name; UTC when absent or unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<MaintenanceWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeState {
    Provisioning,
    Provisioned,
    Deprovisioning,
    Deprovisioned,
    Failed,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Deprovisioning => "deprovisioning",
            Self::Deprovisioned => "deprovisioned",
            Self::Failed => "failed",
        })
    }
}

impl Runtime {
    /// Only successfully provisioned runtimes that are not on their way
    /// out can be upgraded.
    pub fn is_upgradable(&self) -> bool {
        self.state == RuntimeState::Provisioned
    }
}

// ── Operations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Provisioning,
    Deprovisioning,
    UpgradeKyma,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Deprovisioning => "deprovisioning",
            Self::UpgradeKyma => "upgrade-kyma",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-runtime unit of work, executed as an ordered step chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_id: Option<OrchestrationId>,
    pub instance_id: String,
    pub runtime_id: RuntimeId,
    pub global_account_id: String,
    pub sub_account_id: String,
    pub region: String,
    pub state: OperationState,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
    /// Name of the next step to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_cursor: Option<String>,
    /// Invocations of the step under the cursor. Starts over at zero each
    /// time the cursor advances, so it never counts earlier steps.
    #[serde(default)]
    pub attempt: u32,
    /// First invocation of the step under the cursor; the per-step deadline
    /// counts from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_started_at: Option<DateTime<Utc>>,
}

impl RuntimeOperation {
    /// A pending upgrade operation snapshotting `runtime`.
    pub fn for_runtime(
        id: OperationId,
        kind: OperationKind,
        orchestration_id: &str,
        runtime: &Runtime,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            orchestration_id: Some(orchestration_id.to_string()),
            instance_id: runtime.instance_id.clone(),
            runtime_id: runtime.runtime_id.clone(),
            global_account_id: runtime.global_account_id.clone(),
            sub_account_id: runtime.sub_account_id.clone(),
            region: runtime.region.clone(),
            state: OperationState::Pending,
            description: "operation created".to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
            version: 0,
            step_cursor: None,
            attempt: 0,
            step_started_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Key of the "one live operation per (orchestration, runtime)" index,
    /// or `None` if this operation does not occupy it.
    pub fn active_key(&self) -> Option<String> {
        match &self.orchestration_id {
            Some(orchestration_id) if !self.is_terminal() => {
                Some(format!("{orchestration_id}:{}", self.runtime_id))
            }
            _ => None,
        }
    }
}

// ── Queries ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestrationFilter {
    /// Empty means any state.
    pub states: Vec<OrchestrationState>,
    pub kind: Option<OrchestrationType>,
}

impl OrchestrationFilter {
    pub fn matches(&self, o: &Orchestration) -> bool {
        (self.states.is_empty() || self.states.contains(&o.state))
            && self.kind.is_none_or(|k| k == o.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationFilter {
    pub orchestration_id: Option<OrchestrationId>,
    pub kind: Option<OperationKind>,
    /// Empty means any state.
    pub states: Vec<OperationState>,
    pub runtime_id: Option<RuntimeId>,
}

impl OperationFilter {
    pub fn for_orchestration(id: &str) -> Self {
        Self {
            orchestration_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_states(mut self, states: &[OperationState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn matches(&self, op: &RuntimeOperation) -> bool {
        self.orchestration_id
            .as_ref()
            .is_none_or(|id| op.orchestration_id.as_ref() == Some(id))
            && self.kind.is_none_or(|k| k == op.kind)
            && (self.states.is_empty() || self.states.contains(&op.state))
            && self.runtime_id.as_ref().is_none_or(|r| *r == op.runtime_id)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size,
        }
    }

    /// A single page holding every item.
    pub fn all() -> Self {
        Self {
            page: 1,
            page_size: u32::MAX,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1).saturating_mul(self.page_size as usize)
    }
}

/// One page of results plus the size of the unpaged result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Items on this page.
    pub count: usize,
    pub total_count: usize,
}

impl<T> PageResult<T> {
    pub fn page_count(&self, page_size: u32) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(page_size as usize)
    }
}

/// Scope of an operation statistics query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsScope {
    Global,
    Orchestration(OrchestrationId),
}
