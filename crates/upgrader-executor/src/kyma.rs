//! The `upgrade-kyma` step chain.
//!
//! `check_runtime` → `apply_upgrade` → `await_upgrade`. The installer
//! itself sits behind [`UpgradeBackend`]; the daemon wires
//! [`LoggingBackend`] unless a real one is plugged in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use upgrader_inventory::InventorySource;
use upgrader_state::{OperationKind, RuntimeOperation};

use crate::registry::OperationCapability;
use crate::step::{Step, StepContext, StepError, StepOutput};

pub const CHECK_RUNTIME: &str = "check_runtime";
pub const APPLY_UPGRADE: &str = "apply_upgrade";
pub const AWAIT_UPGRADE: &str = "await_upgrade";

/// Delay between status polls while an upgrade is running.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStatus {
    InProgress,
    Done,
    Failed(String),
}

/// Side-effecting half of an upgrade.
///
/// `trigger` must be idempotent per operation id: it is re-issued after a
/// crash between triggering and persisting the advanced cursor.
#[async_trait]
pub trait UpgradeBackend: Send + Sync {
    async fn trigger(&self, operation: &RuntimeOperation) -> Result<(), StepError>;

    async fn status(&self, operation: &RuntimeOperation) -> Result<UpgradeStatus, StepError>;
}

/// Records upgrade requests in the log and reports them done immediately.
#[derive(Debug, Clone, Default)]
pub struct LoggingBackend;

#[async_trait]
impl UpgradeBackend for LoggingBackend {
    async fn trigger(&self, operation: &RuntimeOperation) -> Result<(), StepError> {
        info!(
            operation = %operation.id,
            runtime = %operation.runtime_id,
            instance = %operation.instance_id,
            "upgrade requested"
        );
        Ok(())
    }

    async fn status(&self, _operation: &RuntimeOperation) -> Result<UpgradeStatus, StepError> {
        Ok(UpgradeStatus::Done)
    }
}

// ── Steps ──────────────────────────────────────────────────────────

/// Re-reads the runtime so that runtimes deprovisioned after resolution are
/// not touched.
pub struct CheckRuntime {
    inventory: Arc<dyn InventorySource>,
}

#[async_trait]
impl Step for CheckRuntime {
    fn name(&self) -> &str {
        CHECK_RUNTIME
    }

    async fn run(
        &self,
        mut operation: RuntimeOperation,
        _ctx: &StepContext,
    ) -> Result<StepOutput, StepError> {
        let runtime = self
            .inventory
            .get_runtime(&operation.runtime_id)
            .map_err(StepError::transient)?;
        match runtime {
            Some(runtime) if runtime.is_upgradable() => {
                operation.description = "runtime checked".to_string();
                Ok(StepOutput::done(operation))
            }
            Some(runtime) => Err(StepError::permanent(anyhow::anyhow!(
                "runtime {} is {:?}, not upgradable",
                runtime.runtime_id,
                runtime.state
            ))),
            None => Err(StepError::permanent(anyhow::anyhow!(
                "runtime {} no longer in inventory",
                operation.runtime_id
            ))),
        }
    }
}

pub struct ApplyUpgrade {
    backend: Arc<dyn UpgradeBackend>,
}

#[async_trait]
impl Step for ApplyUpgrade {
    fn name(&self) -> &str {
        APPLY_UPGRADE
    }

    async fn run(
        &self,
        mut operation: RuntimeOperation,
        ctx: &StepContext,
    ) -> Result<StepOutput, StepError> {
        if ctx.dry_run {
            operation.description = "dry run: upgrade not triggered".to_string();
            return Ok(StepOutput::done(operation));
        }
        self.backend.trigger(&operation).await?;
        operation.description = "upgrade triggered".to_string();
        Ok(StepOutput::done(operation))
    }
}

pub struct AwaitUpgrade {
    backend: Arc<dyn UpgradeBackend>,
    poll_interval: Duration,
}

#[async_trait]
impl Step for AwaitUpgrade {
    fn name(&self) -> &str {
        AWAIT_UPGRADE
    }

    async fn run(
        &self,
        mut operation: RuntimeOperation,
        ctx: &StepContext,
    ) -> Result<StepOutput, StepError> {
        if ctx.dry_run {
            return Ok(StepOutput::done(operation));
        }
        match self.backend.status(&operation).await? {
            UpgradeStatus::Done => {
                operation.description = "upgrade finished".to_string();
                Ok(StepOutput::done(operation))
            }
            UpgradeStatus::InProgress => {
                operation.description = "waiting for upgrade to finish".to_string();
                Ok(StepOutput::retry_after(operation, self.poll_interval))
            }
            UpgradeStatus::Failed(reason) => Err(StepError::permanent(anyhow::anyhow!(
                "upgrade failed: {reason}"
            ))),
        }
    }
}

/// The registered chain for `upgrade-kyma` operations.
pub fn upgrade_kyma(
    inventory: Arc<dyn InventorySource>,
    backend: Arc<dyn UpgradeBackend>,
) -> OperationCapability {
    OperationCapability::new(
        OperationKind::UpgradeKyma,
        vec![
            Arc::new(CheckRuntime { inventory }),
            Arc::new(ApplyUpgrade {
                backend: Arc::clone(&backend),
            }),
            Arc::new(AwaitUpgrade {
                backend,
                poll_interval: POLL_INTERVAL,
            }),
        ],
    )
}
