//! Wires the orchestrator components together and serves the API until
//! Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use upgrader_core::Config;
use upgrader_executor::{Executor, LoggingBackend, StepRegistry, kyma};
use upgrader_inventory::{InventorySource, StoreInventory};
use upgrader_manager::OrchestrationManager;
use upgrader_state::{RedbStore, Store};

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("upgrade orchestrator starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("upgrader.redb");

    // ── Initialize components ──────────────────────────────────

    let store: Arc<dyn Store> = Arc::new(RedbStore::open(&db_path)?);
    info!(path = ?db_path, "state store opened");

    let inventory: Arc<dyn InventorySource> = Arc::new(StoreInventory::new(Arc::clone(&store)));

    let registry = StepRegistry::new().with(kyma::upgrade_kyma(
        Arc::clone(&inventory),
        Arc::new(LoggingBackend),
    ));
    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        Arc::new(registry),
        &config.executor,
    ));
    info!(
        step_timeout_secs = config.executor.step_timeout_secs,
        "step executor initialized"
    );

    let manager = OrchestrationManager::new(
        store,
        inventory,
        executor,
        config.orchestration.clone(),
    );

    let resumed = manager.resume_all()?;
    info!(resumed, "unfinished orchestrations resumed");

    // ── Start API server ───────────────────────────────────────

    let router = upgrader_api::build_router(manager);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("upgrade orchestrator stopped");
    Ok(())
}
