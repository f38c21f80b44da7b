//! upgrader-api — REST API of the upgrade orchestrator.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/orchestrations` | Submit an orchestration |
//! | GET | `/orchestrations` | List orchestrations (`state`, `type`, `page`, `pageSize`) |
//! | GET | `/orchestrations/{id}` | Orchestration with operation stats |
//! | GET | `/orchestrations/{id}/operations` | Operations (`state`, `page`, `pageSize`) |
//! | GET | `/orchestrations/{id}/operations/{operation_id}` | Single operation |
//! | PUT | `/orchestrations/{id}/cancel` | Request cancellation |
//! | PUT | `/orchestrations/{id}/retry` | Retry failed operations |
//! | GET | `/runtimes` | Runtime inventory with operation history |
//! | PUT | `/runtimes/{id}` | Upsert a runtime snapshot |
//! | GET | `/stats/operations` | Operation counts by kind and state |

pub mod handlers;

use axum::Router;
use axum::routing::{get, put};
use upgrader_manager::OrchestrationManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: OrchestrationManager,
}

/// Build the API router.
pub fn build_router(manager: OrchestrationManager) -> Router {
    let state = ApiState { manager };

    Router::new()
        .route(
            "/orchestrations",
            get(handlers::list_orchestrations).post(handlers::create_orchestration),
        )
        .route("/orchestrations/{id}", get(handlers::get_orchestration))
        .route("/orchestrations/{id}/operations", get(handlers::list_operations))
        .route(
            "/orchestrations/{id}/operations/{operation_id}",
            get(handlers::get_operation),
        )
        .route("/orchestrations/{id}/cancel", put(handlers::cancel_orchestration))
        .route("/orchestrations/{id}/retry", put(handlers::retry_orchestration))
        .route("/runtimes", get(handlers::list_runtimes))
        .route("/runtimes/{id}", put(handlers::put_runtime))
        .route("/stats/operations", get(handlers::operation_stats))
        .with_state(state)
}
