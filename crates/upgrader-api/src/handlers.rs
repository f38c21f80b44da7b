//! REST API handlers.
//!
//! Each handler calls into the `OrchestrationManager` and wraps the result
//! in the `{success, data, error}` envelope.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use upgrader_manager::{ManagerError, ManagerResult};
use upgrader_state::wire::{
    CreateOrchestrationRequest, CreatedResponse, ListResponse, RetryRequest, RuntimesResponse,
};
use upgrader_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_of(e: &ManagerError) -> StatusCode {
    match e {
        ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
        ManagerError::InvalidParameters(_) | ManagerError::InvalidSelector(_) => {
            StatusCode::BAD_REQUEST
        }
        ManagerError::Conflict(_) | ManagerError::AlreadyTerminal(_) => StatusCode::CONFLICT,
        ManagerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(e: ManagerError) -> Response {
    let status = status_of(&e);
    if status.is_server_error() {
        error!(error = %e, "request failed");
    } else {
        debug!(error = %e, %status, "request rejected");
    }
    error_response(&e.to_string(), status)
}

fn respond<T: Serialize>(result: ManagerResult<T>, status: StatusCode) -> Response {
    match result {
        Ok(data) => (status, ApiResponse::ok(data)).into_response(),
        Err(e) => failure(e),
    }
}

/// Parse a comma-separated list of kebab-case enum values.
fn parse_list<T: DeserializeOwned>(raw: Option<&str>, what: &str) -> ManagerResult<Vec<T>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            serde_json::from_value(serde_json::Value::String(s.to_string()))
                .map_err(|_| ManagerError::InvalidParameters(format!("unknown {what} {s:?}")))
        })
        .collect()
}

// ── Query strings ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub state: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<OrchestrationType>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

// ── Orchestrations ─────────────────────────────────────────────────

/// POST /orchestrations
pub async fn create_orchestration(
    State(state): State<ApiState>,
    Json(req): Json<CreateOrchestrationRequest>,
) -> impl IntoResponse {
    let result = state
        .manager
        .submit(req.kind, req.parameters)
        .map(|o| CreatedResponse { id: o.id });
    respond(result, StatusCode::CREATED)
}

/// GET /orchestrations
pub async fn list_orchestrations(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    respond(orchestration_page(&state, &query), StatusCode::OK)
}

fn orchestration_page(state: &ApiState, query: &ListQuery) -> ManagerResult<ListResponse<Orchestration>> {
    let page = state.manager.page(query.page, query.page_size)?;
    let filter = OrchestrationFilter {
        states: parse_list(query.state.as_deref(), "state")?,
        kind: query.kind,
    };
    let listed = state.manager.list(&filter, page)?;
    Ok(ListResponse::from_page(listed, page))
}

/// GET /orchestrations/{id}
pub async fn get_orchestration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    respond(state.manager.get(&id), StatusCode::OK)
}

/// GET /orchestrations/{id}/operations
pub async fn list_operations(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    respond(operation_page(&state, &id, &query), StatusCode::OK)
}

fn operation_page(
    state: &ApiState,
    id: &str,
    query: &ListQuery,
) -> ManagerResult<ListResponse<RuntimeOperation>> {
    let page = state.manager.page(query.page, query.page_size)?;
    let states: Vec<OperationState> = parse_list(query.state.as_deref(), "state")?;
    let listed = state.manager.operations(id, &states, page)?;
    Ok(ListResponse::from_page(listed, page))
}

/// GET /orchestrations/{id}/operations/{operation_id}
pub async fn get_operation(
    State(state): State<ApiState>,
    Path((id, operation_id)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(state.manager.operation(&id, &operation_id), StatusCode::OK)
}

/// PUT /orchestrations/{id}/cancel
pub async fn cancel_orchestration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = state.manager.cancel(&id).map(|o| CreatedResponse { id: o.id });
    respond(result, StatusCode::ACCEPTED)
}

/// PUT /orchestrations/{id}/retry
///
/// The body is optional; without `operationIDs` every failed operation is
/// retried.
pub async fn retry_orchestration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let req: RetryRequest = if body.is_empty() {
        RetryRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(&format!("invalid retry request: {e}"), StatusCode::BAD_REQUEST);
            }
        }
    };
    respond(state.manager.retry(&id, &req.operation_ids), StatusCode::ACCEPTED)
}

// ── Runtimes ───────────────────────────────────────────────────────

/// GET /runtimes
pub async fn list_runtimes(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let result = state
        .manager
        .page(query.page, query.page_size)
        .and_then(|page| state.manager.runtimes(page))
        .map(|listed| RuntimesResponse {
            count: listed.count,
            total_count: listed.total_count,
            data: listed.items,
        });
    respond(result, StatusCode::OK)
}

/// PUT /runtimes/{id}
pub async fn put_runtime(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(runtime): Json<Runtime>,
) -> impl IntoResponse {
    if runtime.runtime_id != id {
        return error_response(
            &format!("runtimeId {:?} does not match path {id:?}", runtime.runtime_id),
            StatusCode::BAD_REQUEST,
        );
    }
    respond(state.manager.put_runtime(&runtime).map(|()| runtime), StatusCode::OK)
}

// ── Stats ──────────────────────────────────────────────────────────

/// GET /stats/operations
pub async fn operation_stats(State(state): State<ApiState>) -> impl IntoResponse {
    respond(state.manager.stats(), StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_errors_map_to_status_codes() {
        let cases = [
            (ManagerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ManagerError::InvalidParameters("x".into()), StatusCode::BAD_REQUEST),
            (ManagerError::InvalidSelector("x".into()), StatusCode::BAD_REQUEST),
            (ManagerError::Conflict("x".into()), StatusCode::CONFLICT),
            (ManagerError::AlreadyTerminal("x".into()), StatusCode::CONFLICT),
            (ManagerError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(status_of(&error), status, "{error}");
        }
    }

    #[test]
    fn state_lists_parse() {
        let states: Vec<OrchestrationState> =
            parse_list(Some("in-progress, failed"), "state").unwrap();
        assert_eq!(
            states,
            vec![OrchestrationState::InProgress, OrchestrationState::Failed]
        );
        assert!(parse_list::<OrchestrationState>(None, "state").unwrap().is_empty());
        assert!(matches!(
            parse_list::<OperationState>(Some("bogus"), "state"),
            Err(ManagerError::InvalidParameters(_))
        ));
    }
}
