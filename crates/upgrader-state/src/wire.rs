//! Request and response bodies of the REST surface, shared by the server
//! and `upctl`.

use serde::{Deserialize, Serialize};

use crate::types::*;

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrchestrationRequest {
    #[serde(rename = "type")]
    pub kind: OrchestrationType,
    pub parameters: OrchestrationParameters,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    #[serde(default, rename = "operationIDs")]
    pub operation_ids: Vec<OperationId>,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: OrchestrationId,
}

/// An orchestration together with its per-state operation counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationStatus {
    #[serde(flatten)]
    pub orchestration: Orchestration,
    pub stats: OperationStats,
}

/// A runtime snapshot joined with its operation history, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeView {
    #[serde(flatten)]
    pub runtime: Runtime,
    pub operations: Vec<RuntimeOperation>,
}

/// What a retry request did.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    pub orchestration_id: String,
    /// Operations reset to pending.
    pub retried: Vec<OperationId>,
    /// Requested ids that are unknown, belong elsewhere, or are not failed.
    pub invalid: Vec<OperationId>,
}

/// One page of a listing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub total_count: usize,
    pub page_count: usize,
}

impl<T> ListResponse<T> {
    pub fn from_page(result: PageResult<T>, page: Page) -> Self {
        Self {
            page_count: result.page_count(page.page_size),
            count: result.count,
            total_count: result.total_count,
            items: result.items,
        }
    }
}

/// Runtime listing, in the shape the runtime endpoint has always used.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimesResponse<T> {
    pub count: usize,
    pub total_count: usize,
    pub data: Vec<T>,
}
