//! HTTP client for the orchestrator API.
//!
//! Every endpoint answers with a `{success, data, error}` envelope; the
//! client unwraps `data` on success and turns `error` into a
//! [`ClientError::Api`] otherwise.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use upgrader_state::wire::{
    CreateOrchestrationRequest, CreatedResponse, ListResponse, OrchestrationStatus, RetryOutcome,
    RetryRequest, RuntimeView, RuntimesResponse,
};
use upgrader_state::{
    OperationId, OperationKind, OperationState, OperationStats, Orchestration,
    OrchestrationId, OrchestrationParameters, OrchestrationType, RuntimeOperation,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ClientError {
    /// Whether the failure lies with the server rather than the request.
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500,
            Self::Transport { .. } | Self::Decode { .. } => true,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Paging and state filter for list calls.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub states: Vec<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListOptions {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if !self.states.is_empty() {
            query.push(("state", self.states.join(",")));
        }
        if let Some(page) = self.page {
            query.push(("page", page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            query.push(("pageSize", page_size.to_string()));
        }
        query
    }
}

/// API client for the orchestrator endpoints.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| ClientError::Transport {
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, url: String, req: RequestBuilder) -> ClientResult<T> {
        debug!(%url, "sending request");
        let response = req.send().await.map_err(|source| ClientError::Transport {
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| ClientError::Transport {
            url: url.clone(),
            source,
        })?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }
            Err(e) => {
                return Err(ClientError::Decode {
                    url,
                    message: e.to_string(),
                });
            }
        };

        if !status.is_success() || !envelope.success {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: envelope.error.unwrap_or_else(|| status.to_string()),
            });
        }
        envelope.data.ok_or_else(|| ClientError::Decode {
            url,
            message: "response carries no data".to_string(),
        })
    }

    // ── Orchestrations ─────────────────────────────────────────

    pub async fn create_orchestration(
        &self,
        kind: OrchestrationType,
        parameters: OrchestrationParameters,
    ) -> ClientResult<OrchestrationId> {
        let url = self.url("/orchestrations");
        let body = CreateOrchestrationRequest { kind, parameters };
        let created: CreatedResponse = self.send(url.clone(), self.client.post(&url).json(&body)).await?;
        Ok(created.id)
    }

    pub async fn list_orchestrations(
        &self,
        options: &ListOptions,
    ) -> ClientResult<ListResponse<Orchestration>> {
        let url = self.url("/orchestrations");
        let req = self.client.get(&url).query(&options.query());
        self.send(url, req).await
    }

    pub async fn get_orchestration(&self, id: &str) -> ClientResult<OrchestrationStatus> {
        let url = self.url(&format!("/orchestrations/{id}"));
        self.send(url.clone(), self.client.get(&url)).await
    }

    pub async fn list_operations(
        &self,
        id: &str,
        options: &ListOptions,
    ) -> ClientResult<ListResponse<RuntimeOperation>> {
        let url = self.url(&format!("/orchestrations/{id}/operations"));
        let req = self.client.get(&url).query(&options.query());
        self.send(url, req).await
    }

    pub async fn get_operation(&self, id: &str, operation_id: &str) -> ClientResult<RuntimeOperation> {
        let url = self.url(&format!("/orchestrations/{id}/operations/{operation_id}"));
        self.send(url.clone(), self.client.get(&url)).await
    }

    pub async fn cancel_orchestration(&self, id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/orchestrations/{id}/cancel"));
        let _: CreatedResponse = self.send(url.clone(), self.client.put(&url)).await?;
        Ok(())
    }

    pub async fn retry_orchestration(
        &self,
        id: &str,
        operation_ids: Vec<OperationId>,
    ) -> ClientResult<RetryOutcome> {
        let url = self.url(&format!("/orchestrations/{id}/retry"));
        let body = RetryRequest { operation_ids };
        self.send(url.clone(), self.client.put(&url).json(&body)).await
    }

    // ── Runtimes and stats ─────────────────────────────────────

    pub async fn list_runtimes(
        &self,
        options: &ListOptions,
    ) -> ClientResult<RuntimesResponse<RuntimeView>> {
        let url = self.url("/runtimes");
        let req = self.client.get(&url).query(&options.query());
        self.send(url, req).await
    }

    pub async fn operation_stats(&self) -> ClientResult<BTreeMap<OperationKind, OperationStats>> {
        let url = self.url("/stats/operations");
        self.send(url.clone(), self.client.get(&url)).await
    }
}

/// Count of operations in `state`, zero when absent.
pub fn count(stats: &OperationStats, state: OperationState) -> u64 {
    stats.get(&state).copied().unwrap_or(0)
}
