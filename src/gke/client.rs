//! REST client for the GKE container API (v1)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::auth::TokenProvider;
use super::{ClusterRef, ContainerApi, Operation, OperationRef};
use crate::cidr::AuthorizedNetworksConfig;
use crate::error::RemoteError;

pub const DEFAULT_ENDPOINT: &str = "https://container.googleapis.com";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The subset of the cluster resource this tool reads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterResource {
    #[serde(default)]
    master_authorized_networks_config: Option<AuthorizedNetworksConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterUpdate<'a> {
    desired_master_authorized_networks_config: &'a AuthorizedNetworksConfig,
}

#[derive(Debug, Serialize)]
struct UpdateClusterRequest<'a> {
    update: ClusterUpdate<'a>,
}

/// `{"error": {"code": 409, "message": "...", "status": "ABORTED"}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Container API client over HTTPS
pub struct GkeClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenProvider,
}

impl GkeClient {
    pub fn new(endpoint: impl Into<String>, tokens: TokenProvider) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path)
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        self.tokens
            .access_token(&self.http)
            .await
            .map_err(|e| RemoteError::transport(format!("authentication failed: {}", e)))
    }

    async fn send<T>(&self, request: reqwest::RequestBuilder) -> Result<T, RemoteError>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.bearer().await?;
        let response = request
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::transport(format!("invalid response body: {}", e)))
    }
}

/// Decode a Google API error body, falling back to the raw text
pub(crate) fn parse_error(http_status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => RemoteError::api(http_status, envelope.error.status, envelope.error.message),
        Err(_) => RemoteError::api(http_status, None, body.trim()),
    }
}

#[async_trait::async_trait]
impl ContainerApi for GkeClient {
    async fn get_authorized_networks(
        &self,
        cluster: &ClusterRef,
    ) -> Result<AuthorizedNetworksConfig, RemoteError> {
        debug!(cluster = %cluster, "GET cluster");
        let resource: ClusterResource = self.send(self.http.get(self.url(&cluster.path()))).await?;
        Ok(resource.master_authorized_networks_config.unwrap_or_default())
    }

    async fn update_authorized_networks(
        &self,
        cluster: &ClusterRef,
        desired: &AuthorizedNetworksConfig,
    ) -> Result<Operation, RemoteError> {
        debug!(cluster = %cluster, blocks = desired.cidr_blocks.len(), "PUT cluster");
        let body = UpdateClusterRequest {
            update: ClusterUpdate {
                desired_master_authorized_networks_config: desired,
            },
        };
        self.send(self.http.put(self.url(&cluster.path())).json(&body))
            .await
    }

    async fn get_operation(&self, operation: &OperationRef) -> Result<Operation, RemoteError> {
        debug!(operation = %operation.path(), "GET operation");
        self.send(self.http.get(self.url(&operation.path()))).await
    }
}
