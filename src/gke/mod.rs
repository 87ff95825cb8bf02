//! Container API surface
//!
//! [`ContainerApi`] is the seam between the orchestration logic and GKE.
//! [`GkeClient`] implements it over the v1 REST API; tests substitute
//! in-memory implementations.

pub mod auth;
pub mod client;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cidr::AuthorizedNetworksConfig;
use crate::error::RemoteError;

pub use auth::{AuthError, Credentials, TokenProvider};
pub use client::GkeClient;

/// Fully qualified cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    pub project: String,
    pub location: String,
    pub name: String,
}

impl ClusterRef {
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            name: name.into(),
        }
    }

    /// `projects/{p}/locations/{l}/clusters/{c}`
    pub fn path(&self) -> String {
        format!(
            "projects/{}/locations/{}/clusters/{}",
            self.project, self.location, self.name
        )
    }

    /// Reference to an operation started against this cluster
    pub fn operation(&self, operation_name: &str) -> OperationRef {
        OperationRef {
            project: self.project.clone(),
            location: self.location.clone(),
            name: operation_name.to_string(),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Fully qualified long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationRef {
    pub project: String,
    pub location: String,
    pub name: String,
}

impl OperationRef {
    /// `projects/{p}/locations/{l}/operations/{op}`
    pub fn path(&self) -> String {
        format!(
            "projects/{}/locations/{}/operations/{}",
            self.project, self.location, self.name
        )
    }
}

/// Operation status as reported by the API. Only `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    Aborting,
    #[default]
    #[serde(other)]
    StatusUnspecified,
}

/// Error embedded in a finished operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl OperationError {
    /// Details rendered one string per entry
    pub fn detail_lines(&self) -> Vec<String> {
        self.details
            .iter()
            .map(|d| match d {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Snapshot of a long-running operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }
}

/// Remote control-plane calls used by a worker
#[async_trait::async_trait]
pub trait ContainerApi: Send + Sync {
    /// Current master authorized networks of a cluster
    async fn get_authorized_networks(
        &self,
        cluster: &ClusterRef,
    ) -> Result<AuthorizedNetworksConfig, RemoteError>;

    /// Replace the master authorized networks; returns the started operation
    async fn update_authorized_networks(
        &self,
        cluster: &ClusterRef,
        desired: &AuthorizedNetworksConfig,
    ) -> Result<Operation, RemoteError>;

    /// Fresh snapshot of an operation
    async fn get_operation(&self, operation: &OperationRef) -> Result<Operation, RemoteError>;
}
