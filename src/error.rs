//! Error types
//!
//! Everything below `ConfigError` is scoped to a single cluster and never
//! escapes that cluster's worker.

use std::fmt;

use thiserror::Error;

use crate::report::Phase;

// ============================================================================
// Configuration
// ============================================================================

/// Fatal configuration problems, detected before any cluster is touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing INPUT_CLUSTERS")]
    MissingClusters,

    #[error("Missing INPUT_PROJECT_ID")]
    MissingProject,

    #[error("Invalid cluster entry: {0} (expected format: region/cluster-name)")]
    InvalidClusterEntry(String),

    #[error("Invalid runner IP: {0}")]
    InvalidRunnerIp(String),

    #[error("MAX_PARALLEL must be at least 1")]
    ZeroParallelism,
}

// ============================================================================
// Remote API
// ============================================================================

/// Error returned by the container API or the transport underneath it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// HTTP status code, when a response was received
    pub http_status: Option<u16>,
    /// RPC status string from the error body (e.g. `FAILED_PRECONDITION`)
    pub status: Option<String>,
    pub message: String,
}

impl RemoteError {
    /// A failure before any response was received
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            status: None,
            message: message.into(),
        }
    }

    /// A non-success API response
    pub fn api(http_status: u16, status: Option<String>, message: impl Into<String>) -> Self {
        Self {
            http_status: Some(http_status),
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.http_status, &self.status) {
            (Some(code), Some(status)) => write!(f, "HTTP {} {}: {}", code, status, self.message),
            (Some(code), None) => write!(f, "HTTP {}: {}", code, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

// ============================================================================
// Per-cluster phases
// ============================================================================

/// Failures of the update call after retry handling
#[derive(Debug, Clone, Error)]
pub enum UpdateError {
    /// Non-conflict error, not retried
    #[error("update rejected: {0}")]
    Rejected(RemoteError),

    /// Every attempt hit a conflicting operation
    #[error("max retries ({attempts}) reached while waiting for concurrent operations to finish: {last}")]
    MaxRetriesExceeded { attempts: u32, last: RemoteError },
}

/// Failures while waiting for an operation to reach DONE
#[derive(Debug, Clone, Error)]
pub enum PollError {
    #[error("failed to fetch operation status: {0}")]
    Transport(RemoteError),

    #[error("operation {operation} failed: {message}")]
    OperationFailed {
        operation: String,
        message: String,
        details: Vec<String>,
    },

    #[error("operation {operation} still running after {waited_secs}s")]
    Timeout { operation: String, waited_secs: u64 },
}

/// Terminal failure of one cluster's worker
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("failed to get cluster info: {0}")]
    Read(RemoteError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("worker aborted: {0}")]
    Aborted(String),
}

impl ClusterError {
    /// Phase in which the worker stopped
    pub fn phase(&self) -> Phase {
        match self {
            ClusterError::Read(_) => Phase::Fetching,
            ClusterError::Update(_) => Phase::Updating,
            ClusterError::Poll(_) => Phase::Polling,
            ClusterError::Aborted(_) => Phase::Done,
        }
    }
}
