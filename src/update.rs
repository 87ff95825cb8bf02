//! Cluster update with retry on conflicting operations
//!
//! GKE runs at most one operation per cluster. An update issued while another
//! operation is in flight is rejected with a conflict; those rejections are
//! retried with a linear backoff. Anything else fails immediately.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cidr::AuthorizedNetworksConfig;
use crate::error::{RemoteError, UpdateError};
use crate::gke::{ClusterRef, ContainerApi, Operation};

/// RPC statuses meaning "another operation holds the cluster"
const CONFLICT_STATUSES: &[&str] = &["ABORTED", "FAILED_PRECONDITION"];

/// Message fragments checked when no structured status matched
const CONFLICT_MARKERS: &[&str] = &[
    "operation in progress",
    "another operation",
    "CLUSTER_ALREADY_HAS_OPERATION",
    "failedPrecondition",
    "409",
];

/// Retry budget for the update call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before attempt `n + 1` is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Accepted update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub operation: Operation,
    /// Attempts used; more than one means a conflict was waited out
    pub attempts: u32,
}

impl UpdateOutcome {
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }
}

/// Whether an update error is a conflicting-operation error worth retrying
pub fn is_retryable(err: &RemoteError) -> bool {
    if err.http_status == Some(409) {
        return true;
    }
    if let Some(status) = err.status.as_deref() {
        if CONFLICT_STATUSES.contains(&status) {
            return true;
        }
    }
    CONFLICT_MARKERS.iter().any(|m| err.message.contains(m))
}

/// Issue the update, retrying conflicts per `policy`.
///
/// `on_conflict(attempt, delay, error)` runs before each backoff sleep.
pub async fn update_with_retry<F>(
    api: &dyn ContainerApi,
    cluster: &ClusterRef,
    desired: &AuthorizedNetworksConfig,
    policy: &RetryPolicy,
    mut on_conflict: F,
) -> Result<UpdateOutcome, UpdateError>
where
    F: FnMut(u32, Duration, &RemoteError),
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(cluster = %cluster, attempt, "Submitting update");

        let err = match api.update_authorized_networks(cluster, desired).await {
            Ok(operation) => {
                return Ok(UpdateOutcome {
                    operation,
                    attempts: attempt,
                })
            }
            Err(e) => e,
        };

        if !is_retryable(&err) {
            return Err(UpdateError::Rejected(err));
        }

        if attempt >= policy.max_attempts {
            warn!(cluster = %cluster, attempt, error = %err, "Retry budget exhausted");
            return Err(UpdateError::MaxRetriesExceeded {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_after(attempt);
        warn!(
            cluster = %cluster,
            attempt,
            delay_secs = delay.as_secs(),
            error = %err,
            "Concurrent operation detected, retrying"
        );
        on_conflict(attempt, delay, &err);
        tokio::time::sleep(delay).await;
    }
}
