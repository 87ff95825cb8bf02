//! Per-cluster sequence
//!
//! FETCHING → RECONCILING → UPDATING → POLLING → DONE. Each step runs once;
//! the only loop is the conflict retry inside UPDATING. A failed read ends the
//! worker before anything is written.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cidr::{reconcile, Action};
use crate::config::ClusterTarget;
use crate::error::{ClusterError, PollError, RemoteError};
use crate::gke::{ClusterRef, ContainerApi};
use crate::operation::{await_completion, PollConfig};
use crate::report::{Phase, Report, ReportKind, Reporter};
use crate::update::{update_with_retry, RetryPolicy};

/// Everything a worker needs, shared read-only by all workers of a run
pub struct RunContext {
    pub api: Arc<dyn ContainerApi>,
    pub reporter: Arc<dyn Reporter>,
    pub project: String,
    /// `<runner-ip>/32`
    pub runner_cidr: String,
    pub action: Action,
    pub retry: RetryPolicy,
    pub poll: PollConfig,
}

/// Successful worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSuccess {
    pub operation: String,
    /// Update attempts used; more than one means conflicts were waited out
    pub attempts: u32,
}

/// Final state of one cluster
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub target: ClusterTarget,
    pub result: Result<ClusterSuccess, ClusterError>,
}

impl ClusterOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ClusterError> {
        self.result.as_ref().err()
    }
}

impl RunContext {
    fn report(&self, target: &ClusterTarget, kind: ReportKind, phase: Phase, message: &str) {
        let id = target.to_string();
        self.reporter
            .report(&Report::new(kind, phase, message).cluster(&id));
    }

    fn report_error(&self, target: &ClusterTarget, message: &str, err: &ClusterError) {
        let id = target.to_string();
        self.reporter.report(
            &Report::new(ReportKind::Error, err.phase(), message)
                .cluster(&id)
                .error(err),
        );
    }

    /// Run the full sequence for one cluster
    pub async fn process_cluster(&self, target: &ClusterTarget) -> ClusterOutcome {
        let result = self.run_phases(target).await;

        match &result {
            Ok(success) => {
                self.report(
                    target,
                    ReportKind::Success,
                    Phase::Done,
                    "Cluster updated successfully",
                );
                info!(cluster = %target, attempts = success.attempts, "Cluster done");
            }
            Err(err) => {
                let message = match err {
                    ClusterError::Read(_) => "Failed to get cluster info",
                    ClusterError::Update(_) => "Failed to update cluster",
                    ClusterError::Poll(PollError::Transport(_)) => {
                        "Failed to fetch operation status"
                    }
                    ClusterError::Poll(_) => "Operation failed",
                    ClusterError::Aborted(_) => "Worker aborted",
                };
                self.report_error(target, message, err);
                if let ClusterError::Poll(PollError::OperationFailed { details, .. }) = err {
                    for detail in details {
                        self.report(
                            target,
                            ReportKind::Warn,
                            Phase::Polling,
                            &format!("Detail: {}", detail),
                        );
                    }
                }
            }
        }

        ClusterOutcome {
            target: target.clone(),
            result,
        }
    }

    async fn run_phases(&self, target: &ClusterTarget) -> Result<ClusterSuccess, ClusterError> {
        let cluster = ClusterRef::new(&self.project, &target.region, &target.name);
        let id = target.to_string();

        // FETCHING
        self.report(
            target,
            ReportKind::Info,
            Phase::Fetching,
            &format!("Processing cluster ({})", target.region),
        );
        let current = self
            .api
            .get_authorized_networks(&cluster)
            .await
            .map_err(ClusterError::Read)?;

        // RECONCILING
        let verb = match self.action {
            Action::Add => "Adding runner IP",
            Action::Remove => "Removing runner IP",
        };
        self.report(
            target,
            ReportKind::Info,
            Phase::Reconciling,
            &format!("{} {}", verb, self.runner_cidr),
        );
        let desired = current.render(&reconcile(&current.cidrs(), &self.runner_cidr, self.action));
        let listed: Vec<&str> = desired
            .cidr_blocks
            .iter()
            .map(|b| b.cidr_block.as_str())
            .collect();
        self.report(
            target,
            ReportKind::Info,
            Phase::Reconciling,
            &format!("New authorized networks: [{}]", listed.join(", ")),
        );

        // UPDATING
        self.report(
            target,
            ReportKind::Info,
            Phase::Updating,
            "Updating cluster configuration",
        );
        let outcome = update_with_retry(
            &*self.api,
            &cluster,
            &desired,
            &self.retry,
            |_, delay: Duration, err: &RemoteError| {
                self.reporter.report(
                    &Report::new(
                        ReportKind::Warn,
                        Phase::Updating,
                        &format!(
                            "Concurrent operation detected, retrying in {}s...",
                            delay.as_secs()
                        ),
                    )
                    .cluster(&id)
                    .error(err),
                );
            },
        )
        .await?;
        if outcome.was_retried() {
            self.report(
                target,
                ReportKind::Success,
                Phase::Updating,
                &format!("Retry succeeded after {} attempt(s)", outcome.attempts),
            );
        }
        self.report(
            target,
            ReportKind::Info,
            Phase::Updating,
            "Update request submitted",
        );

        // POLLING
        self.report(
            target,
            ReportKind::Info,
            Phase::Polling,
            "Waiting for operation to complete",
        );
        let operation = cluster.operation(&outcome.operation.name);
        await_completion(&*self.api, &operation, &self.poll).await?;
        self.report(
            target,
            ReportKind::Success,
            Phase::Polling,
            "Operation completed",
        );

        Ok(ClusterSuccess {
            operation: outcome.operation.name,
            attempts: outcome.attempts,
        })
    }
}
