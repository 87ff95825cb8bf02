//! Bounded fan-out across clusters
//!
//! One task per cluster, admitted through a semaphore so that at most
//! `max_parallel` workers run at once. A permit is taken before FETCHING and
//! released when the worker reaches DONE. Failures never stop other clusters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{error, info};

use crate::config::ClusterTarget;
use crate::error::ClusterError;
use crate::report::{Phase, Report, ReportKind};
use crate::worker::{ClusterOutcome, RunContext};

/// Default concurrency ceiling
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Aggregate result of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ClusterOutcome>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ClusterOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_succeeded() {
            write!(f, "All clusters processed successfully ({} total)", self.total())
        } else {
            write!(
                f,
                "{} of {} clusters processed successfully",
                self.succeeded(),
                self.total()
            )
        }
    }
}

/// Runs one worker per target under a concurrency ceiling
pub struct Orchestrator {
    context: Arc<RunContext>,
    max_parallel: usize,
}

impl Orchestrator {
    pub fn new(context: RunContext, max_parallel: usize) -> Self {
        Self {
            context: Arc::new(context),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Process every target and wait for all of them
    pub async fn run(&self, targets: &[ClusterTarget]) -> RunSummary {
        let started = format!(
            "Starting multi-cluster update process ({} clusters)",
            targets.len()
        );
        self.context
            .reporter
            .report(&Report::new(ReportKind::Info, Phase::Run, &started));
        info!(
            clusters = targets.len(),
            max_parallel = self.max_parallel,
            "Fan-out started"
        );

        let gate = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        let mut slot_of: HashMap<task::Id, usize> = HashMap::with_capacity(targets.len());

        for (index, target) in targets.iter().cloned().enumerate() {
            let gate = gate.clone();
            let context = self.context.clone();
            let handle = tasks.spawn(async move {
                match gate.acquire_owned().await {
                    Ok(_permit) => context.process_cluster(&target).await,
                    // The gate is never closed during a run
                    Err(_) => ClusterOutcome {
                        result: Err(ClusterError::Aborted("concurrency gate closed".into())),
                        target,
                    },
                }
            });
            slot_of.insert(handle.id(), index);
        }

        // Completion order is arbitrary; slots keep input order in the summary
        let mut slots: Vec<Option<ClusterOutcome>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&index) = slot_of.get(&id) {
                        slots[index] = Some(outcome);
                    }
                }
                Err(e) => {
                    let Some(&index) = slot_of.get(&e.id()) else {
                        error!(error = %e, "Unknown worker task failed");
                        continue;
                    };
                    let target = &targets[index];
                    error!(cluster = %target, error = %e, "Cluster worker panicked");
                    slots[index] = Some(self.aborted(target, panic_reason(e)));
                }
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| self.aborted(target, "worker task lost".into()))
            })
            .collect();

        let summary = RunSummary { outcomes };
        let kind = if summary.all_succeeded() {
            ReportKind::Success
        } else {
            ReportKind::Error
        };
        let line = summary.to_string();
        self.context
            .reporter
            .report(&Report::new(kind, Phase::Run, &line));

        summary
    }

    fn aborted(&self, target: &ClusterTarget, reason: String) -> ClusterOutcome {
        let err = ClusterError::Aborted(reason);
        let id = target.to_string();
        self.context.reporter.report(
            &Report::new(ReportKind::Error, Phase::Done, "Worker aborted")
                .cluster(&id)
                .error(&err),
        );
        ClusterOutcome {
            target: target.clone(),
            result: Err(err),
        }
    }
}

/// Panic payload as text, or the join error itself when the task was cancelled
fn panic_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
