//! Waiting on long-running operations

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::PollError;
use crate::gke::{ContainerApi, Operation, OperationRef};

/// Polling cadence and optional deadline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between polls
    pub interval: Duration,
    /// Total wait before giving up; `None` waits for as long as it takes
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: None,
        }
    }
}

/// Poll `operation` until it is DONE.
///
/// Lookup failures are returned as-is without retrying. A DONE operation
/// carrying an error is a failure with the error's message and details.
pub async fn await_completion(
    api: &dyn ContainerApi,
    operation: &OperationRef,
    config: &PollConfig,
) -> Result<Operation, PollError> {
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        polls += 1;
        let snapshot = api
            .get_operation(operation)
            .await
            .map_err(PollError::Transport)?;
        trace!(operation = %operation.name, status = ?snapshot.status, polls, "Polled operation");

        if snapshot.is_done() {
            debug!(operation = %operation.name, polls, "Operation reached DONE");
            return match snapshot.error {
                Some(error) => Err(PollError::OperationFailed {
                    operation: operation.name.clone(),
                    details: error.detail_lines(),
                    message: error.message,
                }),
                None => Ok(snapshot),
            };
        }

        let mut delay = config.interval;
        if let Some(timeout) = config.timeout {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(PollError::Timeout {
                    operation: operation.name.clone(),
                    waited_secs: waited.as_secs(),
                });
            }
            // Last poll lands on the deadline
            delay = delay.min(timeout - waited);
        }

        tokio::time::sleep(delay).await;
    }
}
