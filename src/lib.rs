//! runner-allowlist: keep a CI runner's address on GKE master authorized networks
//!
//! Adds (or removes) `<runner-ip>/32` on every configured cluster, pushes the
//! reconciled allow-list through the container API and waits for each cluster
//! update operation to finish.
//!
//! ## Modules
//!
//! - **cidr**: set reconciliation of the allow-list
//! - **update**: update call with retry on conflicting operations
//! - **operation**: polling of long-running operations
//! - **worker**: the per-cluster sequence
//! - **orchestrator**: bounded fan-out across clusters
//! - **gke**: container API trait, REST client and credentials
//! - **report**: injected reporting sinks

pub mod cidr;
pub mod config;
pub mod error;
pub mod gke;
pub mod operation;
pub mod orchestrator;
pub mod public_ip;
pub mod report;
pub mod update;
pub mod worker;

pub use cidr::{reconcile, runner_cidr, Action, AuthorizedNetworksConfig, CidrBlock};
pub use config::{Args, ClusterTarget, RunConfig};
pub use error::{ClusterError, ConfigError, PollError, RemoteError, UpdateError};
pub use gke::{ClusterRef, ContainerApi, Operation, OperationRef, OperationStatus};
pub use orchestrator::{Orchestrator, RunSummary};
pub use report::{Phase, Report, ReportKind, Reporter};
pub use worker::{ClusterOutcome, ClusterSuccess, RunContext};
