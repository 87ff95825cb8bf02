//! Fan-out and per-cluster sequence tests
//!
//! Drives the orchestrator against an in-memory container API:
//! - allow / cleanup end-to-end scenarios
//! - concurrency ceiling
//! - failure isolation between clusters
//! - conflict retry and failed operations surfaced through the reporter

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use runner_allowlist::gke::OperationError;
use runner_allowlist::{
    Action, AuthorizedNetworksConfig, CidrBlock, ClusterError, ClusterRef, ClusterTarget,
    ContainerApi, Operation, OperationRef, OperationStatus, Orchestrator, Phase, PollError,
    RemoteError, Report, ReportKind, Reporter, RunContext, UpdateError,
};
use runner_allowlist::{operation::PollConfig, update::RetryPolicy};

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Default)]
struct MockApi {
    configs: Mutex<HashMap<String, AuthorizedNetworksConfig>>,
    read_failures: HashSet<String>,
    conflicts: Mutex<HashMap<String, u32>>,
    rejected: HashSet<String>,
    op_errors: HashMap<String, OperationError>,
    polls_before_done: u32,
    call_delay: Duration,

    get_calls: AtomicUsize,
    updates: Mutex<Vec<(String, AuthorizedNetworksConfig)>>,
    polls: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockApi {
    fn with_cidrs(self, cluster: &str, cidrs: &[&str]) -> Self {
        self.configs.lock().unwrap().insert(
            cluster.to_string(),
            AuthorizedNetworksConfig {
                enabled: true,
                cidr_blocks: cidrs.iter().map(|c| CidrBlock::new(*c)).collect(),
                gcp_public_cidrs_access_enabled: None,
            },
        );
        self
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn updates(&self) -> Vec<(String, AuthorizedNetworksConfig)> {
        self.updates.lock().unwrap().clone()
    }

    fn cidrs_sent(&self, cluster: &str) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter(|(name, _)| name == cluster)
            .last()
            .map(|(_, cfg)| cfg.cidr_blocks.into_iter().map(|b| b.cidr_block).collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ContainerApi for MockApi {
    async fn get_authorized_networks(
        &self,
        cluster: &ClusterRef,
    ) -> Result<AuthorizedNetworksConfig, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.enter();
        tokio::time::sleep(self.call_delay).await;

        if self.read_failures.contains(&cluster.name) {
            self.leave();
            return Err(RemoteError::api(404, Some("NOT_FOUND".into()), "cluster not found"));
        }
        Ok(self
            .configs
            .lock()
            .unwrap()
            .get(&cluster.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_authorized_networks(
        &self,
        cluster: &ClusterRef,
        desired: &AuthorizedNetworksConfig,
    ) -> Result<Operation, RemoteError> {
        tokio::time::sleep(self.call_delay).await;

        if self.rejected.contains(&cluster.name) {
            self.leave();
            return Err(RemoteError::api(
                403,
                Some("PERMISSION_DENIED".into()),
                "Required 'container.clusters.update' permission",
            ));
        }
        {
            let mut conflicts = self.conflicts.lock().unwrap();
            if let Some(remaining) = conflicts.get_mut(&cluster.name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RemoteError::api(
                        400,
                        Some("FAILED_PRECONDITION".into()),
                        "Cluster is running incompatible operation",
                    ));
                }
            }
        }

        self.updates
            .lock()
            .unwrap()
            .push((cluster.name.clone(), desired.clone()));
        Ok(Operation {
            name: format!("op-{}", cluster.name),
            status: OperationStatus::Running,
            ..Default::default()
        })
    }

    async fn get_operation(&self, operation: &OperationRef) -> Result<Operation, RemoteError> {
        tokio::time::sleep(self.call_delay).await;

        let cluster = operation.name.trim_start_matches("op-").to_string();
        let seen = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(cluster.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if seen <= self.polls_before_done {
            return Ok(Operation {
                name: operation.name.clone(),
                status: OperationStatus::Running,
                ..Default::default()
            });
        }

        self.leave();
        Ok(Operation {
            name: operation.name.clone(),
            status: OperationStatus::Done,
            error: self.op_errors.get(&cluster).cloned(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    cluster: Option<String>,
    phase: Phase,
    kind: ReportKind,
    message: String,
    error: Option<String>,
}

#[derive(Default)]
struct RecordingReporter {
    reports: Mutex<Vec<Recorded>>,
}

impl RecordingReporter {
    /// Reports attributed to `region/name`
    fn for_cluster(&self, cluster: &str) -> Vec<Recorded> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.cluster.as_deref() == Some(cluster))
            .cloned()
            .collect()
    }

    fn run_level(&self) -> Vec<Recorded> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.cluster.is_none())
            .cloned()
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, r: &Report<'_>) {
        self.reports.lock().unwrap().push(Recorded {
            cluster: r.cluster.map(str::to_string),
            phase: r.phase,
            kind: r.kind,
            message: r.message.to_string(),
            error: r.error.map(|e| e.to_string()),
        });
    }
}

/// Panics while reading the listed clusters, after an optional delay
struct PanickingApi {
    inner: MockApi,
    panics: HashMap<String, Duration>,
}

#[async_trait::async_trait]
impl ContainerApi for PanickingApi {
    async fn get_authorized_networks(
        &self,
        cluster: &ClusterRef,
    ) -> Result<AuthorizedNetworksConfig, RemoteError> {
        if let Some(delay) = self.panics.get(&cluster.name) {
            tokio::time::sleep(*delay).await;
            panic!("boom-{}", cluster.name);
        }
        self.inner.get_authorized_networks(cluster).await
    }

    async fn update_authorized_networks(
        &self,
        cluster: &ClusterRef,
        desired: &AuthorizedNetworksConfig,
    ) -> Result<Operation, RemoteError> {
        self.inner.update_authorized_networks(cluster, desired).await
    }

    async fn get_operation(&self, operation: &OperationRef) -> Result<Operation, RemoteError> {
        self.inner.get_operation(operation).await
    }
}

fn context(
    api: Arc<dyn ContainerApi>,
    reporter: Arc<RecordingReporter>,
    action: Action,
) -> RunContext {
    RunContext {
        api,
        reporter,
        project: "acme".into(),
        runner_cidr: "203.0.113.5/32".into(),
        action,
        retry: RetryPolicy::default(),
        poll: PollConfig::default(),
    }
}

fn targets(names: &[&str]) -> Vec<ClusterTarget> {
    names
        .iter()
        .map(|n| ClusterTarget::new("us-central1", *n))
        .collect()
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_allow_on_empty_cluster() {
    let api = Arc::new(MockApi {
        polls_before_done: 2,
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api.clone(), reporter.clone(), Action::Add), 3)
        .run(&targets(&["demo-a"]))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(summary.total(), 1);

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].1,
        AuthorizedNetworksConfig {
            enabled: true,
            cidr_blocks: vec![CidrBlock::new("203.0.113.5/32")],
            gcp_public_cidrs_access_enabled: None,
        }
    );
    assert_eq!(api.polls.lock().unwrap()["demo-a"], 3);

    let outcome = &summary.outcomes[0];
    let success = outcome.result.as_ref().unwrap();
    assert_eq!(success.operation, "op-demo-a");
    assert_eq!(success.attempts, 1);

    let last = reporter.run_level().pop().unwrap();
    assert_eq!(last.kind, ReportKind::Success);
    assert_eq!(last.message, "All clusters processed successfully (1 total)");
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_removes_only_runner() {
    let api = Arc::new(
        MockApi::default().with_cidrs("demo-a", &["203.0.113.5/32", "198.51.100.9/32"]),
    );
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api.clone(), reporter, Action::Remove), 3)
        .run(&targets(&["demo-a"]))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(api.cidrs_sent("demo-a"), vec!["198.51.100.9/32"]);
}

#[tokio::test(start_paused = true)]
async fn test_allow_is_sorted_and_idempotent() {
    let api = Arc::new(
        MockApi::default()
            .with_cidrs("demo-a", &["198.51.100.9/32", "10.0.0.0/8"])
            .with_cidrs("demo-b", &["203.0.113.5/32", "192.168.0.0/16"]),
    );
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api.clone(), reporter, Action::Add), 3)
        .run(&targets(&["demo-a", "demo-b"]))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(
        api.cidrs_sent("demo-a"),
        vec!["10.0.0.0/8", "198.51.100.9/32", "203.0.113.5/32"]
    );
    // already present: still pushed, unchanged
    assert_eq!(
        api.cidrs_sent("demo-b"),
        vec!["192.168.0.0/16", "203.0.113.5/32"]
    );
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling() {
    let api = Arc::new(MockApi {
        polls_before_done: 3,
        call_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());
    let names: Vec<String> = (0..10).map(|i| format!("cluster-{}", i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let summary = Orchestrator::new(context(api.clone(), reporter, Action::Add), 3)
        .run(&targets(&names))
        .await;

    assert_eq!(summary.total(), 10);
    assert!(summary.all_succeeded());
    assert_eq!(api.max_active.load(Ordering::SeqCst), 3);
    assert_eq!(api.active.load(Ordering::SeqCst), 0);
    assert_eq!(api.updates().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_summary_keeps_input_order() {
    let api = Arc::new(MockApi {
        call_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api, reporter, Action::Add), 2)
        .run(&targets(&["c", "a", "b"]))
        .await;

    let order: Vec<&str> = summary
        .outcomes
        .iter()
        .map(|o| o.target.name.as_str())
        .collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_read_failure_is_isolated_and_never_writes() {
    let api = Arc::new(MockApi {
        read_failures: HashSet::from(["broken".to_string()]),
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api.clone(), reporter.clone(), Action::Add), 3)
        .run(&targets(&["ok-1", "broken", "ok-2"]))
        .await;

    assert_eq!(summary.total(), 3);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.to_string(), "2 of 3 clusters processed successfully");

    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target.name, "broken");
    assert!(matches!(failed[0].error(), Some(ClusterError::Read(_))));

    assert!(api.updates().iter().all(|(name, _)| name != "broken"));

    let errors: Vec<_> = reporter
        .for_cluster("us-central1/broken")
        .into_iter()
        .filter(|r| r.kind == ReportKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].phase, Phase::Fetching);
    assert_eq!(errors[0].message, "Failed to get cluster info");
    assert!(errors[0].error.as_deref().unwrap().contains("cluster not found"));

    let last = reporter.run_level().pop().unwrap();
    assert_eq!(last.kind, ReportKind::Error);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_update_fails_cluster() {
    let api = Arc::new(MockApi {
        rejected: HashSet::from(["locked".to_string()]),
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api.clone(), reporter, Action::Add), 3)
        .run(&targets(&["locked", "open"]))
        .await;

    assert_eq!(summary.succeeded(), 1);
    let failed: Vec<_> = summary.failed().collect();
    assert!(matches!(
        failed[0].error(),
        Some(ClusterError::Update(UpdateError::Rejected(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_conflict_retry_is_reported() {
    let api = Arc::new(MockApi {
        conflicts: Mutex::new(HashMap::from([("busy".to_string(), 2)])),
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());
    let start = tokio::time::Instant::now();

    let summary = Orchestrator::new(context(api.clone(), reporter.clone(), Action::Add), 3)
        .run(&targets(&["busy"]))
        .await;

    assert!(summary.all_succeeded());
    assert_eq!(summary.outcomes[0].result.as_ref().unwrap().attempts, 3);
    // 20s + 40s of backoff before the third attempt
    assert!(start.elapsed() >= Duration::from_secs(60));

    let reports = reporter.for_cluster("us-central1/busy");
    let warnings: Vec<_> = reports
        .iter()
        .filter(|r| r.kind == ReportKind::Warn && r.phase == Phase::Updating)
        .map(|r| r.message.as_str())
        .collect();
    assert_eq!(
        warnings,
        vec![
            "Concurrent operation detected, retrying in 20s...",
            "Concurrent operation detected, retrying in 40s...",
        ]
    );
    assert!(reports
        .iter()
        .any(|r| r.message == "Retry succeeded after 3 attempt(s)"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_operation_surfaces_details() {
    let api = Arc::new(MockApi {
        op_errors: HashMap::from([(
            "demo-a".to_string(),
            OperationError {
                code: Some(3),
                message: "Invalid master authorized networks".into(),
                details: vec![serde_json::json!("cidr 203.0.113.5/32 overlaps")],
            },
        )]),
        ..Default::default()
    });
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api, reporter.clone(), Action::Add), 3)
        .run(&targets(&["demo-a", "demo-b"]))
        .await;

    assert_eq!(summary.succeeded(), 1);
    let failed: Vec<_> = summary.failed().collect();
    match failed[0].error() {
        Some(ClusterError::Poll(PollError::OperationFailed {
            message, details, ..
        })) => {
            assert_eq!(message, "Invalid master authorized networks");
            assert_eq!(details, &vec!["cidr 203.0.113.5/32 overlaps".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let reports = reporter.for_cluster("us-central1/demo-a");
    assert!(reports
        .iter()
        .any(|r| r.kind == ReportKind::Error && r.message == "Operation failed"));
    assert!(reports
        .iter()
        .any(|r| r.message == "Detail: cidr 203.0.113.5/32 overlaps"));
}

#[tokio::test(start_paused = true)]
async fn test_every_cluster_report_is_attributed() {
    let api = Arc::new(MockApi::default());
    let reporter = Arc::new(RecordingReporter::default());

    Orchestrator::new(context(api, reporter.clone(), Action::Add), 3)
        .run(&targets(&["demo-a"]))
        .await;

    let phases: Vec<Phase> = reporter
        .for_cluster("us-central1/demo-a")
        .iter()
        .map(|r| r.phase)
        .collect();
    assert_eq!(phases.first(), Some(&Phase::Fetching));
    assert_eq!(phases.last(), Some(&Phase::Done));
    for expected in [Phase::Reconciling, Phase::Updating, Phase::Polling] {
        assert!(phases.contains(&expected), "missing {:?}", expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_same_name_in_two_regions_reported_apart() {
    let api = Arc::new(MockApi::default());
    let reporter = Arc::new(RecordingReporter::default());
    let targets = vec![
        ClusterTarget::new("us-central1", "prod"),
        ClusterTarget::new("europe-west1", "prod"),
    ];

    let summary = Orchestrator::new(context(api, reporter.clone(), Action::Add), 3)
        .run(&targets)
        .await;

    assert!(summary.all_succeeded());
    for id in ["us-central1/prod", "europe-west1/prod"] {
        let reports = reporter.for_cluster(id);
        assert_eq!(
            reports.iter().filter(|r| r.phase == Phase::Fetching).count(),
            1,
            "{}",
            id
        );
        assert_eq!(reports.last().unwrap().message, "Cluster updated successfully");
    }
}

#[tokio::test(start_paused = true)]
async fn test_each_panic_is_attributed_to_its_cluster() {
    let api = Arc::new(PanickingApi {
        inner: MockApi::default(),
        // `first` finishes last, so completion order differs from input order
        panics: HashMap::from([
            ("first".to_string(), Duration::from_secs(5)),
            ("second".to_string(), Duration::ZERO),
        ]),
    });
    let reporter = Arc::new(RecordingReporter::default());

    let summary = Orchestrator::new(context(api, reporter.clone(), Action::Add), 3)
        .run(&targets(&["first", "second", "ok"]))
        .await;

    assert_eq!(summary.total(), 3);
    assert_eq!(summary.succeeded(), 1);
    assert!(summary.outcomes[2].is_success());

    for (outcome, name) in summary.outcomes.iter().zip(["first", "second"]) {
        assert_eq!(outcome.target.name, name);
        match outcome.error() {
            Some(ClusterError::Aborted(reason)) => {
                assert!(
                    reason.contains(&format!("boom-{}", name)),
                    "{} got {}",
                    name,
                    reason
                );
            }
            other => panic!("unexpected outcome for {}: {:?}", name, other),
        }

        let aborted: Vec<_> = reporter
            .for_cluster(&format!("us-central1/{}", name))
            .into_iter()
            .filter(|r| r.message == "Worker aborted")
            .collect();
        assert_eq!(aborted.len(), 1);
        assert!(aborted[0].error.as_deref().unwrap().contains(name));
    }
}
