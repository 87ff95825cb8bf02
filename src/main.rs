//! runner-allowlist: allow (or clean up) a CI runner's IP on GKE clusters
//!
//! Reads the cluster list and project from the environment, discovers the
//! runner's public IP, then updates every cluster's master authorized
//! networks with at most `MAX_PARALLEL` clusters in flight.

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runner_allowlist::{
    cidr::runner_cidr,
    config::{Args, LogFormat},
    gke::{Credentials, GkeClient, TokenProvider},
    public_ip::fetch_public_ip,
    report::{ConsoleReporter, Phase, Report, ReportKind, Reporter, TracingReporter},
    Orchestrator, RunContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Pretty output prints its own lines; keep tracing for warnings and debug
    let default_filter = match args.log_format {
        LogFormat::Structured => format!("runner_allowlist={},info", args.log_level),
        LogFormat::Pretty => "warn".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let reporter: Arc<dyn Reporter> = match args.log_format {
        LogFormat::Pretty => Arc::new(ConsoleReporter::new(std::io::stdout().is_terminal())),
        LogFormat::Structured => Arc::new(TracingReporter),
    };

    let config = match args.validate() {
        Ok(config) => config,
        Err(e) => {
            reporter.report(
                &Report::new(ReportKind::Error, Phase::Run, "Configuration error").error(&e),
            );
            std::process::exit(1);
        }
    };

    let credentials = match Credentials::resolve(
        args.access_token.as_deref(),
        args.credentials_json.as_deref(),
        args.credentials_file.as_deref(),
    ) {
        Ok(credentials) => credentials,
        Err(e) => {
            reporter.report(
                &Report::new(ReportKind::Error, Phase::Run, "Failed to load credentials").error(&e),
            );
            std::process::exit(1);
        }
    };
    let using = format!("Using {}", credentials.describe());
    let kind = match credentials {
        Credentials::Metadata => ReportKind::Warn,
        _ => ReportKind::Info,
    };
    reporter.report(&Report::new(kind, Phase::Run, &using));

    let runner_ip = match config.runner_ip {
        Some(ip) => ip,
        None => {
            reporter.report(&Report::new(ReportKind::Info, Phase::Run, "Fetching public IP..."));
            match fetch_public_ip(&reqwest::Client::new(), &args.ip_echo_url).await {
                Ok(ip) => ip,
                Err(e) => {
                    reporter.report(
                        &Report::new(ReportKind::Error, Phase::Run, "Failed to get public IP")
                            .error(&e),
                    );
                    std::process::exit(1);
                }
            }
        }
    };
    let detected = format!("Runner IP: {}", runner_ip);
    reporter.report(&Report::new(ReportKind::Info, Phase::Run, &detected));

    info!(
        project = %config.project,
        clusters = config.targets.len(),
        action = ?config.action,
        endpoint = %args.api_endpoint,
        "Configuration loaded"
    );

    let tokens = TokenProvider::new(credentials).with_metadata_host(args.metadata_host.clone());
    let client = GkeClient::new(args.api_endpoint.clone(), tokens);
    let context = RunContext {
        api: Arc::new(client),
        reporter,
        project: config.project.clone(),
        runner_cidr: runner_cidr(runner_ip),
        action: config.action,
        retry: config.retry.clone(),
        poll: config.poll.clone(),
    };

    let summary = Orchestrator::new(context, config.max_parallel)
        .run(&config.targets)
        .await;

    if !summary.all_succeeded() {
        for failed in summary.failed() {
            if let Some(e) = failed.error() {
                error!(cluster = %failed.target, phase = %e.phase(), error = %e, "Cluster failed");
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
