//! Configuration
//!
//! CLI arguments and environment variables handled with clap. The `INPUT_*`
//! names match what a CI action passes through.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::cidr::Action;
use crate::error::ConfigError;
use crate::gke::auth::DEFAULT_METADATA_HOST;
use crate::gke::client::DEFAULT_ENDPOINT;
use crate::operation::PollConfig;
use crate::orchestrator::DEFAULT_MAX_PARALLEL;
use crate::public_ip::DEFAULT_IP_ECHO_URL;
use crate::update::RetryPolicy;

/// How reports are presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colorized, cluster-prefixed console lines
    Pretty,
    /// Structured tracing events
    Structured,
}

/// Add or remove this runner's address on GKE master authorized networks
#[derive(Parser, Debug, Clone)]
#[command(name = "runner-allowlist")]
#[command(about = "Allow (or clean up) the runner IP on GKE master authorized networks")]
pub struct Args {
    /// Clusters to update, one `region/cluster-name` per line
    #[arg(long, env = "INPUT_CLUSTERS", default_value = "")]
    pub clusters: String,

    /// GCP project that owns the clusters
    #[arg(long, env = "INPUT_PROJECT_ID", default_value = "")]
    pub project_id: String,

    /// `allow` adds the runner IP, `cleanup` removes it
    #[arg(long, env = "INPUT_ACTION", value_enum, default_value = "allow")]
    pub action: Action,

    /// Inline credentials JSON (service account or authorized user)
    #[arg(long, env = "INPUT_CREDENTIALS_JSON", hide_env_values = true)]
    pub credentials_json: Option<String>,

    /// Path to a credentials JSON file
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials_file: Option<PathBuf>,

    /// Pre-minted OAuth2 access token
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Metadata server used when no credentials are given
    #[arg(long, env = "GCE_METADATA_HOST", default_value = DEFAULT_METADATA_HOST)]
    pub metadata_host: String,

    /// Runner IPv4 address (discovered when unset)
    #[arg(long, env = "RUNNER_IP")]
    pub runner_ip: Option<String>,

    /// Service answering with the caller's public IP
    #[arg(long, env = "IP_ECHO_URL", default_value = DEFAULT_IP_ECHO_URL)]
    pub ip_echo_url: String,

    /// Container API root
    #[arg(long, env = "CONTAINER_API_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub api_endpoint: String,

    /// Clusters processed at the same time
    #[arg(long, env = "MAX_PARALLEL", default_value_t = DEFAULT_MAX_PARALLEL)]
    pub max_parallel: usize,

    /// Give up waiting on an operation after this many seconds (unbounded when unset)
    #[arg(long, env = "POLL_TIMEOUT_SECS")]
    pub poll_timeout_secs: Option<u64>,

    /// Output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate and convert into a [`RunConfig`]
    pub fn validate(&self) -> Result<RunConfig, ConfigError> {
        let targets = parse_targets(&self.clusters)?;

        let project = self.project_id.trim();
        if project.is_empty() {
            return Err(ConfigError::MissingProject);
        }

        if self.max_parallel == 0 {
            return Err(ConfigError::ZeroParallelism);
        }

        let runner_ip = self
            .runner_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(parse_runner_ip)
            .transpose()?;

        Ok(RunConfig {
            targets,
            project: project.to_string(),
            action: self.action,
            runner_ip,
            max_parallel: self.max_parallel,
            retry: RetryPolicy::default(),
            poll: PollConfig {
                timeout: self.poll_timeout_secs.map(Duration::from_secs),
                ..PollConfig::default()
            },
        })
    }
}

/// Validated run parameters
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub targets: Vec<ClusterTarget>,
    pub project: String,
    pub action: Action,
    /// `None` means discover it
    pub runner_ip: Option<Ipv4Addr>,
    pub max_parallel: usize,
    pub retry: RetryPolicy,
    pub poll: PollConfig,
}

/// One control plane to update
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterTarget {
    pub region: String,
    pub name: String,
}

impl ClusterTarget {
    pub fn new(region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.name)
    }
}

impl std::str::FromStr for ClusterTarget {
    type Err = ConfigError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let parts: Vec<&str> = line.split('/').map(str::trim).collect();
        match parts.as_slice() {
            [region, name] if !region.is_empty() && !name.is_empty() => {
                Ok(ClusterTarget::new(*region, *name))
            }
            _ => Err(ConfigError::InvalidClusterEntry(line.to_string())),
        }
    }
}

/// Parse the newline separated cluster list. Blank lines are ignored.
pub fn parse_targets(raw: &str) -> Result<Vec<ClusterTarget>, ConfigError> {
    let targets = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<ClusterTarget>, _>>()?;

    if targets.is_empty() {
        return Err(ConfigError::MissingClusters);
    }
    Ok(targets)
}

fn parse_runner_ip(raw: &str) -> Result<Ipv4Addr, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidRunnerIp(raw.to_string()))
}
