//! Runner address discovery

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::info;

pub const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org";

/// Discovery errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublicIpError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("IP echo service returned HTTP {0}")]
    Status(u16),

    #[error("IP echo service returned {0:?}, expected an IPv4 address")]
    NotIpv4(String),
}

/// Ask an echo service for the caller's public IPv4 address
pub async fn fetch_public_ip(http: &reqwest::Client, url: &str) -> Result<Ipv4Addr, PublicIpError> {
    info!("Fetching public IP from {}", url);

    let response = http
        .get(url)
        .timeout(Duration::from_secs(15))
        .send()
        .await
        .map_err(|e| PublicIpError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(PublicIpError::Status(response.status().as_u16()));
    }

    let body = response
        .text()
        .await
        .map_err(|e| PublicIpError::Network(e.to_string()))?;
    parse_echo(&body)
}

fn parse_echo(body: &str) -> Result<Ipv4Addr, PublicIpError> {
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| PublicIpError::NotIpv4(trimmed.to_string()))
}
