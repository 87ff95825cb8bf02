//! OAuth2 access tokens for the container API
//!
//! Credential sources, in order of precedence:
//! 1. A pre-minted access token
//! 2. Inline credential JSON (`INPUT_CREDENTIALS_JSON`)
//! 3. A credential file (`GOOGLE_APPLICATION_CREDENTIALS`)
//! 4. The GCE metadata server (ambient default credentials)
//!
//! Credential JSON may be a `service_account` key, exchanged through a signed
//! JWT assertion, or an `authorized_user` refresh token as written by
//! `gcloud auth application-default login`.

use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Credential errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Failed to read credentials file {path}: {reason}")]
    ReadFile { path: String, reason: String },

    #[error("Invalid credentials JSON: {0}")]
    InvalidJson(String),

    #[error("Unsupported credentials type: {0}")]
    UnsupportedType(String),

    #[error("Failed to sign assertion: {0}")]
    Signing(String),

    #[error("Token request failed: {0}")]
    TokenRequest(String),
}

/// `service_account` key file
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// `authorized_user` file
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Where tokens come from
#[derive(Debug, Clone)]
pub enum Credentials {
    Static(String),
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    Metadata,
}

impl Credentials {
    /// Parse a credential JSON document
    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| AuthError::InvalidJson(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "service_account" => serde_json::from_value(value)
                .map(Credentials::ServiceAccount)
                .map_err(|e| AuthError::InvalidJson(e.to_string())),
            "authorized_user" => serde_json::from_value(value)
                .map(Credentials::AuthorizedUser)
                .map_err(|e| AuthError::InvalidJson(e.to_string())),
            _ => Err(AuthError::UnsupportedType(kind)),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AuthError::ReadFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw)
    }

    /// Pick a credential source by precedence
    pub fn resolve(
        access_token: Option<&str>,
        inline_json: Option<&str>,
        file: Option<&Path>,
    ) -> Result<Self, AuthError> {
        if let Some(token) = access_token.filter(|t| !t.trim().is_empty()) {
            info!("Using provided access token");
            return Ok(Credentials::Static(token.trim().to_string()));
        }
        if let Some(raw) = inline_json.filter(|j| !j.trim().is_empty()) {
            info!("Using inline credentials");
            return Self::from_json(raw);
        }
        if let Some(path) = file {
            info!("Using credentials file at {}", path.display());
            return Self::from_file(path);
        }
        info!("No credentials provided, using metadata server");
        Ok(Credentials::Metadata)
    }

    pub fn describe(&self) -> String {
        match self {
            Credentials::Static(_) => "access token".to_string(),
            Credentials::ServiceAccount(key) => format!("service account {}", key.client_email),
            Credentials::AuthorizedUser(_) => "authorized user".to_string(),
            Credentials::Metadata => "metadata server".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Hands out bearer tokens, refreshing them shortly before expiry
pub struct TokenProvider {
    credentials: Credentials,
    metadata_host: String,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            metadata_host: DEFAULT_METADATA_HOST.to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Metadata server `host[:port]` used for ambient credentials
    pub fn with_metadata_host(mut self, host: impl Into<String>) -> Self {
        self.metadata_host = host.into();
        self
    }

    /// A valid access token, fetching a new one when needed
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(cached.token.clone());
            }
        }

        let response = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(key) => exchange_assertion(http, key).await?,
            Credentials::AuthorizedUser(user) => refresh_user_token(http, user).await?,
            Credentials::Metadata => metadata_token(http, &self.metadata_host).await?,
        };

        debug!(expires_in = response.expires_in, "Fetched access token");
        let token = response.access_token.clone();
        *cache = Some(CachedToken {
            token: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(token)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Signed JWT assertion for a service account key
fn sign_assertion(key: &ServiceAccountKey, now: u64) -> Result<String, AuthError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| AuthError::Signing(e.to_string()))?;
    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| AuthError::Signing(e.to_string()))
}

async fn exchange_assertion(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<TokenResponse, AuthError> {
    let assertion = sign_assertion(key, unix_now())?;
    post_form(
        http,
        &key.token_uri,
        &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
    )
    .await
}

async fn refresh_user_token(
    http: &reqwest::Client,
    user: &AuthorizedUser,
) -> Result<TokenResponse, AuthError> {
    post_form(
        http,
        &user.token_uri,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
            ("refresh_token", user.refresh_token.as_str()),
        ],
    )
    .await
}

async fn post_form(
    http: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let body =
        serde_urlencoded::to_string(form).map_err(|e| AuthError::TokenRequest(e.to_string()))?;

    let response = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

    read_token(response).await
}

async fn metadata_token(http: &reqwest::Client, host: &str) -> Result<TokenResponse, AuthError> {
    let response = http
        .get(format!("http://{}{}", host, METADATA_TOKEN_PATH))
        .header("Metadata-Flavor", "Google")
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| AuthError::TokenRequest(format!("metadata server: {}", e)))?;

    read_token(response).await
}

async fn read_token(response: reqwest::Response) -> Result<TokenResponse, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::TokenRequest(format!("HTTP {}: {}", status, body.trim())));
    }
    response
        .json()
        .await
        .map_err(|e| AuthError::TokenRequest(e.to_string()))
}
