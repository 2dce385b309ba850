//! Google service-account authentication.
//!
//! A signed RS256 assertion is exchanged for a short-lived OAuth access token
//! (the JWT bearer grant). Tokens are cached until shortly before expiry.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use super::PublishError;
use crate::config::{ConfigError, SecretString};

/// OAuth scope granting read/write access to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; Google caps it at one hour.
const ASSERTION_TTL_SECS: i64 = 3600;

/// Refresh this long before the token actually expires.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Source of bearer tokens for the Sheets API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, PublishError>;
}

/// A fixed token (tests, or tokens minted out-of-band).
#[derive(Debug, Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token))
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, PublishError> {
        Ok(self.0.expose().to_string())
    }
}

/// The fields we need from a service-account JSON key.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Load a key from a file, or from the first file (by name) in a directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = resolve_key_file(path)?;
        let raw = fs::read_to_string(&file).map_err(|e| {
            ConfigError::Credentials(format!("failed to read {}: {e}", file.display()))
        })?;
        let key = Self::from_json(&raw)?;

        info!(key_file = %file.display(), client_email = %key.client_email, "Service account key loaded");
        Ok(key)
    }

    /// Parse a key from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw)
            .map_err(|e| ConfigError::Credentials(format!("invalid service account JSON: {e}")))
    }
}

fn resolve_key_file(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        return Err(ConfigError::Credentials(format!(
            "{} not found",
            path.display()
        )));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|e| ConfigError::Credentials(format!("failed to list {}: {e}", path.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    files.into_iter().next().ok_or_else(|| {
        ConfigError::Credentials(format!("no key files found in {}", path.display()))
    })
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Mints and caches access tokens for a service account.
pub struct ServiceAccountTokenSource {
    client_email: String,
    key_id: Option<String>,
    token_url: String,
    encoding_key: EncodingKey,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    /// Build a token source; fails if the private key is not valid RSA PEM.
    ///
    /// `token_url` overrides the key's own `token_uri`.
    pub fn new(
        key: ServiceAccountKey,
        token_url: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ConfigError::Credentials(format!("invalid private key: {e}")))?;

        Ok(Self {
            client_email: key.client_email,
            key_id: key.private_key_id,
            token_url: token_url.unwrap_or(key.token_uri),
            encoding_key,
            client,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self) -> Result<String, PublishError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_url,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| PublishError::Auth(format!("failed to sign assertion: {e}")))
    }

    async fn exchange(&self) -> Result<CachedToken, PublishError> {
        let assertion = self.assertion()?;
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Auth(format!(
                "token exchange failed (status={status}): {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PublishError::Auth(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(ASSERTION_TTL_SECS as u64));
        debug!(expires_in_secs = lifetime.as_secs(), "Access token minted");

        Ok(CachedToken {
            token: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_SLACK),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, PublishError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.token.clone());
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "svc@example.iam.gserviceaccount.com", "private_key": "pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert!(key.private_key_id.is_none());
    }

    #[test]
    fn test_key_rejects_garbage() {
        assert!(matches!(
            ServiceAccountKey::from_json("not json"),
            Err(ConfigError::Credentials(_))
        ));
    }

    #[test]
    fn test_load_picks_first_file_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"{"client_email": "second@example", "private_key": "pem"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"client_email": "first@example", "private_key": "pem"}"#,
        )
        .unwrap();

        let key = ServiceAccountKey::load(dir.path()).unwrap();
        assert_eq!(key.client_email, "first@example");
    }

    #[test]
    fn test_load_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServiceAccountKey::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no key files"));
    }

    #[test]
    fn test_load_missing_path_fails() {
        let err = ServiceAccountKey::load(Path::new("/nonexistent/rush/keys")).unwrap_err();
        assert!(matches!(err, ConfigError::Credentials(_)));
    }

    #[test]
    fn test_token_source_rejects_bad_pem() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "svc@example", "private_key": "not a pem"}"#,
        )
        .unwrap();
        let result = ServiceAccountTokenSource::new(key, None, reqwest::Client::new());
        assert!(matches!(result, Err(ConfigError::Credentials(_))));
    }
}
