//! GitHub App installation credentials.
//!
//! [`TokenIssuer`] signs a short-lived app assertion (JWT), exchanges it for an
//! installation access token and caches that token until it expires. Callers
//! that get an authorization failure ask for a forced refresh.

use crate::config::AppConfig;
use crate::error::{DashboardError, Result};
use crate::transport::GitHubTransport;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Backdating applied to `iat` to tolerate clock drift between us and GitHub.
const ASSERTION_BACKDATE_SECS: i64 = 60;
/// GitHub rejects app assertions valid for more than ten minutes.
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// A short-lived bearer credential scoped to one App installation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationToken {
    #[serde(rename = "token")]
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl InstallationToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Claims of the app assertion exchanged for an installation token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    pub fn new(app_id: &str, now: DateTime<Utc>) -> Self {
        let now = now.timestamp();
        Self {
            iat: now - ASSERTION_BACKDATE_SECS,
            exp: now + ASSERTION_LIFETIME_SECS,
            iss: app_id.to_string(),
        }
    }
}

/// Identity and signing key of the GitHub App.
#[derive(Clone)]
pub struct AppCredentials {
    app_id: String,
    installation_id: String,
    key: EncodingKey,
    algorithm: Algorithm,
}

impl AppCredentials {
    pub fn new(
        app_id: impl Into<String>,
        installation_id: impl Into<String>,
        key: EncodingKey,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            installation_id: installation_id.into(),
            key,
            algorithm,
        }
    }

    /// Builds RS256 credentials from the environment, naming the first missing setting.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let app_id = require(&config.github_app_id, "GITHUB_APP_ID")?;
        let installation_id = require(&config.github_installation_id, "GITHUB_INSTALLATION_ID")?;
        let pem = config
            .private_key_pem()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                DashboardError::Configuration("GITHUB_PRIVATE_KEY env var not set".to_string())
            })?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            DashboardError::Configuration(format!("GITHUB_PRIVATE_KEY is not a valid RSA key: {e}"))
        })?;

        Ok(Self::new(app_id, installation_id, key, Algorithm::RS256))
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    /// Signs a fresh assertion valid from one minute ago for ten minutes.
    pub fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AppClaims::new(&self.app_id, now);
        Ok(jsonwebtoken::encode(
            &Header::new(self.algorithm),
            &claims,
            &self.key,
        )?)
    }
}

fn require(value: &Option<String>, name: &str) -> Result<String> {
    value
        .as_ref()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DashboardError::Configuration(format!("{name} env var not set")))
}

/// Process-wide slot holding the last issued installation token.
#[derive(Debug, Default)]
pub struct TokenCache {
    token: Option<InstallationToken>,
}

impl TokenCache {
    pub fn get(&self, now: DateTime<Utc>) -> Option<&InstallationToken> {
        self.token.as_ref().filter(|token| !Self::is_stale(token, now))
    }

    pub fn set(&mut self, token: InstallationToken) {
        self.token = Some(token);
    }

    pub fn is_stale(token: &InstallationToken, now: DateTime<Utc>) -> bool {
        !token.is_valid_at(now)
    }
}

enum CredentialSource {
    Ready(AppCredentials),
    Unavailable(String),
}

/// Mints and caches installation tokens.
///
/// The cache lock is held across the exchange so concurrent callers that all
/// find a stale token wait for one refresh instead of racing.
pub struct TokenIssuer {
    credentials: CredentialSource,
    transport: Arc<dyn GitHubTransport>,
    cache: Mutex<TokenCache>,
}

impl TokenIssuer {
    pub fn new(credentials: AppCredentials, transport: Arc<dyn GitHubTransport>) -> Self {
        Self {
            credentials: CredentialSource::Ready(credentials),
            transport,
            cache: Mutex::new(TokenCache::default()),
        }
    }

    /// An issuer whose every call fails with the given configuration error.
    pub fn unavailable(reason: impl Into<String>, transport: Arc<dyn GitHubTransport>) -> Self {
        Self {
            credentials: CredentialSource::Unavailable(reason.into()),
            transport,
            cache: Mutex::new(TokenCache::default()),
        }
    }

    pub fn from_config(config: &AppConfig, transport: Arc<dyn GitHubTransport>) -> Self {
        match AppCredentials::from_config(config) {
            Ok(credentials) => Self::new(credentials, transport),
            Err(e) => {
                tracing::warn!("GitHub App credentials unavailable: {}", e);
                Self::unavailable(e.to_string(), transport)
            }
        }
    }

    pub async fn token(&self, force_refresh: bool) -> Result<InstallationToken> {
        self.token_at(force_refresh, Utc::now()).await
    }

    /// Returns a token valid at `now`, exchanging a new one if the cache is
    /// empty, stale, or `force_refresh` is set.
    pub async fn token_at(
        &self,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<InstallationToken> {
        let credentials = match &self.credentials {
            CredentialSource::Ready(credentials) => credentials,
            CredentialSource::Unavailable(reason) => {
                return Err(DashboardError::Configuration(reason.clone()))
            }
        };

        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some(token) = cache.get(now) {
                return Ok(token.clone());
            }
        }

        let token = self.exchange(credentials, now).await?;
        cache.set(token.clone());
        Ok(token)
    }

    async fn exchange(
        &self,
        credentials: &AppCredentials,
        now: DateTime<Utc>,
    ) -> Result<InstallationToken> {
        let assertion = credentials.sign_assertion(now)?;
        let response = self
            .transport
            .create_installation_token(credentials.installation_id(), &assertion)
            .await?;

        if !response.is_success() {
            tracing::error!(
                status = response.status,
                "GitHub rejected installation token exchange"
            );
            return Err(DashboardError::CredentialExchange {
                status: response.status,
                body: response.body,
            });
        }

        let token: InstallationToken = serde_json::from_str(&response.body).map_err(|e| {
            DashboardError::CredentialExchange {
                status: response.status,
                body: format!("unreadable token response: {e}"),
            }
        })?;

        if !token.is_valid_at(now) {
            tracing::error!(
                expires_at = %token.expires_at,
                "Issued installation token is already expired"
            );
            return Err(DashboardError::ExpiredToken(token.expires_at));
        }

        tracing::info!(expires_at = %token.expires_at, "Issued new installation token");
        Ok(token)
    }
}
