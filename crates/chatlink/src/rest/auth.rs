//! Bearer token acquisition for the REST channel

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::duration_millis;
use crate::reliability::BackoffPolicy;

/// Scope requested by default
pub const DEFAULT_SCOPE: &str = "message/send profile/private profile/public graph/read";

/// Default authorization server base URL
pub const DEFAULT_AUTH_BASE_URL: &str = "https://auth.mxit.com";

/// Client-credentials pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// REST channel and authorization settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub scope: String,

    /// Attempts and spacing of the credential exchange
    pub retry: BackoffPolicy,

    pub auth_base_url: String,

    pub api_base_url: String,

    /// Per-request HTTP timeout
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            retry: BackoffPolicy::fixed(Duration::from_secs(5), 3),
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            api_base_url: super::transport::DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Decoded token endpoint response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("token response contained no access token")]
    EmptyToken,

    #[error("no credentials have been provided")]
    MissingCredentials,

    #[error("authentication failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Client-credentials grant against the authorization server
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn request_token(
        &self,
        credentials: &Credentials,
        scope: &str,
    ) -> Result<TokenResponse, AuthError>;
}

/// `reqwest`-backed exchange posting to `{auth_base_url}/token`
pub struct HttpCredentialExchange {
    client: Client,
    token_url: String,
}

impl HttpCredentialExchange {
    pub fn new(auth_base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, auth_base_url))
    }

    pub fn with_client(client: Client, auth_base_url: &str) -> Self {
        Self {
            client,
            token_url: format!("{}/token", auth_base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    async fn request_token(
        &self,
        credentials: &Credentials,
        scope: &str,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug, Default)]
struct TokenState {
    value: Option<String>,
    /// Bumped on every successful exchange
    generation: u64,
}

struct AuthenticatingGuard<'a>(&'a AtomicBool);

impl Drop for AuthenticatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Holder of the current bearer token
///
/// Only one credential exchange runs at a time. Callers reacting to an
/// expired token pass the generation they sent with; if another caller
/// refreshed the token while they waited for the lock, no second exchange
/// is issued.
pub struct TokenAuthenticator {
    exchange: Arc<dyn CredentialExchange>,
    scope: String,
    retry: BackoffPolicy,
    credentials: RwLock<Option<Credentials>>,
    token: RwLock<TokenState>,
    auth_lock: tokio::sync::Mutex<()>,
    authenticating: AtomicBool,
}

impl TokenAuthenticator {
    pub fn new(exchange: Arc<dyn CredentialExchange>, config: &AuthConfig) -> Self {
        Self {
            exchange,
            scope: config.scope.clone(),
            retry: config.retry.clone(),
            credentials: RwLock::new(None),
            token: RwLock::new(TokenState::default()),
            auth_lock: tokio::sync::Mutex::new(()),
            authenticating: AtomicBool::new(false),
        }
    }

    /// Exchange `credentials` for a token, retrying per the configured policy
    ///
    /// The credentials are kept for later re-authentication.
    #[instrument(skip(self, credentials), fields(client_id = %credentials.client_id))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<(), AuthError> {
        *self.credentials.write() = Some(credentials.clone());
        let _lock = self.auth_lock.lock().await;
        self.exchange_locked(credentials).await
    }

    /// Refresh the token after the remote side rejected generation `observed`
    ///
    /// Skips the exchange when the token was already replaced since then.
    pub async fn reauthenticate(&self, observed: u64) -> Result<(), AuthError> {
        let _lock = self.auth_lock.lock().await;

        {
            let token = self.token.read();
            if token.generation != observed && token.value.is_some() {
                debug!(
                    observed,
                    current = token.generation,
                    "Token already refreshed by another caller"
                );
                return Ok(());
            }
        }

        let credentials = self
            .credentials
            .read()
            .clone()
            .ok_or(AuthError::MissingCredentials)?;
        self.exchange_locked(&credentials).await
    }

    /// Current token, if any
    pub fn current_token(&self) -> Option<String> {
        self.token.read().value.clone()
    }

    /// Current token together with its generation
    pub fn token_snapshot(&self) -> (Option<String>, u64) {
        let token = self.token.read();
        (token.value.clone(), token.generation)
    }

    pub fn generation(&self) -> u64 {
        self.token.read().generation
    }

    pub fn is_access_token_available(&self) -> bool {
        self.token.read().value.is_some()
    }

    pub fn is_authenticating(&self) -> bool {
        self.authenticating.load(Ordering::Acquire)
    }

    /// Caller must hold `auth_lock`
    async fn exchange_locked(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.authenticating.store(true, Ordering::Release);
        let _guard = AuthenticatingGuard(&self.authenticating);

        self.token.write().value = None;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.retry.wait(attempt).await;

            match self.exchange.request_token(credentials, &self.scope).await {
                Ok(response) if !response.access_token.is_empty() => {
                    let generation = {
                        let mut token = self.token.write();
                        token.value = Some(response.access_token);
                        token.generation += 1;
                        token.generation
                    };
                    info!(attempt, generation, "Access token acquired");
                    return Ok(());
                }
                Ok(_) => {
                    warn!(attempt, error = %AuthError::EmptyToken, "Token exchange failed");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Token exchange failed");
                }
            }

            if !self.retry.has_attempts_remaining(attempt) {
                error!(attempts = attempt, "Authentication exhausted retries");
                return Err(AuthError::Exhausted { attempts: attempt });
            }
        }
    }
}
