// Messaging configuration
// Decision: Every value has a built-in default; missing worker counts are logged
// Decision: Environment lookup is injectable so parsing is testable without touching the process env

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connection::{ChannelCredentials, ConnectionConfig, ReconnectSendPolicy};
use crate::reliability::BackoffPolicy;
use crate::rest::{AuthConfig, Credentials};
use crate::worker::{WorkerPoolConfig, WorkerPoolError};

/// Worker count used when none is configured
pub const DEFAULT_WORKER_COUNT: usize = 20;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Parse { key: String, value: String },

    #[error(transparent)]
    Pool(#[from] WorkerPoolError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// All settings of a [`MessagingContext`](crate::MessagingContext)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Persistent-channel sends
    pub outbound_pool: WorkerPoolConfig,
    /// REST sends
    pub rest_pool: WorkerPoolConfig,
    /// Inbound message handling
    pub inbound_pool: WorkerPoolConfig,
    pub connection: ConnectionConfig,
    pub auth: AuthConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            outbound_pool: default_pool("outbound"),
            rest_pool: default_pool("rest"),
            inbound_pool: default_pool("inbound"),
            connection: ConnectionConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

fn default_pool(name: &str) -> WorkerPoolConfig {
    WorkerPoolConfig::new(name).with_workers(DEFAULT_WORKER_COUNT, DEFAULT_WORKER_COUNT)
}

impl MessagingConfig {
    /// Create configuration from environment variables
    ///
    /// Loads `.env` first if present. Environment variables:
    /// - `CHATLINK_{OUTBOUND,REST,INBOUND}_MIN_WORKERS` / `_MAX_WORKERS` (default: 20)
    /// - `CHATLINK_HEARTBEAT_INTERVAL_SECS` (default: 90)
    /// - `CHATLINK_RECONNECT_BACKOFF_SECS` (default: 60)
    /// - `CHATLINK_SEND_POLICY`: `attempt` or `fail_fast` (default: attempt)
    /// - `CHATLINK_AUTH_RETRIES` (default: 3), `CHATLINK_AUTH_BACKOFF_SECS` (default: 5)
    /// - `CHATLINK_AUTH_SCOPE`, `CHATLINK_AUTH_BASE_URL`, `CHATLINK_API_BASE_URL`
    /// - `CHATLINK_REQUEST_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();

        let outbound_pool = env.pool("OUTBOUND", "outbound")?;
        let rest_pool = env.pool("REST", "rest")?;
        let inbound_pool = env.pool("INBOUND", "inbound")?;

        let send_policy = match env.get("CHATLINK_SEND_POLICY").as_deref() {
            None => defaults.connection.send_policy,
            Some("attempt") => ReconnectSendPolicy::Attempt,
            Some("fail_fast") => ReconnectSendPolicy::FailFast,
            Some(other) => {
                return Err(ConfigError::Parse {
                    key: "CHATLINK_SEND_POLICY".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let connection = ConnectionConfig {
            heartbeat_interval: env
                .secs("CHATLINK_HEARTBEAT_INTERVAL_SECS")?
                .unwrap_or(defaults.connection.heartbeat_interval),
            reconnect_backoff: match env.secs("CHATLINK_RECONNECT_BACKOFF_SECS")? {
                Some(interval) => BackoffPolicy::unbounded(interval),
                None => defaults.connection.reconnect_backoff,
            },
            send_policy,
        };

        let auth_retries: u32 = env.parse("CHATLINK_AUTH_RETRIES")?.unwrap_or(3);
        let auth_backoff = env
            .secs("CHATLINK_AUTH_BACKOFF_SECS")?
            .unwrap_or(defaults.auth.retry.interval);

        let auth = AuthConfig {
            scope: env.get("CHATLINK_AUTH_SCOPE").unwrap_or(defaults.auth.scope),
            retry: BackoffPolicy::fixed(auth_backoff, auth_retries),
            auth_base_url: env
                .get("CHATLINK_AUTH_BASE_URL")
                .unwrap_or(defaults.auth.auth_base_url),
            api_base_url: env
                .get("CHATLINK_API_BASE_URL")
                .unwrap_or(defaults.auth.api_base_url),
            request_timeout: env
                .secs("CHATLINK_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.auth.request_timeout),
        };

        let config = Self {
            outbound_pool,
            rest_pool,
            inbound_pool,
            connection,
            auth,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.outbound_pool.validate()?;
        self.rest_pool.validate()?;
        self.inbound_pool.validate()?;

        if self.connection.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.auth.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        for (name, url) in [
            ("auth_base_url", &self.auth.auth_base_url),
            ("api_base_url", &self.auth.api_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Persistent-channel credentials from `CHATLINK_APP_ID` / `CHATLINK_APP_SECRET`
pub fn channel_credentials_from_env() -> Option<ChannelCredentials> {
    let app_id = std::env::var("CHATLINK_APP_ID").ok()?;
    let secret = std::env::var("CHATLINK_APP_SECRET").ok()?;
    Some(ChannelCredentials::new(app_id, secret))
}

/// REST credentials from `CHATLINK_CLIENT_ID` / `CHATLINK_CLIENT_SECRET`
pub fn rest_credentials_from_env() -> Option<Credentials> {
    let client_id = std::env::var("CHATLINK_CLIENT_ID").ok()?;
    let client_secret = std::env::var("CHATLINK_CLIENT_SECRET").ok()?;
    Some(Credentials::new(client_id, client_secret))
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Parse {
                    key: key.to_string(),
                    value,
                }),
        }
    }

    fn secs(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }

    /// Worker count with a logged fallback to the default
    fn worker_count(&self, key: &str) -> Result<usize, ConfigError> {
        match self.parse(key)? {
            Some(count) => Ok(count),
            None => {
                warn!(
                    key,
                    default = DEFAULT_WORKER_COUNT,
                    "Worker count not configured, using default"
                );
                Ok(DEFAULT_WORKER_COUNT)
            }
        }
    }

    fn pool(&self, prefix: &str, name: &str) -> Result<WorkerPoolConfig, ConfigError> {
        let min = self.worker_count(&format!("CHATLINK_{prefix}_MIN_WORKERS"))?;
        let max = self.worker_count(&format!("CHATLINK_{prefix}_MAX_WORKERS"))?;
        Ok(WorkerPoolConfig::new(name).with_workers(min, max))
    }
}
