//! Connection configuration.
//!
//! The endpoint and TLS policy are chosen once at startup from the deployment
//! context: the internal network path uses `DATABASE_URL` without TLS, the
//! public path uses `DATABASE_PUBLIC_URL` with encrypted but unverified TLS.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::config::constants::*;
use crate::error_handling::DbError;

/// Which network path the process reaches the database through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentContext {
    /// Private network inside the hosting platform.
    Internal,
    /// Public internet endpoint.
    Public,
}

impl DeploymentContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentContext::Internal => "internal",
            DeploymentContext::Public => "public",
        }
    }

    /// Environment tag reported by health checks.
    pub fn environment(&self) -> &'static str {
        match self {
            DeploymentContext::Internal => "railway",
            DeploymentContext::Public => "development",
        }
    }

    /// TLS policy bound to this network path.
    pub fn tls_mode(&self) -> TlsMode {
        match self {
            DeploymentContext::Internal => TlsMode::Disabled,
            DeploymentContext::Public => TlsMode::EncryptedUnverified,
        }
    }
}

impl fmt::Display for DeploymentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS policy applied to every physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    /// Traffic is encrypted, the server certificate is not verified.
    EncryptedUnverified,
}

/// Everything needed to build a pool. Fixed for the lifetime of the process;
/// pool resets rebuild from the same value.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub context: DeploymentContext,
    pub url: String,
    pub tls: TlsMode,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    pub application_name: String,
}

// The URL carries credentials, keep it out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("context", &self.context)
            .field("url", &"<redacted>")
            .field("tls", &self.tls)
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl ConnectionConfig {
    /// Builds a config for `url` with default pool settings.
    pub fn new(context: DeploymentContext, url: impl Into<String>) -> Self {
        ConnectionConfig {
            context,
            url: url.into(),
            tls: context.tls_mode(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            statement_timeout: Duration::from_millis(DEFAULT_STATEMENT_TIMEOUT_MS),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }

    /// Reads the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when the endpoint for the detected
    /// deployment context is missing or a numeric setting cannot be parsed.
    pub fn from_env() -> Result<Self, DbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the config through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let context = if lookup(ENV_DEPLOYMENT_FLAG).is_some() {
            DeploymentContext::Internal
        } else {
            DeploymentContext::Public
        };
        let url_var = match context {
            DeploymentContext::Internal => ENV_INTERNAL_URL,
            DeploymentContext::Public => ENV_PUBLIC_URL,
        };

        let url = lookup(url_var)
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "no database URL configured for the {} network path (set {} or {})",
                    context, ENV_INTERNAL_URL, ENV_PUBLIC_URL
                ))
            })?;

        let mut config = ConnectionConfig::new(context, url);
        config.max_connections =
            parse_var(&lookup, ENV_POOL_MAX, DEFAULT_MAX_CONNECTIONS)?;
        if config.max_connections == 0 {
            return Err(DbError::configuration(format!(
                "{} must be at least 1",
                ENV_POOL_MAX
            )));
        }
        config.idle_timeout = Duration::from_millis(parse_var(
            &lookup,
            ENV_IDLE_TIMEOUT_MS,
            DEFAULT_IDLE_TIMEOUT_MS,
        )?);
        config.connect_timeout = Duration::from_millis(parse_var(
            &lookup,
            ENV_CONNECT_TIMEOUT_MS,
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?);
        config.statement_timeout = Duration::from_millis(parse_var(
            &lookup,
            ENV_STATEMENT_TIMEOUT_MS,
            DEFAULT_STATEMENT_TIMEOUT_MS,
        )?);
        if let Some(name) = lookup(ENV_APPLICATION_NAME).filter(|n| !n.trim().is_empty()) {
            config.application_name = name.trim().to_string();
        }

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, DbError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            DbError::configuration(format!("{} has an invalid value: {:?}", key, raw))
        }),
    }
}
