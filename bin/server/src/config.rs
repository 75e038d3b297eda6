//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server, loaded
//! via the `config` crate from an optional TOML file (path in `VOUCH_CONFIG`)
//! overlaid by `VOUCH_`-prefixed environment variables, with `__` separating
//! nested keys (e.g. `VOUCH_CORRELATION__BACKEND=nats`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vouch_access::{
    CatalogError, ExternalIdentityProvider, PolicySet, ProviderCatalog, ServiceAccessPolicy,
};
use vouch_correlation::NatsStoreConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "VOUCH_CONFIG";

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Externally visible base URL of this server.
    pub public_url: String,

    /// PostgreSQL database connection URL. Sessions are kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Correlation ticket storage.
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Delegation behaviour.
    #[serde(default)]
    pub delegation: DelegationConfig,

    /// External identity providers.
    #[serde(default)]
    pub providers: Vec<ExternalIdentityProvider>,

    /// Registered services and their access policies.
    #[serde(default)]
    pub services: Vec<ServiceAccessPolicy>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session duration in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_session_duration_minutes() -> i64 {
    480
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl SessionConfig {
    /// Returns the interval between session cleanup runs.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

/// Where correlation tickets are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationBackend {
    /// In-process map; only valid for a single server instance.
    #[default]
    Memory,
    /// NATS JetStream key-value bucket shared by every instance.
    Nats,
}

/// Correlation ticket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default)]
    pub backend: CorrelationBackend,

    /// Ticket lifetime in seconds.
    #[serde(default = "default_ticket_ttl_seconds")]
    pub ttl_seconds: u64,

    /// NATS server URL (required for the nats backend).
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Key-value bucket name.
    #[serde(default)]
    pub bucket: Option<String>,
}

fn default_ticket_ttl_seconds() -> u64 {
    300
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            backend: CorrelationBackend::default(),
            ttl_seconds: default_ticket_ttl_seconds(),
            nats_url: None,
            bucket: None,
        }
    }
}

impl CorrelationConfig {
    /// Returns the ticket lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Returns the NATS store configuration, if a NATS URL is set.
    #[must_use]
    pub fn nats(&self) -> Option<NatsStoreConfig> {
        let url = self.nats_url.as_deref()?;
        let mut config = NatsStoreConfig::new(url).with_ttl(self.ttl());
        if let Some(bucket) = self.bucket.as_deref() {
            config = config.with_bucket(bucket);
        }
        Some(config)
    }
}

/// Delegation behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DelegationConfig {
    /// Bound on the callback credential exchange, in milliseconds.
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,

    /// Where providers send the browser after a front-channel logout.
    #[serde(default)]
    pub post_logout_redirect: Option<String>,

    /// Whether to remember the chosen provider in a cookie.
    #[serde(default = "default_remember_provider")]
    pub remember_provider: bool,
}

fn default_exchange_timeout_ms() -> u64 {
    10_000
}

fn default_remember_provider() -> bool {
    true
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: default_exchange_timeout_ms(),
            post_logout_redirect: None,
            remember_provider: default_remember_provider(),
        }
    }
}

impl DelegationConfig {
    /// Returns the exchange timeout.
    #[must_use]
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

impl ServerConfig {
    /// Loads configuration from the file named by `VOUCH_CONFIG` (if set)
    /// and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from `path` (if given) and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the result is invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("VOUCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Rejects values that deserialize but cannot drive the server.
    fn validated(self) -> Result<Self, config::ConfigError> {
        if self.session.cleanup_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "session.cleanup_interval_seconds must be positive".to_string(),
            ));
        }
        if self.correlation.ttl_seconds == 0 {
            return Err(config::ConfigError::Message(
                "correlation.ttl_seconds must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    /// Builds the provider catalog.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate or invalid providers.
    pub fn catalog(&self) -> Result<ProviderCatalog, CatalogError> {
        ProviderCatalog::new(self.providers.clone())
    }

    /// Compiles the service policies.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid service patterns.
    pub fn policies(&self) -> Result<PolicySet, CatalogError> {
        PolicySet::new(self.services.clone())
    }
}
