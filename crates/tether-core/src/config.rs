//! Layered configuration.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and builder defaults
//! 2. **Config file**: TOML file named by the `TETHER_CONFIG` env var (default
//!    `config/tether.toml`, optional)
//! 3. **Environment variables**: `TETHER__SECTION__FIELD` overrides a single field
//!
//! # Configuration Sections
//!
//! - [`RetryConfig`]: rate-limit retry policy of the payload sender
//! - [`SubscriptionConfig`]: heartbeat and backfill retry policy
//! - [`HttpConfig`]: HTTP client concurrency and timeouts
//! - [`ConnectionConfig`]: persistent connection reconnect policy
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [retry]
//! max_retries = 5
//! retry_interval_ms = 500
//!
//! [subscriptions]
//! heartbeat_interval_secs = 15
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Rate-limit retry policy of the payload sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` disables retrying. Defaults to `3`.
    pub max_retries: u32,

    /// Base delay between rate-limited attempts. Defaults to `1000`.
    pub retry_interval_ms: u64,

    /// Upper bound of the random delay added to every retry. Defaults to `250`.
    pub retry_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, retry_interval_ms: 1000, retry_jitter_ms: 250 }
    }
}

/// Heartbeat and backfill policy of the subscription provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    /// Total backfill attempts per reconnect, including the first.
    pub backfill_attempts: u32,
    pub backfill_initial_backoff_ms: u64,
    pub backfill_max_backoff_ms: u64,
    /// Deadline of a single backfill attempt.
    pub backfill_timeout_secs: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 10,
            backfill_attempts: 5,
            backfill_initial_backoff_ms: 1000,
            backfill_max_backoff_ms: 30_000,
            backfill_timeout_secs: 10,
        }
    }
}

impl SubscriptionConfig {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    #[must_use]
    pub fn backfill_timeout(&self) -> Duration {
        Duration::from_secs(self.backfill_timeout_secs)
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum number of requests in flight at once. Defaults to `100`.
    pub concurrent_limit: usize,

    /// Per-request timeout. Defaults to `30`.
    pub request_timeout_secs: u64,

    /// TCP connect timeout. Defaults to `5`.
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { concurrent_limit: 100, request_timeout_secs: 30, connect_timeout_secs: 5 }
    }
}

/// Reconnect policy of the persistent connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,

    /// Consecutive failed reconnects after which the connection gives up. Defaults to `10`.
    pub max_consecutive_failures: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay_ms: 500,
            max_reconnect_delay_ms: 30_000,
            max_consecutive_failures: 10,
        }
    }
}

/// Logging configuration, consumed by binaries when installing a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub retry: RetryConfig,
    pub subscriptions: SubscriptionConfig,
    pub http: HttpConfig,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

impl TetherConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error. Environment variables with the `TETHER__` prefix
    /// override any value, using `__` as the nesting separator
    /// (e.g., `TETHER__RETRY__MAX_RETRIES=5`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or a value has the wrong type.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("TETHER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/tether.toml`, or the file named by `TETHER_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "config/tether.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.subscriptions.heartbeat_interval_secs == 0 {
            return Err("Heartbeat interval must be greater than 0".to_string());
        }

        if self.subscriptions.heartbeat_timeout_secs == 0 {
            return Err("Heartbeat timeout must be greater than 0".to_string());
        }

        if self.subscriptions.backfill_attempts == 0 {
            return Err("Backfill attempts must be greater than 0".to_string());
        }

        if self.subscriptions.backfill_timeout_secs == 0 {
            return Err("Backfill timeout must be greater than 0".to_string());
        }

        if self.subscriptions.backfill_initial_backoff_ms > self.subscriptions.backfill_max_backoff_ms
        {
            return Err("Backfill initial backoff must not exceed the maximum backoff".to_string());
        }

        if self.http.concurrent_limit == 0 {
            return Err("HTTP concurrent limit must be greater than 0".to_string());
        }

        if self.http.request_timeout_secs == 0 {
            return Err("HTTP request timeout must be greater than 0".to_string());
        }

        if self.connection.initial_reconnect_delay_ms == 0 {
            return Err("Initial reconnect delay must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
