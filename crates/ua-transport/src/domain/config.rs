//! Transport configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Delay before the single channel-closed retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timeout applied when a request carries no timeout hint.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum in-flight requests per transport.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 65_536;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay before re-dispatching a request whose write hit a closed channel
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Retry once when a first-attempt write fails with "channel closed"
    pub retry_on_channel_closed: bool,
    /// Timeout for requests whose header carries no hint (None = wait forever)
    #[serde(with = "humantime_serde")]
    pub default_request_timeout: Option<Duration>,
    /// How often the expiry sweeper runs
    #[serde(with = "humantime_serde")]
    pub expiry_sweep_interval: Duration,
    /// Maximum number of requests in flight at once
    pub max_pending_requests: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_on_channel_closed: true,
            default_request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            expiry_sweep_interval: Duration::from_secs(1),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

impl TransportConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `UA_TRANSPORT_RETRY_DELAY_MS`: Retry delay (default: 1000)
    /// - `UA_TRANSPORT_RETRY_ON_CLOSED`: Enable the closed-channel retry (default: true)
    /// - `UA_TRANSPORT_REQUEST_TIMEOUT_MS`: Default request timeout, 0 disables (default: 60000)
    /// - `UA_TRANSPORT_MAX_PENDING`: Maximum in-flight requests (default: 65536)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            retry_delay: env_millis("UA_TRANSPORT_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay),

            retry_on_channel_closed: env::var("UA_TRANSPORT_RETRY_ON_CLOSED")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.retry_on_channel_closed),

            default_request_timeout: match env_millis("UA_TRANSPORT_REQUEST_TIMEOUT_MS") {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.default_request_timeout,
            },

            expiry_sweep_interval: defaults.expiry_sweep_interval,

            max_pending_requests: env::var("UA_TRANSPORT_MAX_PENDING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_pending_requests),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_on_channel_closed && self.retry_delay.is_zero() {
            return Err(ConfigError::InvalidRetryDelay(
                "retry_delay cannot be 0 while retries are enabled".into(),
            ));
        }

        if self.expiry_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "expiry_sweep_interval cannot be 0".into(),
            ));
        }

        if matches!(self.default_request_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "default_request_timeout cannot be 0; use None to disable".into(),
            ));
        }

        if self.max_pending_requests == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_pending_requests cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Effective timeout for a request with the given hint.
    pub fn effective_timeout(&self, timeout_hint: Duration) -> Option<Duration> {
        if timeout_hint.is_zero() {
            self.default_request_timeout
        } else {
            Some(timeout_hint)
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid retry delay: {0}")]
    InvalidRetryDelay(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}
