//! # UA Telemetry
//!
//! Structured logging setup for the UA client stack.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ua_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config).expect("Failed to init logging");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `ua-client` | Service name on log lines |
//! | `UA_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `UA_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `UA_JSON_LOGS` | `false` (`true` in containers) | JSON formatted output |

mod config;
mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{init_logging, try_init_for_tests};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}
