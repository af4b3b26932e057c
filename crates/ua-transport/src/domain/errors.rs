//! Error types for the transport core.

use crate::domain::request::{RequestHandle, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a channel provider or a channel write.
///
/// Only [`ChannelError::Closed`] is eligible for the automatic retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Channel was closed or reset concurrently with the operation
    #[error("channel closed")]
    Closed,

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("secure channel handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("local resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl ChannelError {
    /// True when the channel was invalidated under the operation.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => Self::Closed,
            ErrorKind::ConnectionRefused => Self::ConnectionRefused(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Terminal failure delivered to the caller through its completion handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Channel provider could not produce a usable channel
    #[error("channel acquisition failed: {0}")]
    Acquire(#[source] ChannelError),

    /// Channel write failed and was not retried (or the retry failed too)
    #[error("write failed: {0}")]
    Write(#[source] ChannelError),

    #[error("request handle {0} is already in flight")]
    DuplicateRequestHandle(RequestHandle),

    #[error("too many pending requests: {limit}")]
    TooManyPending { limit: usize },

    #[error("request {0} cancelled")]
    Cancelled(RequestHandle),

    #[error("request {handle} timed out after {}ms", .elapsed.as_millis())]
    Timeout {
        handle: RequestHandle,
        elapsed: Duration,
    },

    /// Failure reported by the response demultiplexer
    #[error("service fault {status}: {message}")]
    ServiceFault { status: StatusCode, message: String },

    /// Scheduler dropped the retry task before running it
    #[error("retry scheduler unavailable")]
    SchedulerUnavailable,

    #[error("transport shut down")]
    Shutdown,

    /// Channel provider or channel panicked while dispatching
    #[error("dispatch panicked: {0}")]
    DispatchPanicked(String),

    /// Completion sender dropped without a result
    #[error("request dropped before completion")]
    Dropped,
}

impl TransportError {
    /// Underlying channel error, if any.
    pub fn channel_error(&self) -> Option<&ChannelError> {
        match self {
            Self::Acquire(err) | Self::Write(err) => Some(err),
            _ => None,
        }
    }
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors constructing a transport.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    /// Dispatch tasks need a Tokio runtime to be spawned on
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}
