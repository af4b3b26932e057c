//! Domain types for the transport core.
//!
//! Pure data and policy: messages, errors, configuration and the retry
//! classification. No I/O happens here.

pub mod config;
pub mod errors;
pub mod request;
pub mod retry;

pub use config::{ConfigError, TransportConfig};
pub use errors::{ChannelError, SetupError, TransportError, TransportResult};
pub use request::{
    RequestHandle, RequestHandleGenerator, RequestHeader, ServiceKind, StatusCode, UaRequest,
    UaResponse,
};
pub use retry::{Attempt, RetryDecision, RetryPolicy};
