//! # UA Transport
//!
//! Transport core of the UA client stack: dispatches requests onto a secure
//! channel, retries once when the channel closes under a write, and
//! correlates out-of-band responses back to their callers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          ua-transport                             │
//! ├───────────────────────────────────────────────────────────────────┤
//! │   caller ── send(request) ──► Transport ── ResponseFuture ──►     │
//! │                                  │                                │
//! │                 ┌────────────────┼─────────────────┐              │
//! │                 ▼                ▼                 ▼              │
//! │        ChannelProvider      Scheduler     Pending Request Store   │
//! │        (acquire/write)   (retry delay)    (handle → completion)   │
//! │                                                    ▲              │
//! │                                 ResponseDispatcher │              │
//! │                                 ResponseListener ──┘              │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The crate follows Hexagonal Architecture:
//! - **Domain:** messages, errors, configuration, retry classification
//! - **Ports:** channel, provider, scheduler and response traits
//! - **Service:** dispatch loop, correlation store, response routing
//! - **Adapters:** Tokio scheduler, reconnecting provider, in-memory loopback
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ua_transport::adapters::{loopback, ReconnectingChannelProvider, TokioScheduler};
//! use ua_transport::{
//!     RequestHandleGenerator, RequestHeader, ResponseListener, ServiceKind, Transport,
//!     TransportConfig, UaRequest,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (connector, mut server, responses) = loopback();
//! let transport = Transport::new(
//!     ReconnectingChannelProvider::new(connector),
//!     Arc::new(TokioScheduler::current()?),
//!     TransportConfig::default(),
//! )?;
//! tokio::spawn(
//!     ResponseListener::new(Arc::new(transport.dispatcher()), Arc::new(responses)).run(),
//! );
//!
//! let handles = RequestHandleGenerator::new();
//! let header = RequestHeader::new(handles.next_handle());
//! let pending = transport.send(UaRequest::new(header, ServiceKind::Read, vec![1, 2]));
//!
//! let request = server.next_request().await.unwrap();
//! server.reply(&request, vec![42]);
//!
//! let response = pending.await?;
//! assert_eq!(response.body.as_ref(), &[42]);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports for public API
pub use domain::config::{
    ConfigError, TransportConfig, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RETRY_DELAY,
};
pub use domain::errors::{ChannelError, SetupError, TransportError, TransportResult};
pub use domain::request::{
    RequestHandle, RequestHandleGenerator, RequestHeader, ServiceKind, StatusCode, UaRequest,
    UaResponse,
};
pub use domain::retry::{Attempt, RetryDecision, RetryPolicy};
pub use ports::{
    Channel, ChannelProvider, Connector, InboundMessage, ResponseSink, ResponseSource,
    ScheduledTask, Scheduler,
};
pub use service::{
    PendingRequestStore, ResponseDispatcher, ResponseFuture, ResponseListener, Transport,
    TransportMetrics,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
