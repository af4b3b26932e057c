//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the transport requires from its host: a way to obtain a
//! channel, a way to write on it, and a timer for the retry delay.

use crate::domain::{ChannelError, UaRequest, UaResponse};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// An established, possibly secured connection to the server.
///
/// Handles are shared by every request dispatched on them; the transport
/// never assumes exclusive ownership and only ever calls [`Channel::write`].
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Write one request.
    ///
    /// Resolves once the underlying transport reports the write outcome.
    /// Must return [`ChannelError::Closed`] when the channel was invalidated
    /// under the write so the caller can apply its retry policy.
    async fn write(&self, request: Arc<UaRequest>) -> Result<(), ChannelError>;

    /// Whether the channel still looks usable.
    fn is_open(&self) -> bool {
        true
    }
}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Arc<C> {
    async fn write(&self, request: Arc<UaRequest>) -> Result<(), ChannelError> {
        (**self).write(request).await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Produces a channel ready to carry traffic.
///
/// May connect, reconnect or run a handshake, and may take arbitrarily long.
/// Safe to call repeatedly; each call may return the same handle or a fresh one.
#[async_trait]
pub trait ChannelProvider: Send + Sync + 'static {
    type Channel: Channel;

    async fn acquire(&self) -> Result<Self::Channel, ChannelError>;
}

/// Opens a brand new channel. Used by the reconnecting provider.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel + Clone;

    async fn connect(&self) -> Result<Self::Channel, ChannelError>;
}

/// A task handed to a [`Scheduler`].
pub type ScheduledTask = BoxFuture<'static, ()>;

/// Delayed-task facility shared by many transports.
///
/// `task` runs on a worker context after at least `delay` has elapsed. No
/// ordering guarantee between tasks; no cancellation. An implementation that
/// shuts down may drop pending tasks without running them.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        (**self).schedule_after(delay, task)
    }
}

/// Inbound side of the channel: responses already matched to a request handle.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    /// Next inbound item; `Err(ChannelError::Closed)` ends the stream.
    async fn receive(&self) -> Result<InboundMessage, ChannelError>;
}

/// One item from the response demultiplexer.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// A response for an outstanding request
    Response(UaResponse),
    /// A service fault for an outstanding request
    Fault {
        request_handle: crate::domain::RequestHandle,
        status: crate::domain::StatusCode,
        message: String,
    },
}
