//! Inbound side: hands matched responses to the waiting callers.

use crate::domain::{ChannelError, RequestHandle, TransportError, UaResponse};
use crate::ports::{InboundMessage, ResponseSink, ResponseSource};
use crate::service::pending::PendingRequestStore;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Clonable handle the response demultiplexer uses to resolve requests.
#[derive(Clone)]
pub struct ResponseDispatcher {
    pending: Arc<PendingRequestStore>,
}

impl ResponseDispatcher {
    pub(crate) fn new(pending: Arc<PendingRequestStore>) -> Self {
        Self { pending }
    }

    /// Whether a request handle is still waiting for its outcome.
    pub fn is_pending(&self, handle: RequestHandle) -> bool {
        self.pending.is_pending(&handle)
    }
}

impl ResponseSink for ResponseDispatcher {
    fn deliver(&self, response: UaResponse) -> bool {
        self.pending.complete(response)
    }

    fn deliver_failure(&self, handle: RequestHandle, error: TransportError) -> bool {
        self.pending.fail(handle, error)
    }
}

impl std::fmt::Debug for ResponseDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseDispatcher")
            .field("pending", &self.pending.pending_count())
            .finish()
    }
}

/// Drains a [`ResponseSource`] into a [`ResponseSink`] until the source closes.
pub struct ResponseListener {
    sink: Arc<dyn ResponseSink>,
    source: Arc<dyn ResponseSource>,
}

impl ResponseListener {
    pub fn new(sink: Arc<dyn ResponseSink>, source: Arc<dyn ResponseSource>) -> Self {
        Self { sink, source }
    }

    /// Run the listener loop.
    ///
    /// Returns the number of inbound messages that resolved a request.
    pub async fn run(self) -> usize {
        let mut delivered = 0;
        loop {
            match self.source.receive().await {
                Ok(message) => {
                    if self.handle_message(message) {
                        delivered += 1;
                    }
                }
                Err(ChannelError::Closed) => {
                    warn!("Response source closed, stopping listener");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error receiving response");
                }
            }
        }
        delivered
    }

    fn handle_message(&self, message: InboundMessage) -> bool {
        match message {
            InboundMessage::Response(response) => {
                let handle = response.request_handle;
                let matched = self.sink.deliver(response);
                if !matched {
                    debug!(request_handle = %handle, "Unmatched response dropped");
                }
                matched
            }
            InboundMessage::Fault {
                request_handle,
                status,
                message,
            } => self.sink.deliver_failure(
                request_handle,
                TransportError::ServiceFault { status, message },
            ),
        }
    }
}
