//! In-memory loopback channel.
//!
//! Requests written on an [`InMemoryChannel`] arrive at the paired
//! [`InMemoryServer`]; whatever the server answers comes back through the
//! [`InMemoryResponseSource`]. Useful for wiring tests and local tools without
//! a socket.

use crate::domain::{ChannelError, UaRequest, UaResponse};
use crate::ports::{Channel, Connector, InboundMessage, ResponseSource};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Create a connected loopback: connector, server end, and inbound response source.
pub fn loopback() -> (InMemoryConnector, InMemoryServer, InMemoryResponseSource) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let connector = InMemoryConnector {
        state: Arc::new(ConnectorState {
            requests: request_tx,
            current: Mutex::new(None),
            refuse: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            max_message_size: AtomicUsize::new(0),
        }),
    };
    let server = InMemoryServer {
        requests: request_rx,
        responses: response_tx,
    };
    let source = InMemoryResponseSource {
        responses: tokio::sync::Mutex::new(response_rx),
    };

    (connector, server, source)
}

struct ChannelState {
    id: u64,
    open: AtomicBool,
    requests: mpsc::UnboundedSender<Arc<UaRequest>>,
    /// Zero means unlimited
    max_message_size: usize,
}

/// One loopback channel. Clones share the same open/closed state.
#[derive(Clone)]
pub struct InMemoryChannel {
    state: Arc<ChannelState>,
}

impl InMemoryChannel {
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Close the channel; further writes fail with `Closed`.
    pub fn close(&self) {
        if self.state.open.swap(false, Ordering::SeqCst) {
            debug!(channel_id = self.state.id, "Loopback channel closed");
        }
    }
}

impl std::fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("id", &self.state.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn write(&self, request: Arc<UaRequest>) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }

        let size = request.body.len();
        let max = self.state.max_message_size;
        if max != 0 && size > max {
            return Err(ChannelError::MessageTooLarge { size, max });
        }

        // Server end dropped: the peer is gone
        self.state
            .requests
            .send(request)
            .map_err(|_| ChannelError::Closed)
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst) && !self.state.requests.is_closed()
    }
}

struct ConnectorState {
    requests: mpsc::UnboundedSender<Arc<UaRequest>>,
    current: Mutex<Option<InMemoryChannel>>,
    refuse: AtomicBool,
    next_id: AtomicU64,
    max_message_size: AtomicUsize,
}

/// Opens loopback channels to the paired server.
#[derive(Clone)]
pub struct InMemoryConnector {
    state: Arc<ConnectorState>,
}

impl InMemoryConnector {
    /// Make subsequent connects fail with `ConnectionRefused`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Limit the body size of channels opened from now on (None = unlimited).
    pub fn set_max_message_size(&self, max: Option<usize>) {
        self.state
            .max_message_size
            .store(max.unwrap_or(0), Ordering::SeqCst);
    }

    /// Close the most recently opened channel. Returns false if none was open.
    pub fn close_current(&self) -> bool {
        match self.state.current.lock().as_ref() {
            Some(channel) if channel.is_open() => {
                channel.close();
                true
            }
            _ => false,
        }
    }

    /// Channels opened so far
    pub fn connect_count(&self) -> u64 {
        self.state.next_id.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Channel = InMemoryChannel;

    async fn connect(&self) -> Result<InMemoryChannel, ChannelError> {
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::ConnectionRefused(
                "loopback refusing connections".into(),
            ));
        }
        if self.state.requests.is_closed() {
            return Err(ChannelError::ConnectionRefused("loopback server gone".into()));
        }

        let channel = InMemoryChannel {
            state: Arc::new(ChannelState {
                id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
                open: AtomicBool::new(true),
                requests: self.state.requests.clone(),
                max_message_size: self.state.max_message_size.load(Ordering::SeqCst),
            }),
        };
        debug!(channel_id = channel.id(), "Loopback channel opened");

        *self.state.current.lock() = Some(channel.clone());
        Ok(channel)
    }
}

/// Server end of the loopback.
pub struct InMemoryServer {
    requests: mpsc::UnboundedReceiver<Arc<UaRequest>>,
    responses: mpsc::UnboundedSender<InboundMessage>,
}

impl InMemoryServer {
    /// Next request written by any channel; None once every channel and the
    /// connector are gone.
    pub async fn next_request(&mut self) -> Option<Arc<UaRequest>> {
        self.requests.recv().await
    }

    /// Send an inbound message back to the client.
    pub fn respond(&self, message: InboundMessage) -> bool {
        self.responses.send(message).is_ok()
    }

    /// Answer `request` with a good response carrying `body`.
    pub fn reply(&self, request: &UaRequest, body: impl Into<Bytes>) -> bool {
        self.respond(InboundMessage::Response(UaResponse::good(
            request.request_handle(),
            body,
        )))
    }
}

/// Client-side inbound stream of the loopback.
pub struct InMemoryResponseSource {
    responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
}

#[async_trait]
impl ResponseSource for InMemoryResponseSource {
    async fn receive(&self) -> Result<InboundMessage, ChannelError> {
        self.responses
            .lock()
            .await
            .recv()
            .await
            .ok_or(ChannelError::Closed)
    }
}
