//! # Channel Closed Under the Write
//!
//! The provider hands out a channel that is already dead, as happens when the
//! secure channel is torn down between acquisition and the write. The
//! transport must wait the retry delay, acquire again and write once more.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use ua_transport::adapters::{
    loopback, InMemoryChannel, InMemoryConnector, InMemoryResponseSource, InMemoryServer,
    ReconnectingChannelProvider, TokioScheduler,
};
use ua_transport::{
    ChannelError, ChannelProvider, Connector, RequestHandle, RequestHeader, ResponseListener,
    ServiceKind, Transport, TransportConfig, TransportError, UaRequest,
};

/// Serves `stale` dead channels before delegating to a reconnecting provider.
struct StaleChannelProvider {
    stale: Mutex<Vec<InMemoryChannel>>,
    live: ReconnectingChannelProvider<InMemoryConnector>,
}

#[async_trait]
impl ChannelProvider for StaleChannelProvider {
    type Channel = InMemoryChannel;

    async fn acquire(&self) -> Result<InMemoryChannel, ChannelError> {
        let stale = self.stale.lock().pop();
        match stale {
            Some(channel) => Ok(channel),
            None => self.live.acquire().await,
        }
    }
}

async fn setup(
    stale: usize,
) -> (
    Transport<StaleChannelProvider>,
    InMemoryServer,
    InMemoryResponseSource,
) {
    ua_telemetry::try_init_for_tests();

    let (connector, server, responses) = loopback();
    let mut dead = Vec::new();
    for _ in 0..stale {
        let channel = connector.connect().await.unwrap();
        channel.close();
        dead.push(channel);
    }

    let provider = StaleChannelProvider {
        stale: Mutex::new(dead),
        live: ReconnectingChannelProvider::new(connector),
    };
    let transport = Transport::new(
        provider,
        Arc::new(TokioScheduler::current().unwrap()),
        TransportConfig::default(),
    )
    .unwrap();

    (transport, server, responses)
}

fn read(handle: u32) -> UaRequest {
    UaRequest::new(
        RequestHeader::new(RequestHandle::new(handle)),
        ServiceKind::Read,
        vec![0xAB],
    )
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_channel_closed_under_write() {
    let (transport, mut server, responses) = setup(1).await;
    tokio::spawn(
        ResponseListener::new(Arc::new(transport.dispatcher()), Arc::new(responses)).run(),
    );

    let start = Instant::now();
    let future = transport.send(read(10));

    let request = server.next_request().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(request.request_handle(), RequestHandle::new(10));
    server.reply(&request, vec![0xCD]);

    assert_eq!(future.await.unwrap().body.as_ref(), &[0xCD]);
    assert_eq!(transport.metrics().total_retries, 1);
    assert_eq!(transport.provider().live.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_closed_channel_fails_request() {
    let (transport, _server, _responses) = setup(2).await;

    let start = Instant::now();
    let result = transport.send(read(11)).await;

    assert_eq!(result, Err(TransportError::Write(ChannelError::Closed)));
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(transport.metrics().total_retries, 1);
    // Both attempts used dead channels; nothing reached the server
    assert_eq!(transport.provider().live.connect_count(), 0);
    assert!(transport.provider().stale.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_requests_flow_during_retry_wait() {
    let (transport, mut server, responses) = setup(1).await;
    tokio::spawn(
        ResponseListener::new(Arc::new(transport.dispatcher()), Arc::new(responses)).run(),
    );

    let start = Instant::now();
    let delayed = transport.send(read(20));
    let prompt = transport.send(read(21));

    // Request 21 goes out immediately while 20 waits out its delay
    let first = server.next_request().await.unwrap();
    assert_eq!(first.request_handle(), RequestHandle::new(21));
    assert!(start.elapsed() < Duration::from_secs(1));
    server.reply(&first, vec![]);
    assert!(prompt.await.is_ok());

    let second = server.next_request().await.unwrap();
    assert_eq!(second.request_handle(), RequestHandle::new(20));
    server.reply(&second, vec![]);
    assert!(delayed.await.is_ok());
}
