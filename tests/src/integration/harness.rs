//! Transport wired to the in-memory loopback, with a running response listener.

use std::sync::Arc;
use tokio::task::JoinHandle;
use ua_transport::adapters::{
    loopback, InMemoryConnector, InMemoryServer, ReconnectingChannelProvider, TokioScheduler,
};
use ua_transport::{
    RequestHandleGenerator, RequestHeader, ResponseListener, ServiceKind, Transport,
    TransportConfig, UaRequest,
};

pub type LoopbackTransport = Transport<ReconnectingChannelProvider<InMemoryConnector>>;

pub struct LoopbackHarness {
    pub transport: LoopbackTransport,
    pub server: InMemoryServer,
    pub connector: InMemoryConnector,
    pub listener: JoinHandle<usize>,
    handles: RequestHandleGenerator,
}

impl LoopbackHarness {
    /// Must be called inside a Tokio runtime.
    pub fn start(config: TransportConfig) -> Self {
        ua_telemetry::try_init_for_tests();

        let (connector, server, responses) = loopback();
        let transport = Transport::new(
            ReconnectingChannelProvider::new(connector.clone()),
            Arc::new(TokioScheduler::current().unwrap()),
            config,
        )
        .unwrap();
        let listener = tokio::spawn(
            ResponseListener::new(Arc::new(transport.dispatcher()), Arc::new(responses)).run(),
        );

        Self {
            transport,
            server,
            connector,
            listener,
            handles: RequestHandleGenerator::new(),
        }
    }

    pub fn request(&self, service: ServiceKind, body: Vec<u8>) -> UaRequest {
        UaRequest::new(RequestHeader::new(self.handles.next_handle()), service, body)
    }
}
