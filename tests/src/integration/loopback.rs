//! # Loopback Scenarios
//!
//! Requests travel over the in-memory channel to a scripted server and the
//! answers come back through the response listener.

use super::harness::LoopbackHarness;
use ua_transport::{
    ChannelError, InboundMessage, ServiceKind, StatusCode, TransportConfig, TransportError,
};

#[tokio::test]
async fn test_concurrent_round_trips_answered_out_of_order() {
    let mut harness = LoopbackHarness::start(TransportConfig::default());

    let futures: Vec<_> = (0u8..5)
        .map(|i| {
            harness
                .transport
                .send(harness.request(ServiceKind::Read, vec![i]))
        })
        .collect();

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(harness.server.next_request().await.unwrap());
    }
    // Answer in reverse, echoing the body
    for request in received.iter().rev() {
        assert!(harness.server.reply(request, request.body.clone()));
    }

    for (i, future) in futures.into_iter().enumerate() {
        let response = future.await.unwrap();
        assert_eq!(response.body.as_ref(), &[i as u8]);
    }
    assert_eq!(harness.transport.pending_count(), 0);
    assert_eq!(harness.transport.provider().connect_count(), 1);
}

#[tokio::test]
async fn test_service_fault_routed_to_caller() {
    let mut harness = LoopbackHarness::start(TransportConfig::default());

    let future = harness
        .transport
        .send(harness.request(ServiceKind::Call, vec![]));
    let request = harness.server.next_request().await.unwrap();
    assert!(harness.server.respond(InboundMessage::Fault {
        request_handle: request.request_handle(),
        status: StatusCode::BAD_SERVICE_UNSUPPORTED,
        message: "method not supported".into(),
    }));

    assert_eq!(
        future.await,
        Err(TransportError::ServiceFault {
            status: StatusCode::BAD_SERVICE_UNSUPPORTED,
            message: "method not supported".into(),
        })
    );
}

#[tokio::test]
async fn test_reconnect_after_channel_loss_between_requests() {
    let mut harness = LoopbackHarness::start(TransportConfig::default());

    let first = harness
        .transport
        .send(harness.request(ServiceKind::Read, vec![1]));
    let request = harness.server.next_request().await.unwrap();
    harness.server.reply(&request, vec![]);
    assert!(first.await.is_ok());

    assert!(harness.connector.close_current());

    let second = harness
        .transport
        .send(harness.request(ServiceKind::Read, vec![2]));
    let request = harness.server.next_request().await.unwrap();
    assert_eq!(request.body.as_ref(), &[2]);
    harness.server.reply(&request, vec![]);
    assert!(second.await.is_ok());

    let provider = harness.transport.provider();
    assert_eq!(provider.connect_count(), 2);
    assert_eq!(provider.reconnect_count(), 1);
    // The closed channel was noticed before writing, so nothing was retried
    assert_eq!(harness.transport.metrics().total_retries, 0);
}

#[tokio::test]
async fn test_server_gone_fails_acquisition() {
    let harness = LoopbackHarness::start(TransportConfig::default());
    let LoopbackHarness {
        transport,
        server,
        listener,
        ..
    } = harness;
    drop(server);

    let request = ua_transport::UaRequest::new(
        ua_transport::RequestHeader::new(ua_transport::RequestHandle::new(1)),
        ServiceKind::Read,
        vec![],
    );
    assert!(matches!(
        transport.send(request).await,
        Err(TransportError::Acquire(ChannelError::ConnectionRefused(_)))
    ));

    // Listener stops once the inbound side closes
    assert_eq!(listener.await.unwrap(), 0);
}

#[tokio::test]
async fn test_oversized_request_is_not_retried() {
    let harness = LoopbackHarness::start(TransportConfig::default());
    harness.connector.set_max_message_size(Some(4));

    let result = harness
        .transport
        .send(harness.request(ServiceKind::Write, vec![0; 10]))
        .await;

    assert_eq!(
        result,
        Err(TransportError::Write(ChannelError::MessageTooLarge {
            size: 10,
            max: 4
        }))
    );
    assert_eq!(harness.transport.metrics().total_retries, 0);
}

#[tokio::test]
async fn test_shutdown_fails_unanswered_requests() {
    let mut harness = LoopbackHarness::start(TransportConfig::default());

    let answered = harness
        .transport
        .send(harness.request(ServiceKind::Read, vec![1]));
    let unanswered = harness
        .transport
        .send(harness.request(ServiceKind::Publish, vec![2]));

    let a = harness.server.next_request().await.unwrap();
    let b = harness.server.next_request().await.unwrap();
    let to_answer = if a.request_handle() == answered.request_handle() { a } else { b };
    harness.server.reply(&to_answer, vec![]);
    assert!(answered.await.is_ok());

    assert_eq!(harness.transport.shutdown(), 1);
    assert_eq!(unanswered.await, Err(TransportError::Shutdown));

    let metrics = harness.transport.metrics();
    assert_eq!(metrics.total_registered, 2);
    assert_eq!(metrics.total_completed, 1);
    assert_eq!(metrics.total_failed, 1);
}
