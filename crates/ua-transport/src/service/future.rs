//! ResponseFuture: the caller-side completion handle returned by `send`.

use crate::domain::{RequestHandle, TransportError, TransportResult, UaResponse};
use crate::service::pending::CompletionReceiver;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Resolves exactly once with the matched response or a terminal failure.
///
/// Dropping the future does not cancel the request; use
/// `Transport::cancel` for that.
#[derive(Debug)]
pub struct ResponseFuture {
    request_handle: RequestHandle,
    /// None once the outcome has been taken
    receiver: Option<CompletionReceiver>,
}

impl ResponseFuture {
    pub(crate) fn new(request_handle: RequestHandle, receiver: CompletionReceiver) -> Self {
        Self {
            request_handle,
            receiver: Some(receiver),
        }
    }

    /// A future that is already resolved with `error`.
    pub(crate) fn rejected(request_handle: RequestHandle, error: TransportError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self::new(request_handle, rx)
    }

    /// Handle of the request this future resolves for.
    pub fn request_handle(&self) -> RequestHandle {
        self.request_handle
    }

    /// Take the outcome if the request is already resolved.
    ///
    /// Returns None while the request is still in flight. Once the outcome
    /// has been taken, later calls and polls yield `Dropped`.
    pub fn try_result(&mut self) -> Option<TransportResult<UaResponse>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Some(Err(TransportError::Dropped));
        };
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(TransportError::Dropped),
        };
        self.receiver = None;
        Some(result)
    }
}

impl Future for ResponseFuture {
    type Output = TransportResult<UaResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(TransportError::Dropped));
        };
        let result = match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(result)) => result,
            // Sender dropped without resolving
            Poll::Ready(Err(_)) => Err(TransportError::Dropped),
            Poll::Pending => return Poll::Pending,
        };
        self.receiver = None;
        Poll::Ready(result)
    }
}
