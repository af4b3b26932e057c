//! # Driving Ports (Inbound API)
//!
//! The single operation the response demultiplexer needs from the transport:
//! resolve the completion registered for a request handle.

use crate::domain::{RequestHandle, TransportError, UaResponse};

/// Resolution entry point for matched inbound traffic.
///
/// Both methods are safe to call for handles that are unknown or already
/// resolved: the call is a logged no-op and returns `false`.
pub trait ResponseSink: Send + Sync {
    /// Complete the request `response.request_handle` with `response`.
    fn deliver(&self, response: UaResponse) -> bool;

    /// Fail the request `handle` with `error`.
    fn deliver_failure(&self, handle: RequestHandle, error: TransportError) -> bool;
}
