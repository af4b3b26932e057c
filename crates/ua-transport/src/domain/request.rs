//! Request and response messages as seen by the transport.
//!
//! Bodies are opaque: encoding belongs to the channel layer. The transport only
//! reads the header (request handle, service kind, timeout hint).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Correlation handle linking an outbound request to its response.
///
/// Zero is reserved by the protocol to mean "no handle" and is never
/// produced by [`RequestHandleGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHandle(u32);

impl RequestHandle {
    /// Wrap a raw handle value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw handle value.
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RequestHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Allocates request handles for one client.
///
/// Handles increase monotonically and wrap around, skipping zero.
#[derive(Debug)]
pub struct RequestHandleGenerator {
    next: AtomicU32,
}

impl RequestHandleGenerator {
    /// Start allocating at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start allocating at `first` (zero is bumped to 1).
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first.max(1)),
        }
    }

    /// Allocate the next handle.
    pub fn next_handle(&self) -> RequestHandle {
        loop {
            let value = self.next.fetch_add(1, Ordering::Relaxed);
            if value != 0 {
                return RequestHandle(value);
            }
        }
    }
}

impl Default for RequestHandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Service a request invokes on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    OpenSecureChannel,
    CloseSecureChannel,
    GetEndpoints,
    CreateSession,
    ActivateSession,
    CloseSession,
    Browse,
    BrowseNext,
    Read,
    Write,
    Call,
    CreateSubscription,
    DeleteSubscriptions,
    CreateMonitoredItems,
    Publish,
    Republish,
    /// Any service identified only by its binary encoding id.
    Other(u32),
}

impl ServiceKind {
    /// Service name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenSecureChannel => "OpenSecureChannelRequest",
            Self::CloseSecureChannel => "CloseSecureChannelRequest",
            Self::GetEndpoints => "GetEndpointsRequest",
            Self::CreateSession => "CreateSessionRequest",
            Self::ActivateSession => "ActivateSessionRequest",
            Self::CloseSession => "CloseSessionRequest",
            Self::Browse => "BrowseRequest",
            Self::BrowseNext => "BrowseNextRequest",
            Self::Read => "ReadRequest",
            Self::Write => "WriteRequest",
            Self::Call => "CallRequest",
            Self::CreateSubscription => "CreateSubscriptionRequest",
            Self::DeleteSubscriptions => "DeleteSubscriptionsRequest",
            Self::CreateMonitoredItems => "CreateMonitoredItemsRequest",
            Self::Publish => "PublishRequest",
            Self::Republish => "RepublishRequest",
            Self::Other(_) => "Request",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(id) => write!(f, "Request(i={})", id),
            other => f.write_str(other.name()),
        }
    }
}

/// Header fields every request carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Correlation handle, unique among in-flight requests
    pub request_handle: RequestHandle,
    /// Client-side timeout hint; zero means "use the transport default"
    #[serde(with = "humantime_serde")]
    pub timeout_hint: Duration,
}

impl RequestHeader {
    pub fn new(request_handle: RequestHandle) -> Self {
        Self {
            request_handle,
            timeout_hint: Duration::ZERO,
        }
    }

    pub fn with_timeout_hint(mut self, timeout_hint: Duration) -> Self {
        self.timeout_hint = timeout_hint;
        self
    }
}

/// Outbound request. Immutable once handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UaRequest {
    pub header: RequestHeader,
    pub service: ServiceKind,
    /// Encoded service body
    pub body: Bytes,
}

impl UaRequest {
    pub fn new(header: RequestHeader, service: ServiceKind, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            service,
            body: body.into(),
        }
    }

    pub fn request_handle(&self) -> RequestHandle {
        self.header.request_handle
    }
}

/// Service result code carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u32);

impl StatusCode {
    pub const GOOD: Self = Self(0x0000_0000);
    pub const BAD_UNEXPECTED_ERROR: Self = Self(0x8001_0000);
    pub const BAD_TIMEOUT: Self = Self(0x800A_0000);
    pub const BAD_SERVICE_UNSUPPORTED: Self = Self(0x800B_0000);
    pub const BAD_SESSION_ID_INVALID: Self = Self(0x8025_0000);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Severity bits `10` mean bad.
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Inbound response, already matched to a request handle by the demultiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UaResponse {
    pub request_handle: RequestHandle,
    pub service_result: StatusCode,
    /// Encoded service body
    pub body: Bytes,
}

impl UaResponse {
    pub fn new(request_handle: RequestHandle, service_result: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            request_handle,
            service_result,
            body: body.into(),
        }
    }

    pub fn good(request_handle: RequestHandle, body: impl Into<Bytes>) -> Self {
        Self::new(request_handle, StatusCode::GOOD, body)
    }
}
