//! The calls the bridge makes back into the proxy core.

use {
    crate::{
        error::HostError,
        handle::{FinalizeReason, RequestKey},
        status::Status,
    },
    bytes::Bytes,
    http::{HeaderMap, StatusCode},
};

/// Body of the terminal reply sent when a filter fails.
pub const PANIC_REPLY_BODY: &str = "error happened in filter\r\n";

/// A response synthesized by the filter layer in place of normal upstream processing.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalReply {
    pub status: StatusCode,
    pub body: Bytes,
    pub headers: HeaderMap,
    /// gRPC status to report, for gRPC requests.
    pub grpc_status: Option<i64>,
    /// Diagnostic detail recorded in the host's response flags and access logs.
    pub details: String,
}

impl LocalReply {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HeaderMap::new(),
            grpc_status: None,
            details: String::new(),
        }
    }

    pub fn with_headers(self, headers: HeaderMap) -> Self {
        Self { headers, ..self }
    }

    pub fn with_grpc_status(self, grpc_status: i64) -> Self {
        Self {
            grpc_status: Some(grpc_status),
            ..self
        }
    }

    pub fn with_details(self, details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            ..self
        }
    }

    /// The terminal reply for a filter failure.
    pub fn panic_reply(details: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, PANIC_REPLY_BODY).with_details(details)
    }
}

/// The proxy core, as seen from the bridge.
///
/// Implementations identify requests only by [`RequestKey`]; the bridge never calls any of
/// these for a request after its destroy callback has been processed, except
/// [`finalize`][Host::finalize], which is exactly the notification that the key may be
/// recycled.
pub trait Host: Send + Sync {
    /// Terminate a request with a synthesized response.
    fn send_local_reply(&self, key: RequestKey, reply: LocalReply) -> Result<(), HostError>;

    /// Terminate a request whose filter failed.
    ///
    /// Returning [`HostError::NotInFilterContext`] makes the bridge defer the reply to the
    /// next lifecycle callback for the request.
    fn send_panic_reply(&self, key: RequestKey, details: &str) -> Result<(), HostError> {
        self.send_local_reply(key, LocalReply::panic_reply(details))
    }

    /// Resume a filter chain that a filter parked with [`Status::Running`].
    fn continue_request(&self, key: RequestKey, status: Status) -> Result<(), HostError>;

    /// The managed state for a request has been released.
    fn finalize(&self, key: RequestKey, reason: FinalizeReason);
}
