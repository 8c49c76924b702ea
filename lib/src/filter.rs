//! The per-request filter interface implemented by plugins.

use {
    crate::{
        handle::DestroyReason,
        request::HttpRequest,
        status::Status,
        views::{
            BufferView, RequestHeaders, RequestTrailers, ResponseHeaders, ResponseTrailers,
        },
    },
    std::sync::Arc,
};

/// A filter instance, bound to exactly one request.
///
/// The bridge invokes at most one method of a filter at a time, always from the worker thread
/// that owns the request. Every method has a default that lets the request through, so a
/// filter only implements the phases it cares about.
///
/// Panicking out of any method is contained by the bridge: the request is answered with a
/// `500` local reply and the filter sees no further phase callbacks, though
/// [`on_destroy`][Self::on_destroy] is still delivered.
#[allow(unused_variables)]
pub trait StreamFilter: Send {
    fn decode_headers(&mut self, headers: RequestHeaders<'_>, end_stream: bool) -> Status {
        Status::Continue
    }

    fn decode_data(&mut self, data: BufferView<'_>, end_stream: bool) -> Status {
        Status::Continue
    }

    fn decode_trailers(&mut self, trailers: RequestTrailers<'_>) -> Status {
        Status::Continue
    }

    fn encode_headers(&mut self, headers: ResponseHeaders<'_>, end_stream: bool) -> Status {
        Status::Continue
    }

    fn encode_data(&mut self, data: BufferView<'_>, end_stream: bool) -> Status {
        Status::Continue
    }

    fn encode_trailers(&mut self, trailers: ResponseTrailers<'_>) -> Status {
        Status::Continue
    }

    /// The downstream request has started; its headers have been received.
    fn on_log_downstream_start(&mut self) {}

    /// A periodic access log tick for a long-lived downstream request.
    fn on_log_downstream_periodic(&mut self) {}

    /// The downstream request has ended.
    fn on_log(&mut self) {}

    /// The host is tearing the request down. No other method is called after this one.
    fn on_destroy(&mut self, reason: DestroyReason) {}
}

/// Builds the filter for a new request.
///
/// The factory receives the request it is building for; filters that need to call back into
/// the host, or suspend, keep that handle.
pub type FilterFactory = Arc<dyn Fn(Arc<HttpRequest>) -> Box<dyn StreamFilter> + Send + Sync>;

/// A filter that lets every phase through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughFilter;

impl StreamFilter for PassThroughFilter {}

impl PassThroughFilter {
    /// A factory producing [`PassThroughFilter`]s.
    pub fn factory() -> FilterFactory {
        Arc::new(|_: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(PassThroughFilter)
        })
    }
}
