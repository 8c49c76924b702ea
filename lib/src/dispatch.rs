//! The entry points the host calls for every request lifecycle event.

use {
    crate::{
        error::HostError,
        factory::FilterFactories,
        handle::{AccessLogType, DestroyReason, HostRequest, Phase, RequestKey},
        host::Host,
        registry::RequestRegistry,
        request::{classify, HttpRequest, PanicKind},
        status::Status,
        views::{
            BufferView, RequestHeaders, RequestTrailers, ResponseHeaders, ResponseTrailers,
        },
    },
    bytes::Bytes,
    http::HeaderMap,
    std::{
        any::Any,
        panic::{catch_unwind, AssertUnwindSafe},
        sync::Arc,
    },
    tracing::{event, Level},
};

/// Whether a failure caught at an entry point can be answered right away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplyWindow {
    /// The host is waiting on a header or trailer phase and can take a terminal reply.
    Immediate,
    /// Mid-body: the reply is deferred to the next entry point for the request.
    Deferred,
}

/// Process-wide bridge state.
///
/// One `Bridge` is shared by every worker thread the host runs. It owns the request registry,
/// the host callbacks, and the filter factories. The registry is sized once, by
/// [`initialize`][Self::initialize], before any request flows.
pub struct Bridge {
    registry: RequestRegistry,
    host: Arc<dyn Host>,
    factories: FilterFactories,
}

impl Bridge {
    pub fn new(host: Arc<dyn Host>, factories: FilterFactories) -> Self {
        Self {
            registry: RequestRegistry::new(),
            host,
            factories,
        }
    }

    /// Record the host's worker concurrency and size the registry for it.
    ///
    /// Only the first call takes effect. Returns `true` if this call was the one that did.
    pub fn initialize(&self, concurrency: u32) -> bool {
        let initialized = self.registry.initialize(concurrency);
        if initialized {
            event!(Level::INFO, concurrency, "bridge initialized");
        } else {
            event!(
                Level::DEBUG,
                requested = concurrency,
                configured = self.registry.concurrency(),
                "bridge already initialized"
            );
        }
        initialized
    }

    /// The worker concurrency the bridge was initialized with.
    ///
    /// # Panics
    ///
    /// Panics if called before [`initialize`][Self::initialize].
    pub fn concurrency(&self) -> u32 {
        self.registry.concurrency()
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.is_initialized()
    }

    pub fn factories(&self) -> &FilterFactories {
        &self.factories
    }

    /// The live state for a request, if any.
    pub fn lookup(&self, key: RequestKey) -> Option<Arc<HttpRequest>> {
        self.registry.lookup(key)
    }

    /// The number of live requests owned by one worker.
    pub fn live_requests(&self, worker_id: u32) -> usize {
        self.registry.len_for_worker(worker_id)
    }

    /// Headers or trailers, in either direction.
    ///
    /// This is normally the first event for a request and creates its state, though a local
    /// reply or a downstream-start log event may have created it already.
    ///
    /// # Panics
    ///
    /// Panics on host contract violations: a data phase, a duplicate request key, or a filter
    /// that asks to wait for more data on an end-of-stream event.
    pub fn on_http_header(
        &self,
        handle: &HostRequest,
        phase: Phase,
        end_stream: bool,
        headers: &HeaderMap,
    ) -> Status {
        let req = self.lookup_or_create(handle);

        if let Some(status) = self.replay_failure(&req) {
            return status;
        }

        if phase.is_data() {
            panic!(
                "header callback for request {} carries data phase {:?}",
                handle.key(),
                phase
            );
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            req.with_filter(|filter| match phase {
                Phase::DecodeHeader => {
                    filter.decode_headers(RequestHeaders::new(headers), end_stream)
                }
                Phase::DecodeTrailer => filter.decode_trailers(RequestTrailers::new(headers)),
                Phase::EncodeHeader => {
                    filter.encode_headers(ResponseHeaders::new(headers), end_stream)
                }
                Phase::EncodeTrailer => filter.encode_trailers(ResponseTrailers::new(headers)),
                Phase::DecodeData | Phase::EncodeData => Status::Continue,
            })
            .unwrap_or(Status::Continue)
        }));

        match result {
            Ok(status) => check_end_of_stream(end_stream, status),
            Err(payload) => self.contain(&req, phase, payload, ReplyWindow::Immediate),
        }
    }

    /// A body chunk, in either direction.
    ///
    /// # Panics
    ///
    /// Panics on host contract violations: an unknown request, a non-data phase, or a filter
    /// that asks to wait for more data on an end-of-stream event.
    pub fn on_http_data(
        &self,
        handle: &HostRequest,
        phase: Phase,
        end_stream: bool,
        data: &Bytes,
    ) -> Status {
        let req = self.expect_request(handle.key(), "data");

        if let Some(status) = self.replay_failure(&req) {
            return status;
        }

        if !phase.is_data() {
            panic!(
                "data callback for request {} carries phase {:?}",
                handle.key(),
                phase
            );
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            req.with_filter(|filter| {
                let buffer = BufferView::new(data);
                if phase.is_decode() {
                    filter.decode_data(buffer, end_stream)
                } else {
                    filter.encode_data(buffer, end_stream)
                }
            })
            .unwrap_or(Status::Continue)
        }));

        match result {
            Ok(status) => check_end_of_stream(end_stream, status),
            Err(payload) => self.contain(&req, phase, payload, ReplyWindow::Deferred),
        }
    }

    /// An access log event.
    ///
    /// Downstream-start logging may run before any header event, so this creates the request
    /// state if needed. Only the downstream log types reach the filter.
    pub fn on_http_log(&self, handle: &HostRequest, log_type: AccessLogType) {
        let req = self.lookup_or_create(handle);

        if req.panicked() {
            event!(
                Level::DEBUG,
                request = %handle.key(),
                ?log_type,
                "skipping access log for failed filter"
            );
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            req.with_filter(|filter| match log_type {
                AccessLogType::DownstreamStart => filter.on_log_downstream_start(),
                AccessLogType::DownstreamPeriodic => filter.on_log_downstream_periodic(),
                AccessLogType::DownstreamEnd => filter.on_log(),
                other => event!(
                    Level::ERROR,
                    request = %handle.key(),
                    "access log type {:?} ({}) is not supported yet",
                    other,
                    other.code()
                ),
            });
        }));

        if let Err(payload) = result {
            match classify(&*payload) {
                PanicKind::RequestGone => {}
                PanicKind::NotInFilterContext => {
                    req.record_panic(HostError::NotInFilterContext.to_string())
                }
                PanicKind::Failure(details) => {
                    event!(
                        Level::ERROR,
                        request = %handle.key(),
                        ?log_type,
                        "filter panicked while logging: {}",
                        details
                    );
                    req.record_panic(details);
                }
            }
        }
    }

    /// The host is done with a request.
    ///
    /// Any suspended filter is released first, then the filter's destroy hook runs (even if
    /// the filter failed earlier), then the request is forgotten. No host callback is made for
    /// the request afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the request is unknown.
    pub fn on_http_destroy(&self, handle: &HostRequest, reason: DestroyReason) {
        let key = handle.key();
        let req = self.expect_request(key, "destroy");

        req.begin_destroy();

        let result = catch_unwind(AssertUnwindSafe(|| {
            req.with_filter(|filter| filter.on_destroy(reason));
        }));
        if let Err(payload) = result {
            if let PanicKind::Failure(details) = classify(&*payload) {
                event!(
                    Level::ERROR,
                    request = %key,
                    "filter panicked while being destroyed: {}",
                    details
                );
            }
        }

        // The filter usually holds its own request; dropping it here breaks that cycle.
        drop(req.take_filter());
        self.registry.remove(key);
        req.mark_released();
        event!(Level::TRACE, request = %key, ?reason, "request destroyed");
    }

    /// The host's signal that an operation a filter suspended on has completed.
    ///
    /// A signal for a request that has already been destroyed is ignored.
    pub fn on_resume(&self, key: RequestKey) {
        match self.registry.lookup(key) {
            Some(req) => req.resume(),
            None => event!(
                Level::DEBUG,
                request = %key,
                "ignoring resume for a request that is gone"
            ),
        }
    }

    /// Forget every live request without running destroy hooks.
    ///
    /// Suspended filters are released and each request is finalized as abandoned once the
    /// last reference to it goes away. Only meant for whole-process teardown.
    pub fn reset_all(&self) -> usize {
        if !self.registry.is_initialized() {
            return 0;
        }
        let drained = self.registry.reset_all();
        for req in &drained {
            req.abandon();
        }
        if !drained.is_empty() {
            event!(
                Level::WARN,
                requests = drained.len(),
                "abandoned live requests"
            );
        }
        drained.len()
    }

    fn lookup_or_create(&self, handle: &HostRequest) -> Arc<HttpRequest> {
        match self.registry.lookup(handle.key()) {
            Some(req) => req,
            None => self.create_request(handle),
        }
    }

    fn create_request(&self, handle: &HostRequest) -> Arc<HttpRequest> {
        let key = handle.key();
        let req = HttpRequest::new(handle.clone(), self.host.clone(), self.concurrency());
        if let Err(err) = self.registry.store(key, req.clone()) {
            req.disown();
            panic!("failed to create request state: {}", err);
        }

        let factory = self
            .factories
            .get_or_create(handle.plugin_name(), handle.config_id());
        match catch_unwind(AssertUnwindSafe(|| factory(req.clone()))) {
            Ok(filter) => req.install_filter(filter),
            Err(payload) => {
                let details = match classify(&*payload) {
                    PanicKind::Failure(details) => details,
                    PanicKind::NotInFilterContext => HostError::NotInFilterContext.to_string(),
                    PanicKind::RequestGone => HostError::FilterDestroyed.to_string(),
                };
                event!(
                    Level::ERROR,
                    request = %key,
                    plugin = handle.plugin_name(),
                    "filter factory panicked: {}",
                    details
                );
                req.record_panic(details);
            }
        }
        event!(Level::TRACE, request = %key, "request created");
        req
    }

    fn expect_request(&self, key: RequestKey, event: &str) -> Arc<HttpRequest> {
        match self.registry.lookup(key) {
            Some(req) => req,
            None => panic!("{} callback for unknown request {}", event, key),
        }
    }

    /// Re-issue the terminal reply for a failure recorded in an earlier phase.
    fn replay_failure(&self, req: &HttpRequest) -> Option<Status> {
        let info = req.panic_info();
        if !info.panicked() {
            return None;
        }
        if let Err(err) = req.send_panic_reply(info.details()) {
            event!(
                Level::WARN,
                request = %req.key(),
                "could not deliver deferred failure reply: {}",
                err
            );
        }
        Some(Status::LocalReply)
    }

    /// Turn a panic caught during a phase callback into a directive for the host.
    fn contain(
        &self,
        req: &HttpRequest,
        phase: Phase,
        payload: Box<dyn Any + Send>,
        window: ReplyWindow,
    ) -> Status {
        let details = match classify(&*payload) {
            PanicKind::RequestGone => {
                event!(
                    Level::DEBUG,
                    request = %req.key(),
                    ?phase,
                    "filter stopped on a request that is already gone"
                );
                return Status::StopNoBuffer;
            }
            PanicKind::NotInFilterContext => {
                req.record_panic(HostError::NotInFilterContext.to_string());
                return Status::StopNoBuffer;
            }
            PanicKind::Failure(details) => details,
        };

        event!(
            Level::ERROR,
            request = %req.key(),
            plugin = req.plugin_name(),
            ?phase,
            "filter panicked: {}",
            details
        );

        // Flagged either way, so later entries never reach the filter again.
        req.record_panic(details.clone());
        if window == ReplyWindow::Deferred {
            return Status::StopNoBuffer;
        }

        match req.send_panic_reply(&details) {
            Ok(()) => Status::LocalReply,
            Err(HostError::NotInFilterContext) => Status::StopNoBuffer,
            Err(err) => {
                event!(
                    Level::DEBUG,
                    request = %req.key(),
                    "failure reply not delivered: {}",
                    err
                );
                Status::LocalReply
            }
        }
    }
}

/// Waiting for more data after the last chunk would leave the host waiting forever.
fn check_end_of_stream(end_stream: bool, status: Status) -> Status {
    if end_stream && status.waits_for_data() {
        panic!("received wait data status when there is no data, please fix the returned status");
    }
    status
}
