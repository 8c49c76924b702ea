//! Common values and types used by the integration tests.

use {
    bytes::Bytes,
    filter_bridge_lib::{
        config::PluginConfig,
        views::{
            BufferView, HeaderView, RequestHeaders, RequestTrailers, ResponseHeaders,
            ResponseTrailers,
        },
        Bridge, DestroyReason, FilterFactories, FilterFactory, FinalizeReason, Host, HostError,
        HostRequest, HttpRequest, LocalReply, Phase, RequestKey, Status, StreamFilter,
    },
    http::{HeaderMap, HeaderValue},
    std::{
        collections::HashMap,
        sync::{Arc, Condvar, Mutex, MutexGuard},
        time::{Duration, Instant},
    },
};

/// A catch-all error, so we can easily use `?` in test cases.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Handy alias for the return type of tests
pub type TestResult = Result<(), Error>;

/// How long a test waits on another thread before giving up.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Everything the bridge asked of the host, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCall {
    LocalReply(RequestKey, u16),
    PanicReply(RequestKey),
    Continue(RequestKey, Status),
    Finalize(RequestKey, FinalizeReason),
}

impl HostCall {
    pub fn key(&self) -> RequestKey {
        match self {
            HostCall::LocalReply(key, _)
            | HostCall::PanicReply(key)
            | HostCall::Continue(key, _)
            | HostCall::Finalize(key, _) => *key,
        }
    }
}

/// A host that records every call and lets tests wait for calls made on other threads.
#[derive(Default)]
pub struct TestHost {
    calls: Mutex<Vec<HostCall>>,
    changed: Condvar,
    refuse_replies: Mutex<Option<HostError>>,
}

impl TestHost {
    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().clone()
    }

    pub fn calls_for(&self, key: RequestKey) -> Vec<HostCall> {
        self.lock()
            .iter()
            .filter(|call| call.key() == key)
            .cloned()
            .collect()
    }

    /// Make every reply fail with `err` until called again with `None`.
    pub fn refuse_replies_with(&self, err: Option<HostError>) {
        *self.refuse_replies.lock().unwrap() = err;
    }

    /// Block until `done` holds for the calls made so far, or [`PATIENCE`] runs out.
    pub fn wait_until(&self, done: impl Fn(&[HostCall]) -> bool) -> bool {
        let deadline = Instant::now() + PATIENCE;
        let mut calls = self.lock();
        loop {
            if done(&calls) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            calls = self.changed.wait_timeout(calls, deadline - now).unwrap().0;
        }
    }

    pub fn wait_for_finalize(&self, key: RequestKey) -> Option<FinalizeReason> {
        self.wait_until(|calls| {
            calls
                .iter()
                .any(|call| matches!(call, HostCall::Finalize(k, _) if *k == key))
        });
        self.calls_for(key).into_iter().find_map(|call| match call {
            HostCall::Finalize(_, reason) => Some(reason),
            _ => None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HostCall>> {
        self.calls.lock().unwrap()
    }

    fn record(&self, call: HostCall) {
        self.lock().push(call);
        self.changed.notify_all();
    }

    fn reply_result(&self) -> Result<(), HostError> {
        match self.refuse_replies.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Host for TestHost {
    fn send_local_reply(&self, key: RequestKey, reply: LocalReply) -> Result<(), HostError> {
        self.reply_result()?;
        self.record(HostCall::LocalReply(key, reply.status.as_u16()));
        Ok(())
    }

    fn send_panic_reply(&self, key: RequestKey, _: &str) -> Result<(), HostError> {
        self.reply_result()?;
        self.record(HostCall::PanicReply(key));
        Ok(())
    }

    fn continue_request(&self, key: RequestKey, status: Status) -> Result<(), HostError> {
        self.record(HostCall::Continue(key, status));
        Ok(())
    }

    fn finalize(&self, key: RequestKey, reason: FinalizeReason) {
        self.record(HostCall::Finalize(key, reason));
    }
}

/// A builder for a bridge serving a handful of test plugins.
pub struct Test {
    concurrency: u32,
    factories: FilterFactories,
    config_ids: HashMap<String, u64>,
}

impl Test {
    pub fn new() -> Self {
        Self {
            concurrency: 1,
            factories: FilterFactories::new(),
            config_ids: HashMap::new(),
        }
    }

    pub fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Serve requests for `plugin` with filters built by `factory`.
    pub fn plugin(mut self, plugin: &str, factory: FilterFactory) -> Self {
        let config_id = self.config_ids.len() as u64 + 1;
        self.factories.register_filter(
            plugin,
            Arc::new(move |_: &PluginConfig| -> anyhow::Result<FilterFactory> {
                Ok(factory.clone())
            }),
        );
        self.factories
            .register_config(PluginConfig::new(plugin, config_id));
        self.config_ids.insert(plugin.to_owned(), config_id);
        self
    }

    pub fn start(self) -> Harness {
        let host = Arc::new(TestHost::default());
        let bridge = Arc::new(Bridge::new(host.clone(), self.factories));
        assert!(bridge.initialize(self.concurrency));
        Harness {
            bridge,
            host,
            config_ids: self.config_ids,
        }
    }
}

/// A running bridge and the host it reports to.
pub struct Harness {
    pub bridge: Arc<Bridge>,
    pub host: Arc<TestHost>,
    config_ids: HashMap<String, u64>,
}

impl Harness {
    /// The host's handle for request `id` on `worker`, served by `plugin`.
    pub fn handle(&self, id: u64, worker: u32, plugin: &str) -> HostRequest {
        let config_id = self.config_ids.get(plugin).copied().unwrap_or_default();
        HostRequest::new(RequestKey::new(id, worker), config_id, plugin)
    }

    pub fn headers(&self, handle: &HostRequest, phase: Phase, end_stream: bool) -> Status {
        self.bridge
            .on_http_header(handle, phase, end_stream, &test_headers())
    }

    pub fn data(&self, handle: &HostRequest, phase: Phase, end_stream: bool, chunk: &str) -> Status {
        self.bridge
            .on_http_data(handle, phase, end_stream, &Bytes::copy_from_slice(chunk.as_bytes()))
    }
}

pub fn test_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("example.org"));
    headers.insert("status", HeaderValue::from_static("200"));
    headers
}

/// The callbacks a [`Journal`] filter has seen.
pub type Events = Arc<Mutex<Vec<String>>>;

/// A filter that writes down every callback it receives and lets everything through.
pub struct Journal {
    events: Events,
}

impl Journal {
    pub fn factory(events: Events) -> FilterFactory {
        Arc::new(move |_: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(Journal {
                events: events.clone(),
            })
        })
    }

    fn note(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl StreamFilter for Journal {
    fn decode_headers(&mut self, headers: RequestHeaders<'_>, end_stream: bool) -> Status {
        self.note(format!("decode_headers({}, {})", headers.len(), end_stream));
        Status::Continue
    }

    fn decode_data(&mut self, data: BufferView<'_>, end_stream: bool) -> Status {
        self.note(format!("decode_data({}, {})", data.to_string_lossy(), end_stream));
        Status::Continue
    }

    fn decode_trailers(&mut self, _: RequestTrailers<'_>) -> Status {
        self.note("decode_trailers".to_owned());
        Status::Continue
    }

    fn encode_headers(&mut self, headers: ResponseHeaders<'_>, end_stream: bool) -> Status {
        self.note(format!("encode_headers({:?}, {})", headers.status(), end_stream));
        Status::Continue
    }

    fn encode_data(&mut self, data: BufferView<'_>, end_stream: bool) -> Status {
        self.note(format!("encode_data({}, {})", data.to_string_lossy(), end_stream));
        Status::Continue
    }

    fn encode_trailers(&mut self, _: ResponseTrailers<'_>) -> Status {
        self.note("encode_trailers".to_owned());
        Status::Continue
    }

    fn on_log_downstream_start(&mut self) {
        self.note("log_start".to_owned());
    }

    fn on_log(&mut self) {
        self.note("log_end".to_owned());
    }

    fn on_destroy(&mut self, reason: DestroyReason) {
        self.note(format!("destroy({:?})", reason));
    }
}

/// A factory whose filters run `f` while handling request headers.
pub fn on_request_headers<F>(f: F) -> FilterFactory
where
    F: Fn(&HttpRequest) -> Status + Send + Sync + 'static,
{
    struct OnHeaders<F> {
        request: Arc<HttpRequest>,
        f: Arc<F>,
    }

    impl<F> StreamFilter for OnHeaders<F>
    where
        F: Fn(&HttpRequest) -> Status + Send + Sync + 'static,
    {
        fn decode_headers(&mut self, _: RequestHeaders<'_>, _: bool) -> Status {
            (self.f)(&self.request)
        }
    }

    let f = Arc::new(f);
    Arc::new(move |request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
        Box::new(OnHeaders {
            request,
            f: f.clone(),
        })
    })
}
