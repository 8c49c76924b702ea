//! The filters the harness can serve plugins with.

use {
    anyhow::{anyhow, bail, Context},
    filter_bridge_lib::{
        config::PluginConfig,
        logging::LogLevel,
        views::{BufferView, HeaderView, RequestHeaders, ResponseHeaders},
        Bridge, FilterFactories, FilterFactory, HostError, HttpRequest, LocalReply,
        PassThroughFilter, Status, StreamFilter,
    },
    http::StatusCode,
    std::{
        str::FromStr,
        sync::{Arc, Weak},
        time::Duration,
    },
    tokio::runtime::Handle,
    tracing::{event, Level},
};

/// Settings shared by every filter build.
#[derive(Clone)]
pub struct FilterEnv {
    /// Where asynchronous completions run.
    pub runtime: Handle,
    /// The bridge that completions report back to.
    pub bridge: Weak<Bridge>,
    /// How long a simulated asynchronous operation takes unless the plugin overrides it.
    pub resume_delay: Duration,
}

/// Register every harness filter with `factories`.
pub fn register_all(factories: &FilterFactories, env: FilterEnv) {
    factories.register_filter(
        "passthrough",
        Arc::new(|_: &PluginConfig| -> anyhow::Result<FilterFactory> {
            Ok(PassThroughFilter::factory())
        }),
    );
    factories.register_filter("deny-header", Arc::new(DenyHeader::build));
    factories.register_filter("body-limit", Arc::new(BodyLimit::build));
    factories.register_filter("access-log", Arc::new(AccessLog::build));
    factories.register_filter("panic", Arc::new(Panic::build));
    factories.register_filter(
        "async-lookup",
        Arc::new(move |config: &PluginConfig| AsyncLookup::build(config, env.clone())),
    );
}

fn status_setting(
    config: &PluginConfig,
    key: &str,
    default: StatusCode,
) -> anyhow::Result<StatusCode> {
    match config.setting_integer(key) {
        Some(code) => u16::try_from(code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| anyhow!("'{}' is not a valid HTTP status: {}", key, code)),
        None => Ok(default),
    }
}

/// Answers with a local reply when a request carries a configured header.
struct DenyHeader {
    request: Arc<HttpRequest>,
    header: Arc<str>,
    status: StatusCode,
}

impl DenyHeader {
    fn build(config: &PluginConfig) -> anyhow::Result<FilterFactory> {
        let header: Arc<str> = config.setting_str("header").unwrap_or("x-deny").into();
        let status = status_setting(config, "status", StatusCode::FORBIDDEN)?;
        Ok(Arc::new(move |request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(DenyHeader {
                request,
                header: header.clone(),
                status,
            })
        }))
    }
}

impl StreamFilter for DenyHeader {
    fn decode_headers(&mut self, headers: RequestHeaders<'_>, _: bool) -> Status {
        if !headers.contains(&self.header) {
            return Status::Continue;
        }
        let reply = LocalReply::new(self.status, format!("denied by {}\r\n", self.header))
            .with_details("denied_by_header");
        match self.request.send_local_reply(reply) {
            Ok(()) => Status::LocalReply,
            Err(err) => {
                self.request
                    .log(LogLevel::Warn, &format!("could not deny request: {}", err));
                Status::StopNoBuffer
            }
        }
    }
}

/// Buffers the request body and rejects it once it grows past a limit.
struct BodyLimit {
    request: Arc<HttpRequest>,
    max_bytes: usize,
    seen: usize,
}

impl BodyLimit {
    fn build(config: &PluginConfig) -> anyhow::Result<FilterFactory> {
        let max_bytes = match config.setting_integer("max_bytes") {
            Some(max) => usize::try_from(max).context("'max_bytes' must not be negative")?,
            None => 1024,
        };
        Ok(Arc::new(move |request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(BodyLimit {
                request,
                max_bytes,
                seen: 0,
            })
        }))
    }
}

impl StreamFilter for BodyLimit {
    fn decode_headers(&mut self, _: RequestHeaders<'_>, end_stream: bool) -> Status {
        if end_stream {
            Status::Continue
        } else {
            Status::StopNoBuffer
        }
    }

    fn decode_data(&mut self, data: BufferView<'_>, end_stream: bool) -> Status {
        self.seen += data.len();
        if self.seen > self.max_bytes {
            let reply = LocalReply::new(StatusCode::PAYLOAD_TOO_LARGE, "body too large\r\n")
                .with_details("body_limit_exceeded");
            return match self.request.send_local_reply(reply) {
                Ok(()) => Status::LocalReply,
                Err(_) => Status::StopNoBuffer,
            };
        }
        if end_stream {
            Status::Continue
        } else {
            Status::StopAndBuffer
        }
    }
}

/// Writes one log line per downstream access log event.
struct AccessLog {
    request: Arc<HttpRequest>,
    level: LogLevel,
    status: Option<u16>,
}

impl AccessLog {
    fn build(config: &PluginConfig) -> anyhow::Result<FilterFactory> {
        let level = match config.setting_str("level") {
            Some(level) => LogLevel::from_str(level).map_err(|err| anyhow!(err))?,
            None => LogLevel::Info,
        };
        Ok(Arc::new(move |request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(AccessLog {
                request,
                level,
                status: None,
            })
        }))
    }
}

impl StreamFilter for AccessLog {
    fn encode_headers(&mut self, headers: ResponseHeaders<'_>, _: bool) -> Status {
        self.status = headers.status();
        Status::Continue
    }

    fn on_log_downstream_start(&mut self) {
        let msg = format!("request {} started", self.request.key());
        self.request.log(self.level, &msg);
    }

    fn on_log(&mut self) {
        let msg = match self.status {
            Some(status) => format!("request {} ended with {}", self.request.key(), status),
            None => format!("request {} ended without a response", self.request.key()),
        };
        self.request.log(self.level, &msg);
    }
}

/// The phase a [`Panic`] filter fails in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PanicPhase {
    Factory,
    DecodeHeaders,
    DecodeData,
    EncodeHeaders,
    EncodeData,
    Log,
    Destroy,
}

impl FromStr for PanicPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "factory" => PanicPhase::Factory,
            "decode-headers" => PanicPhase::DecodeHeaders,
            "decode-data" => PanicPhase::DecodeData,
            "encode-headers" => PanicPhase::EncodeHeaders,
            "encode-data" => PanicPhase::EncodeData,
            "log" => PanicPhase::Log,
            "destroy" => PanicPhase::Destroy,
            other => bail!("unknown panic phase '{}'", other),
        })
    }
}

/// Fails in one configured phase.
struct Panic {
    phase: PanicPhase,
    message: Arc<str>,
}

impl Panic {
    fn build(config: &PluginConfig) -> anyhow::Result<FilterFactory> {
        let phase: PanicPhase = config
            .setting_str("phase")
            .unwrap_or("decode-headers")
            .parse()?;
        let message: Arc<str> = config
            .setting_str("message")
            .unwrap_or("filter failed")
            .into();
        Ok(Arc::new(move |_: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            if phase == PanicPhase::Factory {
                panic!("{}", message);
            }
            Box::new(Panic {
                phase,
                message: message.clone(),
            })
        }))
    }

    fn maybe_fail(&self, phase: PanicPhase) {
        if self.phase == phase {
            panic!("{}", self.message);
        }
    }
}

impl StreamFilter for Panic {
    fn decode_headers(&mut self, _: RequestHeaders<'_>, _: bool) -> Status {
        self.maybe_fail(PanicPhase::DecodeHeaders);
        Status::Continue
    }

    fn decode_data(&mut self, _: BufferView<'_>, _: bool) -> Status {
        self.maybe_fail(PanicPhase::DecodeData);
        Status::Continue
    }

    fn encode_headers(&mut self, _: ResponseHeaders<'_>, _: bool) -> Status {
        self.maybe_fail(PanicPhase::EncodeHeaders);
        Status::Continue
    }

    fn encode_data(&mut self, _: BufferView<'_>, _: bool) -> Status {
        self.maybe_fail(PanicPhase::EncodeData);
        Status::Continue
    }

    fn on_log(&mut self) {
        self.maybe_fail(PanicPhase::Log);
    }

    fn on_destroy(&mut self, _: filter_bridge_lib::DestroyReason) {
        self.maybe_fail(PanicPhase::Destroy);
    }
}

/// How an [`AsyncLookup`] waits for its simulated lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LookupMode {
    /// Park the worker in [`HttpRequest::suspend`] until the host resumes the request.
    Suspend,
    /// Return [`Status::Running`] and continue the request from the completion.
    Detach,
}

/// Performs a simulated asynchronous lookup while handling request headers.
struct AsyncLookup {
    request: Arc<HttpRequest>,
    env: FilterEnv,
    delay: Duration,
    mode: LookupMode,
}

impl AsyncLookup {
    fn build(config: &PluginConfig, env: FilterEnv) -> anyhow::Result<FilterFactory> {
        let delay = match config.setting_integer("delay_ms") {
            Some(ms) => Duration::from_millis(
                u64::try_from(ms).context("'delay_ms' must not be negative")?,
            ),
            None => env.resume_delay,
        };
        let mode = match config.setting_str("mode").unwrap_or("suspend") {
            "suspend" => LookupMode::Suspend,
            "detach" => LookupMode::Detach,
            other => bail!("unknown lookup mode '{}'", other),
        };
        Ok(Arc::new(move |request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(AsyncLookup {
                request,
                env: env.clone(),
                delay,
                mode,
            })
        }))
    }

    /// Have the host resume the request once the lookup completes.
    fn schedule_resume(&self) {
        let key = self.request.key();
        let bridge = self.env.bridge.clone();
        let delay = self.delay;
        self.env.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(bridge) = bridge.upgrade() {
                bridge.on_resume(key);
            }
        });
    }

    /// Continue the request from the completion itself.
    fn schedule_continue(&self) {
        let request = self.request.clone();
        let delay = self.delay;
        self.env.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            match request.continue_request(Status::Continue) {
                Ok(()) => {}
                Err(HostError::FilterDestroyed) => event!(
                    Level::DEBUG,
                    request = %request.key(),
                    "lookup finished after the request was destroyed"
                ),
                Err(err) => event!(
                    Level::WARN,
                    request = %request.key(),
                    "could not continue request: {}",
                    err
                ),
            }
        });
    }
}

impl StreamFilter for AsyncLookup {
    fn decode_headers(&mut self, _: RequestHeaders<'_>, _: bool) -> Status {
        match self.mode {
            LookupMode::Detach => {
                self.schedule_continue();
                Status::Running
            }
            LookupMode::Suspend => {
                self.schedule_resume();
                match self.request.suspend() {
                    Ok(()) => Status::Continue,
                    Err(err) => {
                        self.request
                            .log(LogLevel::Debug, &format!("lookup abandoned: {}", err));
                        Status::StopNoBuffer
                    }
                }
            }
        }
    }
}
