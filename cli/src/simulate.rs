//! Plays scenario requests through a [`Bridge`] the way the proxy core's workers would.

use {
    crate::{
        host::RecordingHost,
        scenario::{Scenario, ScenarioRequest},
    },
    anyhow::{anyhow, Context},
    filter_bridge_lib::{
        AccessLogType, Bridge, DestroyReason, FinalizeReason, HostRequest, Phase, RequestKey,
        Status,
    },
    http::HeaderMap,
    itertools::Itertools,
    std::{any::Any, collections::HashMap, fmt, sync::Arc, thread, time::Duration},
    tracing::{event, Level},
};

/// How a request ended, as the downstream client would see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ending {
    /// Every phase ran and the response went out.
    Completed,
    /// A filter answered with a local reply of this status.
    LocalReply(u16),
    /// A filter failed and the bridge answered for it.
    Failed,
}

impl fmt::Display for Ending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ending::Completed => f.write_str("completed"),
            Ending::LocalReply(status) => write!(f, "local reply {}", status),
            Ending::Failed => f.write_str("filter failed"),
        }
    }
}

/// What happened to one scenario request.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub key: RequestKey,
    pub plugin: String,
    pub ending: Ending,
    /// Whether the host destroyed the request.
    pub destroyed: bool,
}

/// The result of playing a whole scenario.
#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
    /// Workers that died on a contract violation, with what they reported.
    pub failed_workers: Vec<(u32, String)>,
    /// Destroyed requests whose state was never finalized.
    pub unfinalized: Vec<RequestKey>,
    /// Requests released without a destroy callback.
    pub abandoned: usize,
}

impl Report {
    /// Whether every worker finished and every destroyed request was finalized.
    pub fn succeeded(&self) -> bool {
        self.failed_workers.is_empty() && self.unfinalized.is_empty()
    }

    pub fn summary(&self) -> String {
        let counts = self
            .outcomes
            .iter()
            .counts_by(|outcome| outcome.ending)
            .into_iter()
            .sorted()
            .map(|(ending, count)| format!("{} {}", count, ending))
            .join(", ");
        format!(
            "{} requests: {}; {} abandoned; {} unfinalized; {} failed workers",
            self.outcomes.len(),
            if counts.is_empty() { "none".to_owned() } else { counts },
            self.abandoned,
            self.unfinalized.len(),
            self.failed_workers.len()
        )
    }
}

/// Drives scenario requests, one thread per worker.
pub struct Simulation {
    bridge: Arc<Bridge>,
    host: Arc<RecordingHost>,
    continue_timeout: Duration,
}

impl Simulation {
    pub fn new(
        bridge: Arc<Bridge>,
        host: Arc<RecordingHost>,
        continue_timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            host,
            continue_timeout,
        }
    }

    /// Play every request in `scenario`, then release whatever the host never destroyed.
    pub fn run(&self, scenario: &Scenario) -> anyhow::Result<Report> {
        let concurrency = self.bridge.concurrency();
        let by_worker = scenario
            .requests
            .iter()
            .cloned()
            .into_group_map_by(|req| req.worker);

        let workers = (0..concurrency)
            .map(|worker| {
                let requests = by_worker.get(&worker).cloned().unwrap_or_default();
                let driver = Driver {
                    bridge: self.bridge.clone(),
                    host: self.host.clone(),
                    config_ids: scenario
                        .config
                        .plugins()
                        .iter()
                        .map(|(name, plugin)| (name.clone(), plugin.config_id()))
                        .collect(),
                    continue_timeout: self.continue_timeout,
                };
                thread::Builder::new()
                    .name(format!("worker-{}", worker))
                    .spawn(move || driver.drive_all(&requests))
                    .map(|handle| (worker, handle))
                    .context("failed to spawn worker thread")
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut report = Report::default();
        for (worker, handle) in workers {
            match handle.join() {
                Ok(Ok(outcomes)) => report.outcomes.extend(outcomes),
                Ok(Err(err)) => report.failed_workers.push((worker, format!("{:#}", err))),
                Err(payload) => {
                    let msg = panic_message(&*payload);
                    event!(Level::ERROR, worker, "worker died: {}", msg);
                    report.failed_workers.push((worker, msg));
                }
            }
        }
        report.outcomes.sort_by_key(|outcome| outcome.key);

        // Finalization can trail destroy while an async completion still holds the request.
        let destroyed = report
            .outcomes
            .iter()
            .filter(|outcome| outcome.destroyed)
            .map(|outcome| outcome.key)
            .collect::<Vec<_>>();
        if !self
            .host
            .wait_for_finalized(&destroyed, self.continue_timeout)
        {
            report.unfinalized = destroyed
                .into_iter()
                .filter(|key| self.host.record(*key).finalized != Some(FinalizeReason::Normal))
                .collect();
            event!(
                Level::WARN,
                "destroyed requests never finalized: {}",
                report.unfinalized.iter().join(", ")
            );
        }

        report.abandoned = self.bridge.reset_all();
        Ok(report)
    }
}

/// One worker's view of the simulation.
struct Driver {
    bridge: Arc<Bridge>,
    host: Arc<RecordingHost>,
    config_ids: HashMap<String, u64>,
    continue_timeout: Duration,
}

/// Whether to keep feeding a request through its phases.
enum Flow {
    Next,
    Stop,
}

impl Driver {
    fn drive_all(&self, requests: &[ScenarioRequest]) -> anyhow::Result<Vec<Outcome>> {
        requests.iter().map(|req| self.drive(req)).collect()
    }

    fn drive(&self, req: &ScenarioRequest) -> anyhow::Result<Outcome> {
        let key = RequestKey::new(req.id, req.worker);
        let config_id = req
            .config_id
            .or_else(|| self.config_ids.get(&req.plugin).copied())
            .unwrap_or_default();
        let handle = HostRequest::new(key, config_id, req.plugin.as_str());
        event!(Level::DEBUG, request = %key, plugin = %req.plugin, "request started");

        if req.log_downstream_start {
            self.bridge
                .on_http_log(&handle, AccessLogType::DownstreamStart);
        }
        self.play(&handle, req)?;
        self.bridge.on_http_log(&handle, AccessLogType::DownstreamEnd);
        if req.destroy {
            self.bridge.on_http_destroy(&handle, DestroyReason::Normal);
        }

        let record = self.host.record(key);
        let ending = match (&record.reply, record.failed) {
            (Some(_), true) => Ending::Failed,
            (Some(reply), false) => Ending::LocalReply(reply.status.as_u16()),
            (None, _) => Ending::Completed,
        };
        Ok(Outcome {
            key,
            plugin: req.plugin.clone(),
            ending,
            destroyed: req.destroy,
        })
    }

    /// Feed the request through every phase until one ends it.
    fn play(&self, handle: &HostRequest, req: &ScenarioRequest) -> anyhow::Result<()> {
        let body = req.request_body();
        let trailers = req.request_trailers()?;
        let flow = self.headers(
            handle,
            Phase::DecodeHeader,
            &req.request_headers()?,
            body.is_empty() && trailers.is_none(),
        )?;
        if let Flow::Stop = flow {
            return Ok(());
        }
        if let Flow::Stop = self.body(handle, Phase::DecodeData, &body, trailers.is_none())? {
            return Ok(());
        }
        if let Some(trailers) = trailers {
            if let Flow::Stop = self.headers(handle, Phase::DecodeTrailer, &trailers, true)? {
                return Ok(());
            }
        }

        let body = req.response_body();
        let trailers = req.response_trailers()?;
        let flow = self.headers(
            handle,
            Phase::EncodeHeader,
            &req.response_headers()?,
            body.is_empty() && trailers.is_none(),
        )?;
        if let Flow::Stop = flow {
            return Ok(());
        }
        if let Flow::Stop = self.body(handle, Phase::EncodeData, &body, trailers.is_none())? {
            return Ok(());
        }
        if let Some(trailers) = trailers {
            self.headers(handle, Phase::EncodeTrailer, &trailers, true)?;
        }
        Ok(())
    }

    fn headers(
        &self,
        handle: &HostRequest,
        phase: Phase,
        headers: &HeaderMap,
        end_stream: bool,
    ) -> anyhow::Result<Flow> {
        let status = self
            .bridge
            .on_http_header(handle, phase, end_stream, headers);
        self.settle(handle.key(), phase, status)
    }

    fn body(
        &self,
        handle: &HostRequest,
        phase: Phase,
        chunks: &[bytes::Bytes],
        ends_stream: bool,
    ) -> anyhow::Result<Flow> {
        for (i, chunk) in chunks.iter().enumerate() {
            let end_stream = ends_stream && i + 1 == chunks.len();
            let status = self
                .bridge
                .on_http_data(handle, phase, end_stream, chunk);
            if let Flow::Stop = self.settle(handle.key(), phase, status)? {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Next)
    }

    /// Turn a directive into what the host does next, waiting out a parked filter chain.
    fn settle(&self, key: RequestKey, phase: Phase, status: Status) -> anyhow::Result<Flow> {
        let status = match status {
            Status::Running => self
                .host
                .wait_for_continue(key, self.continue_timeout)
                .ok_or_else(|| anyhow!("request {} was never continued after {:?}", key, phase))?,
            status => status,
        };
        event!(Level::TRACE, request = %key, ?phase, ?status, "phase done");
        Ok(match status {
            Status::LocalReply => Flow::Stop,
            _ => Flow::Next,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_owned()
    }
}
