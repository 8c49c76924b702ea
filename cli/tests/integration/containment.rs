use {
    crate::common::{Events, HostCall, Test, TestResult},
    filter_bridge_lib::{
        views::{BufferView, RequestHeaders, ResponseHeaders},
        AccessLogType, DestroyReason, FilterFactory, FinalizeReason, HostError, HttpRequest,
        Phase, Status, StreamFilter,
    },
    std::{panic::panic_any, sync::Arc},
};

/// Where a [`Fragile`] filter breaks, and how.
#[derive(Clone, Copy, PartialEq)]
enum Break {
    RequestHeaders,
    RequestData,
    Log,
    Destroy,
    /// Fails with a host error as if a host call had been made for a finished request.
    RequestGone,
    /// Asks for more data on the last chunk.
    WaitOnLastChunk,
}

struct Fragile {
    at: Break,
    events: Events,
}

impl Fragile {
    fn factory(at: Break, events: Events) -> FilterFactory {
        Arc::new(move |_: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(Fragile {
                at,
                events: events.clone(),
            })
        })
    }

    fn note(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_owned());
    }
}

impl StreamFilter for Fragile {
    fn decode_headers(&mut self, _: RequestHeaders<'_>, end_stream: bool) -> Status {
        self.note("decode_headers");
        match self.at {
            Break::RequestHeaders => panic!("bad headers"),
            Break::RequestGone => panic_any(HostError::RequestFinished),
            Break::WaitOnLastChunk if end_stream => Status::StopAndBuffer,
            _ => Status::Continue,
        }
    }

    fn decode_data(&mut self, _: BufferView<'_>, end_stream: bool) -> Status {
        self.note("decode_data");
        match self.at {
            Break::RequestData => panic!("bad body"),
            Break::WaitOnLastChunk if end_stream => Status::StopAndBufferWatermark,
            _ => Status::Continue,
        }
    }

    fn encode_headers(&mut self, _: ResponseHeaders<'_>, _: bool) -> Status {
        self.note("encode_headers");
        Status::Continue
    }

    fn on_log(&mut self) {
        self.note("log_end");
        if self.at == Break::Log {
            panic!("bad log");
        }
    }

    fn on_destroy(&mut self, _: DestroyReason) {
        self.note("destroy");
        if self.at == Break::Destroy {
            panic!("bad destroy");
        }
    }
}

fn fragile(at: Break) -> (crate::common::Harness, Events) {
    let events = Events::default();
    let test = Test::new()
        .plugin("fragile", Fragile::factory(at, events.clone()))
        .start();
    (test, events)
}

#[test]
fn header_failures_are_answered_immediately() -> TestResult {
    let (test, events) = fragile(Break::RequestHeaders);
    let req = test.handle(1, 0, "fragile");

    assert_eq!(test.headers(&req, Phase::DecodeHeader, true), Status::LocalReply);
    assert_eq!(test.host.calls(), vec![HostCall::PanicReply(req.key())]);
    let info = test.bridge.lookup(req.key()).unwrap().panic_info();
    assert!(info.panicked());
    assert_eq!(info.details(), "bad headers");

    // The failed filter is never called for another phase, but still hears about destroy.
    assert_eq!(test.headers(&req, Phase::EncodeHeader, true), Status::LocalReply);
    test.bridge.on_http_log(&req, AccessLogType::DownstreamEnd);
    test.bridge.on_http_destroy(&req, DestroyReason::Normal);
    assert_eq!(*events.lock().unwrap(), vec!["decode_headers", "destroy"]);
    assert_eq!(
        test.host.calls(),
        vec![
            HostCall::PanicReply(req.key()),
            HostCall::PanicReply(req.key()),
            HostCall::Finalize(req.key(), FinalizeReason::Normal),
        ]
    );
    Ok(())
}

#[test]
fn body_failures_are_answered_on_the_next_callback() -> TestResult {
    let (test, events) = fragile(Break::RequestData);
    let req = test.handle(2, 0, "fragile");

    assert_eq!(test.headers(&req, Phase::DecodeHeader, false), Status::Continue);
    assert_eq!(test.data(&req, Phase::DecodeData, false, "a"), Status::StopNoBuffer);
    assert!(test.host.calls().is_empty());

    assert_eq!(test.data(&req, Phase::DecodeData, true, "b"), Status::LocalReply);
    assert_eq!(test.host.calls(), vec![HostCall::PanicReply(req.key())]);
    assert_eq!(*events.lock().unwrap(), vec!["decode_headers", "decode_data"]);
    Ok(())
}

#[test]
fn replies_the_host_cannot_take_yet_are_deferred() -> TestResult {
    let (test, _) = fragile(Break::RequestHeaders);
    let req = test.handle(3, 0, "fragile");

    test.host
        .refuse_replies_with(Some(HostError::NotInFilterContext));
    assert_eq!(test.headers(&req, Phase::DecodeHeader, false), Status::StopNoBuffer);
    assert!(test.host.calls().is_empty());

    test.host.refuse_replies_with(None);
    assert_eq!(test.data(&req, Phase::DecodeData, true, "x"), Status::LocalReply);
    assert_eq!(test.host.calls(), vec![HostCall::PanicReply(req.key())]);
    Ok(())
}

#[test]
fn failures_on_finished_requests_are_not_replayed() -> TestResult {
    let (test, events) = fragile(Break::RequestGone);
    let req = test.handle(4, 0, "fragile");

    assert_eq!(test.headers(&req, Phase::DecodeHeader, false), Status::StopNoBuffer);
    assert!(!test.bridge.lookup(req.key()).unwrap().panic_info().panicked());
    assert_eq!(test.data(&req, Phase::DecodeData, true, "x"), Status::Continue);
    assert!(test.host.calls().is_empty());
    assert_eq!(*events.lock().unwrap(), vec!["decode_headers", "decode_data"]);
    Ok(())
}

#[test]
fn logging_failures_end_the_request() -> TestResult {
    let (test, events) = fragile(Break::Log);
    let req = test.handle(5, 0, "fragile");

    test.headers(&req, Phase::DecodeHeader, true);
    test.bridge.on_http_log(&req, AccessLogType::DownstreamEnd);
    assert!(test.bridge.lookup(req.key()).unwrap().panic_info().panicked());
    // Logging has no directive to answer with, so the reply waits for the next entry.
    assert!(test.host.calls().is_empty());

    assert_eq!(test.headers(&req, Phase::EncodeHeader, true), Status::LocalReply);
    assert_eq!(test.host.calls(), vec![HostCall::PanicReply(req.key())]);
    assert_eq!(*events.lock().unwrap(), vec!["decode_headers", "log_end"]);
    Ok(())
}

#[test]
fn destroy_failures_still_release_the_request() -> TestResult {
    let (test, events) = fragile(Break::Destroy);
    let req = test.handle(6, 0, "fragile");

    test.headers(&req, Phase::DecodeHeader, true);
    test.bridge.on_http_destroy(&req, DestroyReason::Normal);

    assert!(test.bridge.lookup(req.key()).is_none());
    assert_eq!(*events.lock().unwrap(), vec!["decode_headers", "destroy"]);
    assert_eq!(
        test.host.calls(),
        vec![HostCall::Finalize(req.key(), FinalizeReason::Normal)]
    );
    Ok(())
}

#[test]
fn factory_failures_are_answered_on_the_first_callback() -> TestResult {
    let factory: FilterFactory =
        Arc::new(|_: Arc<HttpRequest>| -> Box<dyn StreamFilter> { panic!("no filter for you") });
    let test = Test::new().plugin("broken", factory).start();
    let req = test.handle(7, 0, "broken");

    assert_eq!(test.headers(&req, Phase::DecodeHeader, false), Status::LocalReply);
    assert_eq!(test.data(&req, Phase::DecodeData, true, "x"), Status::LocalReply);
    test.bridge.on_http_destroy(&req, DestroyReason::Normal);
    assert_eq!(
        test.host.calls(),
        vec![
            HostCall::PanicReply(req.key()),
            HostCall::PanicReply(req.key()),
            HostCall::Finalize(req.key(), FinalizeReason::Normal),
        ]
    );
    Ok(())
}

#[test]
#[should_panic(expected = "received wait data status when there is no data")]
fn waiting_for_data_after_the_last_header_is_a_contract_violation() {
    let (test, _) = fragile(Break::WaitOnLastChunk);
    let req = test.handle(8, 0, "fragile");
    test.headers(&req, Phase::DecodeHeader, true);
}

#[test]
#[should_panic(expected = "received wait data status when there is no data")]
fn waiting_for_data_after_the_last_chunk_is_a_contract_violation() {
    let (test, _) = fragile(Break::WaitOnLastChunk);
    let req = test.handle(9, 0, "fragile");
    assert_eq!(test.headers(&req, Phase::DecodeHeader, false), Status::Continue);
    test.data(&req, Phase::DecodeData, true, "last");
}

#[test]
#[should_panic(expected = "data callback for unknown request")]
fn data_for_an_unknown_request_is_a_contract_violation() {
    let (test, _) = fragile(Break::RequestData);
    let req = test.handle(10, 0, "fragile");
    test.data(&req, Phase::DecodeData, true, "x");
}

#[test]
#[should_panic(expected = "destroy callback for unknown request")]
fn destroying_an_unknown_request_is_a_contract_violation() {
    let (test, _) = fragile(Break::Destroy);
    let req = test.handle(11, 0, "fragile");
    test.bridge.on_http_destroy(&req, DestroyReason::Normal);
}

#[test]
#[should_panic(expected = "carries data phase")]
fn header_callbacks_with_a_data_phase_are_a_contract_violation() {
    let (test, _) = fragile(Break::Destroy);
    let req = test.handle(12, 0, "fragile");
    test.headers(&req, Phase::DecodeData, false);
}
