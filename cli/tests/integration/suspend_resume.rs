use {
    crate::common::{
        on_request_headers, test_headers, Harness, HostCall, Test, TestResult, PATIENCE,
    },
    filter_bridge_lib::{
        views::RequestHeaders,
        AccessLogType, DestroyReason, FilterFactory, FinalizeReason, HostError, HttpRequest,
        Lifecycle, PassThroughFilter, Phase, RequestKey, Status, StreamFilter,
    },
    std::{
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    },
};

/// Filters that park the worker until the host resumes the request.
fn suspending() -> FilterFactory {
    on_request_headers(|request: &HttpRequest| match request.suspend() {
        Ok(()) => Status::Continue,
        Err(HostError::FilterDestroyed) => Status::StopNoBuffer,
        Err(err) => panic!("unexpected suspend failure: {}", err),
    })
}

/// Run the request-headers phase on a separate worker thread.
fn spawn_headers(test: &Harness, id: u64, worker: u32) -> thread::JoinHandle<Status> {
    let bridge = test.bridge.clone();
    let handle = test.handle(id, worker, "suspend");
    thread::spawn(move || bridge.on_http_header(&handle, Phase::DecodeHeader, true, &test_headers()))
}

fn wait_for_lifecycle(test: &Harness, key: RequestKey, lifecycle: Lifecycle) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if test.bridge.lookup(key).map(|req| req.lifecycle()) == Some(lifecycle) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn suspended_filters_continue_once_resumed() -> TestResult {
    let test = Test::new().plugin("suspend", suspending()).start();
    let key = RequestKey::new(1, 0);

    let worker = spawn_headers(&test, 1, 0);
    assert!(wait_for_lifecycle(&test, key, Lifecycle::Suspended));
    test.bridge.on_resume(key);

    assert_eq!(worker.join().unwrap(), Status::Continue);
    assert_eq!(test.bridge.lookup(key).unwrap().lifecycle(), Lifecycle::Active);
    Ok(())
}

#[test]
fn resumes_that_arrive_first_are_not_lost() -> TestResult {
    let test = Test::new().plugin("suspend", suspending()).start();
    let req = test.handle(2, 0, "suspend");

    // Downstream-start logging creates the request before any header callback.
    test.bridge.on_http_log(&req, AccessLogType::DownstreamStart);
    test.bridge.on_resume(req.key());

    assert_eq!(test.headers(&req, Phase::DecodeHeader, true), Status::Continue);
    Ok(())
}

#[test]
fn destroy_releases_a_suspended_filter() -> TestResult {
    let test = Test::new().plugin("suspend", suspending()).start();
    let req = test.handle(3, 0, "suspend");

    let worker = spawn_headers(&test, 3, 0);
    assert!(wait_for_lifecycle(&test, req.key(), Lifecycle::Suspended));
    test.bridge.on_http_destroy(&req, DestroyReason::Terminate);

    assert_eq!(worker.join().unwrap(), Status::StopNoBuffer);
    assert!(test.bridge.lookup(req.key()).is_none());
    assert_eq!(
        test.host.wait_for_finalize(req.key()),
        Some(FinalizeReason::Normal)
    );
    Ok(())
}

#[test]
fn resumes_for_destroyed_requests_are_ignored() -> TestResult {
    let test = Test::new().plugin("suspend", suspending()).start();
    let req = test.handle(4, 0, "suspend");

    test.bridge.on_http_log(&req, AccessLogType::DownstreamStart);
    test.bridge.on_http_destroy(&req, DestroyReason::Normal);
    test.bridge.on_resume(req.key());
    test.bridge.on_resume(RequestKey::new(99, 0));

    assert_eq!(
        test.host.calls(),
        vec![HostCall::Finalize(req.key(), FinalizeReason::Normal)]
    );
    Ok(())
}

#[test]
fn suspending_after_destroy_fails_immediately() -> TestResult {
    let slot: Arc<Mutex<Option<Arc<HttpRequest>>>> = Arc::default();
    let factory: FilterFactory = {
        let slot = slot.clone();
        Arc::new(move |request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            *slot.lock().unwrap() = Some(request);
            Box::new(PassThroughFilter)
        })
    };
    let test = Test::new().plugin("keeper", factory).start();
    let req = test.handle(5, 0, "keeper");

    test.headers(&req, Phase::DecodeHeader, true);
    test.bridge.on_http_destroy(&req, DestroyReason::Normal);
    let request = slot.lock().unwrap().take().expect("filter was built");
    assert_eq!(request.suspend(), Err(HostError::FilterDestroyed));
    Ok(())
}

/// Hands request headers off to another thread and continues the request from there.
struct Detach {
    request: Arc<HttpRequest>,
}

impl StreamFilter for Detach {
    fn decode_headers(&mut self, _: RequestHeaders<'_>, _: bool) -> Status {
        let request = self.request.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            request.continue_request(Status::Continue)
        });
        Status::Running
    }
}

#[test]
fn running_filters_continue_the_request_from_elsewhere() -> TestResult {
    let factory: FilterFactory =
        Arc::new(|request: Arc<HttpRequest>| -> Box<dyn StreamFilter> {
            Box::new(Detach { request })
        });
    let test = Test::new().plugin("detach", factory).start();
    let req = test.handle(6, 0, "detach");

    assert_eq!(test.headers(&req, Phase::DecodeHeader, true), Status::Running);
    let continued = HostCall::Continue(req.key(), Status::Continue);
    assert!(test.host.wait_until(|calls| calls.contains(&continued)));
    Ok(())
}
