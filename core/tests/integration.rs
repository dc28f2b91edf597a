//! End-to-end batches against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives `UreqTransport`
//! through `MultiExecutor` and through single `call`s over real HTTP.
//! Connection reuse and stop behavior are checked against a bare keep-alive
//! server that counts what it accepts.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ntest::timeout;
use rest_multi::{
    MemorySink, MultiExecutor, Outcome, RequestBody, ResponseBody, RestClient, TransportError,
    UreqTransport,
};

fn start_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

struct CountingServer {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

/// HTTP/1.1 keep-alive server answering `ok` to every request. Paths
/// containing `/slow` are answered after 300ms; `/latin1` adds a header
/// whose value is not UTF-8.
fn start_counting_server() -> CountingServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));

    let (accepted, served) = (accepts.clone(), requests.clone());
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            accepted.fetch_add(1, Ordering::SeqCst);
            let served = served.clone();
            thread::spawn(move || serve_keep_alive(stream, served));
        }
    });

    CountingServer { addr, accepts, requests }
}

fn serve_keep_alive(stream: TcpStream, served: Arc<AtomicUsize>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
            return;
        }
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            if line == "\r\n" {
                break;
            }
        }
        served.fetch_add(1, Ordering::SeqCst);
        if request_line.contains("/slow") {
            thread::sleep(Duration::from_millis(300));
        }
        let reply: &[u8] = if request_line.contains("/latin1") {
            b"HTTP/1.1 200 OK\r\nX-Name: caf\xe9\r\nContent-Length: 2\r\n\r\nok"
        } else {
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok"
        };
        if writer.write_all(reply).and_then(|_| writer.flush()).is_err() {
            return;
        }
    }
}

#[test]
#[timeout(20000)]
fn batch_against_live_server() {
    let addr = start_server();
    let client = RestClient::new();

    let mut multi = MultiExecutor::new(UreqTransport::new()).with_sink(MemorySink::new());
    multi.limit(3).poll_interval(Duration::from_millis(1));

    // Later submissions sleep less, so they tend to finish first.
    for i in 0..6u64 {
        let ms = (6 - i) * 20;
        let req = client.get(&format!("http://{addr}/delay/{ms}/ok-{i}"), RequestBody::None);
        multi.enqueue(req).unwrap();
    }
    multi.enqueue(client.get(&format!("http://{addr}/status/404"), RequestBody::None)).unwrap();
    multi.enqueue(client.get(&format!("http://{addr}/status/204"), RequestBody::None)).unwrap();

    let report = multi.execute_report();
    assert!(report.is_complete());
    assert!(report.peak_in_flight <= 3);
    assert_eq!(report.results.len(), 7);
    assert_eq!(report.outcomes[6], Outcome::HttpError(404));
    assert_eq!(report.outcomes[7], Outcome::Success(204));

    let mut bodies: Vec<String> = report
        .results
        .iter()
        .filter(|r| r.status == 200)
        .map(|r| r.body.to_text())
        .collect();
    bodies.sort();
    let expected: Vec<String> = (0..6).map(|i| format!("ok-{i}")).collect();
    assert_eq!(bodies, expected);
    assert!(report.results.iter().any(|r| r.body == ResponseBody::Empty));
}

#[test]
#[timeout(20000)]
fn cookies_headers_and_form_reach_the_server() {
    let addr = start_server();
    let mut client = RestClient::new();
    client
        .set_cookie("a", "1")
        .set_cookie("b c", "2 3")
        .basic_auth("user", "pass")
        .decode(true);
    client.add_header("X-Trace: abc").unwrap();

    let mut multi = MultiExecutor::new(UreqTransport::new());
    multi.poll_interval(Duration::from_millis(1));
    multi
        .enqueue(client.post(
            &format!("http://{addr}/echo"),
            RequestBody::form([("name", "rust lang"), ("n", "1")]),
        ))
        .unwrap();
    multi
        .enqueue(client.get(&format!("http://{addr}/echo"), RequestBody::form([("q", "x y")])))
        .unwrap();

    let results = multi.execute();
    assert_eq!(results.len(), 2);
    for record in &results {
        let echo: mock_server::Echo =
            serde_json::from_value(record.body.as_json().unwrap().clone()).unwrap();

        let expected: BTreeMap<String, String> = client.cookies().clone();
        assert_eq!(echo.cookies, expected);
        assert_eq!(echo.headers.get("x-trace").map(String::as_str), Some("abc"));
        assert_eq!(
            echo.headers.get("authorization").map(String::as_str),
            Some("Basic dXNlcjpwYXNz")
        );
        match echo.method.as_str() {
            "POST" => {
                assert_eq!(echo.body, "name=rust%20lang&n=1");
                assert_eq!(
                    echo.headers.get("content-type").map(String::as_str),
                    Some("application/x-www-form-urlencoded")
                );
            }
            "GET" => assert_eq!(echo.query.as_deref(), Some("q=x%20y")),
            other => panic!("unexpected method {other}"),
        }
    }
}

#[test]
#[timeout(20000)]
fn multipart_upload_is_sent_verbatim() {
    let addr = start_server();
    let client = RestClient::new();
    let file = rest_multi::encode_file("hello.txt", "text/plain", b"hello world");
    let boundary = file.boundary().to_string();
    let req = client.file_request(rest_multi::HttpMethod::Put, &format!("http://{addr}/echo"), file);

    let response = UreqTransport::new().call(&req).unwrap();
    let echo: mock_server::Echo = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(echo.method, "PUT");
    assert!(echo.body.contains("filename=\"hello.txt\""));
    assert!(echo.body.ends_with(&format!("--{boundary}--")));
    assert_eq!(
        echo.headers.get("content-type").cloned(),
        Some(format!("multipart/form-data; boundary={boundary}"))
    );
}

#[test]
#[timeout(20000)]
fn single_call_and_exec() {
    let addr = start_server();
    let client = RestClient::new();

    let req = client.get(&format!("http://{addr}/json/books"), RequestBody::None);
    let mut decoding = req.clone();
    decoding.decode = true;
    let response = UreqTransport::new().call(&decoding).unwrap();
    let exchange = client.exec(&decoding, response, Duration::ZERO);
    assert_eq!(exchange.info.status, 200);
    assert_eq!(exchange.response.unwrap().as_json().unwrap()["tag"], "books");

    let req = client.delete(&format!("http://{addr}/status/500"), RequestBody::None);
    let response = UreqTransport::new().call(&req).unwrap();
    let exchange = client.exec(&req, response, Duration::ZERO);
    assert!(!exchange.is_success());
    assert_eq!(exchange.info.status, 500);
}

#[test]
#[timeout(20000)]
fn per_request_timeout_is_a_transport_error() {
    let addr = start_server();
    let mut client = RestClient::new();
    client.set_timeout(Duration::from_millis(50));

    let req = client.get(&format!("http://{addr}/delay/2000/late"), RequestBody::None);
    let err = UreqTransport::new().call(&req).unwrap_err();
    assert_eq!(err, TransportError::Timeout);
}

#[test]
#[timeout(20000)]
fn connection_refused_is_reported_per_request() {
    // Bind then drop to get a port nobody listens on.
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let addr = start_server();
    let client = RestClient::new();

    let mut multi = MultiExecutor::new(UreqTransport::new());
    multi.poll_interval(Duration::from_millis(1));
    multi
        .enqueue(client.get(&format!("http://{dead}/nothing"), RequestBody::None))
        .unwrap()
        .enqueue(client.get(&format!("http://{addr}/status/200"), RequestBody::None))
        .unwrap();

    let report = multi.execute_report();
    assert!(matches!(report.outcomes[0], Outcome::TransportError(_)));
    assert_eq!(report.outcomes[1], Outcome::Success(200));
    assert_eq!(report.results.len(), 1);
    assert_eq!(multi.transport().outstanding(), 0);
}

#[test]
#[timeout(20000)]
fn sequential_batch_reuses_one_connection() {
    let server = start_counting_server();
    let client = RestClient::new();

    let mut multi = MultiExecutor::new(UreqTransport::new());
    multi.limit(1).poll_interval(Duration::from_millis(1));
    for i in 0..5 {
        let url = format!("http://{}/item/{i}", server.addr);
        multi.enqueue(client.get(&url, RequestBody::None)).unwrap();
    }

    let report = multi.execute_report();
    assert!(report.is_complete());
    assert_eq!(report.results.len(), 5);
    assert!(report.results.iter().all(|r| r.body.to_text() == "ok"));
    assert_eq!(server.requests.load(Ordering::SeqCst), 5);
    assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
}

#[test]
#[timeout(20000)]
fn worker_threads_are_bounded_by_the_window() {
    let addr = start_server();
    let client = RestClient::new();

    let mut multi = MultiExecutor::new(UreqTransport::new());
    multi.limit(3).poll_interval(Duration::from_millis(1));
    for i in 0..12 {
        let url = format!("http://{addr}/delay/20/n-{i}");
        multi.enqueue(client.get(&url, RequestBody::None)).unwrap();
    }

    let report = multi.execute_report();
    assert_eq!(report.results.len(), 12);
    assert!(multi.transport().workers() >= 1);
    assert!(multi.transport().workers() <= 3);

    // A second batch reuses the pool.
    for i in 0..4 {
        let url = format!("http://{addr}/delay/5/again-{i}");
        multi.enqueue(client.get(&url, RequestBody::None)).unwrap();
    }
    assert_eq!(multi.execute().len(), 4);
    assert!(multi.transport().workers() <= 3);
}

#[test]
#[timeout(20000)]
fn cancelled_queued_request_never_reaches_the_server() {
    let server = start_counting_server();
    let client = RestClient::new();

    // One worker: the second request waits in the job queue behind the slow one.
    let mut multi = MultiExecutor::new(UreqTransport::new().max_workers(1));
    multi
        .limit(2)
        .admission(rest_multi::AdmissionPolicy::Exact)
        .poll_interval(Duration::from_millis(1));
    multi
        .enqueue(client.get(&format!("http://{}/slow", server.addr), RequestBody::None))
        .unwrap()
        .enqueue(client.get(&format!("http://{}/fast", server.addr), RequestBody::None))
        .unwrap();

    let token = multi.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.cancel();
    });
    let report = multi.execute_report();
    canceller.join().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.outcomes, vec![Outcome::Cancelled, Outcome::Cancelled]);
    assert_eq!(multi.transport().outstanding(), 0);

    // The slow request was already on the wire and finishes detached; the
    // queued one is skipped once the worker frees up.
    thread::sleep(Duration::from_millis(600));
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
    assert_eq!(multi.transport().workers(), 1);
}

#[test]
#[timeout(20000)]
fn non_utf8_header_value_is_kept() {
    let server = start_counting_server();
    let req = RestClient::new().get(&format!("http://{}/latin1", server.addr), RequestBody::None);

    let response = UreqTransport::new().call(&req).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-name"), Some("caf\u{fffd}"));
}
