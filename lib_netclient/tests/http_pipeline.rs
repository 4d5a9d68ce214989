//! End-to-end HTTP pipeline tests against a loopback server.
//!
//! A minimal hand-rolled HTTP/1.1 responder stands in for the remote side
//! so the full path (submission, worker, rate limiter, batch, retry,
//! cancellation, delivery) is exercised without leaving the machine.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use lib_netclient::{
    ClientError, ErrorCode, Headers, HttpRequest, HttpResponse, Library, QueryParams,
    TransportError,
};

/// Routes library log output into the test harness's captured output.
fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What the loopback server saw for one exchange.
#[derive(Debug)]
struct ReceivedRequest {
    method: String,
    target: String,
    content_length: usize,
    body: Vec<u8>,
}

/// Per-exchange behavior of the loopback server.
struct Exchange {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
}

impl Exchange {
    fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.as_bytes().to_vec(),
            delay: Duration::ZERO,
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(body: &str, delay: Duration) -> Self {
        Self {
            status: 200,
            body: body.as_bytes().to_vec(),
            delay,
        }
    }
}

/// Starts a sequential loopback server; `respond` decides each exchange
/// from the (0-based) request ordinal and the parsed request.
fn start_server(
    respond: impl Fn(usize, &ReceivedRequest) -> Exchange + Send + 'static,
) -> (SocketAddr, mpsc::Receiver<ReceivedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let (seen_tx, seen_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut ordinal = 0usize;
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let Some(request) = read_request(&mut stream) else {
                continue;
            };
            let exchange = respond(ordinal, &request);
            let _ = seen_tx.send(request);
            ordinal += 1;
            std::thread::sleep(exchange.delay);
            let head = format!(
                "HTTP/1.1 {} Test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                exchange.status,
                exchange.body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&exchange.body);
        }
    });
    (addr, seen_rx)
}

fn read_request(stream: &mut TcpStream) -> Option<ReceivedRequest> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).ok()?;
    }
    Some(ReceivedRequest {
        method,
        target,
        content_length,
        body,
    })
}

fn collecting_callback() -> (
    Box<dyn FnMut(HttpResponse) + Send>,
    mpsc::Receiver<HttpResponse>,
) {
    let (tx, rx) = mpsc::channel();
    (
        Box::new(move |response| {
            let _ = tx.send(response);
        }),
        rx,
    )
}

#[test]
fn basic_get_delivers_ready_response() {
    init_test_logging();
    let (addr, _seen) = start_server(|_, _| Exchange::ok("pong"));
    let library = Library::new();
    library.init(true);

    let (id, receiver) =
        library.http_get_future(&format!("http://{addr}/ping"), &QueryParams::new(), &Headers::new());
    let response = receiver.blocking_recv().expect("terminal response");

    assert!(id > 0);
    assert!(response.ready);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "pong");
    assert!(response.error_code.is_ok());
    assert!(response.total_time >= 0.0);
    assert!(response.headers.contains_key("content-length"));

    library.deinit();
}

#[test]
fn post_body_arrives_byte_exact() {
    init_test_logging();
    let (addr, seen) = start_server(|_, _| Exchange::ok("stored"));
    let library = Library::new();
    library.init(true);

    let payload = r#"{"x":1}"#;
    let mut headers = Headers::new();
    headers.insert("Content-Type", "application/json");
    let (_, receiver) = library.http_post_future(
        &format!("http://{addr}/post"),
        &QueryParams::new(),
        &headers,
        payload,
    );
    let response = receiver.blocking_recv().expect("terminal response");
    assert_eq!(response.status_code, 200);

    let request = seen.recv_timeout(Duration::from_secs(5)).expect("request seen");
    assert_eq!(request.method, "POST");
    assert_eq!(request.target, "/post");
    assert_eq!(request.content_length, payload.len());
    assert_eq!(request.body, payload.as_bytes());

    library.deinit();
}

#[test]
fn retry_on_500_reports_every_attempt() {
    init_test_logging();
    let (addr, _seen) = start_server(|_, _| Exchange::status(500));
    let library = Library::new();
    library.init(true);

    let mut request = HttpRequest::default();
    request.url = format!("http://{addr}/flaky");
    request.retry_attempts = 3;
    request.retry_delay_ms = 300;

    let (callback, responses) = collecting_callback();
    let started = Instant::now();
    library.submit(request, callback);

    let mut attempts = Vec::new();
    loop {
        let response = responses
            .recv_timeout(Duration::from_secs(10))
            .expect("attempt response");
        let terminal = response.ready;
        attempts.push(response);
        if terminal {
            break;
        }
    }
    let elapsed = started.elapsed();

    assert_eq!(attempts.len(), 3);
    let terminal = attempts.last().expect("terminal");
    assert_eq!(terminal.status_code, 500);
    assert_eq!(terminal.retry_attempt, 3);
    assert_eq!(terminal.error_code, ErrorCode::Http(500));
    // Two retry delays had to pass before the terminal attempt.
    assert!(elapsed >= Duration::from_millis(600), "elapsed {elapsed:?}");

    library.deinit();
}

#[test]
fn cancel_in_flight_yields_499_and_acknowledgement() {
    init_test_logging();
    let (addr, _seen) = start_server(|_, _| Exchange::delayed("late", Duration::from_secs(5)));
    let library = Library::new();
    library.init(true);

    let (callback, responses) = collecting_callback();
    let mut request = HttpRequest::default();
    request.url = format!("http://{addr}/slow");
    let id = library.submit(request, callback);

    // Let the transfer enter its batch before cancelling.
    std::thread::sleep(Duration::from_millis(300));
    let (ack_tx, ack_rx) = mpsc::channel();
    library.cancel_request_by_id(id, move || {
        let _ = ack_tx.send(());
    });

    let response = responses
        .recv_timeout(Duration::from_secs(5))
        .expect("cancellation response");
    assert_eq!(response.status_code, 499);
    assert_eq!(
        response.error_code,
        ErrorCode::Client(ClientError::CancelledByUser)
    );
    assert!(response.ready);
    ack_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("cancellation acknowledged");

    library.deinit();
}

#[test]
fn server_delay_beyond_timeout_maps_to_499() {
    init_test_logging();
    let (addr, _seen) = start_server(|_, _| Exchange::delayed("late", Duration::from_secs(3)));
    let library = Library::new();
    library.init(true);

    let mut request = HttpRequest::default();
    request.url = format!("http://{addr}/slow");
    request.timeout = 1;

    let (callback, responses) = collecting_callback();
    library.submit(request, callback);

    let response = responses
        .recv_timeout(Duration::from_secs(10))
        .expect("timeout response");
    assert_eq!(response.status_code, 499);
    assert_eq!(
        response.error_code,
        ErrorCode::Transport(TransportError::Timeout)
    );

    library.deinit();
}

#[test]
fn unreachable_server_maps_to_451() {
    init_test_logging();
    let library = Library::new();
    library.init(true);

    // Closed port on loopback: the connection is refused outright.
    let mut request = HttpRequest::default();
    request.url = "http://127.0.0.1:9/".to_string();
    request.timeout = 10;
    request.connect_timeout = 5;

    let (callback, responses) = collecting_callback();
    library.submit(request, callback);

    let response = responses
        .recv_timeout(Duration::from_secs(30))
        .expect("failure response");
    assert_eq!(response.status_code, 451);
    assert!(matches!(response.error_code, ErrorCode::Transport(_)));

    library.deinit();
}

#[test]
fn shared_rps_limit_staggers_admission() {
    init_test_logging();
    let (addr, _seen) = start_server(|_, _| Exchange::ok("ok"));
    let library = Library::new();
    library.init(true);

    // Two admissions per 300 ms window; five requests need three windows.
    let limit = library.create_rate_limit(2, 300);
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    for _ in 0..5 {
        let tx = tx.clone();
        let mut request = HttpRequest::default();
        request.url = format!("http://{addr}/limited");
        request.general_rate_limit_id = limit;
        library.submit(
            request,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
    }

    let mut completed = 0;
    while completed < 5 {
        let response = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("limited response");
        assert_eq!(response.status_code, 200);
        completed += 1;
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(550), "elapsed {elapsed:?}");

    library.deinit();
}

#[test]
fn nonsense_url_fails_in_transport_category() {
    init_test_logging();
    let library = Library::new();
    library.init(true);

    let (callback, responses) = collecting_callback();
    let mut request = HttpRequest::default();
    request.url = "not a url at all".to_string();
    library.submit(request, callback);

    let response = responses
        .recv_timeout(Duration::from_secs(5))
        .expect("failure response");
    assert_eq!(response.status_code, 451);
    assert!(matches!(response.error_code, ErrorCode::Transport(_)));

    library.deinit();
}
