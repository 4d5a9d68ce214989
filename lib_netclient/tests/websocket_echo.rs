//! End-to-end WebSocket tests against a loopback echo server.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use lib_netclient::{ErrorCode, Library, WebSocketClient, WebSocketEventData, WebSocketEventType};

/// Routes library log output into the test harness's captured output.
fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Starts a threaded echo server: every text frame is sent back verbatim;
/// a close handshake ends the session.
fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            std::thread::spawn(move || {
                let Ok(mut websocket) = tungstenite::accept(stream) else {
                    return;
                };
                loop {
                    match websocket.read() {
                        Ok(message @ tungstenite::Message::Text(_)) => {
                            if websocket.send(message).is_err() {
                                break;
                            }
                        }
                        Ok(tungstenite::Message::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });
        }
    });
    addr
}

fn wait_for_event(client: &WebSocketClient, deadline: Duration) -> WebSocketEventData {
    let until = Instant::now() + deadline;
    loop {
        if let Some(event) = client.receive_event() {
            return event;
        }
        assert!(Instant::now() < until, "no event within {deadline:?}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn echo_round_trip_with_paired_close() {
    init_test_logging();
    let addr = start_echo_server();
    let library = Library::new();
    library.init(true);

    let mut client = WebSocketClient::with_library(&library);
    client.set_url(format!("ws://{addr}/"));
    client.set_reconnect(false, 0, 0);

    let accepted = client.connect_future();
    assert!(accepted.blocking_recv().expect("connect acknowledged"));

    let open = wait_for_event(&client, Duration::from_secs(5));
    assert_eq!(open.event_type, WebSocketEventType::Open);
    assert_eq!(open.status_code, 101);
    assert!(client.is_connected());

    let (sent_tx, sent_rx) = std::sync::mpsc::channel();
    let queued = client.send_message(
        "hello",
        0,
        Some(Box::new(move |result: &ErrorCode| {
            let _ = sent_tx.send(result.clone());
        })),
    );
    assert!(queued);
    assert!(sent_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("send acknowledged")
        .is_ok());

    let message = wait_for_event(&client, Duration::from_secs(5));
    assert_eq!(message.event_type, WebSocketEventType::Message);
    assert_eq!(message.message, "hello");

    let done = client.disconnect_future();
    assert!(done.blocking_recv().expect("disconnect acknowledged"));

    let close = wait_for_event(&client, Duration::from_secs(5));
    assert_eq!(close.event_type, WebSocketEventType::Close);
    assert_eq!(close.status_code, 1000);
    assert!(!client.is_connected());

    library.deinit();
}

#[test]
fn reply_from_within_event_callback() {
    init_test_logging();
    let addr = start_echo_server();
    let library = Library::new();
    library.init(true);

    let (echo_tx, echo_rx) = std::sync::mpsc::channel();
    let mut client = WebSocketClient::with_library(&library);
    client.set_url(format!("ws://{addr}/"));
    client.set_reconnect(false, 0, 0);
    client.on_event(move |event| {
        match event.event_type {
            WebSocketEventType::Open => {
                // Reply through the sender capability: this only enqueues
                // and is dispatched on a later worker tick.
                assert!(event.sender.send_message("from-callback", 0, None));
            }
            WebSocketEventType::Message => {
                let _ = echo_tx.send(event.message.clone());
            }
            _ => {}
        }
    });

    let accepted = client.connect_future();
    assert!(accepted.blocking_recv().expect("connect acknowledged"));

    let echoed = echo_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("echoed message");
    assert_eq!(echoed, "from-callback");

    let done = client.disconnect_future();
    assert!(done.blocking_recv().expect("disconnect acknowledged"));
    library.deinit();
}

#[test]
fn refused_connection_surfaces_error_event() {
    init_test_logging();
    let library = Library::new();
    library.init(true);

    let mut client = WebSocketClient::with_library(&library);
    // Closed loopback port: the TCP connect is refused.
    client.set_url("ws://127.0.0.1:9/");
    client.set_reconnect(false, 0, 0);

    let accepted = client.connect_future();
    // The request itself is accepted; the failure arrives as an event.
    assert!(accepted.blocking_recv().expect("connect acknowledged"));

    let event = wait_for_event(&client, Duration::from_secs(10));
    assert_eq!(event.event_type, WebSocketEventType::Error);
    assert!(!event.error_code.is_ok());
    assert!(!client.is_connected());

    library.deinit();
}
