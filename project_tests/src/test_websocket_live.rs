//! # WebSocket Live Runner
//!
//! Manual integration runner driving a full session against a public echo
//! server: connect, event callback delivery, echo round trip, graceful
//! close, and a reconnect cycle.
//!
//! Diagnostic binary, not part of `cargo test`; it needs real network
//! egress. Run it with `cargo run --bin test_websocket_live`.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use lib_netclient::{Library, WebSocketClient, WebSocketEventType};

/// Command-line options for the live WebSocket runner.
#[derive(Parser, Debug)]
struct Options {
    /// Echo server URL.
    #[arg(long, default_value = "wss://echo.websocket.org")]
    url: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let options = Options::parse();
    let library = Library::new();
    library.init(true);

    println!("--- WebSocket live test against {} ---", options.url);

    let (events_tx, events_rx) = mpsc::channel();
    let mut client = WebSocketClient::with_library(&library);
    client.set_url(options.url.clone());
    client.set_reconnect(false, 0, 0);
    client.set_timeouts(20, 60);
    client.on_event(move |event| {
        log::info!("event: {:?} {:?}", event.event_type, event.message);
        let _ = events_tx.send((event.event_type, event.message.clone(), event.status_code));
    });

    // --- Phase 1: Connect and await the Open event ---
    let accepted = client.connect_future();
    anyhow::ensure!(accepted.blocking_recv()?, "connect rejected");
    let (kind, _, status) = events_rx.recv_timeout(Duration::from_secs(30))?;
    anyhow::ensure!(kind == WebSocketEventType::Open, "expected Open");
    println!("✅ connected (handshake status {status})");

    // --- Phase 2: Echo round trip ---
    anyhow::ensure!(client.send_message("hello", 0, None), "send rejected");
    // Some echo services send a banner first; accept it and wait for ours.
    loop {
        let (kind, message, _) = events_rx.recv_timeout(Duration::from_secs(30))?;
        anyhow::ensure!(kind == WebSocketEventType::Message, "expected Message");
        if message == "hello" {
            break;
        }
        log::info!("skipping banner frame: {message:?}");
    }
    println!("✅ echo received");

    // --- Phase 3: Graceful close ---
    let done = client.disconnect_future();
    anyhow::ensure!(done.blocking_recv()?, "disconnect rejected");
    let (kind, _, status) = events_rx.recv_timeout(Duration::from_secs(30))?;
    anyhow::ensure!(kind == WebSocketEventType::Close, "expected Close");
    anyhow::ensure!(!client.is_connected(), "still connected after close");
    println!("✅ closed with status {status}");

    println!("\n--- WebSocket live test passed ---");
    library.deinit();
    Ok(())
}
