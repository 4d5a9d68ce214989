//! # HTTP Pipeline Live Runner
//!
//! Manual integration runner exercising the HTTP surface against
//! `httpbin.org`: URL composition, future and callback submission forms,
//! non-2xx handling, rate-limited batches and cancellation.
//!
//! This is a diagnostic binary, not part of `cargo test`; it needs real
//! network egress. Run it with `cargo run --bin test_http_live`.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::time::{Duration, Instant};

use clap::Parser;
use lib_netclient::{Headers, HttpRequest, Library, QueryParams};

/// Command-line options for the live HTTP runner.
#[derive(Parser, Debug)]
struct Options {
    /// Base URL of the echo service to test against.
    #[arg(long, default_value = "https://httpbin.org")]
    base_url: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let options = Options::parse();
    let library = Library::new();
    library.init(true);

    println!("--- HTTP live tests against {} ---", options.base_url);

    // --- TEST 1: Basic GET via the future form ---
    println!("\n[Test 1] GET /ip ...");
    let (id, response) = library.http_get_future(
        &format!("{}/ip", options.base_url),
        &QueryParams::new(),
        &Headers::new(),
    );
    let response = response.blocking_recv()?;
    anyhow::ensure!(response.ready, "response must be terminal");
    anyhow::ensure!(response.status_code == 200, "unexpected status");
    println!("✅ request {id}: {} bytes", response.content.len());

    // --- TEST 2: POST with a JSON body ---
    println!("\n[Test 2] POST /post with body ...");
    let mut headers = Headers::new();
    headers.insert("Content-Type", "application/json");
    let (_, response) = library.http_post_future(
        &format!("{}/post", options.base_url),
        &QueryParams::new(),
        &headers,
        r#"{"x":1}"#,
    );
    let response = response.blocking_recv()?;
    anyhow::ensure!(response.status_code == 200, "unexpected status");
    anyhow::ensure!(
        response.text().contains(r#""x": 1"#) || response.text().contains(r#""x":1"#),
        "body not echoed"
    );
    println!("✅ body echoed back");

    // --- TEST 3: Non-2xx statuses surface in the response, not as errors ---
    println!("\n[Test 3] GET /status/404 ...");
    let (_, response) = library.http_get_future(
        &format!("{}/status/404", options.base_url),
        &QueryParams::new(),
        &Headers::new(),
    );
    let response = response.blocking_recv()?;
    anyhow::ensure!(response.status_code == 404, "expected 404");
    println!("✅ got 404 with error code {}", response.error_code);

    // --- TEST 4: Rate-limited burst ---
    println!("\n[Test 4] five GETs under a 2-per-second limit ...");
    let limit = library.create_rate_limit_rps(2);
    let started = Instant::now();
    let mut receivers = Vec::new();
    for n in 0..5 {
        let mut request = HttpRequest::default();
        request.set_url(&options.base_url, "/get", &format!("n={n}"));
        request.general_rate_limit_id = limit;
        let (tx, rx) = std::sync::mpsc::channel();
        let callback: lib_netclient::HttpResponseCallback = Box::new(move |response| {
            let _ = tx.send(response);
        });
        library.submit(request, callback);
        receivers.push(rx);
    }
    for receiver in receivers {
        let response = receiver.recv_timeout(Duration::from_secs(30))?;
        anyhow::ensure!(response.status_code == 200, "unexpected status");
    }
    println!("✅ all five done in {:?} (≥ 2s expected)", started.elapsed());

    // --- TEST 5: Cancellation of a slow transfer ---
    println!("\n[Test 5] cancel GET /delay/10 ...");
    let (id, response) = library.http_get_future(
        &format!("{}/delay/10", options.base_url),
        &QueryParams::new(),
        &Headers::new(),
    );
    std::thread::sleep(Duration::from_millis(500));
    let cancelled = library.cancel_request_by_id_future(id);
    cancelled.blocking_recv()?;
    let response = response.blocking_recv()?;
    anyhow::ensure!(response.status_code == 499, "expected 499");
    println!("✅ cancelled with {}", response.error_code);

    println!("\n--- All live HTTP tests passed ---");
    library.deinit();
    Ok(())
}
