//! # lib_netclient
//!
//! Embeddable client-side network library offering two protocol surfaces,
//! HTTP(S) request/response and WebSocket(S) sessions, driven by a single
//! shared background worker.
//!
//! Quick start:
//!
//! ```no_run
//! let (id, response) = lib_netclient::http_get_future(
//!     "https://httpbin.org/ip",
//!     &Vec::new(),
//!     &lib_netclient::Headers::new(),
//! );
//! let response = response.blocking_recv().expect("terminal response");
//! println!("request {id}: {} {}", response.status_code, response.text());
//! lib_netclient::deinit();
//! ```

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

// Declare the modules to re-export
pub mod core;
pub mod error;
pub mod http;
pub mod runtime;
pub mod utils;
pub mod websocket;

// Re-export the primary surface
pub use error::{ClientError, ErrorCode, TransportError, WebSocketError};
pub use http::{HttpClient, HttpRequest, HttpResponse, HttpResponseCallback, ProxyType};
pub use runtime::{
    cancel_request_by_id, cancel_request_by_id_future, create_rate_limit, create_rate_limit_rpm,
    create_rate_limit_rps, default_instance, deinit, http_get, http_get_future, http_post,
    http_post_future, http_request, http_request_future, init, process, remove_limit, shutdown,
    Library,
};
pub use utils::{query::query, Headers, QueryParams};
pub use websocket::{
    RateLimitSlot, WebSocketClient, WebSocketConfig, WebSocketEventData, WebSocketEventType,
    WebSocketSender, WebSocketSenderPtr,
};
