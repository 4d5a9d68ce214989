//! WebSocket connection configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use serde::{Deserialize, Serialize};

use crate::http::ProxyType;
use crate::utils::{to_query_string, Headers, QueryParams};

/// One message-rate-limit slot; slot 0 is the general limit applied to
/// every send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSlot {
    /// Maximum number of sends per period (0 means unlimited).
    pub requests_per_period: u32,
    /// Window length in milliseconds.
    pub period_ms: u64,
}

impl RateLimitSlot {
    /// Convenience constructor.
    pub fn new(requests_per_period: u32, period_ms: u64) -> Self {
        Self {
            requests_per_period,
            period_ms,
        }
    }
}

/// Configuration parameters for establishing and managing one WebSocket
/// session. Installed on a client before `connect()` and hot-swappable
/// mid-session through the FSM's config-update event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// HTTP headers included in the connection upgrade request.
    pub headers: Headers,
    /// URL of the WebSocket server (`ws://` or `wss://`).
    pub url: String,
    /// User-Agent header, applied only when `headers` does not set one.
    pub user_agent: String,
    /// Cookie data as a single header string.
    pub cookie: String,
    /// Subprotocols for the Sec-WebSocket-Protocol header.
    pub protocols: Vec<String>,
    /// Path to the client certificate file (PEM).
    pub cert_file: String,
    /// Path to the private key for the client certificate (PKCS#8 PEM).
    pub key_file: String,
    /// Path to the root CA certificate file (PEM).
    pub ca_file: String,
    /// Proxy address in `ip:port` format (HTTP CONNECT tunnel).
    pub proxy_server: String,
    /// Proxy authentication in `username:password` format.
    pub proxy_auth: String,
    /// Proxy type.
    pub proxy_type: ProxyType,
    /// Handshake timeout in seconds (0 means no deadline).
    pub request_timeout: u64,
    /// Maximum idle time in seconds before the connection is considered
    /// dead and torn down (0 disables the watchdog).
    pub idle_timeout: u64,
    /// Delay in seconds between reconnection attempts.
    pub reconnect_delay: u64,
    /// Number of reconnection attempts (0 means unbounded).
    pub reconnect_attempts: u32,
    /// Enables automatic reconnection.
    pub reconnect: bool,
    /// Verify the server certificate and hostname.
    pub verify_cert: bool,
    /// Message rate limits; slot 0 is the general limit.
    pub rate_limits: Vec<RateLimitSlot>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            headers: Headers::new(),
            url: String::new(),
            user_agent: String::new(),
            cookie: String::new(),
            protocols: Vec::new(),
            cert_file: String::new(),
            key_file: String::new(),
            ca_file: String::new(),
            proxy_server: String::new(),
            proxy_auth: String::new(),
            proxy_type: ProxyType::Http,
            request_timeout: 20,
            idle_timeout: 0,
            reconnect_delay: 5,
            reconnect_attempts: 0,
            reconnect: true,
            verify_cert: true,
            rate_limits: Vec::new(),
        }
    }
}

impl WebSocketConfig {
    /// Sets the server URL from host, path and an optional raw query
    /// string.
    pub fn set_url(&mut self, host: &str, path: &str, query: &str) {
        let mut url = host.to_string();
        if !path.is_empty() && !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if !query.is_empty() {
            if !query.starts_with('?') {
                url.push('?');
            }
            url.push_str(query);
        }
        self.url = url;
    }

    /// Sets a full URL and appends query parameters to it.
    pub fn set_full_url(&mut self, url: &str, query: &QueryParams) {
        self.url = format!("{url}{}", to_query_string(query, "?"));
    }

    /// Sets the proxy server address from separate host and port.
    pub fn set_proxy(&mut self, ip: &str, port: u16) {
        self.proxy_server = format!("{ip}:{port}");
    }

    /// Sets proxy credentials.
    pub fn set_proxy_auth(&mut self, user: &str, password: &str) {
        self.proxy_auth = format!("{user}:{password}");
    }
}
