//! # WebSocket Client Façade
//!
//! The caller-facing wrapper around one session: it owns the configuration,
//! pushes it through the FSM's config-update event when (re)connecting, and
//! forwards events, sends and lifecycle calls to the shared session core.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::http::ProxyType;
use crate::utils::Headers;

use super::config::{RateLimitSlot, WebSocketConfig};
use super::event::WebSocketEventData;
use super::send_info::SendCallback;
use super::session::WebSocketSession;
use super::transport::TungsteniteTransport;

/// One WebSocket connection as the application sees it.
pub struct WebSocketClient {
    session: Arc<WebSocketSession<TungsteniteTransport>>,
    config: WebSocketConfig,
    config_dirty: bool,
}

impl WebSocketClient {
    /// Creates a client on the process-wide default library instance
    /// (initializing it on first use).
    pub fn new() -> Self {
        let library = crate::runtime::default_instance();
        library.init(true);
        Self::with_library(library)
    }

    /// Creates a client on an explicit library instance.
    pub fn with_library(library: &crate::runtime::Library) -> Self {
        Self {
            session: library.ws_manager().create_client(),
            config: WebSocketConfig::default(),
            config_dirty: true,
        }
    }

    // --- Configuration accessors ---

    /// Replaces the whole configuration.
    pub fn set_config(&mut self, config: WebSocketConfig) {
        self.config = config;
        self.config_dirty = true;
    }

    /// Current configuration.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Sets the server URL.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.config.url = url.into();
        self.config_dirty = true;
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Adds an upgrade-request header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.config.headers.insert(name, value);
        self.config_dirty = true;
    }

    /// Replaces all upgrade-request headers.
    pub fn set_headers(&mut self, headers: Headers) {
        self.config.headers = headers;
        self.config_dirty = true;
    }

    /// Sets the User-Agent for the upgrade request.
    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.config.user_agent = user_agent.into();
        self.config_dirty = true;
    }

    /// Configures an HTTP CONNECT proxy.
    pub fn set_proxy(&mut self, server: impl Into<String>, proxy_type: ProxyType) {
        self.config.proxy_server = server.into();
        self.config.proxy_type = proxy_type;
        self.config_dirty = true;
    }

    /// Sets proxy credentials.
    pub fn set_proxy_auth(&mut self, user: &str, password: &str) {
        self.config.set_proxy_auth(user, password);
        self.config_dirty = true;
    }

    /// Sets TLS material paths (client certificate, key, trusted CA).
    pub fn set_tls_files(&mut self, cert_file: &str, key_file: &str, ca_file: &str) {
        self.config.cert_file = cert_file.to_string();
        self.config.key_file = key_file.to_string();
        self.config.ca_file = ca_file.to_string();
        self.config_dirty = true;
    }

    /// Toggles server-certificate verification.
    pub fn set_verify_cert(&mut self, verify: bool) {
        self.config.verify_cert = verify;
        self.config_dirty = true;
    }

    /// Configures the reconnect policy.
    pub fn set_reconnect(&mut self, enabled: bool, attempts: u32, delay_secs: u64) {
        self.config.reconnect = enabled;
        self.config.reconnect_attempts = attempts;
        self.config.reconnect_delay = delay_secs;
        self.config_dirty = true;
    }

    /// Sets the handshake and idle timeouts in seconds (0 disables).
    pub fn set_timeouts(&mut self, request_timeout: u64, idle_timeout: u64) {
        self.config.request_timeout = request_timeout;
        self.config.idle_timeout = idle_timeout;
        self.config_dirty = true;
    }

    /// Appends a message-rate-limit slot and returns its id. The first
    /// added slot (id 0) is the general limit.
    pub fn add_rate_limit(&mut self, requests_per_period: u32, period_ms: u64) -> usize {
        self.config
            .rate_limits
            .push(RateLimitSlot::new(requests_per_period, period_ms));
        self.config_dirty = true;
        self.config.rate_limits.len() - 1
    }

    // --- Events ---

    /// Installs the event callback; events are then delivered from the
    /// worker thread instead of being buffered.
    pub fn on_event(&self, callback: impl FnMut(WebSocketEventData) + Send + 'static) {
        self.session.set_event_callback(Some(Box::new(callback)));
    }

    /// Removes the event callback, returning to polling mode.
    pub fn clear_event_callback(&self) {
        self.session.set_event_callback(None);
    }

    /// Pops the next buffered event (polling mode).
    pub fn receive_event(&self) -> Option<WebSocketEventData> {
        self.session.receive_event()
    }

    /// Drains all buffered events (polling mode).
    pub fn receive_events(&self) -> Vec<WebSocketEventData> {
        self.session.receive_events()
    }

    // --- Lifecycle ---

    /// Requests a connection attempt; the callback reports acceptance.
    pub fn connect(&mut self, callback: impl FnOnce(bool) + Send + 'static) {
        self.push_config_if_dirty();
        self.session.connect(Some(Box::new(callback)));
    }

    /// Future form of [`connect`](Self::connect).
    pub fn connect_future(&mut self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.connect(move |ok| {
            let _ = tx.send(ok);
        });
        rx
    }

    /// Requests a disconnect; the callback fires once the FSM is back in
    /// its idle state.
    pub fn disconnect(&self, callback: impl FnOnce(bool) + Send + 'static) {
        self.session.disconnect(Some(Box::new(callback)));
    }

    /// Future form of [`disconnect`](Self::disconnect).
    pub fn disconnect_future(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.disconnect(move |ok| {
            let _ = tx.send(ok);
        });
        rx
    }

    /// True between the Open event and its paired Close.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// True while the session still needs worker processing.
    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    // --- Sending ---

    /// Queues a text message under the given rate-limit slot. Returns
    /// false when the message is empty or the client is not connected.
    pub fn send_message(
        &self,
        message: &str,
        rate_limit_id: usize,
        callback: Option<SendCallback>,
    ) -> bool {
        use super::event::WebSocketSender as _;
        self.session.send_message(message, rate_limit_id, callback)
    }

    /// Queues a close frame. Returns false when the client is not
    /// connected.
    pub fn send_close(&self, status: u16, reason: &str, callback: Option<SendCallback>) -> bool {
        use super::event::WebSocketSender as _;
        self.session.send_close(status, reason, callback)
    }

    fn push_config_if_dirty(&mut self) {
        if self.config_dirty {
            self.session.set_config(self.config.clone(), None);
            self.config_dirty = false;
        }
    }
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::new()
    }
}
