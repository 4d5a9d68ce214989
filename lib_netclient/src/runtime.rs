//! # Library Lifecycle and Free-Function Façade
//!
//! A [`Library`] instance owns the worker and both task managers. Embedders
//! that want full control construct their own; everyone else uses the
//! process-wide default instance behind [`default_instance`] and the
//! free functions below, which initialize it on first use.
//!
//! Every asynchronous operation exists in two forms built on the same
//! submission primitive: a callback form and a future form returning a
//! oneshot receiver that completes with the terminal result.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::oneshot;

use crate::core::{ErrorHandler, NetworkWorker, Notifier};
use crate::http::manager::HttpRequestManager;
use crate::http::request::HttpRequest;
use crate::http::response::{oneshot_delivery, HttpResponse, HttpResponseCallback};
use crate::utils::{Headers, QueryParams};
use crate::websocket::WebSocketManager;

/// Owns the worker thread and the built-in task managers.
pub struct Library {
    worker: Arc<NetworkWorker>,
    http: Arc<HttpRequestManager>,
    ws: Arc<WebSocketManager>,
}

impl Library {
    /// Creates an independent library instance. Nothing runs until
    /// [`init`](Self::init) is called.
    pub fn new() -> Self {
        let worker = NetworkWorker::new();
        let notifier = Notifier::new(&worker);
        let http = Arc::new(HttpRequestManager::new(
            worker.runtime_handle(),
            notifier.clone(),
        ));
        let ws = Arc::new(WebSocketManager::new(worker.runtime_handle(), notifier));
        Self { worker, http, ws }
    }

    /// Registers the built-in managers and starts the worker. Idempotent.
    /// With `use_async == false` no thread is spawned and the embedder
    /// drives [`process`](Self::process) instead.
    pub fn init(&self, use_async: bool) {
        self.worker.register_manager(self.http.clone());
        self.worker.register_manager(self.ws.clone());
        self.worker.start(use_async);
    }

    /// Stops the worker thread, running its final shutdown pass.
    pub fn deinit(&self) {
        self.worker.stop();
    }

    /// External drive for synchronous mode: one processing pass plus a
    /// slice of runtime time for the I/O tasks.
    pub fn process(&self) {
        self.worker.drive();
    }

    /// Tears down all managers, clearing pending work.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    /// Installs an error handler on the worker's chain.
    pub fn add_error_handler(&self, handler: ErrorHandler) {
        self.worker.add_error_handler(handler);
    }

    /// The HTTP task manager.
    pub fn http_manager(&self) -> Arc<HttpRequestManager> {
        Arc::clone(&self.http)
    }

    /// The WebSocket task manager.
    pub fn ws_manager(&self) -> Arc<WebSocketManager> {
        Arc::clone(&self.ws)
    }

    /// Wake handle for the worker.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(&self.worker)
    }

    // --- HTTP submission ---

    /// Submits a request with explicit parameters; the callback fires per
    /// attempt, terminally once. Returns the assigned request id.
    pub fn http_request(
        &self,
        method: &str,
        url: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
        callback: HttpResponseCallback,
    ) -> u64 {
        let mut request = HttpRequest::default();
        request.method = method.to_string();
        request.set_full_url(url, query);
        for (name, value) in headers.iter() {
            request.headers.insert(name, value);
        }
        request.content = content.into();
        self.submit(request, callback)
    }

    /// Submits a fully prepared [`HttpRequest`], assigning its id.
    pub fn submit(&self, mut request: HttpRequest, callback: HttpResponseCallback) -> u64 {
        request.request_id = self.http.next_request_id();
        let id = request.request_id;
        if !self.http.add_request(Some(request), callback) {
            log::warn!("request {id} rejected: manager is shutting down");
        }
        self.worker.notify();
        id
    }

    /// Future form of [`http_request`](Self::http_request).
    pub fn http_request_future(
        &self,
        method: &str,
        url: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
    ) -> (u64, oneshot::Receiver<HttpResponse>) {
        let (callback, receiver) = oneshot_delivery();
        let id = self.http_request(method, url, query, headers, content, callback);
        (id, receiver)
    }

    /// GET with a callback.
    pub fn http_get(
        &self,
        url: &str,
        query: &QueryParams,
        headers: &Headers,
        callback: HttpResponseCallback,
    ) -> u64 {
        self.http_request("GET", url, query, headers, Vec::new(), callback)
    }

    /// GET returning a future.
    pub fn http_get_future(
        &self,
        url: &str,
        query: &QueryParams,
        headers: &Headers,
    ) -> (u64, oneshot::Receiver<HttpResponse>) {
        self.http_request_future("GET", url, query, headers, Vec::new())
    }

    /// POST with a callback.
    pub fn http_post(
        &self,
        url: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
        callback: HttpResponseCallback,
    ) -> u64 {
        self.http_request("POST", url, query, headers, content, callback)
    }

    /// POST returning a future.
    pub fn http_post_future(
        &self,
        url: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
    ) -> (u64, oneshot::Receiver<HttpResponse>) {
        self.http_request_future("POST", url, query, headers, content)
    }

    // --- Rate limits ---

    /// Creates a rate limit admitting `n` requests per `period_ms` window.
    pub fn create_rate_limit(&self, requests_per_period: u32, period_ms: u64) -> u64 {
        self.http.create_rate_limit(requests_per_period, period_ms)
    }

    /// Creates a requests-per-minute limit.
    pub fn create_rate_limit_rpm(&self, requests_per_minute: u32) -> u64 {
        self.create_rate_limit(requests_per_minute, 60_000)
    }

    /// Creates a requests-per-second limit.
    pub fn create_rate_limit_rps(&self, requests_per_second: u32) -> u64 {
        self.create_rate_limit(requests_per_second, 1_000)
    }

    /// Removes a rate limit. Returns false for an unknown id.
    pub fn remove_limit(&self, limit_id: u64) -> bool {
        self.http.remove_limit(limit_id)
    }

    // --- Cancellation ---

    /// Cancels a request by id; the callback fires once the cancellation
    /// has been carried out, even for an unknown or already-terminal id.
    pub fn cancel_request_by_id(&self, request_id: u64, callback: impl FnOnce() + Send + 'static) {
        self.http
            .cancel_request_by_id(request_id, Some(Box::new(callback)));
        self.worker.notify();
    }

    /// Future form of [`cancel_request_by_id`](Self::cancel_request_by_id).
    pub fn cancel_request_by_id_future(&self, request_id: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.cancel_request_by_id(request_id, move || {
            let _ = tx.send(());
        });
        rx
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_INSTANCE: Lazy<Library> = Lazy::new(Library::new);

/// The process-wide default library instance.
pub fn default_instance() -> &'static Library {
    &DEFAULT_INSTANCE
}

/// Initializes the default instance (idempotent).
pub fn init(use_async: bool) {
    default_instance().init(use_async);
}

/// Stops the default instance's worker.
pub fn deinit() {
    default_instance().deinit();
}

/// Drives the default instance once in synchronous mode.
pub fn process() {
    default_instance().process();
}

/// Tears down the default instance's managers.
pub fn shutdown() {
    default_instance().shutdown();
}

/// Submits a request on the default instance (initializing it on first
/// use); see [`Library::http_request`].
pub fn http_request(
    method: &str,
    url: &str,
    query: &QueryParams,
    headers: &Headers,
    content: impl Into<Vec<u8>>,
    callback: HttpResponseCallback,
) -> u64 {
    init(true);
    default_instance().http_request(method, url, query, headers, content, callback)
}

/// Future form of [`http_request`].
pub fn http_request_future(
    method: &str,
    url: &str,
    query: &QueryParams,
    headers: &Headers,
    content: impl Into<Vec<u8>>,
) -> (u64, oneshot::Receiver<HttpResponse>) {
    init(true);
    default_instance().http_request_future(method, url, query, headers, content)
}

/// GET on the default instance, callback form.
pub fn http_get(
    url: &str,
    query: &QueryParams,
    headers: &Headers,
    callback: HttpResponseCallback,
) -> u64 {
    http_request("GET", url, query, headers, Vec::new(), callback)
}

/// GET on the default instance, future form.
pub fn http_get_future(
    url: &str,
    query: &QueryParams,
    headers: &Headers,
) -> (u64, oneshot::Receiver<HttpResponse>) {
    http_request_future("GET", url, query, headers, Vec::new())
}

/// POST on the default instance, callback form.
pub fn http_post(
    url: &str,
    query: &QueryParams,
    headers: &Headers,
    content: impl Into<Vec<u8>>,
    callback: HttpResponseCallback,
) -> u64 {
    http_request("POST", url, query, headers, content, callback)
}

/// POST on the default instance, future form.
pub fn http_post_future(
    url: &str,
    query: &QueryParams,
    headers: &Headers,
    content: impl Into<Vec<u8>>,
) -> (u64, oneshot::Receiver<HttpResponse>) {
    http_request_future("POST", url, query, headers, content)
}

/// Creates a rate limit on the default instance.
pub fn create_rate_limit(requests_per_period: u32, period_ms: u64) -> u64 {
    init(true);
    default_instance().create_rate_limit(requests_per_period, period_ms)
}

/// Creates a requests-per-minute limit on the default instance.
pub fn create_rate_limit_rpm(requests_per_minute: u32) -> u64 {
    create_rate_limit(requests_per_minute, 60_000)
}

/// Creates a requests-per-second limit on the default instance.
pub fn create_rate_limit_rps(requests_per_second: u32) -> u64 {
    create_rate_limit(requests_per_second, 1_000)
}

/// Removes a rate limit on the default instance.
pub fn remove_limit(limit_id: u64) -> bool {
    default_instance().remove_limit(limit_id)
}

/// Cancels a request on the default instance, callback form.
pub fn cancel_request_by_id(request_id: u64, callback: impl FnOnce() + Send + 'static) {
    default_instance().cancel_request_by_id(request_id, callback);
}

/// Cancels a request on the default instance, future form.
pub fn cancel_request_by_id_future(request_id: u64) -> oneshot::Receiver<()> {
    default_instance().cancel_request_by_id_future(request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_lifecycle_round_trip() {
        let library = Library::new();
        let id = library.create_rate_limit(5, 1_000);
        assert!(library.remove_limit(id));
        assert!(!library.remove_limit(id));
    }

    #[test]
    fn init_and_deinit_are_idempotent() {
        let library = Library::new();
        library.init(true);
        library.init(true);
        library.deinit();
        library.deinit();
    }

    #[test]
    fn rpm_and_rps_wrappers_allocate_distinct_limits() {
        let library = Library::new();
        let rpm = library.create_rate_limit_rpm(60);
        let rps = library.create_rate_limit_rps(2);
        assert_ne!(rpm, rps);
        assert!(library.remove_limit(rpm));
        assert!(library.remove_limit(rps));
    }
}
