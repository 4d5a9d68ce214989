//! # Per-Host HTTP Client
//!
//! Convenience façade for callers talking to one host repeatedly. The
//! client stores a request template (timeouts, retries, rate-limit
//! binding, default headers); every submission clones the template,
//! resolves the path against the stored host and hands the result to the
//! shared [`HttpRequestManager`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::core::Notifier;
use crate::utils::{to_query_string, Headers, QueryParams};

use super::manager::HttpRequestManager;
use super::request::{HttpRequest, ProxyType};
use super::response::{oneshot_delivery, HttpResponse, HttpResponseCallback};

/// Per-host configuration holder submitting requests that inherit it.
pub struct HttpClient {
    manager: Arc<HttpRequestManager>,
    notifier: Notifier,
    host: String,
    template: HttpRequest,
}

impl HttpClient {
    /// Creates a client bound to `host` using the process-wide default
    /// library instance (initializing it on first use).
    pub fn new(host: impl Into<String>) -> Self {
        let library = crate::runtime::default_instance();
        library.init(true);
        Self::with_library(library, host)
    }

    /// Creates a client bound to `host` on an explicit library instance.
    pub fn with_library(library: &crate::runtime::Library, host: impl Into<String>) -> Self {
        Self {
            manager: library.http_manager(),
            notifier: library.notifier(),
            host: host.into(),
            template: HttpRequest::default(),
        }
    }

    /// Sets the User-Agent applied to every request without an explicit
    /// User-Agent header.
    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.template.user_agent = user_agent.into();
    }

    /// Adds a default header sent with every request.
    pub fn add_default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.template.headers.insert(name, value);
    }

    /// Sets overall and connect timeouts in seconds (0 disables).
    pub fn set_timeouts(&mut self, timeout: u64, connect_timeout: u64) {
        self.template.timeout = timeout;
        self.template.connect_timeout = connect_timeout;
    }

    /// Sets the retry policy inherited by every request.
    pub fn set_retry(&mut self, attempts: u32, delay_ms: u64) {
        self.template.retry_attempts = attempts;
        self.template.retry_delay_ms = delay_ms;
    }

    /// Binds the general and specific rate limits (0 means unconstrained).
    pub fn set_rate_limit_ids(&mut self, general: u64, specific: u64) {
        self.template.general_rate_limit_id = general;
        self.template.specific_rate_limit_id = specific;
    }

    /// Replaces the set of statuses that terminate the retry loop.
    pub fn set_valid_statuses(&mut self, statuses: impl IntoIterator<Item = u16>) {
        self.template.valid_statuses = statuses.into_iter().collect::<HashSet<u16>>();
    }

    /// Sets the redirect policy.
    pub fn set_follow_location(&mut self, follow: bool, max_redirects: u32) {
        self.template.follow_location = follow;
        self.template.max_redirects = max_redirects;
    }

    /// Configures a proxy for every request.
    pub fn set_proxy(&mut self, server: impl Into<String>, proxy_type: ProxyType) {
        self.template.proxy_server = server.into();
        self.template.proxy_type = proxy_type;
    }

    /// Sets proxy credentials.
    pub fn set_proxy_auth(&mut self, user: &str, password: &str) {
        self.template.set_proxy_auth(user, password);
    }

    /// Submits a request built from the template. `path` may be relative
    /// (resolved against the stored host) or a full URL. Returns the
    /// assigned request id.
    pub fn request(
        &self,
        method: &str,
        path: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
        callback: HttpResponseCallback,
    ) -> u64 {
        let mut request = self.template.clone();
        request.method = method.to_string();
        if path.starts_with("http://") || path.starts_with("https://") {
            request.set_full_url(path, query);
        } else {
            request.set_url(&self.host, path, &to_query_string(query, ""));
        }
        for (name, value) in headers.iter() {
            request.headers.insert(name, value);
        }
        request.content = content.into();
        request.request_id = self.manager.next_request_id();
        let id = request.request_id;
        self.manager.add_request(Some(request), callback);
        self.notifier.notify();
        id
    }

    /// Future form of [`request`](Self::request): the receiver completes
    /// with the terminal response.
    pub fn request_future(
        &self,
        method: &str,
        path: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
    ) -> (u64, oneshot::Receiver<HttpResponse>) {
        let (callback, receiver) = oneshot_delivery();
        let id = self.request(method, path, query, headers, content, callback);
        (id, receiver)
    }

    /// GET with a callback.
    pub fn get(
        &self,
        path: &str,
        query: &QueryParams,
        headers: &Headers,
        callback: HttpResponseCallback,
    ) -> u64 {
        self.request("GET", path, query, headers, Vec::new(), callback)
    }

    /// GET returning a future.
    pub fn get_future(
        &self,
        path: &str,
        query: &QueryParams,
        headers: &Headers,
    ) -> (u64, oneshot::Receiver<HttpResponse>) {
        self.request_future("GET", path, query, headers, Vec::new())
    }

    /// POST with a callback.
    pub fn post(
        &self,
        path: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
        callback: HttpResponseCallback,
    ) -> u64 {
        self.request("POST", path, query, headers, content, callback)
    }

    /// POST returning a future.
    pub fn post_future(
        &self,
        path: &str,
        query: &QueryParams,
        headers: &Headers,
        content: impl Into<Vec<u8>>,
    ) -> (u64, oneshot::Receiver<HttpResponse>) {
        self.request_future("POST", path, query, headers, content)
    }
}
