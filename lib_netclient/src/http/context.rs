//! Lifecycle record wrapping a submitted request while it survives
//! retries.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::time::Instant;

use super::request::HttpRequest;
use super::response::HttpResponseCallback;

/// Owns one submitted request together with its delivery callback, the
/// attempt counter and the timestamp gating the retry delay.
pub(crate) struct HttpRequestContext {
    /// The request to execute. `None` marks an unsubmittable entry that
    /// will be answered with a synthetic 400.
    pub request: Option<HttpRequest>,
    /// Delivery callback, invoked once per attempt.
    pub callback: HttpResponseCallback,
    /// Attempts performed so far.
    pub retry_attempt: u32,
    /// Creation or last-failure time; retries wait `retry_delay_ms` from
    /// this point.
    pub start_time: Instant,
}

impl HttpRequestContext {
    pub fn new(request: Option<HttpRequest>, callback: HttpResponseCallback) -> Self {
        Self {
            request,
            callback,
            retry_attempt: 0,
            start_time: Instant::now(),
        }
    }

    /// Request id, or 0 for an unsubmittable entry.
    pub fn request_id(&self) -> u64 {
        self.request.as_ref().map_or(0, |r| r.request_id)
    }
}
