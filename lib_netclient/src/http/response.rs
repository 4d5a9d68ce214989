//! HTTP response object: the single delivery funnel for every outcome a
//! request can have, successful or not.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use crate::error::ErrorCode;
use crate::utils::Headers;

/// Outcome of one HTTP request attempt.
///
/// A response with `ready == true` is terminal: it is delivered exactly
/// once per submitted request and releases the request's lifecycle record.
/// Non-terminal responses (`ready == false`) report failed attempts that
/// are still eligible for retry.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP response headers.
    pub headers: Headers,
    /// Response body bytes.
    pub content: Vec<u8>,
    /// Error classification; `ErrorCode::Ok` when the exchange succeeded.
    pub error_code: ErrorCode,
    /// Free-form error detail from the transfer engine, if any.
    pub error_message: String,
    /// HTTP status code of the response. Synthetic codes: 400 for an
    /// unsubmittable request, 451 for an unreachable server, 499 for
    /// timeout/cancellation/abort.
    pub status_code: u16,
    /// Which attempt produced this response (1-based after the first try).
    pub retry_attempt: u32,
    /// Terminal flag: true exactly once per request.
    pub ready: bool,

    // Timing metrics in seconds; -1.0 when the engine did not report one.
    /// Time until name resolution completed (DNS).
    pub namelookup_time: f64,
    /// Time until the TCP connection was established.
    pub connect_time: f64,
    /// Time until the TLS handshake completed.
    pub appconnect_time: f64,
    /// Time until the request was ready to be sent.
    pub pretransfer_time: f64,
    /// Time until the first byte of the response arrived.
    pub starttransfer_time: f64,
    /// Total time of the transfer.
    pub total_time: f64,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            headers: Headers::new(),
            content: Vec::new(),
            error_code: ErrorCode::Ok,
            error_message: String::new(),
            status_code: 0,
            retry_attempt: 0,
            ready: false,
            namelookup_time: -1.0,
            connect_time: -1.0,
            appconnect_time: -1.0,
            pretransfer_time: -1.0,
            starttransfer_time: -1.0,
            total_time: -1.0,
        }
    }
}

impl HttpResponse {
    /// Builds a terminal synthetic response carrying only a status and an
    /// error classification (used for cancellation, aborts and rejected
    /// submissions).
    pub fn synthetic(status_code: u16, error_code: ErrorCode) -> Self {
        Self {
            status_code,
            error_code,
            ready: true,
            ..Self::default()
        }
    }

    /// Response body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Callback invoked with each attempt's response; the terminal invocation
/// carries `ready == true`.
pub type HttpResponseCallback = Box<dyn FnMut(HttpResponse) + Send>;

/// Builds a callback that forwards only the terminal response into a
/// oneshot channel, backing the future form of every submission API.
pub(crate) fn oneshot_delivery() -> (
    HttpResponseCallback,
    tokio::sync::oneshot::Receiver<HttpResponse>,
) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut slot = Some(tx);
    let callback: HttpResponseCallback = Box::new(move |response: HttpResponse| {
        if !response.ready {
            return;
        }
        if let Some(tx) = slot.take() {
            if tx.send(response).is_err() {
                log::debug!("terminal response dropped: future receiver is gone");
            }
        }
    });
    (callback, rx)
}
