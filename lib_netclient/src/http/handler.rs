//! # HTTP Request Handler
//!
//! Drives one transfer attempt of one request through the transfer engine
//! and translates the outcome into an [`HttpResponse`].
//!
//! A handler is created when a batch is formed: it clones the request's
//! transport knobs into a dedicated engine client, spawns the transfer as a
//! task on the worker runtime, and keeps the task's abort handle. The task
//! reports a [`TransferOutcome`] on the owning batch's completion channel;
//! [`RequestHandler::handle_completion`] then applies the status mapping
//! and retry gating and invokes the user callback.
//!
//! A handler that dies without having delivered anything (its batch was
//! torn down mid-flight) synthesizes an "aborted during destruction"
//! response so the exactly-one-terminal-callback invariant holds on every
//! path.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use crate::core::Notifier;
use crate::error::{ClientError, ErrorCode, TransportError};
use crate::utils::Headers;

use super::context::HttpRequestContext;
use super::request::HttpRequest;
use super::response::HttpResponse;

/// Raw result of one transfer attempt, as reported by the engine task.
#[derive(Debug)]
pub(crate) struct TransferOutcome {
    pub request_id: u64,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub transport: Option<TransportError>,
    pub timed_out: bool,
    pub error_message: String,
    pub starttransfer_time: f64,
    pub total_time: f64,
}

impl TransferOutcome {
    fn new(request_id: u64) -> Self {
        Self {
            request_id,
            status: 0,
            headers: Headers::new(),
            body: Vec::new(),
            transport: None,
            timed_out: false,
            error_message: String::new(),
            starttransfer_time: -1.0,
            total_time: -1.0,
        }
    }
}

/// One in-flight transfer attempt plus the logic to turn its outcome into
/// a response.
pub(crate) struct RequestHandler {
    context: Option<HttpRequestContext>,
    request_id: u64,
    abort: AbortHandle,
    delivered: bool,
}

impl RequestHandler {
    /// Spawns the transfer task for `context` onto the worker runtime and
    /// wires its completion into `completions`.
    pub fn new(
        context: HttpRequestContext,
        completions: UnboundedSender<TransferOutcome>,
        handle: &tokio::runtime::Handle,
        notifier: &Notifier,
    ) -> Self {
        let request = context
            .request
            .clone()
            .expect("request handler requires a request");
        let request_id = request.request_id;
        let notifier = notifier.clone();
        let join = handle.spawn(async move {
            let outcome = perform_transfer(request).await;
            if completions.send(outcome).is_ok() {
                notifier.notify();
            }
        });
        Self {
            context: Some(context),
            request_id,
            abort: join.abort_handle(),
            delivered: false,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Surrenders the context for requeueing after a non-terminal attempt.
    pub fn take_context(&mut self) -> Option<HttpRequestContext> {
        self.context.take()
    }

    /// Applies the outcome of the completed transfer and decides whether
    /// this attempt is terminal.
    ///
    /// ## Logic:
    /// 1. Assemble the response from the raw outcome (headers, body,
    ///    status, timings).
    /// 2. Normalize the status: a timed-out transfer becomes 499; a
    ///    transfer that never produced a status becomes 451.
    /// 3. Classify the error: transport failure first, then HTTP >= 400,
    ///    otherwise success.
    /// 4. Count the attempt and gate on the retry policy: terminal when
    ///    retries are disabled, the status is whitelisted, or the attempt
    ///    budget is spent.
    /// 5. Deliver the response. A non-terminal attempt also stamps the
    ///    retry clock and hands the context back for requeueing via
    ///    [`take_context`](Self::take_context).
    ///
    /// Returns true when the attempt is terminal.
    pub fn handle_completion(&mut self, outcome: TransferOutcome) -> bool {
        let Some(context) = self.context.as_mut() else {
            return true;
        };
        let Some(request) = context.request.as_ref() else {
            return true;
        };

        let mut response = HttpResponse {
            headers: outcome.headers,
            content: outcome.body,
            status_code: outcome.status,
            error_message: outcome.error_message,
            starttransfer_time: outcome.starttransfer_time,
            ..HttpResponse::default()
        };

        // A timed-out transfer is reported as 499 regardless of how far the
        // exchange got; a transfer that never produced a status at all maps
        // to the 451 "unreachable" catch-all.
        if outcome.timed_out {
            response.status_code = 499;
        }
        if response.status_code == 0 && outcome.transport.is_some() {
            response.status_code = 451;
        }

        response.error_code = if let Some(kind) = outcome.transport {
            ErrorCode::Transport(kind)
        } else if response.status_code >= 400 {
            ErrorCode::Http(response.status_code)
        } else {
            ErrorCode::Ok
        };

        context.retry_attempt += 1;
        response.retry_attempt = context.retry_attempt;

        let terminal = request.retry_attempts == 0
            || request.valid_statuses.contains(&response.status_code)
            || context.retry_attempt >= request.retry_attempts;

        if terminal {
            response.total_time = outcome.total_time;
            response.ready = true;
            (context.callback)(response);
            self.delivered = true;
            return true;
        }

        // Non-terminal attempt: report it, stamp the retry clock and hand
        // the context back for requeueing.
        context.start_time = Instant::now();
        (context.callback)(response);
        self.delivered = true;
        false
    }

    /// Cancels the transfer and delivers the 499 cancellation response,
    /// unless a response already went out.
    pub fn cancel(&mut self) {
        self.abort.abort();
        if self.delivered {
            return;
        }
        if let Some(context) = self.context.as_mut() {
            let mut response =
                HttpResponse::synthetic(499, ErrorCode::Client(ClientError::CancelledByUser));
            response.retry_attempt = context.retry_attempt;
            (context.callback)(response);
            self.delivered = true;
        }
    }
}

impl Drop for RequestHandler {
    fn drop(&mut self) {
        self.abort.abort();
        if self.delivered {
            return;
        }
        // Torn down without ever seeing a completion signal.
        if let Some(context) = self.context.as_mut() {
            let mut response = HttpResponse::synthetic(
                499,
                ErrorCode::Client(ClientError::AbortedDuringDestruction),
            );
            response.retry_attempt = context.retry_attempt;
            (context.callback)(response);
        }
    }
}

/// Executes one transfer attempt with a dedicated engine client configured
/// from the request's transport knobs.
async fn perform_transfer(request: HttpRequest) -> TransferOutcome {
    let started = Instant::now();
    let mut outcome = TransferOutcome::new(request.request_id);

    let client = match build_client(&request) {
        Ok(client) => client,
        Err((kind, message)) => {
            log::warn!(
                "request {} rejected while configuring the engine: {message}",
                request.request_id
            );
            outcome.transport = Some(kind);
            outcome.error_message = message;
            outcome.total_time = started.elapsed().as_secs_f64();
            return outcome;
        }
    };

    let builder = match build_engine_request(&client, &request) {
        Ok(builder) => builder,
        Err(message) => {
            outcome.transport = Some(TransportError::Request);
            outcome.error_message = message;
            outcome.total_time = started.elapsed().as_secs_f64();
            return outcome;
        }
    };

    match builder.send().await {
        Ok(mut response) => {
            outcome.status = response.status().as_u16();
            outcome.starttransfer_time = started.elapsed().as_secs_f64();
            for (name, value) in response.headers() {
                outcome
                    .headers
                    .insert(name.as_str(), value.to_str().unwrap_or_default());
            }
            if request.debug_header {
                log::debug!(
                    "request {} response headers: {:?}",
                    request.request_id,
                    outcome.headers
                );
            }

            // Body bytes are appended chunk by chunk as the engine hands
            // them over.
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => outcome.body.extend_from_slice(&chunk),
                    Ok(None) => break,
                    Err(e) => {
                        let kind = classify_engine_error(&e);
                        outcome.timed_out = kind == TransportError::Timeout;
                        outcome.error_message = e.to_string();
                        outcome.transport = Some(kind);
                        break;
                    }
                }
            }
            outcome.total_time = started.elapsed().as_secs_f64();
        }
        Err(e) => {
            let kind = classify_engine_error(&e);
            outcome.timed_out = kind == TransportError::Timeout;
            outcome.status = e.status().map_or(0, |s| s.as_u16());
            outcome.error_message = e.to_string();
            outcome.transport = Some(kind);
            outcome.total_time = started.elapsed().as_secs_f64();
        }
    }
    outcome
}

type BuildError = (TransportError, String);

/// Builds the per-attempt engine client from the request's transport knobs.
fn build_client(request: &HttpRequest) -> Result<reqwest::Client, BuildError> {
    let mut builder = reqwest::Client::builder()
        .referer(request.auto_referer)
        .connection_verbose(request.verbose);

    builder = if request.follow_location {
        builder.redirect(reqwest::redirect::Policy::limited(
            request.max_redirects as usize,
        ))
    } else {
        builder.redirect(reqwest::redirect::Policy::none())
    };

    if request.timeout > 0 {
        builder = builder.timeout(std::time::Duration::from_secs(request.timeout));
    }
    if request.connect_timeout > 0 {
        builder = builder.connect_timeout(std::time::Duration::from_secs(request.connect_timeout));
    }

    // TLS material: client identity, then extra trust roots.
    if !request.cert_file.is_empty() && !request.key_file.is_empty() {
        let cert = read_file(&request.cert_file)?;
        let key = read_file(&request.key_file)?;
        let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
            .map_err(|e| (TransportError::Tls, format!("invalid client identity: {e}")))?;
        builder = builder.identity(identity);
    }
    if !request.ca_file.is_empty() {
        builder = builder.add_root_certificate(read_certificate(&request.ca_file)?);
    }
    if !request.ca_path.is_empty() {
        for path in list_certificate_files(&request.ca_path)? {
            builder = builder.add_root_certificate(read_certificate(&path)?);
        }
    }

    if !request.proxy_server.is_empty() {
        let proxy_url = format!("{}://{}", request.proxy_type.scheme(), request.proxy_server);
        let mut proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| (TransportError::Request, format!("invalid proxy: {e}")))?;
        if let Some((user, password)) = request.proxy_auth.split_once(':') {
            proxy = proxy.basic_auth(user, password);
        }
        builder = builder.proxy(proxy);
    }

    if request.use_interface && request.proxy_server.is_empty() {
        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        {
            builder = builder.interface(&request.interface_name);
        }
        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        log::warn!(
            "interface binding to {:?} is not supported on this platform",
            request.interface_name
        );
    }

    builder
        .build()
        .map_err(|e| (TransportError::Request, format!("engine setup failed: {e}")))
}

/// Assembles the engine request: method, headers, defaults and body.
fn build_engine_request(
    client: &reqwest::Client,
    request: &HttpRequest,
) -> Result<reqwest::RequestBuilder, String> {
    use reqwest::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, COOKIE, USER_AGENT};

    let method = if request.head_only {
        reqwest::Method::HEAD
    } else {
        reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| format!("invalid HTTP method {:?}", request.method))?
    };

    let mut builder = client.request(method, &request.url);

    let mut header_map = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| format!("invalid header name {name:?}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| format!("invalid value for {name:?}"))?;
        header_map.append(name, value);
    }
    // Request-level defaults apply only when the caller did not set the
    // header explicitly.
    if !request.user_agent.is_empty() && !request.headers.contains_key("User-Agent") {
        header_map.insert(
            USER_AGENT,
            HeaderValue::from_str(&request.user_agent)
                .map_err(|_| "invalid User-Agent value".to_string())?,
        );
    }
    if !request.accept_encoding.is_empty() && !request.headers.contains_key("Accept-Encoding") {
        header_map.insert(
            ACCEPT_ENCODING,
            HeaderValue::from_str(&request.accept_encoding)
                .map_err(|_| "invalid Accept-Encoding value".to_string())?,
        );
    }
    if !request.cookie.is_empty() && !request.headers.contains_key("Cookie") {
        header_map.insert(
            COOKIE,
            HeaderValue::from_str(&request.cookie)
                .map_err(|_| "invalid Cookie value".to_string())?,
        );
    }
    builder = builder.headers(header_map);

    if !request.head_only && method_takes_body(&request.method) && !request.content.is_empty() {
        builder = builder.body(request.content.clone());
    }
    Ok(builder)
}

fn method_takes_body(method: &str) -> bool {
    method.eq_ignore_ascii_case("POST")
        || method.eq_ignore_ascii_case("PUT")
        || method.eq_ignore_ascii_case("PATCH")
        || method.eq_ignore_ascii_case("DELETE")
}

fn classify_engine_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect
    } else if e.is_redirect() {
        TransportError::Redirect
    } else if e.is_builder() || e.is_request() {
        TransportError::Request
    } else if e.is_body() || e.is_decode() {
        TransportError::Body
    } else {
        TransportError::Other(e.to_string())
    }
}

fn read_file(path: &str) -> Result<Vec<u8>, BuildError> {
    std::fs::read(path).map_err(|e| (TransportError::Tls, format!("cannot read {path:?}: {e}")))
}

fn read_certificate(path: &str) -> Result<reqwest::Certificate, BuildError> {
    reqwest::Certificate::from_pem(&read_file(path)?)
        .map_err(|e| (TransportError::Tls, format!("invalid certificate {path:?}: {e}")))
}

fn list_certificate_files(dir: &str) -> Result<Vec<String>, BuildError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| (TransportError::Tls, format!("cannot read CA path {dir:?}: {e}")))?;
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_cert = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("crt"));
        if is_cert {
            files.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}
