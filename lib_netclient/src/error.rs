//! # Error Taxonomy
//!
//! Every failure the library can surface is funneled into a single
//! [`ErrorCode`] sum type that is carried inside response objects and
//! WebSocket events. The four categories mirror the places things go wrong:
//!
//! - **`Transport`**: the transfer engine failed before a valid HTTP
//!   exchange completed (resolve, connect, TLS, read/write, timeout).
//! - **`Http`**: the exchange completed but the server answered with a
//!   status code the caller did not whitelist (>= 400).
//! - **`Client`**: a failure internal to this library's own lifecycle
//!   (cancellation, teardown, missing configuration).
//! - **`WebSocket`**: a protocol-level WebSocket failure.
//!
//! Per-request errors are *never* returned through `Result` at the delivery
//! boundary; the response object is the single funnel. `Result` is used for
//! immediate, synchronous failures only (e.g. rejecting an invalid
//! configuration before a connection attempt starts).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use thiserror::Error;

/// Failures reported by the underlying transfer engine before a complete
/// HTTP exchange took place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The overall or connect deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// TCP connect or name resolution failed.
    #[error("connection could not be established")]
    Connect,
    /// TLS negotiation or certificate material failed.
    #[error("TLS failure")]
    Tls,
    /// The request could not be constructed (bad URL, bad proxy, bad header).
    #[error("request could not be built")]
    Request,
    /// The response body stream broke mid-transfer.
    #[error("error while reading the response body")]
    Body,
    /// The redirect policy was exceeded.
    #[error("too many redirects")]
    Redirect,
    /// Anything the engine reported that does not fit the buckets above.
    #[error("transport failure: {0}")]
    Other(String),
}

/// Errors related to the internal state or lifecycle of the client itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Request was cancelled explicitly by the user.
    #[error("request was cancelled by the user")]
    CancelledByUser,
    /// Request handler was destroyed before completion, aborting the request.
    #[error("request was aborted due to handler destruction")]
    AbortedDuringDestruction,
    /// Operation attempted before the client was properly initialized.
    #[error("client was not initialized properly")]
    ClientNotInitialized,
    /// Provided configuration is incomplete or invalid.
    #[error("invalid or missing client configuration")]
    InvalidConfiguration,
    /// Operation requires an active connection but none exists.
    #[error("operation failed: client is not connected")]
    NotConnected,
    /// A task or manager panicked inside the worker loop.
    #[error("worker task panicked")]
    WorkerPanic,
}

/// Protocol-level WebSocket errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WebSocketError {
    /// WebSocket connection could not be established.
    #[error("failed to establish WebSocket connection")]
    ConnectionFailed,
    /// Connection was closed unexpectedly (e.g. code 1006).
    #[error("WebSocket connection was closed unexpectedly")]
    UnexpectedClose,
    /// Protocol violation occurred during message exchange.
    #[error("WebSocket protocol violation detected")]
    ProtocolViolation,
    /// Received an unsupported data type.
    #[error("unsupported WebSocket data type received")]
    UnsupportedDataType,
    /// Server sent an invalid close code.
    #[error("received invalid WebSocket close code")]
    InvalidCloseCode,
    /// Error occurred during compression or decompression.
    #[error("compression error during WebSocket exchange")]
    CompressionError,
}

/// The error classification carried by every response and event.
///
/// `ErrorCode::Ok` is the default; a terminal response with `Ok` means the
/// exchange completed and the status code was acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorCode {
    /// No error.
    #[default]
    Ok,
    /// Transfer-engine failure.
    Transport(TransportError),
    /// HTTP status outside the request's `valid_statuses` set.
    Http(u16),
    /// Library-internal failure.
    Client(ClientError),
    /// WebSocket protocol failure.
    WebSocket(WebSocketError),
}

impl ErrorCode {
    /// Returns true when no error is recorded.
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Ok => write!(f, "ok"),
            ErrorCode::Transport(e) => write!(f, "{e}"),
            ErrorCode::Http(status) => write!(f, "HTTP status {status}"),
            ErrorCode::Client(e) => write!(f, "{e}"),
            ErrorCode::WebSocket(e) => write!(f, "{e}"),
        }
    }
}

impl From<TransportError> for ErrorCode {
    fn from(e: TransportError) -> Self {
        ErrorCode::Transport(e)
    }
}

impl From<ClientError> for ErrorCode {
    fn from(e: ClientError) -> Self {
        ErrorCode::Client(e)
    }
}

impl From<WebSocketError> for ErrorCode {
    fn from(e: WebSocketError) -> Self {
        ErrorCode::WebSocket(e)
    }
}
