//! WebSocket event data and the sender capability exposed through it.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use crate::error::ErrorCode;

use super::send_info::SendCallback;

/// Types of WebSocket events delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketEventType {
    /// Connection established.
    Open,
    /// Message received.
    Message,
    /// Connection closed.
    Close,
    /// Error occurred.
    Error,
}

/// Send interface reachable from inside an event callback.
///
/// Sends issued through this handle are merely enqueued; the client's FSM
/// dispatches them on the next worker tick, so replying from within a
/// callback can never re-enter the transport.
pub trait WebSocketSender: Send + Sync {
    /// Queues a text message. Returns false when the message is empty or
    /// the client is not connected.
    fn send_message(
        &self,
        message: &str,
        rate_limit_id: usize,
        callback: Option<SendCallback>,
    ) -> bool;

    /// Queues a close frame. Returns false when the client is not
    /// connected.
    fn send_close(&self, status: u16, reason: &str, callback: Option<SendCallback>) -> bool;

    /// True between the Open event and its paired Close.
    fn is_connected(&self) -> bool;
}

/// Cloneable handle to a client's send interface.
pub type WebSocketSenderPtr = Arc<dyn WebSocketSender>;

/// One event in a WebSocket session's lifecycle.
#[derive(Clone)]
pub struct WebSocketEventData {
    /// What occurred.
    pub event_type: WebSocketEventType,
    /// Message content (for `Message`) or close reason (for `Close`).
    pub message: String,
    /// Status code: the handshake status for `Open`, the close code for
    /// `Close`.
    pub status_code: u16,
    /// Error classification for `Error` events.
    pub error_code: ErrorCode,
    /// Capability handle for replying from within a callback.
    pub sender: WebSocketSenderPtr,
}

impl std::fmt::Debug for WebSocketEventData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketEventData")
            .field("event_type", &self.event_type)
            .field("message", &self.message)
            .field("status_code", &self.status_code)
            .field("error_code", &self.error_code)
            .finish_non_exhaustive()
    }
}

/// Callback receiving session events as they occur. When none is installed
/// events are buffered for polling instead.
pub type EventCallback = Box<dyn FnMut(WebSocketEventData) + Send>;
