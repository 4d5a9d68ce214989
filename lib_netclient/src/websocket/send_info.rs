//! Queued send intents: data frames and close frames awaiting dispatch.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use crate::error::ErrorCode;

/// Callback invoked once the transport has attempted the send.
pub type SendCallback = Box<dyn FnOnce(&ErrorCode) + Send>;

/// One entry in a client's send queue.
pub struct WebSocketSendInfo {
    /// Message content, or the close reason for close intents.
    pub message: String,
    /// Rate-limit slot applied to this send (0 is the general slot).
    pub rate_limit_id: usize,
    /// True when this intent is a close request.
    pub is_send_close: bool,
    /// Close status code (1000 = normal closure).
    pub status: u16,
    /// Completion callback, invoked from the worker after dispatch.
    pub callback: Option<SendCallback>,
}

impl WebSocketSendInfo {
    /// A queued text message.
    pub fn message(
        message: impl Into<String>,
        rate_limit_id: usize,
        callback: Option<SendCallback>,
    ) -> Self {
        Self {
            message: message.into(),
            rate_limit_id,
            is_send_close: false,
            status: 0,
            callback,
        }
    }

    /// A queued close request. Close frames use the general rate-limit
    /// slot.
    pub fn close(status: u16, reason: impl Into<String>, callback: Option<SendCallback>) -> Self {
        Self {
            message: reason.into(),
            rate_limit_id: 0,
            is_send_close: true,
            status,
            callback,
        }
    }
}
