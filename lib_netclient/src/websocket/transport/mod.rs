//! # WebSocket Transport Boundary
//!
//! The FSM core is generic over a [`WebSocketTransport`] so the hot path
//! stays monomorphic; the concrete engine is injected at construction.
//! A transport owns the wire connection and reports what happens on it as
//! [`TransportEvent`]s pushed through the [`TransportLink`] it receives at
//! init time. Send completions are parked on a shared callback queue that
//! the session drains on the worker thread, outside any transport locks.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::core::Notifier;
use crate::error::ErrorCode;

use super::config::WebSocketConfig;
use super::send_info::{SendCallback, WebSocketSendInfo};

pub mod tungstenite;

pub use tungstenite::TungsteniteTransport;

/// Wire-level occurrences reported by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The upgrade handshake succeeded with the given HTTP status.
    Opened { status: u16 },
    /// The peer closed the connection.
    Closed { status: u16, reason: String },
    /// The connection failed or broke.
    Error(ErrorCode),
    /// A message arrived.
    Message(String),
}

/// Queue of completed sends awaiting their user callbacks.
pub type SendCallbackQueue = Arc<Mutex<Vec<(ErrorCode, SendCallback)>>>;

/// Channels a transport uses to talk back to its owning session.
#[derive(Clone)]
pub struct TransportLink {
    events: UnboundedSender<TransportEvent>,
    send_callbacks: SendCallbackQueue,
    notifier: Notifier,
}

impl TransportLink {
    /// Bundles the session-side endpoints handed to a transport at init.
    pub fn new(
        events: UnboundedSender<TransportEvent>,
        send_callbacks: SendCallbackQueue,
        notifier: Notifier,
    ) -> Self {
        Self {
            events,
            send_callbacks,
            notifier,
        }
    }

    /// Reports a wire event and wakes the worker.
    pub fn send_event(&self, event: TransportEvent) {
        if self.events.send(event).is_ok() {
            self.notifier.notify();
        }
    }

    /// Parks a send completion for delivery on the next worker tick.
    pub fn push_send_callback(&self, result: ErrorCode, callback: Option<SendCallback>) {
        if let Some(callback) = callback {
            self.send_callbacks
                .lock()
                .expect("send callback queue poisoned")
                .push((result, callback));
            self.notifier.notify();
        }
    }
}

/// Contract between the FSM core and a wire-level WebSocket engine.
pub trait WebSocketTransport: Send + 'static {
    /// Validates `config` and starts connecting. Events begin flowing
    /// through `link` once the attempt resolves. An error return means the
    /// configuration is unusable and no connection attempt was started.
    fn init(&mut self, config: &WebSocketConfig, link: TransportLink) -> Result<(), ErrorCode>;

    /// Tears the connection down. No further events may be reported after
    /// this returns.
    fn deinit(&mut self);

    /// Dispatches a queued data frame.
    fn send_message(&mut self, info: WebSocketSendInfo);

    /// Dispatches a queued close frame.
    fn send_close(&mut self, info: WebSocketSendInfo);
}
