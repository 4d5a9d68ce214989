//! # WebSocket Module
//!
//! Per-session finite state machine plus the plumbing around it:
//!
//! - **`config`**: connection parameters, hot-swappable mid-session.
//! - **`event` / `send_info`**: the data flowing in and out of a session.
//! - **`rate_limiter`**: positional message admission (slot 0 is general).
//! - **`session`**: the FSM core, generic over the transport.
//! - **`transport`**: the transport contract and the tokio-tungstenite
//!   adapter.
//! - **`manager`**: task manager holding weak references to live sessions.
//! - **`client`**: the caller-facing façade.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

mod rate_limiter;

pub mod client;
pub mod config;
pub mod event;
pub mod manager;
pub mod send_info;
pub mod session;
pub mod transport;

pub use client::WebSocketClient;
pub use config::{RateLimitSlot, WebSocketConfig};
pub use event::{WebSocketEventData, WebSocketEventType, WebSocketSender, WebSocketSenderPtr};
pub use manager::WebSocketManager;
pub use send_info::{SendCallback, WebSocketSendInfo};
pub use session::WebSocketSession;
