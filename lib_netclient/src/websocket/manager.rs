//! # WebSocket Manager
//!
//! Task manager holding weak references to every live session. The caller
//! owns its session through the [`WebSocketClient`](super::WebSocketClient)
//! façade; the manager only borrows it for processing, so a dropped client
//! disappears from the registry on the next sweep.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex, Weak};

use crate::core::{NetworkTaskManager, Notifier};

use super::session::WebSocketSession;
use super::transport::{TungsteniteTransport, WebSocketTransport};

/// Type-erased view of a session as the manager drives it.
pub trait SessionHandle: Send + Sync {
    /// Advances the session's FSM and queues.
    fn process(&self);
    /// Drains the session to a terminal state.
    fn shutdown(&self);
    /// True while the session needs processing.
    fn is_running(&self) -> bool;
}

impl<T: WebSocketTransport> SessionHandle for WebSocketSession<T> {
    fn process(&self) {
        WebSocketSession::process(self);
    }

    fn shutdown(&self) {
        WebSocketSession::shutdown(self);
    }

    fn is_running(&self) -> bool {
        WebSocketSession::is_running(self)
    }
}

/// Registry of live WebSocket sessions.
pub struct WebSocketManager {
    clients: Mutex<Vec<Weak<dyn SessionHandle>>>,
    handle: tokio::runtime::Handle,
    notifier: Notifier,
}

impl WebSocketManager {
    /// Creates a manager spawning transport tasks onto `handle`.
    pub fn new(handle: tokio::runtime::Handle, notifier: Notifier) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            handle,
            notifier,
        }
    }

    /// Constructs a new session, tracks it weakly and hands the strong
    /// reference to the caller.
    pub fn create_client(&self) -> Arc<WebSocketSession<TungsteniteTransport>> {
        let transport = TungsteniteTransport::new(self.handle.clone());
        let session = WebSocketSession::new(transport, self.notifier.clone());
        self.track(Arc::downgrade(&session) as Weak<dyn SessionHandle>);
        session
    }

    pub(crate) fn track(&self, session: Weak<dyn SessionHandle>) {
        self.clients
            .lock()
            .expect("ws client registry poisoned")
            .push(session);
    }

    fn live_clients(&self) -> Vec<Arc<dyn SessionHandle>> {
        self.clients
            .lock()
            .expect("ws client registry poisoned")
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl NetworkTaskManager for WebSocketManager {
    fn process(&self) {
        for client in self.live_clients() {
            client.process();
        }
        // Drop registry entries whose owners went away.
        self.clients
            .lock()
            .expect("ws client registry poisoned")
            .retain(|weak| weak.upgrade().is_some());
    }

    fn shutdown(&self) {
        for client in self.live_clients() {
            client.shutdown();
        }
    }

    fn is_loaded(&self) -> bool {
        self.live_clients().iter().any(|client| client.is_running())
    }
}
