//! # WebSocket Session Core
//!
//! The per-client finite state machine. One session moves through
//! `INIT -> CONNECTING -> WORKING` with detours through `RECONNECTING`
//! (connection lost, policy allows another attempt) and `STOPPED`
//! (configuration unusable). All state transitions happen on the worker
//! thread inside [`process`](WebSocketSession::process); user-facing calls
//! only enqueue FSM events or send intents.
//!
//! Event delivery follows the installed-callback-or-queue rule: with a
//! callback installed events are delivered synchronously from the worker,
//! otherwise they are buffered for polling. The `is_connected` flag guards
//! Open/Close pairing so exactly one Close is observed per Open.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::core::Notifier;
use crate::error::{ClientError, ErrorCode};

use super::config::WebSocketConfig;
use super::event::{EventCallback, WebSocketEventData, WebSocketEventType, WebSocketSender};
use super::rate_limiter::RateLimiter;
use super::send_info::{SendCallback, WebSocketSendInfo};
use super::transport::{SendCallbackQueue, TransportEvent, TransportLink, WebSocketTransport};

/// Callback acknowledging a connect/disconnect/config request.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsmState {
    Init,
    Connecting,
    Working,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsmEvent {
    RequestConnect,
    RequestDisconnect,
    UpdateConfig,
    ConnectionOpened,
    ConnectionClosed,
    ConnectionError,
    MessageReceived,
}

struct FsmEventData {
    event: FsmEvent,
    ws_event: Option<WebSocketEventData>,
    config: Option<WebSocketConfig>,
    callback: Option<CompletionCallback>,
}

impl FsmEventData {
    fn bare(event: FsmEvent) -> Self {
        Self {
            event,
            ws_event: None,
            config: None,
            callback: None,
        }
    }

    fn with_callback(event: FsmEvent, callback: Option<CompletionCallback>) -> Self {
        Self {
            callback,
            ..Self::bare(event)
        }
    }

    fn with_ws_event(event: FsmEvent, ws_event: WebSocketEventData) -> Self {
        Self {
            ws_event: Some(ws_event),
            ..Self::bare(event)
        }
    }
}

struct FsmInner<T> {
    state: FsmState,
    config: Option<WebSocketConfig>,
    transport: T,
    reconnect_attempt: u32,
    close_time: Instant,
}

/// Per-client FSM core, generic over the wire transport.
pub struct WebSocketSession<T: WebSocketTransport> {
    weak_self: Weak<WebSocketSession<T>>,
    inner: Mutex<FsmInner<T>>,
    fsm_events: Mutex<VecDeque<FsmEventData>>,
    transport_events: Mutex<UnboundedReceiver<TransportEvent>>,
    events_tx: UnboundedSender<TransportEvent>,
    event_queue: Mutex<VecDeque<WebSocketEventData>>,
    message_queue: Mutex<VecDeque<WebSocketSendInfo>>,
    send_callbacks: SendCallbackQueue,
    on_event: Mutex<Option<EventCallback>>,
    connected: AtomicBool,
    running: AtomicBool,
    rate_limiter: RateLimiter,
    notifier: Notifier,
}

impl<T: WebSocketTransport> WebSocketSession<T> {
    /// Creates a session around `transport`.
    pub fn new(transport: T, notifier: Notifier) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            inner: Mutex::new(FsmInner {
                state: FsmState::Init,
                config: None,
                transport,
                reconnect_attempt: 0,
                close_time: Instant::now(),
            }),
            fsm_events: Mutex::new(VecDeque::new()),
            transport_events: Mutex::new(events_rx),
            events_tx,
            event_queue: Mutex::new(VecDeque::new()),
            message_queue: Mutex::new(VecDeque::new()),
            send_callbacks: Arc::new(Mutex::new(Vec::new())),
            on_event: Mutex::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            rate_limiter: RateLimiter::new(),
            notifier,
        })
    }

    /// Installs the event callback. Events queued before installation stay
    /// in the polling queue. Must not be called from inside the callback
    /// itself.
    pub fn set_event_callback(&self, callback: Option<EventCallback>) {
        *self.on_event.lock().expect("event callback lock poisoned") = callback;
    }

    /// Installs a new configuration through the FSM.
    pub fn set_config(&self, config: WebSocketConfig, callback: Option<CompletionCallback>) {
        let mut event = FsmEventData::with_callback(FsmEvent::UpdateConfig, callback);
        event.config = Some(config);
        self.push_fsm_event(event);
    }

    /// Requests a connection attempt.
    pub fn connect(&self, callback: Option<CompletionCallback>) {
        self.push_fsm_event(FsmEventData::with_callback(
            FsmEvent::RequestConnect,
            callback,
        ));
    }

    /// Requests a disconnect; the callback fires once the FSM reached
    /// `INIT`.
    pub fn disconnect(&self, callback: Option<CompletionCallback>) {
        self.push_fsm_event(FsmEventData::with_callback(
            FsmEvent::RequestDisconnect,
            callback,
        ));
    }

    /// True between the Open event and its paired Close.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True while the FSM is not terminal or events remain to be applied.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            || !self
                .fsm_events
                .lock()
                .expect("fsm event queue poisoned")
                .is_empty()
    }

    /// Pops the next buffered event, if any (polling mode).
    pub fn receive_event(&self) -> Option<WebSocketEventData> {
        self.event_queue
            .lock()
            .expect("event queue poisoned")
            .pop_front()
    }

    /// Drains all buffered events at once (polling mode).
    pub fn receive_events(&self) -> Vec<WebSocketEventData> {
        self.event_queue
            .lock()
            .expect("event queue poisoned")
            .drain(..)
            .collect()
    }

    /// Advances the session by one worker tick.
    ///
    /// ## Workflow:
    /// 1. Drain the transport's event channel into the FSM inbox.
    /// 2. Run the state handler for the current FSM state (at most one
    ///    non-message event is applied per tick).
    /// 3. Filter the send queue through the rate limiter and dispatch the
    ///    admitted intents to the transport.
    /// 4. Drain the send-callback queue, invoking user callbacks outside
    ///    any transport locks.
    pub fn process(&self) {
        self.pump_transport_events();
        {
            let mut inner = self.inner.lock().expect("session state lock poisoned");
            self.process_fsm_state(&mut inner);
            self.process_message_queue(&mut inner);
        }
        self.process_send_callback_queue();
    }

    /// Drains the FSM to a terminal state: injects a disconnect and
    /// processes until the session stops running.
    pub fn shutdown(&self) {
        self.push_fsm_event(FsmEventData::bare(FsmEvent::RequestDisconnect));
        while self.is_running() {
            self.pump_transport_events();
            {
                let mut inner = self.inner.lock().expect("session state lock poisoned");
                self.process_fsm_state(&mut inner);
            }
            self.process_send_callback_queue();
        }
    }

    fn push_fsm_event(&self, event: FsmEventData) {
        self.fsm_events
            .lock()
            .expect("fsm event queue poisoned")
            .push_back(event);
        self.notifier.notify();
    }

    fn pop_fsm_event(&self) -> Option<FsmEventData> {
        self.fsm_events
            .lock()
            .expect("fsm event queue poisoned")
            .pop_front()
    }

    fn pump_transport_events(&self) {
        let mut receiver = self
            .transport_events
            .lock()
            .expect("transport event lock poisoned");
        while let Ok(event) = receiver.try_recv() {
            let data = match event {
                TransportEvent::Opened { status } => FsmEventData::with_ws_event(
                    FsmEvent::ConnectionOpened,
                    self.make_open_event(status),
                ),
                TransportEvent::Closed { status, reason } => FsmEventData::with_ws_event(
                    FsmEvent::ConnectionClosed,
                    self.make_close_event(&reason, status),
                ),
                TransportEvent::Error(error) => FsmEventData::with_ws_event(
                    FsmEvent::ConnectionError,
                    self.make_error_event(error),
                ),
                TransportEvent::Message(message) => FsmEventData::with_ws_event(
                    FsmEvent::MessageReceived,
                    self.make_message_event(message),
                ),
            };
            self.fsm_events
                .lock()
                .expect("fsm event queue poisoned")
                .push_back(data);
        }
    }

    // --- FSM states ---

    fn process_fsm_state(&self, inner: &mut FsmInner<T>) {
        match inner.state {
            FsmState::Init => self.state_init(inner),
            FsmState::Connecting => self.state_connecting(inner),
            FsmState::Working => self.state_working(inner),
            FsmState::Reconnecting => self.state_reconnecting(inner),
            FsmState::Stopped => self.state_stopped(inner),
        }
    }

    fn state_init(&self, inner: &mut FsmInner<T>) {
        let Some(mut event) = self.pop_fsm_event() else {
            return;
        };
        match event.event {
            FsmEvent::RequestConnect => self.try_connect(inner, event.callback.take()),
            FsmEvent::UpdateConfig => match event.config.take() {
                Some(config) => {
                    self.rate_limiter.set_limits(&config.rate_limits);
                    inner.config = Some(config);
                    invoke(event.callback.take(), true);
                }
                None => invoke(event.callback.take(), false),
            },
            _ => invoke(event.callback.take(), false),
        }
    }

    fn state_connecting(&self, inner: &mut FsmInner<T>) {
        let Some(mut event) = self.pop_fsm_event() else {
            return;
        };
        match event.event {
            FsmEvent::ConnectionOpened => {
                self.handle_open_event(event.ws_event.take());
                inner.reconnect_attempt = 0;
                self.running.store(true, Ordering::SeqCst);
                inner.state = FsmState::Working;
            }
            FsmEvent::ConnectionError | FsmEvent::ConnectionClosed => {
                self.handle_connection_drop(inner, event);
            }
            FsmEvent::RequestDisconnect => self.do_disconnect(inner, event.callback.take()),
            FsmEvent::UpdateConfig => self.apply_config_with_teardown(inner, event),
            _ => invoke(event.callback.take(), false),
        }
    }

    fn state_working(&self, inner: &mut FsmInner<T>) {
        // Consecutive messages are drained in one tick; any other event
        // ends the drain after being applied.
        loop {
            let Some(mut event) = self.pop_fsm_event() else {
                return;
            };
            let mut is_message = false;
            match event.event {
                FsmEvent::RequestDisconnect => self.do_disconnect(inner, event.callback.take()),
                FsmEvent::ConnectionError | FsmEvent::ConnectionClosed => {
                    self.handle_connection_drop(inner, event);
                }
                FsmEvent::UpdateConfig => self.apply_config_with_teardown(inner, event),
                FsmEvent::MessageReceived => {
                    if let Some(ws_event) = event.ws_event.take() {
                        self.deliver_event(ws_event);
                    }
                    is_message = true;
                }
                _ => invoke(event.callback.take(), false),
            }
            if !is_message {
                return;
            }
        }
    }

    fn state_reconnecting(&self, inner: &mut FsmInner<T>) {
        if let Some(mut event) = self.pop_fsm_event() {
            match event.event {
                FsmEvent::RequestDisconnect => {
                    self.running.store(false, Ordering::SeqCst);
                    invoke(event.callback.take(), true);
                    inner.state = FsmState::Init;
                }
                FsmEvent::UpdateConfig => self.apply_config_and_connect(inner, event),
                FsmEvent::MessageReceived => {
                    if let Some(ws_event) = event.ws_event.take() {
                        self.deliver_event(ws_event);
                    }
                }
                _ => invoke(event.callback.take(), false),
            }
        }
        if inner.state != FsmState::Reconnecting {
            return;
        }

        // No event moved us: apply the reconnect policy.
        let Some(config) = inner.config.as_ref() else {
            self.emit_error(ErrorCode::Client(ClientError::InvalidConfiguration));
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Stopped;
            return;
        };
        if !config.reconnect {
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Init;
            return;
        }
        if config.reconnect_attempts > 0 && inner.reconnect_attempt >= config.reconnect_attempts {
            log::info!(
                "giving up after {} reconnect attempt(s)",
                inner.reconnect_attempt
            );
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Init;
            return;
        }
        if inner.close_time.elapsed().as_secs() >= config.reconnect_delay {
            log::info!(
                "reconnect attempt {} to {}",
                inner.reconnect_attempt,
                config.url
            );
            if !self.init_transport(inner) {
                self.emit_error(ErrorCode::Client(ClientError::InvalidConfiguration));
                self.running.store(false, Ordering::SeqCst);
                inner.state = FsmState::Stopped;
                return;
            }
            self.running.store(true, Ordering::SeqCst);
            inner.state = FsmState::Connecting;
        }
    }

    fn state_stopped(&self, inner: &mut FsmInner<T>) {
        let Some(mut event) = self.pop_fsm_event() else {
            return;
        };
        match event.event {
            FsmEvent::RequestConnect => self.try_connect(inner, event.callback.take()),
            FsmEvent::UpdateConfig => self.apply_config_and_connect(inner, event),
            _ => invoke(event.callback.take(), false),
        }
    }

    // --- Transition helpers ---

    /// Validates the configuration, initializes the transport and moves to
    /// CONNECTING; on failure emits an Error event and stops.
    fn try_connect(&self, inner: &mut FsmInner<T>, callback: Option<CompletionCallback>) {
        if inner.config.is_none() || !self.init_transport(inner) {
            self.emit_error(ErrorCode::Client(ClientError::InvalidConfiguration));
            invoke(callback, false);
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Stopped;
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        invoke(callback, true);
        inner.state = FsmState::Connecting;
    }

    /// Tears down the transport and returns to INIT, emitting the paired
    /// Close event.
    fn do_disconnect(&self, inner: &mut FsmInner<T>, callback: Option<CompletionCallback>) {
        inner.transport.deinit();
        self.handle_close_event(None);
        inner.reconnect_attempt = 0;
        self.running.store(false, Ordering::SeqCst);
        invoke(callback, true);
        inner.state = FsmState::Init;
    }

    /// Shared handling of ConnectionError / ConnectionClosed: deliver the
    /// events, tear down, then consult the reconnect policy.
    fn handle_connection_drop(&self, inner: &mut FsmInner<T>, mut event: FsmEventData) {
        let was_error = event.event == FsmEvent::ConnectionError;
        if was_error {
            if let Some(ws_event) = event.ws_event.take() {
                self.deliver_event(ws_event);
            }
        }
        inner.transport.deinit();
        if was_error {
            // An error substitutes no Close of its own; synthesize the
            // paired one.
            self.handle_close_event(Some(self.make_close_event("Going Away", 1001)));
        } else {
            self.handle_close_event(event.ws_event.take());
        }

        let reconnect = inner.config.as_ref().is_some_and(|c| c.reconnect);
        if !reconnect {
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Init;
            return;
        }
        inner.reconnect_attempt += 1;
        inner.close_time = Instant::now();
        self.running.store(true, Ordering::SeqCst);
        inner.state = FsmState::Reconnecting;
    }

    /// Config update while a transport is up: tear down first, then
    /// install and reconnect.
    fn apply_config_with_teardown(&self, inner: &mut FsmInner<T>, mut event: FsmEventData) {
        inner.transport.deinit();
        self.handle_close_event(None);
        self.install_config_and_connect(inner, event.config.take(), event.callback.take());
    }

    /// Config update with no live transport (RECONNECTING / STOPPED).
    fn apply_config_and_connect(&self, inner: &mut FsmInner<T>, mut event: FsmEventData) {
        self.install_config_and_connect(inner, event.config.take(), event.callback.take());
    }

    fn install_config_and_connect(
        &self,
        inner: &mut FsmInner<T>,
        config: Option<WebSocketConfig>,
        callback: Option<CompletionCallback>,
    ) {
        let Some(config) = config else {
            self.emit_error(ErrorCode::Client(ClientError::InvalidConfiguration));
            invoke(callback, false);
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Stopped;
            return;
        };
        self.rate_limiter.set_limits(&config.rate_limits);
        inner.config = Some(config);
        inner.reconnect_attempt = 0;
        if !self.init_transport(inner) {
            self.emit_error(ErrorCode::Client(ClientError::InvalidConfiguration));
            invoke(callback, false);
            self.running.store(false, Ordering::SeqCst);
            inner.state = FsmState::Stopped;
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        invoke(callback, true);
        inner.state = FsmState::Connecting;
    }

    fn init_transport(&self, inner: &mut FsmInner<T>) -> bool {
        let Some(config) = inner.config.as_ref() else {
            return false;
        };
        let link = TransportLink::new(
            self.events_tx.clone(),
            Arc::clone(&self.send_callbacks),
            self.notifier.clone(),
        );
        match inner.transport.init(config, link) {
            Ok(()) => true,
            Err(error) => {
                log::warn!("transport init failed: {error}");
                false
            }
        }
    }

    // --- Queues ---

    fn process_message_queue(&self, inner: &mut FsmInner<T>) {
        let admitted: Vec<WebSocketSendInfo> = {
            let mut queue = self.message_queue.lock().expect("message queue poisoned");
            if queue.is_empty() {
                return;
            }
            let mut kept = VecDeque::with_capacity(queue.len());
            let mut admitted = Vec::new();
            while let Some(info) = queue.pop_front() {
                if self.rate_limiter.allow_request(info.rate_limit_id) {
                    admitted.push(info);
                } else {
                    // Not admitted this tick; tried again on the next one.
                    kept.push_back(info);
                }
            }
            *queue = kept;
            admitted
        };
        for info in admitted {
            if info.is_send_close {
                inner.transport.send_close(info);
            } else {
                inner.transport.send_message(info);
            }
        }
    }

    fn process_send_callback_queue(&self) {
        let callbacks: Vec<(ErrorCode, SendCallback)> = {
            let mut queue = self
                .send_callbacks
                .lock()
                .expect("send callback queue poisoned");
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };
        for (result, callback) in callbacks {
            callback(&result);
        }
    }

    // --- Event delivery ---

    fn handle_open_event(&self, event: Option<WebSocketEventData>) {
        if self.connected.load(Ordering::SeqCst) {
            return;
        }
        self.connected.store(true, Ordering::SeqCst);
        if let Some(event) = event {
            self.deliver_event(event);
        }
    }

    fn handle_close_event(&self, event: Option<WebSocketEventData>) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        let event = event.unwrap_or_else(|| self.make_close_event("Normal Closure", 1000));
        self.deliver_event(event);
    }

    fn emit_error(&self, error: ErrorCode) {
        self.deliver_event(self.make_error_event(error));
    }

    fn deliver_event(&self, event: WebSocketEventData) {
        let mut callback = self.on_event.lock().expect("event callback lock poisoned");
        if let Some(callback) = callback.as_mut() {
            callback(event);
            return;
        }
        drop(callback);
        self.event_queue
            .lock()
            .expect("event queue poisoned")
            .push_back(event);
    }

    fn sender_handle(&self) -> Arc<dyn WebSocketSender> {
        let strong = self
            .weak_self
            .upgrade()
            .expect("session is alive while minting events");
        strong
    }

    fn make_open_event(&self, status_code: u16) -> WebSocketEventData {
        WebSocketEventData {
            event_type: WebSocketEventType::Open,
            message: String::new(),
            status_code,
            error_code: ErrorCode::Ok,
            sender: self.sender_handle(),
        }
    }

    fn make_close_event(&self, reason: &str, status_code: u16) -> WebSocketEventData {
        WebSocketEventData {
            event_type: WebSocketEventType::Close,
            message: reason.to_string(),
            status_code,
            error_code: ErrorCode::Ok,
            sender: self.sender_handle(),
        }
    }

    fn make_error_event(&self, error: ErrorCode) -> WebSocketEventData {
        WebSocketEventData {
            event_type: WebSocketEventType::Error,
            message: String::new(),
            status_code: 0,
            error_code: error,
            sender: self.sender_handle(),
        }
    }

    fn make_message_event(&self, message: String) -> WebSocketEventData {
        WebSocketEventData {
            event_type: WebSocketEventType::Message,
            message,
            status_code: 0,
            error_code: ErrorCode::Ok,
            sender: self.sender_handle(),
        }
    }
}

impl<T: WebSocketTransport> WebSocketSender for WebSocketSession<T> {
    fn send_message(
        &self,
        message: &str,
        rate_limit_id: usize,
        callback: Option<SendCallback>,
    ) -> bool {
        if message.is_empty() || !self.is_connected() {
            return false;
        }
        self.message_queue
            .lock()
            .expect("message queue poisoned")
            .push_back(WebSocketSendInfo::message(message, rate_limit_id, callback));
        self.notifier.notify();
        true
    }

    fn send_close(&self, status: u16, reason: &str, callback: Option<SendCallback>) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.message_queue
            .lock()
            .expect("message queue poisoned")
            .push_back(WebSocketSendInfo::close(status, reason, callback));
        self.notifier.notify();
        true
    }

    fn is_connected(&self) -> bool {
        WebSocketSession::is_connected(self)
    }
}

fn invoke(callback: Option<CompletionCallback>, result: bool) {
    if let Some(callback) = callback {
        callback(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NetworkWorker;
    use crate::error::WebSocketError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockShared {
        link: Mutex<Option<TransportLink>>,
        sent: Mutex<Vec<(bool, String, u16)>>,
        inits: AtomicUsize,
        deinits: AtomicUsize,
        fail_init: AtomicBool,
    }

    struct MockTransport {
        shared: Arc<MockShared>,
    }

    impl WebSocketTransport for MockTransport {
        fn init(&mut self, _config: &WebSocketConfig, link: TransportLink) -> Result<(), ErrorCode> {
            if self.shared.fail_init.load(Ordering::SeqCst) {
                return Err(ErrorCode::Client(ClientError::InvalidConfiguration));
            }
            self.shared.inits.fetch_add(1, Ordering::SeqCst);
            *self.shared.link.lock().expect("mock link lock") = Some(link);
            Ok(())
        }

        fn deinit(&mut self) {
            self.shared.deinits.fetch_add(1, Ordering::SeqCst);
        }

        fn send_message(&mut self, info: WebSocketSendInfo) {
            self.shared
                .sent
                .lock()
                .expect("mock sent lock")
                .push((false, info.message.clone(), 0));
            if let Some(link) = self.shared.link.lock().expect("mock link lock").as_ref() {
                link.push_send_callback(ErrorCode::Ok, info.callback);
            }
        }

        fn send_close(&mut self, info: WebSocketSendInfo) {
            self.shared
                .sent
                .lock()
                .expect("mock sent lock")
                .push((true, info.message.clone(), info.status));
            if let Some(link) = self.shared.link.lock().expect("mock link lock").as_ref() {
                link.push_send_callback(ErrorCode::Ok, info.callback);
            }
        }
    }

    struct Fixture {
        session: Arc<WebSocketSession<MockTransport>>,
        shared: Arc<MockShared>,
        _worker: Arc<NetworkWorker>,
    }

    fn fixture() -> Fixture {
        let worker = NetworkWorker::new();
        let shared = Arc::new(MockShared::default());
        let transport = MockTransport {
            shared: Arc::clone(&shared),
        };
        let session = WebSocketSession::new(transport, Notifier::new(&worker));
        Fixture {
            session,
            shared,
            _worker: worker,
        }
    }

    fn test_config() -> WebSocketConfig {
        WebSocketConfig {
            url: "ws://127.0.0.1:1/".to_string(),
            reconnect: false,
            ..WebSocketConfig::default()
        }
    }

    fn wire(fixture: &Fixture) -> TransportLink {
        fixture
            .shared
            .link
            .lock()
            .expect("mock link lock")
            .clone()
            .expect("transport initialized")
    }

    /// Drives the session through config install + connect + open.
    fn open_session(fixture: &Fixture, config: WebSocketConfig) {
        fixture.session.set_config(config, None);
        fixture.session.connect(None);
        fixture.session.process(); // UpdateConfig
        fixture.session.process(); // RequestConnect -> CONNECTING
        wire(fixture).send_event(TransportEvent::Opened { status: 101 });
        fixture.session.process(); // Opened -> WORKING
    }

    #[test]
    fn connect_without_config_stops_with_error() {
        let fixture = fixture();
        let result = Arc::new(Mutex::new(None));
        let result_clone = Arc::clone(&result);
        fixture.session.connect(Some(Box::new(move |ok| {
            *result_clone.lock().expect("result lock") = Some(ok);
        })));
        fixture.session.process();

        assert_eq!(*result.lock().expect("result lock"), Some(false));
        let event = fixture.session.receive_event().expect("error event");
        assert_eq!(event.event_type, WebSocketEventType::Error);
        assert_eq!(
            event.error_code,
            ErrorCode::Client(ClientError::InvalidConfiguration)
        );
        assert!(!fixture.session.is_running());
    }

    #[test]
    fn open_then_message_then_close_pairs_events() {
        let fixture = fixture();
        open_session(&fixture, test_config());
        assert!(fixture.session.is_connected());

        wire(&fixture).send_event(TransportEvent::Message("hello".to_string()));
        fixture.session.process();
        wire(&fixture).send_event(TransportEvent::Closed {
            status: 1000,
            reason: "bye".to_string(),
        });
        fixture.session.process();

        let events = fixture.session.receive_events();
        let kinds: Vec<WebSocketEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                WebSocketEventType::Open,
                WebSocketEventType::Message,
                WebSocketEventType::Close
            ]
        );
        assert_eq!(events[0].status_code, 101);
        assert_eq!(events[1].message, "hello");
        assert_eq!(events[2].status_code, 1000);
        assert!(!fixture.session.is_connected());
        // reconnect=false: the FSM is idle again.
        assert!(!fixture.session.is_running());
    }

    #[test]
    fn transport_error_emits_error_then_synthesized_close() {
        let fixture = fixture();
        open_session(&fixture, test_config());

        wire(&fixture).send_event(TransportEvent::Error(ErrorCode::WebSocket(
            WebSocketError::UnexpectedClose,
        )));
        fixture.session.process();

        let events = fixture.session.receive_events();
        assert_eq!(events.len(), 3); // Open, Error, Close
        assert_eq!(events[1].event_type, WebSocketEventType::Error);
        assert_eq!(events[2].event_type, WebSocketEventType::Close);
        assert_eq!(events[2].status_code, 1001);
        assert_eq!(events[2].message, "Going Away");
    }

    #[test]
    fn disconnect_from_working_emits_normal_close() {
        let fixture = fixture();
        open_session(&fixture, test_config());

        let acknowledged = Arc::new(AtomicBool::new(false));
        let ack = Arc::clone(&acknowledged);
        fixture.session.disconnect(Some(Box::new(move |ok| {
            assert!(ok);
            ack.store(true, Ordering::SeqCst);
        })));
        fixture.session.process();

        assert!(acknowledged.load(Ordering::SeqCst));
        let events = fixture.session.receive_events();
        let close = events.last().expect("close event");
        assert_eq!(close.event_type, WebSocketEventType::Close);
        assert_eq!(close.status_code, 1000);
        assert_eq!(fixture.shared.deinits.load(Ordering::SeqCst), 1);
        assert!(!fixture.session.is_connected());
    }

    #[test]
    fn config_update_mid_session_tears_down_and_reconnects() {
        let fixture = fixture();
        open_session(&fixture, test_config());
        assert_eq!(fixture.shared.inits.load(Ordering::SeqCst), 1);

        let mut updated = test_config();
        updated.url = "ws://127.0.0.1:2/".to_string();
        fixture.session.set_config(updated, None);
        fixture.session.process();

        assert_eq!(fixture.shared.deinits.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.shared.inits.load(Ordering::SeqCst), 2);
        // The old connection's Close was emitted; a new handshake is
        // pending.
        let events = fixture.session.receive_events();
        assert_eq!(
            events.last().expect("close event").event_type,
            WebSocketEventType::Close
        );
        assert!(!fixture.session.is_connected());
        assert!(fixture.session.is_running());
    }

    #[test]
    fn sends_are_rate_gated_and_acknowledged() {
        let fixture = fixture();
        let mut config = test_config();
        config.rate_limits = vec![super::super::config::RateLimitSlot::new(1, 60_000)];
        open_session(&fixture, config);

        let acked = Arc::new(AtomicUsize::new(0));
        for text in ["one", "two"] {
            let acked = Arc::clone(&acked);
            let queued = fixture.session.send_message(
                text,
                0,
                Some(Box::new(move |result: &ErrorCode| {
                    assert!(result.is_ok());
                    acked.fetch_add(1, Ordering::SeqCst);
                })),
            );
            assert!(queued);
        }

        fixture.session.process();
        // Only the first message passed the one-per-minute window.
        assert_eq!(fixture.shared.sent.lock().expect("sent lock").len(), 1);
        assert_eq!(acked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_requires_connection() {
        let fixture = fixture();
        assert!(!fixture.session.send_message("hi", 0, None));
        assert!(!fixture.session.send_close(1000, "", None));
        assert!(!fixture.session.send_message("", 0, None));
    }

    #[test]
    fn reconnect_policy_retries_then_gives_up() {
        let fixture = fixture();
        let mut config = test_config();
        config.reconnect = true;
        config.reconnect_delay = 0;
        config.reconnect_attempts = 1;
        open_session(&fixture, config);

        wire(&fixture).send_event(TransportEvent::Closed {
            status: 1006,
            reason: String::new(),
        });
        fixture.session.process(); // -> RECONNECTING (attempt 1 recorded)
        fixture.session.process(); // policy: attempts exhausted -> INIT

        assert!(!fixture.session.is_running());
        assert_eq!(fixture.shared.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reconnect_policy_reinitializes_when_allowed() {
        let fixture = fixture();
        let mut config = test_config();
        config.reconnect = true;
        config.reconnect_delay = 0;
        config.reconnect_attempts = 0; // unbounded
        open_session(&fixture, config);

        wire(&fixture).send_event(TransportEvent::Closed {
            status: 1006,
            reason: String::new(),
        });
        fixture.session.process(); // -> RECONNECTING
        fixture.session.process(); // policy: delay elapsed -> CONNECTING

        assert_eq!(fixture.shared.inits.load(Ordering::SeqCst), 2);
        assert!(fixture.session.is_running());
    }

    #[test]
    fn callback_mode_delivers_synchronously_and_sender_replies() {
        let fixture = fixture();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        fixture
            .session
            .set_event_callback(Some(Box::new(move |event: WebSocketEventData| {
                log_clone
                    .lock()
                    .expect("log lock")
                    .push(format!("{:?}", event.event_type));
                if event.event_type == WebSocketEventType::Message {
                    // Replying from inside a callback only enqueues.
                    assert!(event.sender.send_message("echo", 0, None));
                }
            })));

        open_session(&fixture, test_config());
        wire(&fixture).send_event(TransportEvent::Message("ping".to_string()));
        fixture.session.process();
        // The echo reply queued by the callback goes out next tick.
        fixture.session.process();

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["Open".to_string(), "Message".to_string()]
        );
        let sent = fixture.shared.sent.lock().expect("sent lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "echo");
        // Nothing reached the polling queue while a callback is installed.
        assert!(fixture.session.receive_event().is_none());
    }

    #[test]
    fn shutdown_drains_to_terminal_state() {
        let fixture = fixture();
        open_session(&fixture, test_config());
        fixture.session.shutdown();
        assert!(!fixture.session.is_running());
        assert!(!fixture.session.is_connected());
        let events = fixture.session.receive_events();
        assert_eq!(
            events.last().expect("close event").event_type,
            WebSocketEventType::Close
        );
    }
}
