//! # HTTP Request Manager
//!
//! The task manager that owns the whole HTTP request lifecycle:
//!
//! ```text
//! pending --(rate limiter admits)--> active batch --+--> terminal callback
//!    ^                                              |
//!    +----(retry delay elapsed)------ failed <------+ (non-terminal attempt)
//! ```
//!
//! Each `process()` call from the worker advances the pipeline in four
//! phases: pending dispatch, active-batch drive, retry promotion and the
//! cancellation sweep. Shutdown drains every stage, synthesizing the 499
//! responses the delivery contract requires.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::core::{NetworkTaskManager, Notifier};
use crate::error::{ClientError, ErrorCode};

use super::batch::{BatchRequestHandler, CancelCallback};
use super::context::HttpRequestContext;
use super::rate_limiter::RateLimiter;
use super::request::HttpRequest;
use super::response::{HttpResponse, HttpResponseCallback};

#[derive(Default)]
struct SharedState {
    pending: Vec<HttpRequestContext>,
    failed: Vec<HttpRequestContext>,
    to_cancel: HashMap<u64, Vec<CancelCallback>>,
}

/// Task manager for the HTTP pipeline.
pub struct HttpRequestManager {
    state: Mutex<SharedState>,
    // Touched only from the worker during process()/shutdown(); the lock
    // just satisfies the Sync bound and is never contended.
    batches: Mutex<Vec<BatchRequestHandler>>,
    rate_limiter: RateLimiter,
    request_id_counter: AtomicU64,
    shutdown_flag: AtomicBool,
    handle: tokio::runtime::Handle,
    notifier: Notifier,
}

impl HttpRequestManager {
    /// Creates a manager spawning its transfers onto `handle`.
    pub fn new(handle: tokio::runtime::Handle, notifier: Notifier) -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            batches: Mutex::new(Vec::new()),
            rate_limiter: RateLimiter::new(),
            request_id_counter: AtomicU64::new(1),
            shutdown_flag: AtomicBool::new(false),
            handle,
            notifier,
        }
    }

    /// Returns a fresh unique request id. Ids are strictly increasing and
    /// never reused within a manager instance.
    pub fn next_request_id(&self) -> u64 {
        self.request_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Queues a request for processing. `None` marks an unsubmittable
    /// request that will be answered with a synthetic 400. Returns false
    /// when the manager is shutting down.
    pub fn add_request(
        &self,
        request: Option<HttpRequest>,
        callback: HttpResponseCallback,
    ) -> bool {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return false;
        }
        self.state
            .lock()
            .expect("http manager lock poisoned")
            .pending
            .push(HttpRequestContext::new(request, callback));
        true
    }

    /// Allocates a rate limit; see [`RateLimiter::create_limit`].
    pub fn create_rate_limit(&self, requests_per_period: u32, period_ms: u64) -> u64 {
        self.rate_limiter.create_limit(requests_per_period, period_ms)
    }

    /// Removes a rate limit; see [`RateLimiter::remove_limit`].
    pub fn remove_limit(&self, limit_id: u64) -> bool {
        self.rate_limiter.remove_limit(limit_id)
    }

    /// Requests cancellation of `request_id`. The optional callback fires
    /// after the cancellation has been carried out, even when the id is
    /// unknown or already terminal.
    pub fn cancel_request_by_id(&self, request_id: u64, callback: Option<CancelCallback>) {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            if let Some(callback) = callback {
                callback();
            }
            return;
        }
        let mut state = self.state.lock().expect("http manager lock poisoned");
        let entry = state.to_cancel.entry(request_id).or_default();
        if let Some(callback) = callback {
            entry.push(callback);
        }
    }

    // --- Phase 1: Pending Dispatch ---
    // Requests the rate limiter admits leave `pending` and are wrapped in a
    // fresh batch; unsubmittable entries are answered with 400 right away.
    fn process_pending_requests(&self) {
        let mut admitted = Vec::new();
        let mut invalid = Vec::new();
        {
            let mut state = self.state.lock().expect("http manager lock poisoned");
            if state.pending.is_empty() {
                return;
            }
            let mut kept = Vec::with_capacity(state.pending.len());
            for context in state.pending.drain(..) {
                let Some(request) = context.request.as_ref() else {
                    invalid.push(context);
                    continue;
                };
                let allowed = self
                    .rate_limiter
                    .allow_request(request.general_rate_limit_id, request.specific_rate_limit_id);
                if allowed {
                    admitted.push(context);
                } else {
                    kept.push(context);
                }
            }
            state.pending = kept;
        }

        for mut context in invalid {
            (context.callback)(HttpResponse::synthetic(400, ErrorCode::Http(400)));
        }

        if admitted.is_empty() {
            return;
        }
        log::debug!("dispatching batch of {} request(s)", admitted.len());
        self.batches
            .lock()
            .expect("http batch lock poisoned")
            .push(BatchRequestHandler::new(
                admitted,
                &self.handle,
                &self.notifier,
            ));
    }

    // --- Phase 2: Active Drive ---
    // Done batches are removed and their non-terminal contexts merged into
    // the failed list for retry.
    fn process_active_requests(&self) {
        let mut newly_failed = Vec::new();
        {
            let mut batches = self.batches.lock().expect("http batch lock poisoned");
            let mut index = 0;
            while index < batches.len() {
                if batches[index].process() {
                    let mut batch = batches.swap_remove(index);
                    newly_failed.append(&mut batch.extract_failed_requests());
                } else {
                    index += 1;
                }
            }
        }
        if !newly_failed.is_empty() {
            self.state
                .lock()
                .expect("http manager lock poisoned")
                .failed
                .append(&mut newly_failed);
        }
    }

    // --- Phase 3: Retry Promotion ---
    fn process_retry_failed_requests(&self) {
        let mut state = self.state.lock().expect("http manager lock poisoned");
        if state.failed.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut still_failed = Vec::with_capacity(state.failed.len());
        let mut promoted = Vec::new();
        for context in state.failed.drain(..) {
            let Some(request) = context.request.as_ref() else {
                continue;
            };
            let waited = now.duration_since(context.start_time).as_millis() as u64;
            if waited >= request.retry_delay_ms {
                promoted.push(context);
            } else {
                still_failed.push(context);
            }
        }
        state.failed = still_failed;
        if !promoted.is_empty() {
            log::debug!("promoting {} request(s) for retry", promoted.len());
            state.pending.append(&mut promoted);
        }
    }

    // --- Phase 4: Cancellation Sweep ---
    fn process_cancel_requests(&self) {
        let to_cancel = {
            let mut state = self.state.lock().expect("http manager lock poisoned");
            if state.to_cancel.is_empty() {
                return;
            }
            std::mem::take(&mut state.to_cancel)
        };

        // Contexts parked for retry are answered directly.
        let cancelled = {
            let mut state = self.state.lock().expect("http manager lock poisoned");
            let mut kept = Vec::with_capacity(state.failed.len());
            let mut cancelled = Vec::new();
            for context in state.failed.drain(..) {
                if to_cancel.contains_key(&context.request_id()) {
                    cancelled.push(context);
                } else {
                    kept.push(context);
                }
            }
            state.failed = kept;
            cancelled
        };
        for mut context in cancelled {
            (context.callback)(HttpResponse::synthetic(
                499,
                ErrorCode::Client(ClientError::CancelledByUser),
            ));
        }

        // In-flight transfers are cancelled out of their batches.
        {
            let mut batches = self.batches.lock().expect("http batch lock poisoned");
            for batch in batches.iter_mut() {
                batch.cancel_requests_by_id(&to_cancel);
            }
        }

        // Finally acknowledge every collected post-cancellation callback,
        // matched or not.
        for (_, callbacks) in to_cancel {
            for callback in callbacks {
                callback();
            }
        }
    }

    fn cleanup_queued_requests(&self) {
        let (pending, failed) = {
            let mut state = self.state.lock().expect("http manager lock poisoned");
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.failed),
            )
        };
        for mut context in pending.into_iter().chain(failed) {
            (context.callback)(HttpResponse::synthetic(
                499,
                ErrorCode::Client(ClientError::CancelledByUser),
            ));
        }
    }
}

impl NetworkTaskManager for HttpRequestManager {
    fn process(&self) {
        self.process_pending_requests();
        self.process_active_requests();
        self.process_retry_failed_requests();
        self.process_cancel_requests();
    }

    fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.cleanup_queued_requests();
        self.process_cancel_requests();
        // Dropping the batches aborts their transfers; undelivered handlers
        // emit their synthetic abort responses on the way out.
        self.batches
            .lock()
            .expect("http batch lock poisoned")
            .clear();
    }

    fn is_loaded(&self) -> bool {
        let state = self.state.lock().expect("http manager lock poisoned");
        if !state.pending.is_empty() || !state.failed.is_empty() || !state.to_cancel.is_empty() {
            return true;
        }
        drop(state);
        !self
            .batches
            .lock()
            .expect("http batch lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NetworkWorker;
    use std::sync::mpsc;

    fn make_manager() -> (HttpRequestManager, std::sync::Arc<NetworkWorker>) {
        let worker = NetworkWorker::new();
        let manager =
            HttpRequestManager::new(worker.runtime_handle(), Notifier::new(&worker));
        (manager, worker)
    }

    fn collecting_callback() -> (HttpResponseCallback, mpsc::Receiver<HttpResponse>) {
        let (tx, rx) = mpsc::channel();
        (
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
            rx,
        )
    }

    #[test]
    fn request_ids_are_strictly_increasing() {
        let (manager, _worker) = make_manager();
        let first = manager.next_request_id();
        let second = manager.next_request_id();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[test]
    fn null_request_receives_synthetic_400() {
        let (manager, _worker) = make_manager();
        let (callback, responses) = collecting_callback();
        assert!(manager.add_request(None, callback));
        manager.process();
        let response = responses.try_recv().expect("400 response");
        assert_eq!(response.status_code, 400);
        assert!(response.ready);
    }

    #[test]
    fn rate_limited_requests_stay_pending() {
        let (manager, _worker) = make_manager();
        let limit = manager.create_rate_limit(0, 1000);
        // A denying limit: zero period would always reset, so use a real
        // window admitting nothing by exhausting a single slot first.
        let narrow = manager.create_rate_limit(1, 60_000);
        assert!(manager.rate_limiter.allow_request(narrow, 0));

        let (callback, responses) = collecting_callback();
        let request = HttpRequest {
            request_id: manager.next_request_id(),
            url: "http://192.0.2.1:9/".to_string(),
            general_rate_limit_id: limit,
            specific_rate_limit_id: narrow,
            timeout: 300,
            ..HttpRequest::default()
        };
        assert!(manager.add_request(Some(request), callback));
        manager.process();

        // Denied by the narrow limit: still pending, no batch formed.
        assert!(manager.is_loaded());
        assert!(responses.try_recv().is_err());
        assert!(manager
            .batches
            .lock()
            .expect("http batch lock poisoned")
            .is_empty());
    }

    #[test]
    fn shutdown_answers_pending_with_499() {
        let (manager, _worker) = make_manager();
        let (callback, responses) = collecting_callback();
        let request = HttpRequest {
            request_id: manager.next_request_id(),
            url: "http://192.0.2.1:9/".to_string(),
            ..HttpRequest::default()
        };
        assert!(manager.add_request(Some(request), callback));
        manager.shutdown();

        let response = responses.try_recv().expect("499 response");
        assert_eq!(response.status_code, 499);
        assert_eq!(
            response.error_code,
            ErrorCode::Client(ClientError::CancelledByUser)
        );

        // The manager refuses new work after shutdown.
        let (callback, _responses) = collecting_callback();
        assert!(!manager.add_request(None, callback));
    }

    #[test]
    fn cancel_of_unknown_id_still_acknowledges() {
        let (manager, _worker) = make_manager();
        let (tx, rx) = mpsc::channel();
        manager.cancel_request_by_id(
            424242,
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
        );
        manager.process();
        rx.try_recv().expect("cancellation acknowledged");
    }

    #[test]
    fn cancel_sweeps_contexts_parked_for_retry() {
        let (manager, _worker) = make_manager();
        let (callback, responses) = collecting_callback();
        let request = HttpRequest {
            request_id: 5,
            url: "http://192.0.2.1:9/".to_string(),
            retry_delay_ms: 60_000,
            ..HttpRequest::default()
        };
        // Park a context in the failed list directly, as a non-terminal
        // attempt would.
        manager
            .state
            .lock()
            .expect("http manager lock poisoned")
            .failed
            .push(HttpRequestContext::new(Some(request), callback));

        let (ack_tx, ack_rx) = mpsc::channel();
        manager.cancel_request_by_id(
            5,
            Some(Box::new(move || {
                let _ = ack_tx.send(());
            })),
        );
        manager.process();

        let response = responses.try_recv().expect("499 response");
        assert_eq!(response.status_code, 499);
        ack_rx.try_recv().expect("cancellation acknowledged");
        assert!(!manager.is_loaded());
    }
}
