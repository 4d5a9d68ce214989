//! # Batch Request Handler
//!
//! Operates one completion multiplexer over a set of request handlers
//! formed from a single pending snapshot. Construction spawns every
//! transfer; `process()` performs one non-blocking drain of the completion
//! channel and dispatches per-request completion handling.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::core::Notifier;

use super::context::HttpRequestContext;
use super::handler::{RequestHandler, TransferOutcome};

/// Callbacks queued behind a cancellation request.
pub(crate) type CancelCallback = Box<dyn FnOnce() + Send>;

/// A set of in-flight transfers sharing one completion channel.
pub(crate) struct BatchRequestHandler {
    handlers: Vec<RequestHandler>,
    completions: UnboundedReceiver<TransferOutcome>,
    failed: Vec<HttpRequestContext>,
}

impl BatchRequestHandler {
    /// Takes ownership of the admitted contexts and spawns one transfer
    /// per context onto the worker runtime.
    pub fn new(
        contexts: Vec<HttpRequestContext>,
        handle: &tokio::runtime::Handle,
        notifier: &Notifier,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers = contexts
            .into_iter()
            .map(|context| RequestHandler::new(context, tx.clone(), handle, notifier))
            .collect();
        Self {
            handlers,
            completions: rx,
            failed: Vec::new(),
        }
    }

    /// Drains completion messages and applies each one.
    ///
    /// ## Logic:
    /// 1. Pop every completion the multiplexer has queued (non-blocking).
    /// 2. Match it to its owning handler and run the completion routine.
    /// 3. Park the context of a non-terminal attempt on the failed list
    ///    for the manager to collect.
    ///
    /// Returns true when no transfers remain in flight.
    pub fn process(&mut self) -> bool {
        while let Ok(outcome) = self.completions.try_recv() {
            let Some(position) = self
                .handlers
                .iter()
                .position(|h| h.request_id() == outcome.request_id)
            else {
                // Already cancelled out of the batch; nothing to deliver.
                continue;
            };
            let mut handler = self.handlers.swap_remove(position);
            if !handler.handle_completion(outcome) {
                if let Some(context) = handler.take_context() {
                    self.failed.push(context);
                }
            }
        }
        self.handlers.is_empty()
    }

    /// Surrenders the non-terminal contexts collected so far.
    pub fn extract_failed_requests(&mut self) -> Vec<HttpRequestContext> {
        std::mem::take(&mut self.failed)
    }

    /// Cancels every owned handler whose request id is keyed in the map;
    /// the rest keep running.
    pub fn cancel_requests_by_id(&mut self, to_cancel: &HashMap<u64, Vec<CancelCallback>>) {
        self.handlers.retain_mut(|handler| {
            if to_cancel.contains_key(&handler.request_id()) {
                handler.cancel();
                false
            } else {
                true
            }
        });
    }
}
