//! # Core Scheduling Module
//!
//! The components in this module drive everything else in the library:
//!
//! - **`worker`**: the [`NetworkWorker`](worker::NetworkWorker), a
//!   cooperative scheduler owning one background thread (and the tokio
//!   runtime it drives). It periodically visits every registered task
//!   manager, executes one-shot tasks queued by library code, and fans
//!   uncaught failures out to user-installed error handlers.
//!
//! - **[`NetworkTaskManager`](worker::NetworkTaskManager)**: the single
//!   polymorphic boundary of the core. The HTTP and WebSocket managers
//!   implement it; the worker knows nothing else about them.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod worker;

pub use worker::{ErrorHandler, NetworkTaskManager, NetworkWorker, Notifier};
