//! # Network Worker
//!
//! A cooperative scheduler that owns one background thread and the tokio
//! runtime on which all of the library's I/O tasks run.
//!
//! ## Scheduling model
//!
//! The worker thread blocks on an internal wake signal. Once notified it
//! enters a busy phase: as long as any registered manager reports pending
//! work (`is_loaded`), it calls `process()` on every manager, drains the
//! one-shot task inbox, and then waits up to one millisecond for the next
//! wake before looping. When the load drains, the thread goes back to
//! sleeping indefinitely until the next `notify()`.
//!
//! Because the loop runs inside `Runtime::block_on`, spawned transfer and
//! transport tasks make progress during every wait point even though the
//! manager `process()` calls themselves are synchronous and non-blocking.
//!
//! ## Failure containment
//!
//! Nothing is allowed to escape the worker loop. Panics raised by a
//! manager's `process()` or by a queued task are caught and routed through
//! the registered error-handler chain; a handler that itself panics is
//! swallowed so it can never take the worker down.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::{ClientError, ErrorCode};

/// Interface every task manager registered with the worker must implement.
///
/// This is the only dynamic-dispatch boundary inside the core. All three
/// methods are synchronous and must return promptly; real I/O belongs on
/// tasks spawned onto the worker runtime.
pub trait NetworkTaskManager: Send + Sync {
    /// Advances the manager's internal state machines by one step.
    fn process(&self);

    /// Clears all pending work, delivering synthetic terminal responses
    /// where the contract requires them.
    fn shutdown(&self);

    /// Reports whether the manager still has work that needs `process()`
    /// calls to make progress.
    fn is_loaded(&self) -> bool;
}

/// Error-handler chain subscriber.
///
/// Handlers receive the classified error, a free-form context message, and
/// the source location that reported it. They are invoked in registration
/// order and must not panic; a panicking handler is silently contained.
pub type ErrorHandler =
    Arc<dyn Fn(&ErrorCode, &str, &'static std::panic::Location<'static>) + Send + Sync>;

type Task = Box<dyn FnOnce() + Send>;

/// Cooperative scheduler owning the worker thread and tokio runtime.
///
/// One instance exists per [`Library`](crate::runtime::Library); the
/// process-wide default instance lives behind
/// [`default_instance`](crate::runtime::default_instance).
pub struct NetworkWorker {
    runtime: tokio::runtime::Runtime,
    managers: Mutex<Vec<Arc<dyn NetworkTaskManager>>>,
    tasks: Mutex<Vec<Task>>,
    error_handlers: Mutex<Vec<ErrorHandler>>,
    notify: tokio::sync::Notify,
    notified: AtomicBool,
    shutdown: AtomicBool,
    started: Mutex<bool>,
    join: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl NetworkWorker {
    /// Creates a worker with an idle current-thread runtime. No thread is
    /// spawned until [`start`](Self::start) is called with `use_async`.
    pub fn new() -> Arc<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build worker runtime");
        Arc::new(Self {
            runtime,
            managers: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            error_handlers: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
            notified: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            started: Mutex::new(false),
            join: Mutex::new(None),
        })
    }

    /// Handle for spawning I/O tasks onto the worker runtime.
    pub fn runtime_handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }

    /// Registers a task manager. Re-registering the same instance is a
    /// no-op, so library initialization can be called repeatedly.
    pub fn register_manager(&self, manager: Arc<dyn NetworkTaskManager>) {
        let mut managers = self.managers.lock().expect("worker manager lock poisoned");
        let already = managers.iter().any(|m| Arc::ptr_eq(m, &manager));
        if !already {
            managers.push(manager);
        }
    }

    /// Installs an error handler at the end of the chain.
    pub fn add_error_handler(&self, handler: ErrorHandler) {
        self.error_handlers
            .lock()
            .expect("worker handler lock poisoned")
            .push(handler);
    }

    /// Routes an error through the handler chain in registration order.
    ///
    /// The chain is copied out under the lock so a handler can itself call
    /// [`add_error_handler`](Self::add_error_handler) without deadlocking.
    #[track_caller]
    pub fn handle_error(&self, error: &ErrorCode, message: &str) {
        let location = std::panic::Location::caller();
        let handlers: Vec<ErrorHandler> = self
            .error_handlers
            .lock()
            .expect("worker handler lock poisoned")
            .clone();
        for handler in handlers {
            // Never let a handler crash the worker.
            let _ = catch_unwind(AssertUnwindSafe(|| handler(error, message, location)));
        }
    }

    /// Enqueues a zero-argument callable for one-shot execution on the
    /// worker and wakes it.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks
            .lock()
            .expect("worker task lock poisoned")
            .push(Box::new(task));
        self.notify();
    }

    /// Wakes the worker thread if it is waiting.
    pub fn notify(&self) {
        self.notified.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Starts the worker. Idempotent: only the first call has any effect.
    ///
    /// With `use_async == true` a dedicated thread is spawned that runs the
    /// scheduling loop until [`stop`](Self::stop). With `false` the caller
    /// is expected to drive [`drive`](Self::drive) periodically instead.
    pub fn start(self: &Arc<Self>, use_async: bool) {
        let mut started = self.started.lock().expect("worker start lock poisoned");
        if *started {
            return;
        }
        *started = true;
        if !use_async {
            return;
        }
        drop(started);

        let worker = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("net-worker".into())
            .spawn(move || {
                worker.runtime.block_on(worker.run_loop());
            })
            .expect("failed to spawn worker thread");
        *self.join.lock().expect("worker join lock poisoned") = Some(handle);
        log::debug!("network worker thread started");
    }

    /// Stops the worker thread, if one was started, and waits for it to run
    /// its final shutdown pass. Without a thread this is a no-op.
    pub fn stop(&self) {
        let handle = self.join.lock().expect("worker join lock poisoned").take();
        let Some(handle) = handle else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify();
        if handle.join().is_err() {
            self.handle_error(
                &ErrorCode::Client(ClientError::WorkerPanic),
                "worker thread panicked during shutdown",
            );
        }
        log::debug!("network worker thread stopped");
    }

    /// Calls `process()` on every registered manager, then drains the task
    /// inbox. Safe to call from the worker loop or from an external driver.
    pub fn process(&self) {
        let managers: Vec<Arc<dyn NetworkTaskManager>> = self
            .managers
            .lock()
            .expect("worker manager lock poisoned")
            .clone();
        for manager in managers {
            if catch_unwind(AssertUnwindSafe(|| manager.process())).is_err() {
                self.handle_error(
                    &ErrorCode::Client(ClientError::WorkerPanic),
                    "panic escaped a task manager's process()",
                );
            }
        }
        self.process_tasks();
    }

    /// Calls `shutdown()` on every registered manager, then drains the task
    /// inbox one final time.
    pub fn shutdown(&self) {
        let managers: Vec<Arc<dyn NetworkTaskManager>> = self
            .managers
            .lock()
            .expect("worker manager lock poisoned")
            .clone();
        for manager in managers {
            if catch_unwind(AssertUnwindSafe(|| manager.shutdown())).is_err() {
                self.handle_error(
                    &ErrorCode::Client(ClientError::WorkerPanic),
                    "panic escaped a task manager's shutdown()",
                );
            }
        }
        self.process_tasks();
    }

    /// External drive for synchronous mode: one `process()` pass followed
    /// by a one-millisecond slice of runtime time so spawned I/O tasks can
    /// make progress.
    pub fn drive(&self) {
        self.runtime.block_on(async {
            self.process();
            tokio::time::sleep(Duration::from_millis(1)).await;
        });
    }

    /// True when any manager has pending work or the task inbox is
    /// non-empty. While false the worker may sleep until notified.
    pub fn is_loaded(&self) -> bool {
        let managers = self.managers.lock().expect("worker manager lock poisoned");
        if managers.iter().any(|m| m.is_loaded()) {
            return true;
        }
        drop(managers);
        !self.tasks.lock().expect("worker task lock poisoned").is_empty()
    }

    async fn run_loop(&self) {
        loop {
            self.wait_for_notify().await;
            if self.shutdown.load(Ordering::SeqCst) {
                self.shutdown();
                return;
            }

            while self.is_loaded() {
                self.process();
                if self.shutdown.load(Ordering::SeqCst) {
                    self.shutdown();
                    return;
                }

                // Bounded pause between busy iterations; an early notify
                // (new submission, transfer completion) cuts it short.
                let _ = tokio::time::timeout(Duration::from_millis(1), self.notify.notified())
                    .await;
                self.notified.store(false, Ordering::SeqCst);

                if self.shutdown.load(Ordering::SeqCst) {
                    self.shutdown();
                    return;
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                self.shutdown();
                return;
            }
        }
    }

    async fn wait_for_notify(&self) {
        loop {
            if self.notified.swap(false, Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }

    fn process_tasks(&self) {
        let tasks: Vec<Task> = {
            let mut inbox = self.tasks.lock().expect("worker task lock poisoned");
            if inbox.is_empty() {
                return;
            }
            std::mem::take(&mut *inbox)
        };
        for task in tasks {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                self.handle_error(
                    &ErrorCode::Client(ClientError::WorkerPanic),
                    "panic escaped a queued worker task",
                );
            }
        }
    }
}

/// Cloneable wake handle given to transports and managers so completion
/// events can rouse the worker without holding a strong reference to it.
#[derive(Clone)]
pub struct Notifier {
    worker: Weak<NetworkWorker>,
}

impl Notifier {
    /// Creates a notifier bound to `worker`.
    pub fn new(worker: &Arc<NetworkWorker>) -> Self {
        Self {
            worker: Arc::downgrade(worker),
        }
    }

    /// Wakes the worker if it is still alive.
    pub fn notify(&self) {
        if let Some(worker) = self.worker.upgrade() {
            worker.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingManager {
        processed: AtomicUsize,
        shutdowns: AtomicUsize,
        loaded: AtomicBool,
    }

    impl CountingManager {
        fn new(loaded: bool) -> Arc<Self> {
            Arc::new(Self {
                processed: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                loaded: AtomicBool::new(loaded),
            })
        }
    }

    impl NetworkTaskManager for CountingManager {
        fn process(&self) {
            self.processed.fetch_add(1, Ordering::SeqCst);
            // Pretend the single unit of work completes after one pass.
            self.loaded.store(false, Ordering::SeqCst);
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn register_manager_is_idempotent() {
        let worker = NetworkWorker::new();
        let manager = CountingManager::new(false);
        worker.register_manager(manager.clone());
        worker.register_manager(manager.clone());
        worker.process();
        assert_eq!(manager.processed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_notify_process_stop() {
        let worker = NetworkWorker::new();
        let manager = CountingManager::new(true);
        worker.register_manager(manager.clone());
        worker.start(true);
        worker.start(true); // second call must be a no-op
        worker.notify();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while manager.processed.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "worker never processed");
            std::thread::sleep(Duration::from_millis(5));
        }

        worker.stop();
        worker.stop(); // second call must be a no-op
        assert_eq!(manager.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tasks_run_and_panics_reach_error_handlers() {
        let worker = NetworkWorker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let errors_clone = errors.clone();
        worker.add_error_handler(Arc::new(move |code, _msg, _loc| {
            assert_eq!(*code, ErrorCode::Client(ClientError::WorkerPanic));
            errors_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let fired_clone = fired.clone();
        worker.add_task(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        worker.add_task(|| panic!("boom"));
        worker.process();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_error_handler_is_contained() {
        let worker = NetworkWorker::new();
        worker.add_error_handler(Arc::new(|_, _, _| panic!("handler bug")));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        worker.add_error_handler(Arc::new(move |_, _, _| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));
        worker.handle_error(&ErrorCode::Http(500), "test");
        // The second handler still runs despite the first one panicking.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn is_loaded_reflects_managers_and_inbox() {
        let worker = NetworkWorker::new();
        assert!(!worker.is_loaded());
        worker.add_task(|| {});
        assert!(worker.is_loaded());
        worker.process();
        assert!(!worker.is_loaded());
    }
}
