//! Delivery of domain events to observers
//!
//! Directory workers never call observers directly; they hand each event to
//! a `Dispatcher`, which decides where the observer code runs:
//! - `InlineDispatcher` (default): on the directory worker thread
//! - `ThreadDispatcher`: on one dedicated thread, in order
//! - `TokioDispatcher`: on a task of a Tokio runtime, in order

use crate::metrics::WatcherMetrics;
use crate::WatchEvent;
use crossbeam_channel::Sender;
use multiwatch_core::WatchError;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

/// Unit of work handed to a dispatcher
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context for observer callbacks
pub trait Dispatcher: Send + Sync + 'static {
    /// Run `job` eventually, on whatever thread this context designates
    fn dispatch(&self, job: Job);
}

/// Runs observers immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs observers on one dedicated thread, preserving order
///
/// Dropping the dispatcher lets the queue drain, then joins the thread.
pub struct ThreadDispatcher {
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadDispatcher {
    /// Start the delivery thread
    pub fn new(name: &str) -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .map_err(WatchError::Spawn)?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, job: Job) {
        let Some(tx) = &self.tx else { return };
        if tx.send(job).is_err() {
            warn!("Delivery thread has exited, dropping event");
        }
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            // The last job may be the one dropping us
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Delivery thread panicked");
            }
        }
    }
}

/// Runs observers on a Tokio task, preserving order
pub struct TokioDispatcher {
    tx: tokio::sync::mpsc::UnboundedSender<Job>,
}

impl TokioDispatcher {
    /// Spawn the delivery task on `handle`
    pub fn new(handle: &tokio::runtime::Handle) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }

    /// Spawn the delivery task on the runtime this is called from
    ///
    /// Panics outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(&tokio::runtime::Handle::current())
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!("Delivery task has exited, dropping event");
        }
    }
}

/// Identifies a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub(crate) type EventCallback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;
pub(crate) type ErrorCallback = Arc<dyn Fn(&WatchError) + Send + Sync>;

/// Observer registry plus the dispatcher that runs them
pub(crate) struct Hub {
    dispatcher: Box<dyn Dispatcher>,
    events: RwLock<Vec<(ObserverId, EventCallback)>>,
    errors: RwLock<Vec<(ObserverId, ErrorCallback)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    metrics: Arc<WatcherMetrics>,
}

impl Hub {
    pub fn new(dispatcher: Box<dyn Dispatcher>, metrics: Arc<WatcherMetrics>) -> Self {
        Self {
            dispatcher,
            events: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe(&self, callback: EventCallback) -> ObserverId {
        let id = self.next_id();
        self.events.write().push((id, callback));
        id
    }

    pub fn on_error(&self, callback: ErrorCallback) -> ObserverId {
        let id = self.next_id();
        self.errors.write().push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|(existing, _)| *existing != id);
        if events.len() != before {
            return true;
        }
        drop(events);

        let mut errors = self.errors.write();
        let before = errors.len();
        errors.retain(|(existing, _)| *existing != id);
        errors.len() != before
    }

    /// Hand a domain event to the dispatcher
    pub fn emit(self: &Arc<Self>, event: WatchEvent) {
        if self.is_closed() {
            return;
        }

        self.metrics.record_emitted(1);
        let hub = Arc::clone(self);
        self.dispatcher.dispatch(Box::new(move || hub.deliver_event(&event)));
    }

    /// Hand a non-fatal error to the dispatcher
    pub fn report(self: &Arc<Self>, err: WatchError) {
        warn!("{}", err);
        if self.is_closed() {
            return;
        }

        let hub = Arc::clone(self);
        self.dispatcher.dispatch(Box::new(move || hub.deliver_error(&err)));
    }

    fn deliver_event(&self, event: &WatchEvent) {
        if self.is_closed() {
            return;
        }

        // Snapshot so observers may (un)subscribe from inside a callback
        let observers: Vec<EventCallback> =
            self.events.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("Observer panicked while handling {:?}", event);
            }
        }
    }

    fn deliver_error(&self, err: &WatchError) {
        if self.is_closed() {
            return;
        }

        let observers: Vec<ErrorCallback> =
            self.errors.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(err))).is_err() {
                error!("Error observer panicked while handling: {}", err);
            }
        }
    }

    #[cfg(test)]
    pub fn event_observer_count(&self) -> usize {
        self.events.read().len()
    }

    /// Stop all further deliveries and drop every observer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.events.write().clear();
        self.errors.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
