//! Multi-file watch multiplexer
//!
//! This crate watches an arbitrary, changing set of individual files and
//! reports clean per-file events:
//! - One native subscription per distinct parent directory, created with the
//!   first watched file and released with the last
//! - Duplicate change notifications suppressed by modification timestamp
//! - Renames followed transparently, across directories
//! - Buffer overflow recovered by growing the buffer and rescanning
//! - Pluggable delivery context for observers (inline, thread, Tokio)
//!
//! ```no_run
//! use multiwatch::{FileWatcher, WatchEvent};
//!
//! # fn main() -> Result<(), multiwatch::WatchError> {
//! let watcher = FileWatcher::new()?;
//! let events = watcher.events();
//! watcher.add("Cargo.toml")?;
//!
//! if let Ok(WatchEvent::Changed(file)) = events.recv() {
//!     println!("{} changed", file);
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
pub mod config;
pub mod dispatch;
pub mod metrics;
mod overflow;
pub mod platform;
mod pool;
mod registry;
mod translate;
mod worker;

pub use config::WatcherConfig;
pub use dispatch::{Dispatcher, InlineDispatcher, Job, ObserverId, ThreadDispatcher, TokioDispatcher};
pub use metrics::{WatcherMetrics, WatcherMetricsSnapshot};
pub use multiwatch_core::{ModTime, PathKey, WatchError};
pub use platform::{ManualBackend, ManualHandle, NativeBackend, NotifyBackend, RawEvent, RawSink};

use crate::dispatch::Hub;
use crate::platform::Router;
use crate::pool::DirectoryPool;
use crate::registry::WatchRegistry;
use crate::translate::Outcome;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Domain event delivered to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A watched file's modification time advanced
    Changed(PathKey),

    /// A watched file was deleted; it is no longer watched
    Deleted(PathKey),

    /// A watched file was renamed; it is now watched under `new`
    Renamed { new: PathKey, old: PathKey },
}

/// Kind of a `WatchEvent`, without its paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Changed,
    Deleted,
    Renamed,
}

impl WatchEvent {
    /// The file the event is about (the new name for renames)
    pub fn path(&self) -> &PathKey {
        match self {
            WatchEvent::Changed(path) | WatchEvent::Deleted(path) => path,
            WatchEvent::Renamed { new, .. } => new,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            WatchEvent::Changed(_) => EventKind::Changed,
            WatchEvent::Deleted(_) => EventKind::Deleted,
            WatchEvent::Renamed { .. } => EventKind::Renamed,
        }
    }
}

/// Everything guarded by the single state lock
pub(crate) struct State {
    pub registry: WatchRegistry,
    pub pool: DirectoryPool,
    pub disposed: bool,
}

impl State {
    pub fn new(pool: DirectoryPool) -> Self {
        Self {
            registry: WatchRegistry::new(),
            pool,
            disposed: false,
        }
    }
}

/// State shared between the handle and the directory workers
pub(crate) struct Shared {
    state: Mutex<State>,
    hub: Arc<Hub>,
    metrics: Arc<WatcherMetrics>,
    config: WatcherConfig,
}

impl Shared {
    /// Translate a raw event from worker `origin` of `dir`
    ///
    /// Events from a subscription that has since been released (or from a
    /// disposed watcher) are discarded.
    pub(crate) fn translate(&self, origin: u64, dir: &PathKey, raw: RawEvent) {
        let outcome = {
            let mut guard = self.state.lock();
            if guard.disposed || !guard.pool.is_current(dir, origin) {
                debug!("Discarding {:?} from stale subscription on {}", raw, dir);
                return;
            }
            translate::apply(&mut guard, &self.metrics, dir, raw)
        };

        if !outcome.is_empty() {
            self.settle(outcome);
        }
    }

    /// Finish a translation outside the lock
    fn settle(&self, outcome: Outcome) {
        for watch in outcome.retired {
            watch.stop();
        }
        for err in outcome.errors {
            self.hub.report(err);
        }
        for event in outcome.events {
            self.hub.emit(event);
        }
    }
}

/// Watches a dynamic set of files
///
/// All methods take `&self` and may be called from any thread, including
/// from inside an observer. Dropping the watcher disposes it.
pub struct FileWatcher {
    shared: Arc<Shared>,
}

impl FileWatcher {
    /// Watcher on the platform's native backend with default settings
    pub fn new() -> Result<Self, WatchError> {
        Self::with_config(WatcherConfig::default())
    }

    pub fn with_config(config: WatcherConfig) -> Result<Self, WatchError> {
        Self::with_dispatcher(config, InlineDispatcher)
    }

    /// Watcher delivering events through `dispatcher`
    pub fn with_dispatcher(
        config: WatcherConfig,
        dispatcher: impl Dispatcher,
    ) -> Result<Self, WatchError> {
        Self::with_backend(config, dispatcher, NotifyBackend::new)
    }

    /// Watcher on a caller-supplied native backend
    ///
    /// `factory` receives the sink the backend must push raw events into.
    pub fn with_backend<B, F>(
        config: WatcherConfig,
        dispatcher: impl Dispatcher,
        factory: F,
    ) -> Result<Self, WatchError>
    where
        B: NativeBackend,
        F: FnOnce(RawSink) -> Result<B, WatchError>,
    {
        config.validate()?;

        let metrics = Arc::new(WatcherMetrics::new());
        let router = Arc::new(Router::new(Arc::clone(&metrics)));
        let backend = factory(RawSink::new(Arc::clone(&router)))?;
        let hub = Arc::new(Hub::new(Box::new(dispatcher), Arc::clone(&metrics)));

        info!("Starting file watcher on {} backend", backend.name());

        let shared = Arc::new_cyclic(|link| Shared {
            state: Mutex::new(State::new(DirectoryPool::new(
                Box::new(backend),
                router,
                link.clone(),
                config.clone(),
            ))),
            hub,
            metrics,
            config,
        });

        Ok(Self { shared })
    }

    /// Watcher on a `ManualBackend`, plus the handle that drives it
    pub fn manual(
        config: WatcherConfig,
        dispatcher: impl Dispatcher,
    ) -> Result<(Self, ManualHandle), WatchError> {
        let mut handle = None;
        let watcher = Self::with_backend(config, dispatcher, |sink| {
            let backend = ManualBackend::new(sink);
            handle = Some(backend.handle());
            Ok(backend)
        })?;

        match handle {
            Some(handle) => Ok((watcher, handle)),
            None => Err(WatchError::Config("manual backend was not created".to_string())),
        }
    }

    /// Start watching `path`
    ///
    /// Returns `Ok(false)` if the file is already watched. The file itself
    /// need not exist yet, but its directory must.
    pub fn add(&self, path: impl AsRef<Path>) -> Result<bool, WatchError> {
        let file = PathKey::resolve(path)?;
        let dir = file
            .parent()
            .ok_or_else(|| WatchError::NoParent(file.to_path_buf()))?;

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if state.disposed {
            return Err(WatchError::Disposed);
        }
        if state.registry.contains(&file) {
            debug!("Already watching {}", file);
            return Ok(false);
        }

        // Stamp before subscribing so a write racing with the subscription
        // still advances past the stored value
        let stamp = ModTime::probe(file.as_path());
        state.pool.ensure_watch(&dir)?;
        state.registry.add(file.clone(), stamp);

        debug!("Watching {}", file);
        Ok(true)
    }

    /// Stop watching `path`; false if it was not watched
    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        let Some(file) = lookup_key(path.as_ref()) else {
            return false;
        };

        let retired = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;

            if !state.registry.remove(&file) {
                return false;
            }
            file.parent()
                .and_then(|dir| state.pool.release_if_empty(&dir, &state.registry))
        };

        if let Some(watch) = retired {
            watch.stop();
        }

        debug!("Stopped watching {}", file);
        true
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        match lookup_key(path.as_ref()) {
            Some(file) => self.shared.state.lock().registry.contains(&file),
            None => false,
        }
    }

    /// Number of watched files
    pub fn len(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watched files, sorted
    pub fn watched_files(&self) -> Vec<PathKey> {
        let mut files: Vec<PathKey> = self.shared.state.lock().registry.files().cloned().collect();
        files.sort();
        files
    }

    /// Directories with an active subscription, sorted
    pub fn watched_directories(&self) -> Vec<PathKey> {
        let mut dirs: Vec<PathKey> = self
            .shared
            .state
            .lock()
            .registry
            .directories()
            .cloned()
            .collect();
        dirs.sort();
        dirs
    }

    /// Register an observer for domain events
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.shared.hub.subscribe(Arc::new(observer))
    }

    /// Register an observer for non-fatal errors
    pub fn on_error<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.shared.hub.on_error(Arc::new(observer))
    }

    /// Remove an event or error observer
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.hub.unsubscribe(id)
    }

    /// Channel receiving every domain event from now on
    ///
    /// The channel disconnects when the watcher is disposed. Dropping the
    /// receiver removes the underlying observer at the next event.
    pub fn events(&self) -> Receiver<WatchEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let hub = Arc::downgrade(&self.shared.hub);
        let slot = Arc::new(OnceLock::new());
        let own_id = Arc::clone(&slot);
        let detached = AtomicBool::new(false);

        let id = self.subscribe(move |event: &WatchEvent| {
            if detached.load(Ordering::Acquire) {
                return;
            }
            if tx.send(event.clone()).is_err() {
                detached.store(true, Ordering::Release);
                if let (Some(hub), Some(id)) = (hub.upgrade(), own_id.get()) {
                    hub.unsubscribe(*id);
                }
            }
        });
        let _ = slot.set(id);
        rx
    }

    /// Current buffer capacity of the subscription on `dir`
    pub fn buffer_capacity(&self, dir: impl AsRef<Path>) -> Option<usize> {
        let dir = lookup_key(dir.as_ref())?;
        self.shared.state.lock().pool.buffer_capacity(&dir)
    }

    pub fn metrics(&self) -> WatcherMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.shared.config
    }

    /// Stop watching everything and release every native subscription
    ///
    /// Idempotent. Once this returns no observer is invoked again.
    pub fn dispose(&self) {
        let retired = {
            let mut guard = self.shared.state.lock();
            if guard.disposed {
                return;
            }
            guard.disposed = true;
            self.shared.hub.close();
            guard.registry.clear();
            guard.pool.release_all()
        };

        let released = retired.len();
        for watch in retired {
            watch.stop();
        }

        info!("File watcher disposed, released {} directories", released);
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FileWatcher")
            .field("backend", &state.pool.backend_name())
            .field("files", &state.registry.len())
            .field("directories", &state.pool.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Key for a path that may already be gone from disk
fn lookup_key(path: &Path) -> Option<PathKey> {
    PathKey::locate(path).ok()
}
