//! Native change-notification seam
//!
//! A `NativeBackend` turns per-directory subscriptions into raw events and
//! pushes them into a `RawSink`. The sink routes each event to the buffer of
//! the directory subscription that owns it. Two backends ship with the crate:
//! `NotifyBackend` (the platform's recommended `notify` watcher) and
//! `ManualBackend` (events injected by the caller).

pub mod manual;
pub mod notify_backend;

pub use manual::{ManualBackend, ManualHandle};
pub use notify_backend::NotifyBackend;

use crate::buffer::{EventBuffer, Offer};
use crate::metrics::WatcherMetrics;
use dashmap::DashMap;
use multiwatch_core::{PathKey, WatchError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw, unfiltered notification from the native layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Content or metadata of a path changed (or the path appeared)
    Changed(PathBuf),

    /// A path was removed
    Deleted(PathBuf),

    /// First half of a rename; destination not known yet
    MovedOut {
        path: PathBuf,
        tracker: Option<usize>,
    },

    /// Second half of a rename; source not known to the native layer
    MovedIn {
        path: PathBuf,
        tracker: Option<usize>,
    },

    /// Complete rename with both ends known
    Renamed { from: PathBuf, to: PathBuf },

    /// Events were lost; `path` names the affected directory if known
    Overflow { path: Option<PathBuf> },

    /// Any other native failure
    Error {
        path: Option<PathBuf>,
        message: String,
    },
}

impl RawEvent {
    /// Path that decides which directory subscription handles the event
    fn primary_path(&self) -> Option<&Path> {
        match self {
            RawEvent::Changed(path) | RawEvent::Deleted(path) => Some(path),
            RawEvent::MovedOut { path, .. } | RawEvent::MovedIn { path, .. } => Some(path),
            RawEvent::Renamed { from, .. } => Some(from),
            RawEvent::Overflow { path } | RawEvent::Error { path, .. } => path.as_deref(),
        }
    }

    /// Overflow and error reports may name the directory itself
    fn may_name_directory(&self) -> bool {
        matches!(self, RawEvent::Overflow { .. } | RawEvent::Error { .. })
    }
}

/// Platform-agnostic directory subscription interface
///
/// Subscriptions are non-recursive: only direct children of `dir` are
/// reported. Implementations push events into the `RawSink` they were
/// built with, from whatever thread the platform uses.
pub trait NativeBackend: Send + 'static {
    /// Start receiving events for the direct children of `dir`
    fn watch_dir(&mut self, dir: &Path) -> Result<(), WatchError>;

    /// Stop receiving events for `dir`
    fn unwatch_dir(&mut self, dir: &Path) -> Result<(), WatchError>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "native"
    }
}

/// Entry point for raw events into the watcher
#[derive(Clone)]
pub struct RawSink {
    router: Arc<Router>,
}

impl RawSink {
    pub(crate) fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Hand a raw event to the owning directory subscription
    ///
    /// Never blocks. Events for directories without a subscription are
    /// dropped.
    pub fn push(&self, event: RawEvent) {
        self.router.route(event);
    }
}

/// Maps subscribed directories to their event buffers
pub(crate) struct Router {
    routes: DashMap<PathKey, Arc<EventBuffer>>,
    metrics: Arc<WatcherMetrics>,
}

impl Router {
    pub fn new(metrics: Arc<WatcherMetrics>) -> Self {
        Self {
            routes: DashMap::new(),
            metrics,
        }
    }

    pub fn attach(&self, dir: PathKey, buffer: Arc<EventBuffer>) {
        self.routes.insert(dir, buffer);
    }

    pub fn detach(&self, dir: &PathKey) {
        self.routes.remove(dir);
    }

    fn route(&self, event: RawEvent) {
        self.metrics.record_received();

        let Some(path) = event.primary_path() else {
            self.route_unaddressed(event);
            return;
        };

        let path = PathKey::from_event(path);
        let target = self.lookup(&path, event.may_name_directory());

        match target {
            Some(buffer) => {
                if buffer.offer(event) == Offer::Overflowed {
                    warn!(
                        "Event buffer for {} is full ({} pending), dropping events",
                        path.parent().unwrap_or_else(|| path.clone()),
                        buffer.pending()
                    );
                }
            }
            None => {
                self.metrics.record_filtered();
                if let RawEvent::Error { message, .. } = &event {
                    warn!("Native watch error for unwatched path {}: {}", path, message);
                }
            }
        }
    }

    fn lookup(&self, path: &PathKey, may_be_dir: bool) -> Option<Arc<EventBuffer>> {
        if may_be_dir {
            if let Some(buffer) = self.routes.get(path) {
                return Some(Arc::clone(buffer.value()));
            }
        }

        let dir = path.parent()?;
        self.routes.get(&dir).map(|buffer| Arc::clone(buffer.value()))
    }

    /// Overflows without a path hit every subscription; errors without a
    /// path are handed to one subscription so they surface exactly once
    fn route_unaddressed(&self, event: RawEvent) {
        let buffers: Vec<Arc<EventBuffer>> = self
            .routes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        match event {
            RawEvent::Overflow { .. } => {
                warn!("Native event queue overflowed, rescanning {} directories", buffers.len());
                for buffer in buffers {
                    buffer.offer(RawEvent::Overflow { path: None });
                }
            }
            RawEvent::Error { message, .. } => match buffers.first() {
                Some(buffer) => {
                    buffer.offer(RawEvent::Error {
                        path: None,
                        message,
                    });
                }
                None => warn!("Native watch error with no active subscriptions: {}", message),
            },
            other => debug!("Dropping raw event without a path: {:?}", other),
        }
    }

    #[cfg(test)]
    pub fn routes(&self) -> usize {
        self.routes.len()
    }
}
