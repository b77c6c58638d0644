//! Backend driven by the caller
//!
//! Records which directories are subscribed and lets the owner inject raw
//! events through a `ManualHandle`. Useful for deterministic tests and for
//! hosts that already have their own notification source.

use super::{NativeBackend, RawEvent, RawSink};
use multiwatch_core::WatchError;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Native backend whose events come from a `ManualHandle`
pub struct ManualBackend {
    handle: ManualHandle,
}

/// Cloneable control handle for a `ManualBackend`
#[derive(Clone)]
pub struct ManualHandle {
    sink: RawSink,
    watched: Arc<Mutex<BTreeSet<PathBuf>>>,
    refuse_watches: Arc<AtomicBool>,
}

impl ManualBackend {
    pub fn new(sink: RawSink) -> Self {
        Self {
            handle: ManualHandle {
                sink,
                watched: Arc::new(Mutex::new(BTreeSet::new())),
                refuse_watches: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Handle for injecting events and inspecting subscriptions
    pub fn handle(&self) -> ManualHandle {
        self.handle.clone()
    }
}

impl NativeBackend for ManualBackend {
    fn watch_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        if self.handle.refuse_watches.load(Ordering::Acquire) {
            return Err(WatchError::native(
                Some(dir.to_path_buf()),
                "subscription refused",
            ));
        }

        self.handle.watched.lock().insert(dir.to_path_buf());
        Ok(())
    }

    fn unwatch_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        if self.handle.watched.lock().remove(dir) {
            Ok(())
        } else {
            Err(WatchError::native(Some(dir.to_path_buf()), "not watched"))
        }
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

impl ManualHandle {
    /// Inject any raw event
    pub fn push(&self, event: RawEvent) {
        self.sink.push(event);
    }

    pub fn changed(&self, path: impl Into<PathBuf>) {
        self.push(RawEvent::Changed(path.into()));
    }

    pub fn deleted(&self, path: impl Into<PathBuf>) {
        self.push(RawEvent::Deleted(path.into()));
    }

    pub fn renamed(&self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.push(RawEvent::Renamed {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn moved_out(&self, path: impl Into<PathBuf>) {
        self.push(RawEvent::MovedOut {
            path: path.into(),
            tracker: None,
        });
    }

    pub fn moved_in(&self, path: impl Into<PathBuf>) {
        self.push(RawEvent::MovedIn {
            path: path.into(),
            tracker: None,
        });
    }

    /// Report lost events for `dir` (or every directory)
    pub fn overflow(&self, dir: Option<PathBuf>) {
        self.push(RawEvent::Overflow { path: dir });
    }

    pub fn error(&self, path: Option<PathBuf>, message: impl Into<String>) {
        self.push(RawEvent::Error {
            path,
            message: message.into(),
        });
    }

    /// Directories currently subscribed, in order
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.watched.lock().iter().cloned().collect()
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watched.lock().contains(dir)
    }

    /// Make subsequent subscriptions fail
    pub fn refuse_watches(&self, refuse: bool) {
        self.refuse_watches.store(refuse, Ordering::Release);
    }
}
