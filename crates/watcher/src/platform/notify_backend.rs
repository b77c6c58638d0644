//! `notify`-based backend
//!
//! One recommended watcher instance (inotify on Linux, FSEvents on macOS,
//! ReadDirectoryChangesW on Windows) carries every directory subscription as
//! a separate non-recursive registration. Its callback runs on notify's
//! event thread and only classifies and routes.

use super::{NativeBackend, RawEvent, RawSink};
use multiwatch_core::WatchError;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tracing::debug;

/// Native backend built on `notify::RecommendedWatcher`
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    /// Create the platform watcher, delivering into `sink`
    pub fn new(sink: RawSink) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in classify(event) {
                    sink.push(raw);
                }
            }
            Err(err) => sink.push(RawEvent::Error {
                path: err.paths.first().cloned(),
                message: err.to_string(),
            }),
        })
        .map_err(|e| WatchError::native(None, format!("failed to create watcher: {}", e)))?;

        Ok(Self { watcher })
    }
}

impl NativeBackend for NotifyBackend {
    fn watch_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::native(Some(dir.to_path_buf()), e.to_string()))
    }

    fn unwatch_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .unwatch(dir)
            .map_err(|e| WatchError::native(Some(dir.to_path_buf()), e.to_string()))
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}

/// Convert a notify event into raw events
fn classify(event: Event) -> Vec<RawEvent> {
    if event.need_rescan() {
        return vec![RawEvent::Overflow {
            path: event.paths.into_iter().next(),
        }];
    }

    let tracker = event.tracker();
    let Event { kind, paths, .. } = event;

    match kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![RawEvent::Renamed { from, to }],
                (Some(only), None) => vec![RawEvent::Changed(only)],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .into_iter()
            .map(|path| RawEvent::MovedOut { path, tracker })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .into_iter()
            .map(|path| RawEvent::MovedIn { path, tracker })
            .collect(),
        // Unpaired rename notification: decide by whether the path is still there
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    RawEvent::MovedIn { path, tracker }
                } else {
                    RawEvent::MovedOut { path, tracker }
                }
            })
            .collect(),
        EventKind::Create(_) | EventKind::Modify(_) => {
            paths.into_iter().map(RawEvent::Changed).collect()
        }
        EventKind::Remove(_) => paths.into_iter().map(RawEvent::Deleted).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            debug!("Ignoring {:?} for {:?}", kind, paths);
            Vec::new()
        }
    }
}
