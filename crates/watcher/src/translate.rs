//! Event translator
//!
//! Turns raw per-directory events into domain events. Runs with the state
//! lock held, so registry and pool mutations here are atomic with respect to
//! `add`, `remove` and every other directory worker. Nothing in this module
//! calls observers or joins threads; that work is collected in an `Outcome`
//! and settled after the lock is released.

use crate::metrics::WatcherMetrics;
use crate::overflow;
use crate::platform::RawEvent;
use crate::pool::DirectoryWatch;
use crate::{State, WatchEvent};
use multiwatch_core::{ModTime, PathKey, WatchError};
use std::io;
use std::path::Path;
use tracing::debug;

/// Side effects of translating one raw event
#[derive(Default)]
pub(crate) struct Outcome {
    /// Domain events to deliver, in order
    pub events: Vec<WatchEvent>,

    /// Non-fatal errors for the error observers
    pub errors: Vec<WatchError>,

    /// Subscriptions released during translation, to be stopped unlocked
    pub retired: Vec<DirectoryWatch>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.errors.is_empty() && self.retired.is_empty()
    }
}

/// Translate one raw event that arrived on `dir`'s subscription
pub(crate) fn apply(
    state: &mut State,
    metrics: &WatcherMetrics,
    dir: &PathKey,
    raw: RawEvent,
) -> Outcome {
    let mut out = Outcome::default();

    match raw {
        RawEvent::Changed(path) | RawEvent::MovedIn { path, .. } => {
            changed(state, metrics, &PathKey::from_event(&path), &mut out);
        }
        RawEvent::Deleted(path) | RawEvent::MovedOut { path, .. } => {
            deleted(state, metrics, &PathKey::from_event(&path), &mut out);
        }
        RawEvent::Renamed { from, to } => {
            renamed(
                state,
                metrics,
                &PathKey::from_event(&from),
                &destination(&to),
                &mut out,
            );
        }
        RawEvent::Overflow { .. } => overflow::recover(state, metrics, dir, &mut out),
        RawEvent::Error { path, message } => out.errors.push(WatchError::native(path, message)),
    }

    out
}

/// A rename target may sit in a directory nobody subscribed to yet, so give
/// it the same canonical form `add` would
fn destination(path: &Path) -> PathKey {
    PathKey::resolve(path).unwrap_or_else(|_| PathKey::from_event(path))
}

/// Raw change: emit only when the timestamp strictly advances
pub(crate) fn changed(
    state: &mut State,
    metrics: &WatcherMetrics,
    file: &PathKey,
    out: &mut Outcome,
) {
    let Some(stored) = state.registry.timestamp(file) else {
        metrics.record_filtered();
        return;
    };

    match ModTime::of(file.as_path()) {
        Ok(current) if current > stored => {
            state.registry.update_timestamp(file, current);
            out.events.push(WatchEvent::Changed(file.clone()));
        }
        Ok(_) => {
            metrics.record_duplicate();
            debug!("Suppressed duplicate change for {}", file);
        }
        // Gone again; the removal event that follows reports it
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("{} vanished before its change was stamped", file);
        }
        Err(err) => out.errors.push(WatchError::io(file.to_path_buf(), err)),
    }
}

/// Raw deletion: unregister, release the directory if empty, emit
pub(crate) fn deleted(
    state: &mut State,
    metrics: &WatcherMetrics,
    file: &PathKey,
    out: &mut Outcome,
) {
    if !state.registry.remove(file) {
        metrics.record_filtered();
        return;
    }

    release_parent(state, file, out);
    debug!("Watched file {} was deleted", file);
    out.events.push(WatchEvent::Deleted(file.clone()));
}

/// Raw rename: move the registration from `from` to `to` in one step
pub(crate) fn renamed(
    state: &mut State,
    metrics: &WatcherMetrics,
    from: &PathKey,
    to: &PathKey,
    out: &mut Outcome,
) {
    if !state.registry.contains(from) {
        // Atomic save: a temp file replaced a watched one
        if state.registry.contains(to) {
            changed(state, metrics, to, out);
        } else {
            metrics.record_filtered();
        }
        return;
    }

    state.registry.remove(from);

    let watched = match to.parent() {
        Some(dir) => state.pool.ensure_watch(&dir),
        None => Err(WatchError::NoParent(to.to_path_buf())),
    };
    if let Err(err) = watched {
        out.errors.push(err);
        release_parent(state, from, out);
        debug!("Lost track of {} after rename to {}", from, to);
        out.events.push(WatchEvent::Deleted(from.clone()));
        return;
    }

    let stamp = ModTime::probe(to.as_path());
    if !state.registry.add(to.clone(), stamp) {
        // Renamed over a file that was already watched
        state.registry.update_timestamp(to, stamp);
    }
    release_parent(state, from, out);

    debug!("Watched file {} renamed to {}", from, to);
    out.events.push(WatchEvent::Renamed {
        new: to.clone(),
        old: from.clone(),
    });
}

fn release_parent(state: &mut State, file: &PathKey, out: &mut Outcome) {
    if let Some(dir) = file.parent() {
        out.retired
            .extend(state.pool.release_if_empty(&dir, &state.registry));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::WatcherConfig;
    use crate::platform::{ManualBackend, ManualHandle, RawSink, Router};
    use crate::pool::DirectoryPool;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::sync::{Arc, Weak};
    use tempfile::TempDir;

    /// Unlocked state over a manual backend, with no watcher behind it
    pub(crate) fn detached_state() -> (State, ManualHandle, Arc<WatcherMetrics>) {
        let metrics = Arc::new(WatcherMetrics::new());
        let router = Arc::new(Router::new(Arc::clone(&metrics)));
        let backend = ManualBackend::new(RawSink::new(Arc::clone(&router)));
        let handle = backend.handle();
        let pool = DirectoryPool::new(
            Box::new(backend),
            router,
            Weak::new(),
            WatcherConfig::default(),
        );
        (State::new(pool), handle, metrics)
    }

    pub(crate) fn watch(state: &mut State, file: &PathKey) {
        let dir = file.parent().unwrap();
        state.pool.ensure_watch(&dir).unwrap();
        state.registry.add(file.clone(), ModTime::probe(file.as_path()));
    }

    fn key(dir: &TempDir, name: &str) -> PathKey {
        PathKey::resolve(dir.path().join(name)).unwrap()
    }

    fn touch(file: &PathKey, seconds: i64) {
        set_file_mtime(file.as_path(), FileTime::from_unix_time(seconds, 0)).unwrap();
    }

    #[test]
    fn test_change_requires_advancing_timestamp() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut state, _handle, metrics) = detached_state();
        let file = key(&dir, "a.txt");
        fs::write(file.as_path(), b"one")?;
        touch(&file, 1_000);
        watch(&mut state, &file);

        let mut out = Outcome::default();
        changed(&mut state, &metrics, &file, &mut out);
        assert!(out.events.is_empty());

        touch(&file, 2_000);
        changed(&mut state, &metrics, &file, &mut out);
        changed(&mut state, &metrics, &file, &mut out);
        assert_eq!(out.events, vec![WatchEvent::Changed(file.clone())]);
        assert_eq!(metrics.snapshot().duplicates_suppressed, 2);
        Ok(())
    }

    #[test]
    fn test_change_for_unwatched_sibling_is_filtered() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut state, _handle, metrics) = detached_state();
        let watched = key(&dir, "a.txt");
        let sibling = key(&dir, "b.txt");
        fs::write(watched.as_path(), b"a")?;
        fs::write(sibling.as_path(), b"b")?;
        watch(&mut state, &watched);

        let out = apply(
            &mut state,
            &metrics,
            &watched.parent().unwrap(),
            RawEvent::Changed(sibling.to_path_buf()),
        );
        assert!(out.is_empty());
        assert_eq!(metrics.snapshot().events_filtered, 1);
        Ok(())
    }

    #[test]
    fn test_delete_unregisters_and_releases_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut state, handle, metrics) = detached_state();
        let file = key(&dir, "a.txt");
        watch(&mut state, &file);
        let parent = file.parent().unwrap();
        assert!(handle.is_watching(parent.as_path()));

        let out = apply(&mut state, &metrics, &parent, RawEvent::Deleted(file.to_path_buf()));

        assert_eq!(out.events, vec![WatchEvent::Deleted(file.clone())]);
        assert_eq!(out.retired.len(), 1);
        assert!(!state.registry.contains(&file));
        assert!(!handle.is_watching(parent.as_path()));
        Ok(())
    }

    #[test]
    fn test_rename_moves_registration() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut state, _handle, metrics) = detached_state();
        let old = key(&dir, "a.txt");
        let new = key(&dir, "b.txt");
        fs::write(old.as_path(), b"a")?;
        watch(&mut state, &old);
        fs::rename(old.as_path(), new.as_path())?;

        let out = apply(
            &mut state,
            &metrics,
            &old.parent().unwrap(),
            RawEvent::Renamed {
                from: old.to_path_buf(),
                to: new.to_path_buf(),
            },
        );

        assert_eq!(
            out.events,
            vec![WatchEvent::Renamed {
                new: new.clone(),
                old: old.clone()
            }]
        );
        assert!(out.retired.is_empty());
        assert!(state.registry.contains(&new));
        assert!(!state.registry.contains(&old));
        Ok(())
    }

    #[test]
    fn test_rename_into_unwatchable_directory_reports_deleted() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        let (mut state, handle, metrics) = detached_state();
        let old = key(&source, "a.txt");
        let new = key(&target, "a.txt");
        watch(&mut state, &old);
        handle.refuse_watches(true);

        let mut out = Outcome::default();
        renamed(&mut state, &metrics, &old, &new, &mut out);

        assert_eq!(out.events, vec![WatchEvent::Deleted(old.clone())]);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(state.registry.len(), 0);
        assert!(handle.watched_dirs().is_empty());
        Ok(())
    }

    #[test]
    fn test_rename_of_unwatched_file_onto_watched_one_is_change() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (mut state, _handle, metrics) = detached_state();
        let target = key(&dir, "config.toml");
        let temp = key(&dir, "config.toml.tmp");
        fs::write(target.as_path(), b"old")?;
        touch(&target, 1_000);
        watch(&mut state, &target);

        fs::write(temp.as_path(), b"new")?;
        touch(&temp, 2_000);
        fs::rename(temp.as_path(), target.as_path())?;

        let mut out = Outcome::default();
        renamed(&mut state, &metrics, &temp, &target, &mut out);
        assert_eq!(out.events, vec![WatchEvent::Changed(target.clone())]);
        assert_eq!(state.registry.len(), 1);
        Ok(())
    }

    #[test]
    fn test_native_error_is_reported_not_fatal() {
        let (mut state, _handle, metrics) = detached_state();
        let dir = PathKey::from_event("/d");
        let out = apply(
            &mut state,
            &metrics,
            &dir,
            RawEvent::Error {
                path: Some("/d".into()),
                message: "queue broken".to_string(),
            },
        );
        assert!(out.events.is_empty());
        assert_eq!(out.errors.len(), 1);
    }
}
