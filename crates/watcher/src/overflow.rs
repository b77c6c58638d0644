//! Overflow recovery
//!
//! A directory's buffer (or the native queue behind it) lost events. Grow
//! the buffer up to the configured limit, then rescan the directory's
//! watched files so nothing that happened during the gap goes unreported.

use crate::buffer::Growth;
use crate::metrics::WatcherMetrics;
use crate::translate::{self, Outcome};
use crate::{State, WatchEvent};
use multiwatch_core::{ModTime, PathKey, WatchError};
use std::io;
use tracing::{debug, warn};

/// Handle an overflow reported on `dir`'s subscription
pub(crate) fn recover(state: &mut State, metrics: &WatcherMetrics, dir: &PathKey, out: &mut Outcome) {
    metrics.record_overflow();

    match state.pool.grow_buffer(dir) {
        Some(Growth::Grew { from, to }) => {
            warn!("Event buffer for {} overflowed, growing {} -> {} events", dir, from, to);
        }
        Some(Growth::AtLimit(capacity)) => {
            warn!(
                "Event buffer for {} overflowed at its limit of {} events, falling back to rescan",
                dir, capacity
            );
        }
        None => {
            debug!("Overflow for released directory {}", dir);
            return;
        }
    }

    rescan(state, metrics, dir, out);
}

/// Compare every watched file in `dir` against the filesystem
pub(crate) fn rescan(state: &mut State, metrics: &WatcherMetrics, dir: &PathKey, out: &mut Outcome) {
    metrics.record_rescan();

    for (file, stored) in state.registry.files_in(dir) {
        match ModTime::of(file.as_path()) {
            Ok(current) if current > stored => {
                state.registry.update_timestamp(&file, current);
                out.events.push(WatchEvent::Changed(file));
            }
            Ok(_) => {}
            // Never existed since it was added
            Err(err) if err.kind() == io::ErrorKind::NotFound && stored == ModTime::ZERO => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                translate::deleted(state, metrics, &file, out);
            }
            Err(err) => out.errors.push(WatchError::io(file.to_path_buf(), err)),
        }
    }
}
