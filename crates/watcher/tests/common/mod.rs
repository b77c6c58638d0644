//! Shared helpers for watcher integration tests

#![allow(dead_code)]

use anyhow::Result;
use crossbeam_channel::Receiver;
use filetime::{set_file_mtime, FileTime};
use multiwatch::{PathKey, WatchEvent};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Generous bound for native notifications
pub const NATIVE_WAIT: Duration = Duration::from_secs(5);

/// Bound for events injected through the manual backend
pub const MANUAL_WAIT: Duration = Duration::from_secs(2);

/// Window in which no further event is expected
pub const QUIET: Duration = Duration::from_millis(300);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Temporary directory removed when the fixture goes out of scope
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Canonical key for a file in the fixture
    pub fn key(&self, name: &str) -> Result<PathKey> {
        Ok(PathKey::resolve(self.join(name))?)
    }

    /// Directory key of the fixture itself
    pub fn dir_key(&self) -> Result<PathKey> {
        Ok(PathKey::resolve(self.path())?)
    }

    /// Create a file whose timestamp lies well in the past, so any later
    /// write is guaranteed to advance it
    pub fn create(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.join(name);
        fs::write(&path, contents)?;
        set_mtime(&path, 1_000_000)?;
        Ok(path)
    }

    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.join(name);
        fs::create_dir(&path)?;
        Ok(path)
    }
}

pub fn set_mtime(path: &Path, seconds: i64) -> Result<()> {
    set_file_mtime(path, FileTime::from_unix_time(seconds, 0))?;
    Ok(())
}

pub fn append(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Receive events until one satisfies `pred` or `timeout` passes
///
/// Returns the matching event together with everything received before it.
pub fn wait_for(
    rx: &Receiver<WatchEvent>,
    timeout: Duration,
    pred: impl Fn(&WatchEvent) -> bool,
) -> Option<(WatchEvent, Vec<WatchEvent>)> {
    let deadline = Instant::now() + timeout;
    let mut skipped = Vec::new();

    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        let event = rx.recv_timeout(remaining).ok()?;
        if pred(&event) {
            return Some((event, skipped));
        }
        skipped.push(event);
    }
}

/// Receive the next event within `timeout`
pub fn next_event(rx: &Receiver<WatchEvent>, timeout: Duration) -> Option<WatchEvent> {
    rx.recv_timeout(timeout).ok()
}

/// Everything that arrives within `window`
pub fn drain_for(rx: &Receiver<WatchEvent>, window: Duration) -> Vec<WatchEvent> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
    }
    events
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
