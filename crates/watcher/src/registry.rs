//! Watch registry
//!
//! The set of watched files, each with the last modification time that was
//! reported for it. Directory membership counts are kept alongside so the
//! pool can tell in O(1) when a directory has no watched files left.
//!
//! The registry itself is not synchronized; it lives behind the watcher's
//! single state lock.

use multiwatch_core::{ModTime, PathKey};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    files: HashMap<PathKey, ModTime>,
    per_dir: HashMap<PathKey, usize>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file with its current timestamp
    ///
    /// Returns false if the file is already registered.
    pub fn add(&mut self, file: PathKey, stamp: ModTime) -> bool {
        if self.files.contains_key(&file) {
            return false;
        }

        if let Some(dir) = file.parent() {
            *self.per_dir.entry(dir).or_insert(0) += 1;
        }
        self.files.insert(file, stamp);
        true
    }

    /// Unregister a file; false if it was not registered
    pub fn remove(&mut self, file: &PathKey) -> bool {
        if self.files.remove(file).is_none() {
            return false;
        }

        if let Some(dir) = file.parent() {
            if let Some(count) = self.per_dir.get_mut(&dir) {
                *count -= 1;
                if *count == 0 {
                    self.per_dir.remove(&dir);
                }
            }
        }
        true
    }

    pub fn contains(&self, file: &PathKey) -> bool {
        self.files.contains_key(file)
    }

    /// Stored dedup timestamp, if the file is registered
    pub fn timestamp(&self, file: &PathKey) -> Option<ModTime> {
        self.files.get(file).copied()
    }

    /// Advance the stored timestamp
    ///
    /// Never moves backwards; returns true if the stored value changed.
    pub fn update_timestamp(&mut self, file: &PathKey, stamp: ModTime) -> bool {
        match self.files.get_mut(file) {
            Some(stored) if stamp > *stored => {
                *stored = stamp;
                true
            }
            _ => false,
        }
    }

    /// Number of watched files whose parent is `dir`
    pub fn count_in(&self, dir: &PathKey) -> usize {
        self.per_dir.get(dir).copied().unwrap_or(0)
    }

    /// Watched files in `dir` with their stored timestamps
    pub fn files_in(&self, dir: &PathKey) -> Vec<(PathKey, ModTime)> {
        if self.count_in(dir) == 0 {
            return Vec::new();
        }

        self.files
            .iter()
            .filter(|(file, _)| file.parent().as_ref() == Some(dir))
            .map(|(file, stamp)| (file.clone(), *stamp))
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathKey> {
        self.files.keys()
    }

    pub fn directories(&self) -> impl Iterator<Item = &PathKey> {
        self.per_dir.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.per_dir.clear();
    }
}
