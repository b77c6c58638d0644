//! Watcher counters
//!
//! Tracks raw-event volume, filtering and overflow recovery for monitoring
//! and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for watcher operations
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    /// Raw events accepted from the native layer
    events_received: AtomicU64,

    /// Raw events discarded because their path is not watched
    events_filtered: AtomicU64,

    /// Change notifications dropped because the timestamp did not advance
    duplicates_suppressed: AtomicU64,

    /// Domain events handed to the delivery context
    events_emitted: AtomicU64,

    /// Buffer overflows detected
    overflow_count: AtomicU64,

    /// Directory rescans performed after overflows
    rescans: AtomicU64,
}

impl WatcherMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self, count: u64) {
        self.events_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rescan(&self) {
        self.rescans.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total overflow count
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> WatcherMetricsSnapshot {
        WatcherMetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
            rescans: self.rescans.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of watcher metrics at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherMetricsSnapshot {
    pub events_received: u64,
    pub events_filtered: u64,
    pub duplicates_suppressed: u64,
    pub events_emitted: u64,
    pub overflow_count: u64,
    pub rescans: u64,
}
