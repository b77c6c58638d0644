//! Per-directory raw event buffer
//!
//! Sits between the native callback and the directory worker. The native
//! side only ever offers events (never blocks); once `capacity` events are
//! waiting, further events are dropped and a single `Overflow` marker is
//! queued so the worker can grow the buffer and rescan.

use crate::platform::RawEvent;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of offering an event to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Event queued for the worker
    Queued,

    /// Buffer was full; event dropped and an overflow marker queued
    Overflowed,

    /// Event dropped (overflow already pending, or worker gone)
    Dropped,
}

/// Result of growing the buffer after an overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Growth {
    /// Capacity doubled (or clamped up to the limit)
    Grew { from: usize, to: usize },

    /// Capacity is already at the configured limit
    AtLimit(usize),
}

pub(crate) struct EventBuffer {
    tx: Sender<RawEvent>,
    capacity: AtomicUsize,
    overflowed: AtomicBool,
}

impl EventBuffer {
    /// Create a buffer and the receiving end for its worker
    pub fn new(capacity: usize) -> (Arc<Self>, Receiver<RawEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let buffer = Arc::new(Self {
            tx,
            capacity: AtomicUsize::new(capacity.max(1)),
            overflowed: AtomicBool::new(false),
        });
        (buffer, rx)
    }

    /// Offer a raw event without blocking
    pub fn offer(&self, event: RawEvent) -> Offer {
        if matches!(event, RawEvent::Overflow { .. }) {
            return self.flag_overflow(event);
        }

        if self.tx.len() >= self.capacity() {
            return self.flag_overflow(RawEvent::Overflow { path: None });
        }

        match self.tx.send(event) {
            Ok(()) => Offer::Queued,
            Err(_) => Offer::Dropped,
        }
    }

    /// Queue one overflow marker per overflow episode
    fn flag_overflow(&self, marker: RawEvent) -> Offer {
        if self.overflowed.swap(true, Ordering::AcqRel) {
            return Offer::Dropped;
        }

        match self.tx.send(marker) {
            Ok(()) => Offer::Overflowed,
            Err(_) => Offer::Dropped,
        }
    }

    /// Called by the worker once it has taken the overflow marker
    pub fn acknowledge_overflow(&self) {
        self.overflowed.store(false, Ordering::Release);
    }

    /// Double the capacity, never exceeding `limit`
    pub fn grow(&self, limit: usize) -> Growth {
        let from = self.capacity();
        let to = from.saturating_mul(2).min(limit);
        if to <= from {
            return Growth::AtLimit(from);
        }

        self.capacity.store(to, Ordering::Release);
        Growth::Grew { from, to }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Events waiting for the worker
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn changed(name: &str) -> RawEvent {
        RawEvent::Changed(PathBuf::from(name))
    }

    #[test]
    fn test_offer_queues_until_capacity() {
        let (buffer, rx) = EventBuffer::new(2);

        assert_eq!(buffer.offer(changed("/d/a")), Offer::Queued);
        assert_eq!(buffer.offer(changed("/d/b")), Offer::Queued);
        assert_eq!(buffer.offer(changed("/d/c")), Offer::Overflowed);
        assert_eq!(buffer.offer(changed("/d/d")), Offer::Dropped);

        let drained: Vec<_> = rx.try_iter().collect();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[2], RawEvent::Overflow { path: None }));
    }

    #[test]
    fn test_acknowledge_rearms_overflow_marker() {
        let (buffer, rx) = EventBuffer::new(1);

        buffer.offer(changed("/d/a"));
        assert_eq!(buffer.offer(changed("/d/b")), Offer::Overflowed);

        // Worker drains and acknowledges
        let _: Vec<_> = rx.try_iter().collect();
        buffer.acknowledge_overflow();

        buffer.offer(changed("/d/c"));
        assert_eq!(buffer.offer(changed("/d/d")), Offer::Overflowed);
    }

    #[test]
    fn test_native_overflow_is_forwarded_once() {
        let (buffer, rx) = EventBuffer::new(8);

        assert_eq!(buffer.offer(RawEvent::Overflow { path: None }), Offer::Overflowed);
        assert_eq!(buffer.offer(RawEvent::Overflow { path: None }), Offer::Dropped);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_grow_doubles_up_to_limit() {
        let (buffer, _rx) = EventBuffer::new(3);

        assert_eq!(buffer.grow(10), Growth::Grew { from: 3, to: 6 });
        assert_eq!(buffer.grow(10), Growth::Grew { from: 6, to: 10 });
        assert_eq!(buffer.grow(10), Growth::AtLimit(10));
        assert_eq!(buffer.capacity(), 10);
    }

    #[test]
    fn test_offer_after_worker_gone_is_dropped() {
        let (buffer, rx) = EventBuffer::new(4);
        drop(rx);

        assert_eq!(buffer.offer(changed("/d/a")), Offer::Dropped);
        assert_eq!(buffer.pending(), 0);
    }
}
