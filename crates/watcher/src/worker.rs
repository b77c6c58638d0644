//! Directory worker
//!
//! One thread per directory subscription. Drains the directory's event
//! buffer, pairs the two halves of renames, and forwards everything else to
//! the translator under the watcher's state lock.

use crate::buffer::EventBuffer;
use crate::platform::RawEvent;
use crate::Shared;
use crossbeam_channel::{select, Receiver};
use multiwatch_core::PathKey;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// A move-out still waiting for its move-in
#[derive(Debug)]
struct PendingMove {
    path: PathBuf,
    tracker: Option<usize>,
    deadline: Instant,
}

pub(crate) struct DirectoryWorker {
    id: u64,
    dir: PathKey,
    buffer: Arc<EventBuffer>,
    events: Receiver<RawEvent>,
    shutdown: Receiver<()>,
    shared: Weak<Shared>,
    rename_window: Duration,
    pending: VecDeque<PendingMove>,
}

impl DirectoryWorker {
    pub fn new(
        id: u64,
        dir: PathKey,
        buffer: Arc<EventBuffer>,
        events: Receiver<RawEvent>,
        shutdown: Receiver<()>,
        shared: Weak<Shared>,
        rename_window: Duration,
    ) -> Self {
        Self {
            id,
            dir,
            buffer,
            events,
            shutdown,
            shared,
            rename_window,
            pending: VecDeque::new(),
        }
    }

    /// Run until the subscription is released
    pub fn run(mut self) {
        debug!("Directory worker {} started for {}", self.id, self.dir);

        loop {
            // Pending moves share one window, so the front expires first
            let expiry = match self.pending.front() {
                Some(pending) => crossbeam_channel::at(pending.deadline),
                None => crossbeam_channel::never(),
            };

            select! {
                recv(self.shutdown) -> _ => break,
                recv(self.events) -> msg => match msg {
                    Ok(raw) => self.handle(raw),
                    Err(_) => break,
                },
                recv(expiry) -> _ => self.expire(Instant::now()),
            }
        }

        debug!("Directory worker {} stopped for {}", self.id, self.dir);
    }

    fn handle(&mut self, raw: RawEvent) {
        match raw {
            RawEvent::MovedOut { path, tracker } => {
                self.pending.push_back(PendingMove {
                    path,
                    tracker,
                    deadline: Instant::now() + self.rename_window,
                });
            }
            RawEvent::MovedIn { path, tracker } => match self.take_pending(tracker) {
                Some(from) => self.forward(RawEvent::Renamed { from, to: path }),
                // Moved in from somewhere unwatched: treat as new content
                None => self.forward(RawEvent::Changed(path)),
            },
            RawEvent::Renamed { from, to } => {
                self.pending.retain(|pending| pending.path != from);
                self.forward(RawEvent::Renamed { from, to });
            }
            RawEvent::Overflow { path } => {
                self.buffer.acknowledge_overflow();
                self.forward(RawEvent::Overflow { path });
            }
            other => self.forward(other),
        }
    }

    /// Find the move-out matching a move-in
    fn take_pending(&mut self, tracker: Option<usize>) -> Option<PathBuf> {
        let index = match tracker {
            Some(tracker) => self
                .pending
                .iter()
                .position(|pending| pending.tracker == Some(tracker))?,
            None if self.pending.is_empty() => return None,
            None => 0,
        };
        self.pending.remove(index).map(|pending| pending.path)
    }

    /// Unpaired move-outs left every watched directory
    fn expire(&mut self, now: Instant) {
        while let Some(pending) = self.pending.front() {
            if pending.deadline > now {
                break;
            }
            if let Some(pending) = self.pending.pop_front() {
                debug!("Move of {} was not paired, treating as deletion", pending.path.display());
                self.forward(RawEvent::Deleted(pending.path));
            }
        }
    }

    fn forward(&self, raw: RawEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.translate(self.id, &self.dir, raw);
        }
    }
}
