//! Directory watch pool
//!
//! One native subscription per distinct parent directory of a watched file.
//! A subscription is created with the first watched file in its directory
//! and released with the last one. Each subscription owns an event buffer
//! and the worker thread that drains it.

use crate::buffer::{EventBuffer, Growth};
use crate::config::WatcherConfig;
use crate::platform::{NativeBackend, Router};
use crate::registry::WatchRegistry;
use crate::worker::DirectoryWorker;
use crate::Shared;
use crossbeam_channel::Sender;
use multiwatch_core::{PathKey, WatchError};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// A live directory subscription
pub(crate) struct DirectoryWatch {
    id: u64,
    dir: PathKey,
    buffer: Arc<EventBuffer>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl DirectoryWatch {
    /// Stop the worker and wait for it, unless called from the worker itself
    ///
    /// Must not be called with the state lock held.
    pub fn stop(mut self) {
        self.shutdown.take();

        let Some(handle) = self.worker.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Directory worker for {} panicked", self.dir);
        }
    }
}

pub(crate) struct DirectoryPool {
    watches: HashMap<PathKey, DirectoryWatch>,
    backend: Box<dyn NativeBackend>,
    router: Arc<Router>,
    link: Weak<Shared>,
    config: WatcherConfig,
    next_id: u64,
}

impl DirectoryPool {
    pub fn new(
        backend: Box<dyn NativeBackend>,
        router: Arc<Router>,
        link: Weak<Shared>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            watches: HashMap::new(),
            backend,
            router,
            link,
            config,
            next_id: 0,
        }
    }

    /// Subscribe to `dir` unless already subscribed
    pub fn ensure_watch(&mut self, dir: &PathKey) -> Result<(), WatchError> {
        if self.watches.contains_key(dir) {
            return Ok(());
        }

        self.backend.watch_dir(dir.as_path())?;

        self.next_id += 1;
        let id = self.next_id;
        let (buffer, events) = EventBuffer::new(self.config.initial_buffer_capacity);
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let worker = DirectoryWorker::new(
            id,
            dir.clone(),
            Arc::clone(&buffer),
            events,
            shutdown_rx,
            self.link.clone(),
            self.config.rename_window(),
        );

        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.worker_thread_prefix, id))
            .spawn(move || worker.run());

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(unwatch_err) = self.backend.unwatch_dir(dir.as_path()) {
                    warn!("Failed to roll back subscription for {}: {}", dir, unwatch_err);
                }
                return Err(WatchError::Spawn(err));
            }
        };

        self.router.attach(dir.clone(), Arc::clone(&buffer));
        self.watches.insert(
            dir.clone(),
            DirectoryWatch {
                id,
                dir: dir.clone(),
                buffer,
                shutdown: Some(shutdown),
                worker: Some(handle),
            },
        );

        info!(
            "Subscribed to {} via {} ({} directories)",
            dir,
            self.backend.name(),
            self.watches.len()
        );
        Ok(())
    }

    /// Release `dir` if no watched file is left in it
    ///
    /// The returned watch has been unsubscribed but its worker is still
    /// running; the caller stops it after dropping the state lock.
    pub fn release_if_empty(
        &mut self,
        dir: &PathKey,
        registry: &WatchRegistry,
    ) -> Option<DirectoryWatch> {
        if registry.count_in(dir) > 0 {
            return None;
        }

        let watch = self.watches.remove(dir)?;
        self.unsubscribe(&watch.dir);
        info!("Released {} ({} directories)", dir, self.watches.len());
        Some(watch)
    }

    /// Release every subscription
    pub fn release_all(&mut self) -> Vec<DirectoryWatch> {
        let watches: Vec<DirectoryWatch> = self.watches.drain().map(|(_, watch)| watch).collect();
        for watch in &watches {
            self.unsubscribe(&watch.dir);
        }
        watches
    }

    fn unsubscribe(&mut self, dir: &PathKey) {
        self.router.detach(dir);
        if let Err(err) = self.backend.unwatch_dir(dir.as_path()) {
            warn!("Failed to unsubscribe from {}: {}", dir, err);
        }
    }

    /// Whether `id` is still the live subscription for `dir`
    pub fn is_current(&self, dir: &PathKey, id: u64) -> bool {
        self.watches.get(dir).is_some_and(|watch| watch.id == id)
    }

    pub fn grow_buffer(&self, dir: &PathKey) -> Option<Growth> {
        self.watches
            .get(dir)
            .map(|watch| watch.buffer.grow(self.config.max_buffer_capacity))
    }

    pub fn buffer_capacity(&self, dir: &PathKey) -> Option<usize> {
        self.watches.get(dir).map(|watch| watch.buffer.capacity())
    }

    #[cfg(test)]
    pub fn contains(&self, dir: &PathKey) -> bool {
        self.watches.contains_key(dir)
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}
