//! Registry of live probe tasks, keyed by target url.
//!
//! At most one [`MonitorHandle`] exists per url. Insertion goes through
//! [`MonitorRegistry::insert_if_absent`], which holds the map entry while the
//! task is spawned, so two racing upserts for the same url start one task.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Distinguishes successive tasks for the same url.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(u64);

/// A running probe task and the token that stops it.
#[derive(Debug)]
pub struct MonitorHandle {
    id: MonitorId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn new(id: MonitorId, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { id, cancel, task }
    }
}

/// A monitor that was cancelled and removed from the registry.
#[derive(Debug)]
pub struct StoppedMonitor {
    task: JoinHandle<()>,
}

impl StoppedMonitor {
    /// Wait until the task has observed cancellation and exited.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Probe task panicked: {}", e);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MonitorRegistry {
    monitors: DashMap<String, MonitorHandle>,
    next_id: AtomicU64,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a monitor for `url` unless one is already registered.
    ///
    /// `start` runs only for a vacant entry and must not touch the registry
    /// synchronously. Returns whether a monitor was started.
    pub fn insert_if_absent<F>(&self, url: &str, start: F) -> bool
    where
        F: FnOnce(MonitorId) -> MonitorHandle,
    {
        match self.monitors.entry(url.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let id = MonitorId(self.next_id.fetch_add(1, Ordering::Relaxed));
                entry.insert(start(id));
                true
            }
        }
    }

    /// Cancel and remove the monitor for `url`.
    pub fn remove(&self, url: &str) -> Option<StoppedMonitor> {
        self.monitors.remove(url).map(|(_, handle)| {
            handle.cancel.cancel();
            StoppedMonitor { task: handle.task }
        })
    }

    /// Remove the entry for `url` only if it still belongs to task `id`.
    /// Used by a task leaving on its own so it cannot evict its successor.
    pub fn deregister(&self, url: &str, id: MonitorId) -> bool {
        self.monitors.remove_if(url, |_, handle| handle.id == id).is_some()
    }

    /// Cancel and remove every monitor.
    pub fn drain(&self) -> Vec<StoppedMonitor> {
        let urls: Vec<String> = self.monitors.iter().map(|entry| entry.key().clone()).collect();
        urls.iter().filter_map(|url| self.remove(url)).collect()
    }

    #[cfg(test)]
    pub fn contains(&self, url: &str) -> bool {
        self.monitors.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}
