//! Snapshot fan-out.
//!
//! Snapshots go through a bounded `tokio::sync::broadcast` channel. Each
//! subscriber gets its own delivery task, so a slow callback never stalls the
//! tick or other subscribers.
//!
//! Backpressure is drop-oldest: a subscriber more than `capacity` snapshots
//! behind skips the oldest ones and a warning with the skipped count is
//! logged.

use chainfeed_core::FeedError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::snapshot::Snapshot;

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

pub struct SnapshotBroadcaster {
    tx: broadcast::Sender<Arc<Snapshot>>,
    subscribers: Mutex<HashMap<SubscriberId, JoinHandle<()>>>,
    next_id: AtomicU64,
    runtime: Handle,
}

impl SnapshotBroadcaster {
    /// Delivery tasks run on the runtime current at construction, so
    /// `subscribe` works from any thread afterwards.
    pub fn new(capacity: usize) -> Result<Self, FeedError> {
        if capacity == 0 {
            return Err(FeedError::Config("snapshot buffer must be > 0".into()));
        }
        let runtime = Handle::try_current().map_err(|_| FeedError::NoRuntime)?;
        let (tx, _) = broadcast::channel(capacity);
        Ok(Self {
            tx,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            runtime,
        })
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut rx = self.tx.subscribe();
        let handle = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => callback(&snapshot),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(subscriber = %id, skipped, "subscriber lagging, oldest snapshots dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.subscribers.lock().insert(id, handle);
        debug!(subscriber = %id, "snapshot subscriber added");
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        match self.subscribers.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                debug!(subscriber = %id, "snapshot subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Queue `snapshot` for every subscriber. Returns how many will get it.
    pub fn publish(&self, snapshot: Snapshot) -> usize {
        self.tx.send(Arc::new(snapshot)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Drop for SnapshotBroadcaster {
    fn drop(&mut self) {
        for (_, handle) in self.subscribers.lock().drain() {
            handle.abort();
        }
    }
}
