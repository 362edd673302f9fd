//! Milestone tracking.
//!
//! Each network may name a coordinator address. Address events for it are
//! milestones; the tracker keeps the newest `capacity` of them, one per index.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chainfeed_core::{FeedError, FeedEvent, MilestoneConfig};
use chainfeed_transport::{FeedTransport, SubscriptionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::engine::NetworkFeed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub hash: String,
    pub index: i64,
}

/// Newest-first milestones, unique by index.
#[derive(Debug)]
pub struct MilestoneLog {
    records: VecDeque<MilestoneRecord>,
    capacity: usize,
}

impl MilestoneLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend a milestone unless its index is already present.
    ///
    /// Arrival order decides position, not index: an older index that arrives
    /// late still goes to the front.
    pub fn insert(&mut self, hash: &str, index: i64) -> bool {
        if self.records.iter().any(|r| r.index == index) {
            return false;
        }
        self.records.push_front(MilestoneRecord {
            hash: hash.to_string(),
            index,
        });
        self.records.truncate(self.capacity);
        true
    }

    pub fn records(&self) -> Vec<MilestoneRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&MilestoneRecord> {
        self.records.front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct Watch {
    transport: Arc<FeedTransport>,
    coordinator: String,
    log: Arc<Mutex<MilestoneLog>>,
}

pub struct MilestoneTracker {
    watches: BTreeMap<String, Watch>,
    subscriptions: tokio::sync::Mutex<Vec<(Arc<FeedTransport>, SubscriptionId)>>,
}

impl MilestoneTracker {
    /// Networks without a coordinator are not tracked.
    pub fn new(feeds: &[NetworkFeed], config: &MilestoneConfig) -> Self {
        let watches = feeds
            .iter()
            .filter_map(|feed| {
                let coordinator = feed.config.coordinator.clone()?;
                let watch = Watch {
                    transport: Arc::clone(&feed.transport),
                    coordinator,
                    log: Arc::new(Mutex::new(MilestoneLog::new(config.capacity))),
                };
                Some((feed.name().to_string(), watch))
            })
            .collect();

        Self {
            watches,
            subscriptions: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Watch every coordinator address. A running tracker is left as is.
    ///
    /// A failed subscription releases the ones already made.
    pub async fn start(&self) -> Result<(), FeedError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.is_empty() {
            return Ok(());
        }

        let mut acquired = Vec::with_capacity(self.watches.len());
        for (network, watch) in &self.watches {
            match Self::watch_coordinator(network, watch).await {
                Ok(id) => acquired.push((Arc::clone(&watch.transport), id)),
                Err(e) => {
                    warn!(network = %network, error = %e, "milestone tracker start failed");
                    for (transport, id) in acquired {
                        transport.unsubscribe(id).await;
                    }
                    return Err(e);
                }
            }
        }
        *subscriptions = acquired;
        debug!(networks = self.watches.len(), "milestone tracker started");
        Ok(())
    }

    async fn watch_coordinator(network: &str, watch: &Watch) -> Result<SubscriptionId, FeedError> {
        let log = Arc::clone(&watch.log);
        let coordinator = watch.coordinator.clone();
        let net = network.to_string();
        watch
            .transport
            .subscribe_address(&watch.coordinator, move |_: &str, event: &FeedEvent| {
                let FeedEvent::Address(ev) = event else {
                    return;
                };
                if ev.address != coordinator {
                    return;
                }
                let Some(index) = ev.milestone_index else {
                    debug!(network = %net, hash = %ev.transaction_hash, "milestone without index skipped");
                    return;
                };
                if log.lock().insert(&ev.transaction_hash, index) {
                    info!(network = %net, index, hash = %ev.transaction_hash, "new milestone");
                } else {
                    trace!(network = %net, index, "milestone already known");
                }
            })
            .await
    }

    /// Drop every coordinator subscription. Recorded milestones are kept.
    pub async fn stop(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().await);
        for (transport, id) in subscriptions {
            transport.unsubscribe(id).await;
        }
    }

    /// Milestones for `network`, newest first. Empty for unknown networks.
    pub fn get_milestones(&self, network: &str) -> Vec<MilestoneRecord> {
        self.watches
            .get(network)
            .map(|watch| watch.log.lock().records())
            .unwrap_or_default()
    }

    pub fn latest(&self, network: &str) -> Option<MilestoneRecord> {
        self.watches
            .get(network)
            .and_then(|watch| watch.log.lock().latest().cloned())
    }

    pub fn networks(&self) -> Vec<String> {
        self.watches.keys().cloned().collect()
    }
}

impl std::fmt::Debug for MilestoneTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilestoneTracker")
            .field("networks", &self.networks())
            .finish()
    }
}
