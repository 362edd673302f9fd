//! Aggregation engine: per-network transaction batching and throughput.
//!
//! One [`NetworkState`] per network, each behind its own mutex; transport
//! callbacks for different networks never contend. A [`PeriodicTask`] drives
//! [`AggregationEngine::tick`], which samples throughput and decides when to
//! broadcast.
//!
//! Broadcast rule, checked every tick:
//! - some ledger holds at least `burst_threshold` transactions, or
//! - `max_broadcast_delay` has passed since the last broadcast and some ledger
//!   is non-empty.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chainfeed_core::{AggregationConfig, FeedError, FeedEvent, NetworkConfig, PeriodicTask};
use chainfeed_transport::{FeedTransport, SubscriptionId};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::broadcast::{SnapshotBroadcaster, SubscriberId};
use crate::snapshot::{NetworkState, Snapshot};

/// A network and the transport that carries its feed.
#[derive(Debug, Clone)]
pub struct NetworkFeed {
    pub config: NetworkConfig,
    pub transport: Arc<FeedTransport>,
}

impl NetworkFeed {
    pub fn new(config: NetworkConfig, transport: Arc<FeedTransport>) -> Self {
        Self { config, transport }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

pub struct AggregationEngine {
    feeds: Vec<NetworkFeed>,
    config: AggregationConfig,
    states: BTreeMap<String, Arc<Mutex<NetworkState>>>,
    broadcaster: SnapshotBroadcaster,
    ticks: AtomicU64,
    last_broadcast: Mutex<Instant>,
    subscriptions: tokio::sync::Mutex<Vec<(Arc<FeedTransport>, SubscriptionId)>>,
    ticker: Mutex<Option<PeriodicTask>>,
    this: Weak<AggregationEngine>,
}

impl AggregationEngine {
    /// Build an engine for `feeds`. Fails if `config` is invalid or no Tokio
    /// runtime is running.
    pub fn new(feeds: Vec<NetworkFeed>, config: AggregationConfig) -> Result<Arc<Self>, FeedError> {
        config.validate()?;
        let broadcaster = SnapshotBroadcaster::new(config.snapshot_buffer)?;
        let states = feeds
            .iter()
            .map(|feed| {
                let state = NetworkState::new(config.window_capacity);
                (feed.name().to_string(), Arc::new(Mutex::new(state)))
            })
            .collect();

        Ok(Arc::new_cyclic(|this| Self {
            broadcaster,
            feeds,
            config,
            states,
            ticks: AtomicU64::new(0),
            last_broadcast: Mutex::new(Instant::now()),
            subscriptions: tokio::sync::Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
            this: this.clone(),
        }))
    }

    /// Subscribe every network's transaction topic and start the ticker.
    /// Calling `start` on a running engine is a no-op.
    ///
    /// If any subscription fails, the ones already made are released and the
    /// engine stays stopped.
    pub async fn start(&self) -> Result<(), FeedError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if self.ticker.lock().is_some() {
            return Ok(());
        }

        let mut acquired = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            match self.subscribe_feed(feed).await {
                Ok(id) => acquired.push((Arc::clone(&feed.transport), id)),
                Err(e) => {
                    warn!(network = feed.name(), error = %e, "aggregation start failed");
                    for (transport, id) in acquired {
                        transport.unsubscribe(id).await;
                    }
                    return Err(e);
                }
            }
        }
        *subscriptions = acquired;

        *self.last_broadcast.lock() = Instant::now();
        self.start_ticker();
        info!(networks = self.feeds.len(), "aggregation engine started");
        Ok(())
    }

    async fn subscribe_feed(&self, feed: &NetworkFeed) -> Result<SubscriptionId, FeedError> {
        let state = self
            .states
            .get(feed.name())
            .map(Arc::clone)
            .ok_or_else(|| FeedError::UnknownNetwork {
                network: feed.name().to_string(),
            })?;
        let network = feed.name().to_string();
        let id = feed
            .transport
            .subscribe(&feed.config.transaction_topic, move |_: &str, event: &FeedEvent| {
                let Some((hash, value)) = event.transaction() else {
                    trace!(network = %network, kind = event.kind(), "ignoring non-transaction event");
                    return;
                };
                if !state.lock().record(hash, value) {
                    trace!(network = %network, hash, "duplicate transaction");
                }
            })
            .await?;
        debug!(network = feed.name(), topic = %feed.config.transaction_topic, "aggregating network");
        Ok(id)
    }

    /// Cancel the ticker and drop every transport subscription. Downstream
    /// subscribers are kept.
    pub async fn stop(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.cancel();
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().await);
        for (transport, id) in subscriptions {
            transport.unsubscribe(id).await;
        }
        info!("aggregation engine stopped");
    }

    /// Stop, clear every network's state, and start again.
    pub async fn reset(&self) -> Result<(), FeedError> {
        self.stop().await;
        for state in self.states.values() {
            *state.lock() = NetworkState::new(self.config.window_capacity);
        }
        self.ticks.store(0, Ordering::Relaxed);
        self.start().await
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn networks(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Throughput samples for `network`, newest first.
    pub fn tps(&self, network: &str) -> Option<Vec<u64>> {
        self.states
            .get(network)
            .map(|state| state.lock().window.samples())
    }

    /// Transactions waiting for the next broadcast.
    pub fn pending(&self, network: &str) -> Option<usize> {
        self.states.get(network).map(|state| state.lock().ledger.len())
    }

    /// One aggregation step. Driven by the ticker; public so callers can
    /// step the engine by hand.
    pub fn tick(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % self.config.sample_every_ticks.max(1) == 0 {
            for state in self.states.values() {
                state.lock().sample();
            }
        }

        let mut burst = false;
        let mut pending = false;
        for state in self.states.values() {
            let len = state.lock().ledger.len();
            burst |= len >= self.config.burst_threshold;
            pending |= len > 0;
        }
        let overdue = self.last_broadcast.lock().elapsed() >= self.config.max_broadcast_delay();

        if burst || (overdue && pending) {
            self.broadcast();
        }
    }

    fn broadcast(&self) {
        let mut snapshot = Snapshot {
            interval_secs: self.config.sample_interval_secs(),
            ..Default::default()
        };
        for (network, state) in &self.states {
            let mut state = state.lock();
            snapshot
                .transactions
                .insert(network.clone(), state.ledger.take());
            snapshot.tps.insert(network.clone(), state.window.samples());
        }

        let transactions = snapshot.transaction_count();
        let receivers = self.broadcaster.publish(snapshot);
        *self.last_broadcast.lock() = Instant::now();
        debug!(transactions, receivers, "snapshot broadcast");
    }

    fn start_ticker(&self) {
        let mut slot = self.ticker.lock();
        if slot.is_some() {
            return;
        }
        let this = self.this.clone();
        *slot = Some(PeriodicTask::spawn(
            "aggregation-tick",
            self.config.tick_interval(),
            move || {
                let this = this.clone();
                async move {
                    if let Some(engine) = this.upgrade() {
                        engine.tick();
                    }
                }
            },
        ));
    }
}

impl std::fmt::Debug for AggregationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationEngine")
            .field("networks", &self.networks())
            .field("ticks", &self.ticks.load(Ordering::Relaxed))
            .finish()
    }
}
