//! Topic subscription registry.
//!
//! Tracks local callbacks per topic. Upstream subscription is reference
//! counted by topic bucket: the transport only talks to the socket when a
//! bucket goes from empty to non-empty or back. The registry itself is not
//! synchronised; the transport guards it.

use chainfeed_core::FeedEvent;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked with `(topic, event)` for every decoded frame.
pub type FeedCallback = Arc<dyn Fn(&str, &FeedEvent) + Send + Sync>;

/// Result of removing a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub topic: String,
    /// `true` if this was the topic's last subscription.
    pub topic_emptied: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    buckets: HashMap<String, Vec<(SubscriptionId, FeedCallback)>>,
    topic_of: HashMap<SubscriptionId, String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `topic`. Returns `true` if the topic had no
    /// subscriptions before.
    pub fn register(&mut self, id: SubscriptionId, topic: &str, callback: FeedCallback) -> bool {
        let bucket = self.buckets.entry(topic.to_string()).or_default();
        let first = bucket.is_empty();
        bucket.push((id, callback));
        self.topic_of.insert(id, topic.to_string());
        first
    }

    /// Remove one subscription. Unknown ids return `None`.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Removed> {
        let topic = self.topic_of.remove(&id)?;
        let bucket = self.buckets.get_mut(&topic)?;
        bucket.retain(|(sid, _)| *sid != id);
        let topic_emptied = bucket.is_empty();
        if topic_emptied {
            self.buckets.remove(&topic);
        }
        Some(Removed {
            topic,
            topic_emptied,
        })
    }

    /// Callbacks registered for `topic`, cloned so they can run unlocked.
    pub fn callbacks(&self, topic: &str) -> Vec<FeedCallback> {
        self.buckets
            .get(topic)
            .map(|bucket| bucket.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Every topic with at least one subscription. Used to re-subscribe after
    /// reconnect.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.buckets.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn topic_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of subscriptions across all topics.
    pub fn len(&self) -> usize {
        self.topic_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
