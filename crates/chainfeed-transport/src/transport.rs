//! `FeedTransport`: one upstream feed connection shared by many local
//! subscribers.
//!
//! Registry and socket live behind a single async mutex, so `subscribe`,
//! `unsubscribe`, `keep_alive` and frame dispatch are serialised. `connect`
//! is additionally single-flight: concurrent callers never open two sockets.
//!
//! State transitions:
//! - `Disconnected` → `Connecting`: first topic registered, or keep-alive
//! - `Connecting` → `Connected`:    socket open, every topic re-subscribed
//! - `Connecting` → `Disconnected`: connect failed (logged, healed by keep-alive)
//! - `Connected` → `Disconnected`:  last topic removed, keep-alive, shutdown

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chainfeed_core::{
    decoder, topic, EndpointConfig, FeedError, FeedEvent, PeriodicTask, TransportConfig,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connector::{FeedConnection, FeedConnector, FeedSink, FrameStream};
use crate::registry::{FeedCallback, SubscriptionId, SubscriptionRegistry};

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Counters for one transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Frames decoded and delivered to at least one callback.
    pub frames_delivered: u64,
    /// Frames for topics without local subscriptions.
    pub frames_unroutable: u64,
    /// Frames with a subscribed but undecodable topic.
    pub frames_undecodable: u64,
    pub connects: u64,
    pub connect_failures: u64,
    /// Reconnects forced by keep-alive.
    pub forced_reconnects: u64,
}

struct Connection {
    sink: Box<dyn FeedSink>,
    reader: JoinHandle<()>,
}

struct Inner {
    registry: SubscriptionRegistry,
    connection: Option<Connection>,
}

/// Pub/sub client for one upstream endpoint.
pub struct FeedTransport {
    endpoint: EndpointConfig,
    connector: Arc<dyn FeedConnector>,
    config: TransportConfig,
    inner: tokio::sync::Mutex<Inner>,
    next_id: AtomicU64,
    connecting: AtomicBool,
    connected: AtomicBool,
    last_message: Mutex<Instant>,
    metrics: Mutex<TransportMetrics>,
    keep_alive_task: Mutex<Option<PeriodicTask>>,
    this: Weak<FeedTransport>,
}

impl FeedTransport {
    /// Create a disconnected transport. Nothing is opened until the first
    /// subscription.
    pub fn new(
        endpoint: EndpointConfig,
        connector: Arc<dyn FeedConnector>,
        config: TransportConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            endpoint,
            connector,
            config,
            inner: tokio::sync::Mutex::new(Inner {
                registry: SubscriptionRegistry::new(),
                connection: None,
            }),
            next_id: AtomicU64::new(1),
            connecting: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            last_message: Mutex::new(Instant::now()),
            metrics: Mutex::new(TransportMetrics::default()),
            keep_alive_task: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        if self.connecting.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn metrics(&self) -> TransportMetrics {
        self.metrics.lock().clone()
    }

    /// Topics with at least one local subscription.
    pub async fn topics(&self) -> Vec<String> {
        self.inner.lock().await.registry.active_topics()
    }

    /// Register `callback` for every frame published on `topic`.
    ///
    /// The first subscription of a topic subscribes it upstream and makes
    /// sure the transport is connected. Connection failures are logged, not
    /// returned; keep-alive retries them.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> Result<SubscriptionId, FeedError>
    where
        F: Fn(&str, &FeedEvent) + Send + Sync + 'static,
    {
        topic::validate_topic(topic)?;
        let callback: FeedCallback = Arc::new(callback);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        {
            let mut inner = self.inner.lock().await;
            let first = inner.registry.register(id, topic, callback);
            if first {
                debug!(endpoint = %self.endpoint, topic, "first subscription for topic");
                if let Some(conn) = inner.connection.as_mut() {
                    if let Err(e) = conn.sink.subscribe(topic).await {
                        warn!(endpoint = %self.endpoint, topic, error = %e, "upstream subscribe failed");
                    }
                }
            }
        }

        self.connect().await;
        Ok(id)
    }

    /// Watch an address. `address` must be 81 tryte characters.
    pub async fn subscribe_address<F>(
        &self,
        address: &str,
        callback: F,
    ) -> Result<SubscriptionId, FeedError>
    where
        F: Fn(&str, &FeedEvent) + Send + Sync + 'static,
    {
        topic::validate_address(address)?;
        self.subscribe(address, callback).await
    }

    /// Remove one subscription. Unknown ids are ignored.
    ///
    /// Removing a topic's last subscription unsubscribes it upstream; removing
    /// the transport's last topic closes the socket.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().await;
        let Some(removed) = inner.registry.remove(id) else {
            debug!(endpoint = %self.endpoint, %id, "unsubscribe for unknown id");
            return;
        };

        if removed.topic_emptied {
            debug!(endpoint = %self.endpoint, topic = %removed.topic, "last subscription for topic removed");
            if let Some(conn) = inner.connection.as_mut() {
                if let Err(e) = conn.sink.unsubscribe(&removed.topic).await {
                    warn!(endpoint = %self.endpoint, topic = %removed.topic, error = %e, "upstream unsubscribe failed");
                }
            }
        }

        if inner.registry.is_empty() {
            info!(endpoint = %self.endpoint, "no active topics, disconnecting");
            self.close_connection(&mut inner).await;
        }
    }

    /// Open the socket and re-subscribe every registered topic.
    ///
    /// No-op while another connect is in flight or a connection is open.
    async fn connect(&self) {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        {
            let inner = self.inner.lock().await;
            if inner.connection.is_some() || inner.registry.is_empty() {
                self.connecting.store(false, Ordering::Release);
                return;
            }
        }

        info!(endpoint = %self.endpoint, "connecting to feed");
        let result = self.connector.connect(&self.endpoint).await;

        let mut inner = self.inner.lock().await;
        match result {
            Err(e) => {
                self.metrics.lock().connect_failures += 1;
                warn!(endpoint = %self.endpoint, error = %e, "feed connect failed");
            }
            Ok(FeedConnection { mut sink, frames }) => {
                let topics = inner.registry.active_topics();
                if topics.is_empty() {
                    debug!(endpoint = %self.endpoint, "all topics removed while connecting, closing");
                    let _ = sink.close().await;
                } else {
                    for topic in &topics {
                        if let Err(e) = sink.subscribe(topic).await {
                            warn!(endpoint = %self.endpoint, topic, error = %e, "re-subscribe failed");
                        }
                    }
                    *self.last_message.lock() = Instant::now();
                    let reader = self.spawn_reader(frames);
                    inner.connection = Some(Connection { sink, reader });
                    self.connected.store(true, Ordering::Release);
                    self.metrics.lock().connects += 1;
                    info!(endpoint = %self.endpoint, topics = topics.len(), "feed connected");
                }
            }
        }
        self.connecting.store(false, Ordering::Release);
    }

    /// Close the socket if open. Close errors are swallowed.
    async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.close_connection(&mut inner).await;
    }

    async fn close_connection(&self, inner: &mut Inner) {
        let Some(mut conn) = inner.connection.take() else {
            return;
        };
        conn.reader.abort();
        if let Err(e) = conn.sink.close().await {
            debug!(endpoint = %self.endpoint, error = %e, "error closing feed connection");
        }
        self.connected.store(false, Ordering::Release);
        info!(endpoint = %self.endpoint, "feed disconnected");
    }

    /// Force a reconnect if topics are active and the feed has been silent
    /// for longer than `stale_after`.
    ///
    /// This is the only failure detector: a silent upstream and a dead one
    /// look the same.
    pub async fn keep_alive(&self) {
        if self.inner.lock().await.registry.is_empty() {
            return;
        }

        let silent_for = self.last_message.lock().elapsed();
        if silent_for <= self.config.stale_after() {
            return;
        }

        warn!(
            endpoint = %self.endpoint,
            silent_secs = silent_for.as_secs(),
            "feed stale, forcing reconnect"
        );
        self.metrics.lock().forced_reconnects += 1;
        self.disconnect().await;
        self.connect().await;
    }

    /// Run `keep_alive` every `keep_alive_interval`. Idempotent.
    pub fn start_keep_alive(&self) {
        let mut slot = self.keep_alive_task.lock();
        if slot.is_some() {
            return;
        }
        let this = self.this.clone();
        *slot = Some(PeriodicTask::spawn(
            "feed-keep-alive",
            self.config.keep_alive_interval(),
            move || {
                let this = this.clone();
                async move {
                    if let Some(transport) = this.upgrade() {
                        transport.keep_alive().await;
                    }
                }
            },
        ));
    }

    /// Stop keep-alive and close the socket. Subscriptions are kept; a later
    /// `subscribe` reconnects.
    pub async fn shutdown(&self) {
        let task = self.keep_alive_task.lock().take();
        if let Some(task) = task {
            task.cancel();
        }
        self.disconnect().await;
    }

    /// Dispatch one raw frame to the callbacks registered for its topic.
    ///
    /// Frames for topics without subscriptions are dropped. Frames whose
    /// topic is neither well known nor an address decode to nothing and are
    /// dropped too.
    pub async fn handle_message(&self, raw: &str) {
        *self.last_message.lock() = Instant::now();

        let Some((topic, fields)) = decoder::split_frame(raw) else {
            return;
        };

        let callbacks = self.inner.lock().await.registry.callbacks(topic);
        if callbacks.is_empty() {
            self.metrics.lock().frames_unroutable += 1;
            trace!(endpoint = %self.endpoint, topic, "frame for unsubscribed topic");
            return;
        }

        let Some(event) = decoder::decode(topic, &fields) else {
            self.metrics.lock().frames_undecodable += 1;
            debug!(endpoint = %self.endpoint, topic, "no decoder for topic");
            return;
        };

        self.metrics.lock().frames_delivered += 1;
        for callback in callbacks {
            callback(topic, &event);
        }
    }

    fn spawn_reader(&self, mut frames: FrameStream) -> JoinHandle<()> {
        let this = self.this.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                let Some(transport) = this.upgrade() else {
                    return;
                };
                match item {
                    Ok(frame) => transport.handle_message(&frame).await,
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "feed receive error");
                        break;
                    }
                }
            }
            debug!(endpoint = %endpoint, "feed stream ended, waiting for keep-alive");
        })
    }
}

impl std::fmt::Debug for FeedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedTransport")
            .field("endpoint", &self.endpoint.address)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ControlAction, InMemoryConnector};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    const ENDPOINT: &str = "mem://node";

    fn transport(broker: &InMemoryConnector) -> Arc<FeedTransport> {
        FeedTransport::new(
            EndpointConfig::new(ENDPOINT),
            Arc::new(broker.clone()),
            TransportConfig::default(),
        )
    }

    fn counter() -> (Arc<AtomicU32>, impl Fn(&str, &FeedEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        (count, move |_: &str, _: &FeedEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn address(c: char) -> String {
        std::iter::repeat(c).take(81).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_connects_and_subscribes_once() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);

        let a = t.subscribe("lmi", |_, _| {}).await.unwrap();
        let b = t.subscribe("lmi", |_, _| {}).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(t.state(), ConnectionState::Connected);
        assert_eq!(
            broker.actions_of(1),
            vec![ControlAction::Connect, ControlAction::Subscribe("lmi".into())]
        );

        t.unsubscribe(a).await;
        assert_eq!(broker.actions_of(1).len(), 2);

        t.unsubscribe(b).await;
        assert_eq!(
            broker.actions_of(1),
            vec![
                ControlAction::Connect,
                ControlAction::Subscribe("lmi".into()),
                ControlAction::Unsubscribe("lmi".into()),
                ControlAction::Close,
            ]
        );
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert_eq!(broker.live_connections().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_after_teardown_opens_new_connection() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);

        let id = t.subscribe("tx", |_, _| {}).await.unwrap();
        t.unsubscribe(id).await;
        t.subscribe("tx", |_, _| {}).await.unwrap();

        assert_eq!(broker.live_connections(), vec![2]);
        assert_eq!(broker.topics_of(2), vec!["tx".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_reach_every_subscriber_of_topic() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        let (hits_a, cb_a) = counter();
        let (hits_b, cb_b) = counter();
        let (hits_other, cb_other) = counter();

        t.subscribe("lmi", cb_a).await.unwrap();
        t.subscribe("lmi", cb_b).await.unwrap();
        t.subscribe("lmsi", cb_other).await.unwrap();

        broker.publish(ENDPOINT, "lmi 10 11");
        settle().await;

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
        assert_eq!(hits_other.load(Ordering::SeqCst), 0);
        assert_eq!(t.metrics().frames_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_for_unsubscribed_topic_is_dropped() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        let (hits, cb) = counter();
        t.subscribe("lmi", cb).await.unwrap();

        t.handle_message("lmsi 1 2").await;
        t.handle_message("").await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(t.metrics().frames_unroutable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tag_decodes_to_nothing() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        let (hits, cb) = counter();
        t.subscribe("ntp", cb).await.unwrap();

        t.handle_message("ntp 10/2").await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(t.metrics().frames_undecodable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_receives_topic_and_event() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let addr = address('C');
        t.subscribe_address(&addr, move |topic: &str, event: &FeedEvent| {
            s.lock().push((topic.to_string(), event.clone()));
        })
        .await
        .unwrap();

        broker.publish(ENDPOINT, &format!("{addr} TXHASH 77"));
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, addr);
        let FeedEvent::Address(ev) = &seen[0].1 else {
            panic!("expected address event");
        };
        assert_eq!(ev.transaction_hash, "TXHASH");
        assert_eq!(ev.milestone_index, Some(77));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_topics_are_rejected() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);

        let err = t.subscribe_address("short", |_, _| {}).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidAddress { .. }));

        let err = t.subscribe("tx lmi", |_, _| {}).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidTopic { .. }));

        assert!(t.subscribe_address(&address('A'), |_, _| {}).await.is_ok());
        assert!(broker.control_log().iter().all(|e| e.connection == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_not_returned() {
        let broker = InMemoryConnector::new();
        broker.refuse_connections(true);
        let t = transport(&broker);

        assert!(t.subscribe("tx", |_, _| {}).await.is_ok());
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert_eq!(t.metrics().connect_failures, 1);
        assert_eq!(t.topics().await, vec!["tx".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_reconnects_and_restores_topics() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        let addr = address('M');
        t.subscribe("tx", |_, _| {}).await.unwrap();
        t.subscribe_address(&addr, |_, _| {}).await.unwrap();

        broker.kill_connection(1);
        settle().await;

        // Not stale yet.
        tokio::time::advance(Duration::from_secs(10)).await;
        t.keep_alive().await;
        assert!(broker.live_connections().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        t.keep_alive().await;

        assert_eq!(broker.live_connections(), vec![2]);
        let mut expected = vec![addr.clone(), "tx".to_string()];
        expected.sort();
        assert_eq!(broker.topics_of(2), expected);
        assert_eq!(t.metrics().forced_reconnects, 1);
        assert_eq!(t.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_ignores_idle_transport() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        tokio::time::advance(Duration::from_secs(60)).await;
        t.keep_alive().await;
        assert!(broker.control_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_keeps_connection_fresh() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        t.subscribe("lmi", |_, _| {}).await.unwrap();

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(5)).await;
            broker.publish(ENDPOINT, "lmi 1 2");
            settle().await;
            t.keep_alive().await;
        }
        assert_eq!(broker.live_connections(), vec![1]);
        assert_eq!(t.metrics().forced_reconnects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_retries_failed_connect() {
        let broker = InMemoryConnector::new();
        broker.refuse_connections(true);
        let t = transport(&broker);
        t.subscribe("tx", |_, _| {}).await.unwrap();

        broker.refuse_connections(false);
        tokio::time::advance(Duration::from_secs(16)).await;
        t.keep_alive().await;

        assert_eq!(t.state(), ConnectionState::Connected);
        assert_eq!(broker.topics_of(1), vec!["tx".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_socket() {
        let broker = InMemoryConnector::new();
        let t = transport(&broker);
        t.start_keep_alive();
        t.subscribe("tx", |_, _| {}).await.unwrap();

        t.shutdown().await;

        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert!(broker.live_connections().is_empty());
        assert_eq!(broker.actions_of(1).last(), Some(&ControlAction::Close));
    }

    /// Delegates to the broker after a delay, so callers overlap in `connect`.
    struct SlowConnector {
        broker: InMemoryConnector,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl FeedConnector for SlowConnector {
        async fn connect(
            &self,
            endpoint: &EndpointConfig,
        ) -> Result<FeedConnection, chainfeed_core::TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.broker.connect(endpoint).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_subscribes_share_one_connect() {
        let broker = InMemoryConnector::new();
        let connector = Arc::new(SlowConnector {
            broker: broker.clone(),
            calls: AtomicU32::new(0),
        });
        let t = FeedTransport::new(
            EndpointConfig::new(ENDPOINT),
            connector.clone(),
            TransportConfig::default(),
        );

        let (a, b, c) = tokio::join!(
            t.subscribe("tx", |_, _| {}),
            t.subscribe("lmi", |_, _| {}),
            t.subscribe("sn", |_, _| {}),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.live_connections(), vec![1]);
        let mut topics = broker.topics_of(1);
        topics.sort();
        assert_eq!(topics, vec!["lmi", "sn", "tx"]);
        assert_eq!(t.state(), ConnectionState::Connected);
    }
}
