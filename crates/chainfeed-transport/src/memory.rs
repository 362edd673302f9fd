//! In-memory feed broker.
//!
//! [`InMemoryConnector`] plays the upstream node: it hands out connections,
//! tracks which topics each connection subscribed to, and routes published
//! frames by exact topic match. Every control action is recorded so callers
//! can assert on the protocol traffic a transport produced. Suitable for tests
//! and for replaying captured frames locally.

use async_trait::async_trait;
use chainfeed_core::{decoder, EndpointConfig, TransportError};
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::connector::{FeedConnection, FeedConnector, FeedSink};

/// One protocol action observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    /// Connection number, starting at 1 and never reused.
    pub connection: u64,
    pub endpoint: String,
    pub action: ControlAction,
}

struct BrokerConnection {
    endpoint: String,
    topics: BTreeSet<String>,
    tx: mpsc::UnboundedSender<Result<String, TransportError>>,
}

#[derive(Default)]
struct BrokerState {
    next_connection: u64,
    connections: BTreeMap<u64, BrokerConnection>,
    log: Vec<ControlEvent>,
    refuse_connections: bool,
}

impl BrokerState {
    fn record(&mut self, connection: u64, endpoint: &str, action: ControlAction) {
        self.log.push(ControlEvent {
            connection,
            endpoint: endpoint.to_string(),
            action,
        });
    }
}

/// Shared in-process broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `frame` to every live connection on `endpoint` subscribed to
    /// the frame's topic. Returns the number of deliveries.
    pub fn publish(&self, endpoint: &str, frame: &str) -> usize {
        let Some((topic, _)) = decoder::split_frame(frame) else {
            return 0;
        };
        let state = self.state.lock();
        let mut delivered = 0;
        for conn in state.connections.values() {
            if conn.endpoint == endpoint
                && conn.topics.contains(topic)
                && conn.tx.unbounded_send(Ok(frame.to_string())).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Every control action seen so far, in order.
    pub fn control_log(&self) -> Vec<ControlEvent> {
        self.state.lock().log.clone()
    }

    /// Actions of one connection, in order.
    pub fn actions_of(&self, connection: u64) -> Vec<ControlAction> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|e| e.connection == connection)
            .map(|e| e.action.clone())
            .collect()
    }

    /// Ids of the connections that are still open.
    pub fn live_connections(&self) -> Vec<u64> {
        self.state.lock().connections.keys().copied().collect()
    }

    /// Topics currently subscribed on `connection`.
    pub fn topics_of(&self, connection: u64) -> Vec<String> {
        self.state
            .lock()
            .connections
            .get(&connection)
            .map(|c| c.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Silently drop a connection as a dead upstream would. The client's
    /// frame stream ends but no close is recorded.
    pub fn kill_connection(&self, connection: u64) {
        self.state.lock().connections.remove(&connection);
    }

    /// Make subsequent `connect` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }
}

#[async_trait]
impl FeedConnector for InMemoryConnector {
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<FeedConnection, TransportError> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(TransportError::Connect {
                endpoint: endpoint.address.clone(),
                reason: "connection refused".into(),
            });
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let (tx, rx) = mpsc::unbounded();
        state.connections.insert(
            id,
            BrokerConnection {
                endpoint: endpoint.address.clone(),
                topics: BTreeSet::new(),
                tx,
            },
        );
        state.record(id, &endpoint.address, ControlAction::Connect);

        Ok(FeedConnection {
            sink: Box::new(MemorySink {
                id,
                endpoint: endpoint.address.clone(),
                state: Arc::clone(&self.state),
            }),
            frames: Box::pin(rx),
        })
    }
}

struct MemorySink {
    id: u64,
    endpoint: String,
    state: Arc<Mutex<BrokerState>>,
}

impl MemorySink {
    fn update(&self, action: ControlAction) -> Result<(), TransportError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.connections.contains_key(&self.id) {
            return Err(TransportError::Closed);
        }
        match &action {
            ControlAction::Close => {
                state.connections.remove(&self.id);
            }
            ControlAction::Subscribe(topic) => {
                if let Some(conn) = state.connections.get_mut(&self.id) {
                    conn.topics.insert(topic.clone());
                }
            }
            ControlAction::Unsubscribe(topic) => {
                if let Some(conn) = state.connections.get_mut(&self.id) {
                    conn.topics.remove(topic);
                }
            }
            ControlAction::Connect => {}
        }
        state.record(self.id, &self.endpoint, action);
        Ok(())
    }
}

#[async_trait]
impl FeedSink for MemorySink {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.update(ControlAction::Subscribe(topic.to_string()))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.update(ControlAction::Unsubscribe(topic.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.update(ControlAction::Close)
    }
}
