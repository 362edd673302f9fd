//! chainfeed-transport: pub/sub feed transport with keep-alive and
//! auto-resubscribe.
//!
//! # Features
//! - Topic multiplexing: many local callbacks per topic, one upstream
//!   subscription per topic
//! - Idle teardown when the last topic is removed
//! - Keep-alive: a feed silent for too long is reconnected
//! - Auto-resubscribe of every active topic after reconnect
//! - Pluggable connectors: WebSocket for production, in-memory broker for
//!   tests and replay

pub mod connector;
pub mod memory;
pub mod registry;
pub mod transport;
pub mod ws;

pub use connector::{FeedConnection, FeedConnector, FeedSink, FrameStream};
pub use memory::{ControlAction, ControlEvent, InMemoryConnector};
pub use registry::{FeedCallback, SubscriptionId, SubscriptionRegistry};
pub use transport::{ConnectionState, FeedTransport, TransportMetrics};
pub use ws::WsConnector;
