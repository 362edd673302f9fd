//! `FeedConnector` trait: abstraction over the upstream socket.
//!
//! A connector opens one connection per call. The connection is split into a
//! control half ([`FeedSink`]) used for topic (un)subscription and a stream of
//! raw text frames. The transport owns both halves.

use async_trait::async_trait;
use chainfeed_core::{EndpointConfig, TransportError};
use futures::Stream;
use std::pin::Pin;

/// Raw frames received on one connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Control side of a live connection.
#[async_trait]
pub trait FeedSink: Send {
    /// Ask the upstream to start publishing `topic` on this connection.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Ask the upstream to stop publishing `topic` on this connection.
    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Close the connection. The frame stream ends afterwards.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A freshly opened connection.
pub struct FeedConnection {
    pub sink: Box<dyn FeedSink>,
    pub frames: FrameStream,
}

/// Opens connections to an upstream feed.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so one connector can be shared by
/// every transport as `Arc<dyn FeedConnector>`.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<FeedConnection, TransportError>;
}
