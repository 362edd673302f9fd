//! `WsConnector`: [`FeedConnector`] over a WebSocket relay of the node feed.
//!
//! Every feed frame arrives as one text message. Topic control is sent as
//! text messages `subscribe <topic>` and `unsubscribe <topic>`.
//!
//! # Usage
//! ```no_run
//! use chainfeed_transport::{FeedTransport, WsConnector};
//! use chainfeed_core::{EndpointConfig, TransportConfig};
//! use std::sync::Arc;
//!
//! let transport = FeedTransport::new(
//!     EndpointConfig::new("ws://node.example:5556"),
//!     Arc::new(WsConnector::new()),
//!     TransportConfig::default(),
//! );
//! ```

use async_trait::async_trait;
use chainfeed_core::{EndpointConfig, TransportError};
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::connector::{FeedConnection, FeedConnector, FeedSink};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connects to `ws://` / `wss://` feed endpoints.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<FeedConnection, TransportError> {
        let (ws, _) = connect_async(endpoint.address.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.address.clone(),
                reason: e.to_string(),
            })?;
        info!(endpoint = %endpoint, "WebSocket connected");

        let (write, read) = ws.split();
        let frames = read.filter_map(|msg| future::ready(frame_from_message(msg)));

        Ok(FeedConnection {
            sink: Box::new(WsSink { write }),
            frames: Box::pin(frames),
        })
    }
}

/// Map one WebSocket message to a feed frame. Control frames are skipped.
fn frame_from_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.to_string())),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                debug!("dropping non UTF-8 binary frame");
                None
            }
        },
        Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
        Ok(_) => None, // ping / pong
        Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
    }
}

struct WsSink {
    write: WsWrite,
}

impl WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl FeedSink for WsSink {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.send_text(format!("subscribe {topic}")).await
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.send_text(format!("unsubscribe {topic}")).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
