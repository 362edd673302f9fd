//! Error types for the feed pipeline.

use thiserror::Error;

/// Errors surfaced to callers of the feed API.
///
/// Only validation and configuration problems are ever returned. Steady-state
/// I/O and decode failures are contained inside the transport and logged.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Topic is empty, contains whitespace, or looks like an address of the
    /// wrong length.
    #[error("Invalid topic: '{topic}'")]
    InvalidTopic { topic: String },

    /// Address is not 81 characters from the tryte alphabet (`A-Z`, `9`).
    #[error("Invalid address: '{address}'")]
    InvalidAddress { address: String },

    #[error("Unknown network: {network}")]
    UnknownNetwork { network: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A component that spawns tasks was built outside a Tokio runtime.
    #[error("No Tokio runtime available")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FeedError {
    /// Returns `true` for caller-input validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidTopic { .. } | Self::InvalidAddress { .. })
    }
}

/// Errors raised by a feed connector or one of its connections.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("Connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// A control message (subscribe / unsubscribe) could not be written.
    #[error("Send failed: {0}")]
    Send(String),

    /// WebSocket-level receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The upstream closed the connection.
    #[error("Connection closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if reconnecting may fix the problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Send(_) | Self::WebSocket(_) | Self::Closed
        )
    }
}
