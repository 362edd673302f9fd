//! chainfeed-core: shared types for the ChainFeed ingestion pipeline.
//!
//! # Overview
//!
//! ChainFeed ingests the line-oriented pub/sub feed published by ledger nodes,
//! decodes every frame into a [`FeedEvent`], and fans aggregated views out to
//! many consumers. The core crate defines:
//!
//! - [`FeedEvent`]: the closed set of decoded event variants
//! - [`decoder`]: the pure frame → event mapping
//! - [`topic`]: well-known topic tags and address validation
//! - [`FeedConfig`]: YAML-loadable pipeline configuration
//! - [`PeriodicTask`]: cancellable timer used by every component
//! - [`FeedError`] / [`TransportError`]: structured error types

pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod topic;

pub use config::{
    AggregationConfig, EndpointConfig, FeedConfig, LogConfig, MilestoneConfig, NetworkConfig,
    TransportConfig,
};
pub use decoder::{decode, decode_frame, split_frame};
pub use error::{FeedError, TransportError};
pub use event::FeedEvent;
pub use scheduler::PeriodicTask;
