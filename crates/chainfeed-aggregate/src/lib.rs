//! chainfeed-aggregate: batching, throughput and milestone views over the
//! decoded feed.
//!
//! # Components
//! - [`AggregationEngine`]: per-network pending-transaction ledgers and
//!   throughput windows, broadcast to subscribers as [`Snapshot`]s
//! - [`MilestoneTracker`]: newest-first milestones from each network's
//!   coordinator address
//! - [`FeedPipeline`]: builds one transport per network and starts both
//!   components on top of them
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainfeed_aggregate::FeedPipeline;
//! use chainfeed_core::FeedConfig;
//! use chainfeed_transport::WsConnector;
//!
//! # async fn run() -> Result<(), chainfeed_core::FeedError> {
//! let config = FeedConfig::from_file("feed.yaml")?;
//! let pipeline = FeedPipeline::start(&config, Arc::new(WsConnector::new())).await?;
//! pipeline.engine().subscribe(|snapshot| {
//!     println!("{} transactions", snapshot.transaction_count());
//! });
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod engine;
pub mod milestones;
pub mod pipeline;
pub mod snapshot;

pub use broadcast::{SnapshotBroadcaster, SubscriberId};
pub use engine::{AggregationEngine, NetworkFeed};
pub use milestones::{MilestoneLog, MilestoneRecord, MilestoneTracker};
pub use pipeline::FeedPipeline;
pub use snapshot::{Snapshot, TransactionEntry};
