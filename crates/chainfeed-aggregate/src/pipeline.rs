//! `FeedPipeline`: wires transports, engine and tracker from a `FeedConfig`.
//!
//! Startup order: one transport per network (keep-alive running), then the
//! engine, then the milestone tracker. Shutdown runs in reverse so no
//! component outlives the sockets it reads from.

use std::collections::BTreeMap;
use std::sync::Arc;

use chainfeed_core::{FeedConfig, FeedError};
use chainfeed_transport::{FeedConnector, FeedTransport};
use tracing::info;

use crate::engine::{AggregationEngine, NetworkFeed};
use crate::milestones::MilestoneTracker;

pub struct FeedPipeline {
    transports: BTreeMap<String, Arc<FeedTransport>>,
    engine: Arc<AggregationEngine>,
    milestones: MilestoneTracker,
}

impl FeedPipeline {
    /// Build and start every component. Must be called inside a Tokio
    /// runtime.
    pub async fn start(
        config: &FeedConfig,
        connector: Arc<dyn FeedConnector>,
    ) -> Result<Self, FeedError> {
        config.validate()?;

        let feeds: Vec<NetworkFeed> = config
            .networks
            .iter()
            .map(|network| {
                let transport = FeedTransport::new(
                    network.endpoint.clone(),
                    Arc::clone(&connector),
                    config.transport.clone(),
                );
                transport.start_keep_alive();
                NetworkFeed::new(network.clone(), transport)
            })
            .collect();

        let transports = feeds
            .iter()
            .map(|feed| (feed.name().to_string(), Arc::clone(&feed.transport)))
            .collect();

        let engine = AggregationEngine::new(feeds.clone(), config.aggregation.clone())?;
        let milestones = MilestoneTracker::new(&feeds, &config.milestones);

        let pipeline = Self {
            transports,
            engine,
            milestones,
        };
        if let Err(e) = pipeline.start_components().await {
            pipeline.shutdown().await;
            return Err(e);
        }

        info!(networks = pipeline.transports.len(), "feed pipeline started");
        Ok(pipeline)
    }

    async fn start_components(&self) -> Result<(), FeedError> {
        self.engine.start().await?;
        self.milestones.start().await
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    pub fn milestones(&self) -> &MilestoneTracker {
        &self.milestones
    }

    pub fn transport(&self, network: &str) -> Result<&Arc<FeedTransport>, FeedError> {
        self.transports
            .get(network)
            .ok_or_else(|| FeedError::UnknownNetwork {
                network: network.to_string(),
            })
    }

    pub fn networks(&self) -> Vec<String> {
        self.transports.keys().cloned().collect()
    }

    /// Restart the engine's subscriptions and ticker; snapshot subscribers
    /// and recorded milestones survive.
    pub async fn reset(&self) -> Result<(), FeedError> {
        self.engine.reset().await
    }

    pub async fn shutdown(&self) {
        self.milestones.stop().await;
        self.engine.stop().await;
        for transport in self.transports.values() {
            transport.shutdown().await;
        }
        info!("feed pipeline stopped");
    }
}

impl std::fmt::Debug for FeedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPipeline")
            .field("networks", &self.networks())
            .finish()
    }
}
