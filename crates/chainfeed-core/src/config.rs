//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::FeedError;
use crate::topic;

/// One upstream feed source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointConfig {
    /// e.g. `"ws://node.example:5556"`
    pub address: String,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl std::fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

/// A logical network and the node feeding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network identifier, e.g. `"mainnet"`.
    pub name: String,
    pub endpoint: EndpointConfig,
    /// Topic carrying full transactions.
    #[serde(default = "default_transaction_topic")]
    pub transaction_topic: String,
    /// Coordinator address watched for milestones. Networks without one are
    /// skipped by the milestone tracker.
    #[serde(default)]
    pub coordinator: Option<String>,
}

fn default_transaction_topic() -> String {
    topic::TRANSACTION.to_string()
}

impl NetworkConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: EndpointConfig::new(endpoint),
            transaction_topic: default_transaction_topic(),
            coordinator: None,
        }
    }

    pub fn with_coordinator(mut self, address: impl Into<String>) -> Self {
        self.coordinator = Some(address.into());
        self
    }

    pub fn with_transaction_topic(mut self, topic: impl Into<String>) -> Self {
        self.transaction_topic = topic.into();
        self
    }
}

/// Keep-alive tuning for every transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_interval_secs: u64,
    /// Silence after which the connection is considered dead.
    #[serde(default = "default_stale_secs")]
    pub stale_after_secs: u64,
}

fn default_keep_alive_secs() -> u64 { 5 }
fn default_stale_secs() -> u64 { 15 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: default_keep_alive_secs(),
            stale_after_secs: default_stale_secs(),
        }
    }
}

impl TransportConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Aggregation engine cadence and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Ticker period.
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
    /// A throughput sample is pushed every this many ticks.
    #[serde(default = "default_sample_every")]
    pub sample_every_ticks: u64,
    /// Throughput samples kept per network.
    #[serde(default = "default_capacity")]
    pub window_capacity: usize,
    /// Pending transactions in one network that force an immediate broadcast.
    #[serde(default = "default_burst")]
    pub burst_threshold: usize,
    /// Longest gap between broadcasts while transactions are pending.
    #[serde(default = "default_max_delay_secs")]
    pub max_broadcast_delay_secs: u64,
    /// Snapshots buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_snapshot_buffer")]
    pub snapshot_buffer: usize,
}

fn default_tick_ms() -> u64 { 1_000 }
fn default_sample_every() -> u64 { 5 }
fn default_capacity() -> usize { 100 }
fn default_burst() -> usize { 5 }
fn default_max_delay_secs() -> u64 { 15 }
fn default_snapshot_buffer() -> usize { 64 }

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_ms(),
            sample_every_ticks: default_sample_every(),
            window_capacity: default_capacity(),
            burst_threshold: default_burst(),
            max_broadcast_delay_secs: default_max_delay_secs(),
            snapshot_buffer: default_snapshot_buffer(),
        }
    }
}

impl AggregationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_broadcast_delay(&self) -> Duration {
        Duration::from_secs(self.max_broadcast_delay_secs)
    }

    /// Seconds covered by one throughput sample.
    pub fn sample_interval_secs(&self) -> u64 {
        self.tick_interval_ms.saturating_mul(self.sample_every_ticks) / 1_000
    }

    /// Cadences must be non-zero and one sample must span whole seconds.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.tick_interval_ms == 0 || self.sample_every_ticks == 0 {
            return Err(FeedError::Config("aggregation cadence must be non-zero".into()));
        }
        if self.snapshot_buffer == 0 {
            return Err(FeedError::Config("snapshot_buffer must be non-zero".into()));
        }
        let sample_ms = self
            .tick_interval_ms
            .checked_mul(self.sample_every_ticks)
            .ok_or_else(|| FeedError::Config("sample interval overflows".into()))?;
        if sample_ms % 1_000 != 0 {
            return Err(FeedError::Config(format!(
                "tick_interval_ms * sample_every_ticks must be whole seconds, got {sample_ms} ms"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneConfig {
    /// Milestones kept per network.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for MilestoneConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// The `log:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for targets without a `components` entry.
    #[serde(default = "default_level")]
    pub level: String,
    /// e.g. `chainfeed-transport: debug` to trace reconnects only.
    #[serde(default)]
    pub components: HashMap<String, String>,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub milestones: MilestoneConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl FeedConfig {
    pub fn new(networks: Vec<NetworkConfig>) -> Self {
        Self {
            networks,
            transport: TransportConfig::default(),
            aggregation: AggregationConfig::default(),
            milestones: MilestoneConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, FeedError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Look up a network by name.
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        if self.networks.is_empty() {
            return Err(FeedError::Config("at least one network is required".into()));
        }

        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.name.as_str()) {
                return Err(FeedError::Config(format!(
                    "duplicate network '{}'",
                    network.name
                )));
            }
            if network.endpoint.address.is_empty() {
                return Err(FeedError::Config(format!(
                    "network '{}' has an empty endpoint",
                    network.name
                )));
            }
            topic::validate_topic(&network.transaction_topic)?;
            if !topic::is_transaction_topic(&network.transaction_topic) {
                return Err(FeedError::Config(format!(
                    "network '{}': '{}' does not carry transactions (expected one of {:?})",
                    network.name,
                    network.transaction_topic,
                    topic::TRANSACTION_TOPICS
                )));
            }
            if let Some(coordinator) = &network.coordinator {
                topic::validate_address(coordinator)?;
            }
        }

        self.aggregation.validate()?;
        if self.transport.keep_alive_interval_secs == 0 {
            return Err(FeedError::Config("keep_alive_interval_secs must be non-zero".into()));
        }
        Ok(())
    }
}
