//! Log output for the `chainfeed` binary.
//!
//! The `log` section of the feed config becomes an `EnvFilter`; crate names
//! such as `chainfeed-transport` are turned into target names.

use anyhow::{anyhow, Result};
use chainfeed_core::LogConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive string for `config`, e.g. `"info,chainfeed_transport=debug"`.
pub fn directives(config: &LogConfig) -> String {
    let mut directives = config.level.clone();
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives
}

/// `RUST_LOG`, when set, replaces the filter built from `config`. Errors if a
/// subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(config)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    installed.map_err(|e| anyhow!("installing log subscriber: {e}"))
}
