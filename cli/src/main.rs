//! ChainFeed CLI.
//!
//! # Commands
//! ```text
//! chainfeed run    --config <feed.yaml> [--json]
//! chainfeed decode <frame>
//! chainfeed check  --config <feed.yaml>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chainfeed_aggregate::{FeedPipeline, Snapshot};
use chainfeed_core::{decode_frame, FeedConfig};
use chainfeed_transport::WsConnector;
use clap::{Parser, Subcommand};
use tracing::info;

mod logging;

#[derive(Parser)]
#[command(
    name = "chainfeed",
    about = "Ledger node feed ingestion: ChainFeed CLI",
    version
)]
struct Cli {
    /// Force debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every configured network and log aggregated snapshots
    Run {
        /// Path to the YAML config
        #[arg(short, long, default_value = "feed.yaml")]
        config: PathBuf,
        /// Print every snapshot to stdout as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode one raw feed frame and print it as JSON
    Decode {
        /// Frame text, e.g. "lmi 1200 1201"
        frame: String,
    },

    /// Validate a config file
    Check {
        /// Path to the YAML config
        #[arg(short, long, default_value = "feed.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, json } => cmd_run(&config, json, cli.verbose).await,
        Commands::Decode { frame } => cmd_decode(&frame),
        Commands::Check { config } => cmd_check(&config),
    }
}

fn load_config(path: &Path) -> Result<FeedConfig> {
    FeedConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

async fn cmd_run(path: &Path, json: bool, verbose: bool) -> Result<()> {
    let config = load_config(path)?;
    let mut log = config.log.clone();
    if verbose {
        log.level = "debug".into();
    }
    logging::init_tracing(&log)?;

    let pipeline = FeedPipeline::start(&config, Arc::new(WsConnector::new()))
        .await
        .context("starting feed pipeline")?;

    pipeline.engine().subscribe(move |snapshot: &Snapshot| {
        if json {
            match serde_json::to_string(snapshot) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "snapshot not serializable"),
            }
            return;
        }
        for (network, transactions) in &snapshot.transactions {
            let latest_tps = snapshot
                .tps
                .get(network)
                .and_then(|samples| samples.first())
                .copied()
                .unwrap_or(0);
            info!(
                network = %network,
                transactions = transactions.len(),
                last_sample = latest_tps,
                interval_secs = snapshot.interval_secs,
                "snapshot"
            );
        }
    });

    info!(networks = ?pipeline.networks(), "running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    for network in pipeline.networks() {
        if let Some(milestone) = pipeline.milestones().latest(&network) {
            info!(network = %network, index = milestone.index, hash = %milestone.hash, "latest milestone");
        }
    }
    pipeline.shutdown().await;
    Ok(())
}

fn cmd_decode(frame: &str) -> Result<()> {
    match decode_frame(frame) {
        Some(event) => {
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(())
        }
        None => anyhow::bail!("no decoder for frame: {frame:?}"),
    }
}

fn cmd_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("✓ {} is valid", path.display());
    for network in &config.networks {
        println!(
            "  {:<12} {}  topic={}  coordinator={}",
            network.name,
            network.endpoint,
            network.transaction_topic,
            if network.coordinator.is_some() { "yes" } else { "no" }
        );
    }
    Ok(())
}
