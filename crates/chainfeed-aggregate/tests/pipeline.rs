//! End-to-end pipeline tests over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use chainfeed_aggregate::{FeedPipeline, Snapshot};
use chainfeed_core::{FeedConfig, FeedError, NetworkConfig};
use chainfeed_transport::{ConnectionState, InMemoryConnector};
use parking_lot::Mutex;

const MAINNET: &str = "mem://mainnet";
const DEVNET: &str = "mem://devnet";
const COO: &str =
    "KPWCHICGJZXKE9GSUDXZYUAPLHAKAHYHDXNPHENTERYMMBQOPSQIDENXKLKCEYCPVTZQLEEJVYJZV9BWU";

fn config() -> FeedConfig {
    FeedConfig::new(vec![
        NetworkConfig::new("mainnet", MAINNET).with_coordinator(COO),
        NetworkConfig::new("devnet", DEVNET),
    ])
}

fn tx_frame(hash: &str, value: i64) -> String {
    format!("tx {hash} ADDR {value} OTAG 1500000000 0 0 BUNDLE TRUNK BRANCH 1500000001 TAG")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn snapshots_and_milestones_flow_end_to_end() {
    let broker = InMemoryConnector::new();
    let pipeline = FeedPipeline::start(&config(), Arc::new(broker.clone()))
        .await
        .unwrap();

    let snapshots = Arc::new(Mutex::new(Vec::<Snapshot>::new()));
    let s = snapshots.clone();
    pipeline
        .engine()
        .subscribe(move |snap: &Snapshot| s.lock().push(snap.clone()));

    // One socket per network; the coordinator shares mainnet's.
    assert_eq!(broker.live_connections().len(), 2);
    let mainnet = pipeline.transport("mainnet").unwrap();
    assert_eq!(mainnet.topics().await, vec![COO.to_string(), "tx".to_string()]);

    for i in 0..6 {
        broker.publish(MAINNET, &tx_frame(&format!("M{i}"), i));
    }
    broker.publish(DEVNET, &tx_frame("D0", 42));
    broker.publish(MAINNET, &format!("{COO} MILESTONE 1200"));

    // First tick at 1s sees the burst.
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let snapshots = snapshots.lock();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].transactions["mainnet"].len(), 6);
    assert_eq!(snapshots[0].transactions["devnet"][0].value, Some(42));
    assert_eq!(snapshots[0].transaction_count(), 7);

    let milestones = pipeline.milestones().get_milestones("mainnet");
    assert_eq!(milestones.len(), 1);
    assert_eq!(milestones[0].index, 1200);
    assert!(pipeline.milestones().get_milestones("devnet").is_empty());

    drop(snapshots);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_feeds_reconnect_with_all_topics() {
    let broker = InMemoryConnector::new();
    let pipeline = FeedPipeline::start(&config(), Arc::new(broker.clone()))
        .await
        .unwrap();

    for id in broker.live_connections() {
        broker.kill_connection(id);
    }
    settle().await;
    assert!(broker.live_connections().is_empty());

    // Keep-alive runs every 5s and gives up on a feed after 15s of silence.
    tokio::time::sleep(Duration::from_secs(21)).await;

    let live = broker.live_connections();
    assert_eq!(live.len(), 2);
    assert!(live.iter().all(|id| *id > 2));

    let mut restored: Vec<Vec<String>> = live.iter().map(|id| broker.topics_of(*id)).collect();
    restored.sort();
    assert_eq!(
        restored,
        vec![vec![COO.to_string(), "tx".to_string()], vec!["tx".to_string()]]
    );

    let mainnet = pipeline.transport("mainnet").unwrap();
    assert_eq!(mainnet.state(), ConnectionState::Connected);
    assert_eq!(mainnet.metrics().forced_reconnects, 1);

    broker.publish(MAINNET, &format!("{COO} AFTER 1300"));
    settle().await;
    assert_eq!(
        pipeline.milestones().latest("mainnet").map(|m| m.index),
        Some(1300)
    );

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_socket() {
    let broker = InMemoryConnector::new();
    let pipeline = FeedPipeline::start(&config(), Arc::new(broker.clone()))
        .await
        .unwrap();

    pipeline.shutdown().await;

    assert!(broker.live_connections().is_empty());
    for name in pipeline.networks() {
        let transport = pipeline.transport(&name).unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(transport.topics().await.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_network_and_bad_config() {
    let broker = InMemoryConnector::new();
    let pipeline = FeedPipeline::start(&config(), Arc::new(broker.clone()))
        .await
        .unwrap();
    assert!(matches!(
        pipeline.transport("testnet"),
        Err(FeedError::UnknownNetwork { .. })
    ));
    pipeline.shutdown().await;

    let empty = FeedConfig::new(Vec::new());
    let err = FeedPipeline::start(&empty, Arc::new(broker)).await.unwrap_err();
    assert!(matches!(err, FeedError::Config(_)));
}

#[tokio::test(start_paused = true)]
async fn reset_keeps_subscribers_and_milestones() {
    let broker = InMemoryConnector::new();
    let pipeline = FeedPipeline::start(&config(), Arc::new(broker.clone()))
        .await
        .unwrap();
    let hits = Arc::new(Mutex::new(0usize));
    let h = hits.clone();
    pipeline
        .engine()
        .subscribe(move |snap: &Snapshot| *h.lock() += snap.transaction_count());

    broker.publish(MAINNET, &format!("{COO} KEPT 7"));
    settle().await;
    pipeline.reset().await.unwrap();

    for i in 0..5 {
        broker.publish(MAINNET, &tx_frame(&format!("R{i}"), 1));
    }
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(*hits.lock(), 5);
    assert_eq!(pipeline.milestones().latest("mainnet").map(|m| m.index), Some(7));
    pipeline.shutdown().await;
}
