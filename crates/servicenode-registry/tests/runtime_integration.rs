/// Integration test: the tokio runtime around the registry.
///
/// Gossip goes in through the handle, effects come out through a
/// recording sink, and the cache survives a restart.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use servicenode_registry::runtime::transport::mock::MockSink;
use servicenode_registry::signing::{payout_script, public_key};
use servicenode_registry::types::{now_secs, COLLATERAL};
use servicenode_registry::{
    ActiveNode, Announcement, CollateralInfo, GossipMessage, Hash256, MemoryChain, Outpoint,
    Registry, RegistryConfig, RegistryRuntime, RuntimeConfig, PROTOCOL_VERSION,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn peer() -> SocketAddr {
    "9.9.9.9:10135".parse().unwrap()
}

struct Fixture {
    chain: Arc<MemoryChain>,
    announcement: Announcement,
}

fn fixture(seed: u8) -> Fixture {
    let now = now_secs();
    let outpoint = Outpoint::new(Hash256([seed; 32]), 0);
    let collateral = [seed.wrapping_add(1); 32];
    let mut chain = MemoryChain::new(1000, now - 1000 * 60, 60);
    chain.add_collateral(
        outpoint,
        CollateralInfo {
            value: COLLATERAL,
            script: payout_script(&public_key(&collateral)),
            confirmations: 100,
            included_height: 900,
        },
    );
    let announcement = Announcement::create(
        outpoint,
        format!("8.8.{seed}.1:10135").parse().unwrap(),
        &collateral,
        &[seed.wrapping_add(2); 32],
        PROTOCOL_VERSION,
        &chain,
        now,
    )
    .unwrap();
    Fixture {
        chain: Arc::new(chain),
        announcement,
    }
}

#[tokio::test]
async fn gossip_flows_through_the_runtime() {
    init_tracing();
    let f = fixture(1);
    let sink = MockSink::new();
    let handle = RegistryRuntime::spawn(
        Registry::new(RegistryConfig::default()),
        None,
        f.chain.clone(),
        sink.clone(),
        RuntimeConfig::default(),
    );

    let bytes = GossipMessage::Announce(f.announcement.clone())
        .to_bytes()
        .unwrap();
    handle.deliver(peer(), bytes.clone()).await.unwrap();
    handle.deliver(peer(), bytes).await.unwrap();

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.announcements_accepted, 1);
    assert_eq!(metrics.announcements_duplicate, 1);
    assert_eq!(sink.relayed().len(), 1);
    assert_eq!(sink.progress(), vec![f.announcement.hash(); 2]);

    let ranks = handle.rank_list(1000).await.unwrap();
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks[0].outpoint, f.announcement.outpoint);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cache_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        persist_path: Some(dir.path().join("servicenodes.dat")),
        ..RuntimeConfig::default()
    };
    let f = fixture(2);

    let handle = RegistryRuntime::spawn(
        Registry::new(RegistryConfig::default()),
        None,
        f.chain.clone(),
        MockSink::new(),
        config.clone(),
    );
    let bytes = GossipMessage::Announce(f.announcement.clone())
        .to_bytes()
        .unwrap();
    handle.deliver(peer(), bytes).await.unwrap();
    assert_eq!(handle.node_counts().await.unwrap().total, 1);
    handle.shutdown().await.unwrap();

    let restarted = RegistryRuntime::spawn(
        Registry::new(RegistryConfig::default()),
        None,
        f.chain.clone(),
        MockSink::new(),
        config,
    );
    assert_eq!(restarted.node_counts().await.unwrap().total, 1);
    restarted.shutdown().await.unwrap();
}

#[tokio::test]
async fn payment_votes_are_reported() {
    let f = fixture(3);
    let handle = RegistryRuntime::spawn(
        Registry::new(RegistryConfig::default()),
        None,
        f.chain.clone(),
        MockSink::new(),
        RuntimeConfig::default(),
    );
    let script = payout_script(&f.announcement.collateral_pubkey);
    handle.add_payment_vote(998, script, 4).await.unwrap();

    let history = handle.payee_history(997, 998).await.unwrap();
    assert_eq!(history[0].payees, "Unknown");
    assert!(history[1].payees.ends_with(":4"));
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn active_node_waits_for_activation() {
    let f = fixture(4);
    let handle = RegistryRuntime::spawn(
        Registry::new(RegistryConfig::default()),
        Some(ActiveNode::new([9; 32])),
        f.chain.clone(),
        MockSink::new(),
        RuntimeConfig {
            active_interval: Duration::from_secs(1),
            ..RuntimeConfig::default()
        },
    );
    assert_eq!(
        handle.active_status().await.unwrap().as_deref(),
        Some("Node just started, not yet activated")
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let status = handle.active_status().await.unwrap().unwrap();
    assert!(status.contains("waiting for remote activation"), "{status}");
    handle.shutdown().await.unwrap();
}
