//! Async composition root.
//!
//! One tokio task owns the [`Registry`], the optional [`ActiveNode`] and the
//! payment-vote ledger. Inbound gossip, application commands and timers are
//! multiplexed in a single `select!` loop; the pure registry logic returns
//! [`GossipEffect`](crate::registry::GossipEffect)s which the executor
//! forwards to a [`GossipSink`].
mod executor;
mod r#loop;
pub mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use servicenode_metrics::MetricsSnapshot;
use tokio::sync::{mpsc, oneshot};

use crate::active::ActiveNode;
use crate::chain::ChainView;
use crate::error::RegistryError;
use crate::queries::{BlockPayeeVotes, NodeCounts, QueuePosition, RankEntry};
use crate::registry::Registry;
use crate::types::{Outpoint, CHECK_SECONDS, PING_SECONDS};

pub use transport::GossipSink;

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the registry runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between record health checks.
    pub check_interval: Duration,
    /// Purge dead records every N checks.
    pub sweep_every: u32,
    /// Interval for local node status management and pings.
    pub active_interval: Duration,
    /// Cache file loaded at start and written at shutdown.
    pub persist_path: Option<PathBuf>,
    /// Capacity of the command and inbound channels.
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(CHECK_SECONDS as u64),
            sweep_every: 60,
            active_interval: Duration::from_secs(PING_SECONDS as u64),
            persist_path: None,
            channel_capacity: 64,
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// One gossip message as received from a peer.
#[derive(Debug, Clone)]
pub struct InboundGossip {
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Commands the application sends to the runtime event loop.
pub enum RuntimeCommand {
    /// Ask `peer` for its full list.
    RequestFullList { peer: SocketAddr },
    /// Tally accepted payment votes for a block.
    AddPaymentVote {
        height: u32,
        script: Vec<u8>,
        increment: u32,
    },
    /// Sign and broadcast an announcement for the local node.
    AnnounceLocal {
        outpoint: Outpoint,
        addr: SocketAddr,
        collateral_secret: [u8; 32],
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    /// Query: table size summary.
    GetCounts { reply: oneshot::Sender<NodeCounts> },
    /// Query: ranked list at a height.
    GetRanks {
        height: u32,
        reply: oneshot::Sender<Vec<RankEntry>>,
    },
    /// Query: payee of the next block.
    GetQueuePosition {
        reply: oneshot::Sender<Result<Option<QueuePosition>, RegistryError>>,
    },
    /// Query: payee vote strings for a height range.
    GetPayeeHistory {
        from: u32,
        to: u32,
        reply: oneshot::Sender<Vec<BlockPayeeVotes>>,
    },
    /// Query: metrics counters.
    GetMetrics {
        reply: oneshot::Sender<MetricsSnapshot>,
    },
    /// Query: local node status message, if we operate one.
    GetActiveStatus {
        reply: oneshot::Sender<Option<String>>,
    },
    /// Write the cache file now.
    Save {
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    /// Graceful shutdown; `done` fires after the final cache write.
    Shutdown { done: oneshot::Sender<()> },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to a running registry runtime.
///
/// Cheap to clone. Every method fails with
/// [`RegistryError::RuntimeShutDown`] once the loop has exited.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    inbound_tx: mpsc::Sender<InboundGossip>,
}

impl RuntimeHandle {
    /// Hand a message received from `peer` to the registry.
    pub async fn deliver(&self, peer: SocketAddr, bytes: Vec<u8>) -> Result<(), RegistryError> {
        self.inbound_tx
            .send(InboundGossip { peer, bytes })
            .await
            .map_err(|_| RegistryError::RuntimeShutDown)
    }

    pub async fn request_full_list(&self, peer: SocketAddr) -> Result<(), RegistryError> {
        self.send(RuntimeCommand::RequestFullList { peer }).await
    }

    pub async fn add_payment_vote(
        &self,
        height: u32,
        script: Vec<u8>,
        increment: u32,
    ) -> Result<(), RegistryError> {
        self.send(RuntimeCommand::AddPaymentVote {
            height,
            script,
            increment,
        })
        .await
    }

    /// Start the local node from its collateral key.
    pub async fn announce_local(
        &self,
        outpoint: Outpoint,
        addr: SocketAddr,
        collateral_secret: [u8; 32],
    ) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::AnnounceLocal {
            outpoint,
            addr,
            collateral_secret,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)?
    }

    pub async fn node_counts(&self) -> Result<NodeCounts, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::GetCounts { reply }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)
    }

    pub async fn rank_list(&self, height: u32) -> Result<Vec<RankEntry>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::GetRanks { height, reply }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)
    }

    /// Next payee, or [`RegistryError::Chain`] while the chain is busy.
    pub async fn queue_position(&self) -> Result<Option<QueuePosition>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::GetQueuePosition { reply }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)?
    }

    pub async fn payee_history(
        &self,
        from: u32,
        to: u32,
    ) -> Result<Vec<BlockPayeeVotes>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::GetPayeeHistory { from, to, reply })
            .await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::GetMetrics { reply }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)
    }

    pub async fn active_status(&self) -> Result<Option<String>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::GetActiveStatus { reply }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)
    }

    pub async fn save(&self) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::Save { reply }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)?
    }

    /// Stop the loop and wait for the final cache write.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let (done, rx) = oneshot::channel();
        self.send(RuntimeCommand::Shutdown { done }).await?;
        rx.await.map_err(|_| RegistryError::RuntimeShutDown)
    }

    async fn send(&self, cmd: RuntimeCommand) -> Result<(), RegistryError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RegistryError::RuntimeShutDown)
    }
}

// ── RegistryRuntime ──────────────────────────────────────────────────

/// The registry runtime: spawn it and talk to it through the handle.
pub struct RegistryRuntime;

impl RegistryRuntime {
    /// Start the event loop as a tokio task.
    ///
    /// With `active`, the registry is told our operator key so an accepted
    /// announcement for it activates the local node.
    pub fn spawn<S: GossipSink + 'static>(
        mut registry: Registry,
        active: Option<ActiveNode>,
        chain: Arc<dyn ChainView>,
        sink: S,
        config: RuntimeConfig,
    ) -> RuntimeHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);

        if let Some(node) = &active {
            registry.set_local_node(node.operator_pubkey().to_vec(), node.outpoint());
        }

        tokio::spawn(r#loop::runtime_loop(
            registry, active, chain, sink, config, cmd_rx, inbound_rx,
        ));

        RuntimeHandle { cmd_tx, inbound_tx }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mock::MockSink;
    use super::*;
    use crate::announce::Announcement;
    use crate::chain::{CollateralInfo, MemoryChain};
    use crate::config::{RegistryConfig, PROTOCOL_VERSION};
    use crate::signing;
    use crate::types::{now_secs, Hash256, COLLATERAL};
    use crate::wire::GossipMessage;

    fn peer() -> SocketAddr {
        "9.9.9.9:10135".parse().unwrap()
    }

    fn chain_with_collateral(outpoint: Outpoint, collateral_secret: &[u8; 32]) -> MemoryChain {
        let now = now_secs();
        let mut chain = MemoryChain::new(1000, now - 1000 * 60, 60);
        chain.add_collateral(
            outpoint,
            CollateralInfo {
                value: COLLATERAL,
                script: signing::payout_script(&signing::public_key(collateral_secret)),
                confirmations: 100,
                included_height: 900,
            },
        );
        chain
    }

    #[tokio::test]
    async fn inbound_announcement_is_accepted_and_relayed() {
        let outpoint = Outpoint::new(Hash256([3; 32]), 1);
        let chain = chain_with_collateral(outpoint, &[1; 32]);
        let a = Announcement::create(
            outpoint,
            "8.8.4.4:10135".parse().unwrap(),
            &[1; 32],
            &[2; 32],
            PROTOCOL_VERSION,
            &chain,
            now_secs(),
        )
        .unwrap();

        let sink = MockSink::new();
        let handle = RegistryRuntime::spawn(
            Registry::new(RegistryConfig::default()),
            None,
            Arc::new(chain),
            sink.clone(),
            RuntimeConfig::default(),
        );
        let bytes = GossipMessage::Announce(a).to_bytes().unwrap();
        handle.deliver(peer(), bytes).await.unwrap();

        assert_eq!(handle.node_counts().await.unwrap().total, 1);
        assert_eq!(handle.metrics().await.unwrap().announcements_accepted, 1);
        assert_eq!(sink.relayed().len(), 1);
        assert_eq!(sink.peers(), vec!["8.8.4.4:10135".parse().unwrap()]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let sink = MockSink::new();
        let handle = RegistryRuntime::spawn(
            Registry::new(RegistryConfig::default()),
            None,
            Arc::new(MemoryChain::new(100, 0, 60)),
            sink.clone(),
            RuntimeConfig::default(),
        );
        handle.deliver(peer(), vec![0xc1, 0xff]).await.unwrap();
        assert_eq!(handle.node_counts().await.unwrap().total, 0);
        assert!(sink.penalties().is_empty());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn full_list_request_goes_out() {
        let sink = MockSink::new();
        let handle = RegistryRuntime::spawn(
            Registry::new(RegistryConfig::default()),
            None,
            Arc::new(MemoryChain::new(100, 0, 60)),
            sink.clone(),
            RuntimeConfig::default(),
        );
        handle.request_full_list(peer()).await.unwrap();
        // any query round-trips after the command is handled
        handle.node_counts().await.unwrap();
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            GossipMessage::from_bytes(&sent[0].1).unwrap(),
            GossipMessage::GetList(Outpoint::null())
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handle_fails_after_shutdown() {
        let handle = RegistryRuntime::spawn(
            Registry::new(RegistryConfig::default()),
            None,
            Arc::new(MemoryChain::new(100, 0, 60)),
            MockSink::new(),
            RuntimeConfig::default(),
        );
        handle.shutdown().await.unwrap();
        assert!(matches!(
            handle.node_counts().await,
            Err(RegistryError::RuntimeShutDown)
        ));
    }

    #[tokio::test]
    async fn local_announcement_activates_operator() {
        let outpoint = Outpoint::new(Hash256([4; 32]), 0);
        let chain = chain_with_collateral(outpoint, &[5; 32]);
        let handle = RegistryRuntime::spawn(
            Registry::new(RegistryConfig::default()),
            Some(ActiveNode::new([6; 32])),
            Arc::new(chain),
            MockSink::new(),
            RuntimeConfig::default(),
        );
        handle
            .announce_local(outpoint, "8.8.4.4:10135".parse().unwrap(), [5; 32])
            .await
            .unwrap();
        assert_eq!(handle.node_counts().await.unwrap().total, 1);
        let status = handle.active_status().await.unwrap().unwrap();
        assert!(status.contains("just started"));
        handle.shutdown().await.unwrap();
    }
}
