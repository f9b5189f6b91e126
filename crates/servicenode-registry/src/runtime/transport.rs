use std::net::SocketAddr;

use crate::types::Hash256;

/// Outbound side of the gossip network as seen by the runtime.
///
/// The peer-to-peer layer implements it; tests use [`mock::MockSink`].
#[async_trait::async_trait]
pub trait GossipSink: Send + Sync {
    /// Send encoded bytes to one peer.
    async fn send_to(&self, peer: SocketAddr, data: &[u8]) -> Result<(), String>;

    /// Relay encoded bytes to every connected peer.
    async fn relay(&self, data: &[u8]) -> Result<(), String>;

    /// Report a misbehavior score for `peer`.
    async fn misbehaving(&self, peer: SocketAddr, score: u32);

    /// Offer a node address to the peer manager.
    async fn add_peer(&self, addr: SocketAddr);

    /// An announcement was (re)confirmed during list sync.
    async fn sync_progress(&self, hash: Hash256);
}

// ── MockSink (tests) ────────────────────────────────────────────────

pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that records every call.
    #[derive(Clone, Default)]
    pub struct MockSink {
        sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
        relayed: Arc<Mutex<Vec<Vec<u8>>>>,
        penalties: Arc<Mutex<Vec<(SocketAddr, u32)>>>,
        peers: Arc<Mutex<Vec<SocketAddr>>>,
        progress: Arc<Mutex<Vec<Hash256>>>,
    }

    impl MockSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            lock(&self.sent).clone()
        }

        pub fn relayed(&self) -> Vec<Vec<u8>> {
            lock(&self.relayed).clone()
        }

        pub fn penalties(&self) -> Vec<(SocketAddr, u32)> {
            lock(&self.penalties).clone()
        }

        pub fn peers(&self) -> Vec<SocketAddr> {
            lock(&self.peers).clone()
        }

        pub fn progress(&self) -> Vec<Hash256> {
            lock(&self.progress).clone()
        }
    }

    // A poisoned lock only means another test thread panicked.
    fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[async_trait::async_trait]
    impl GossipSink for MockSink {
        async fn send_to(&self, peer: SocketAddr, data: &[u8]) -> Result<(), String> {
            lock(&self.sent).push((peer, data.to_vec()));
            Ok(())
        }

        async fn relay(&self, data: &[u8]) -> Result<(), String> {
            lock(&self.relayed).push(data.to_vec());
            Ok(())
        }

        async fn misbehaving(&self, peer: SocketAddr, score: u32) {
            lock(&self.penalties).push((peer, score));
        }

        async fn add_peer(&self, addr: SocketAddr) {
            lock(&self.peers).push(addr);
        }

        async fn sync_progress(&self, hash: Hash256) {
            lock(&self.progress).push(hash);
        }
    }
}
