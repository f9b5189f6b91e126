use std::net::SocketAddr;

use crate::types::{Hash256, Outpoint};
use crate::wire::GossipMessage;

/// Side effect requested by the pure registry logic.
///
/// Every `process_message` / `tick` call returns `Vec<GossipEffect>`; the
/// runtime executes them against the transport, peer scoring and the sync
/// tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipEffect {
    /// Send a message to one peer.
    Send {
        peer: SocketAddr,
        message: GossipMessage,
    },

    /// Relay a message to every connected peer.
    Relay(GossipMessage),

    /// Penalize a peer for invalid input.
    Misbehaving { peer: SocketAddr, score: u32 },

    /// Tell the sync tracker an announcement was (re)confirmed.
    SyncProgress(Hash256),

    /// A newly accepted node is a candidate peer.
    AddPeerAddress(SocketAddr),

    /// The network accepted an announcement for our own operator key.
    LocalNodeAnnounced { outpoint: Outpoint, addr: SocketAddr },
}
