//! Effect executor: the only place that touches the network.
//!
//! - Send / Relay -> encode, then sink.send_to() / sink.relay()
//! - Misbehaving -> sink.misbehaving()
//! - AddPeerAddress / SyncProgress -> sink.add_peer() / sink.sync_progress()
//! - LocalNodeAnnounced -> activate the local node

use crate::active::ActiveNode;
use crate::registry::{GossipEffect, Registry};
use crate::wire::GossipMessage;

use super::transport::GossipSink;

/// Execute `effects` in order.
pub(super) async fn execute_effects<S: GossipSink>(
    effects: Vec<GossipEffect>,
    sink: &S,
    registry: &mut Registry,
    active: &mut Option<ActiveNode>,
) {
    for effect in effects {
        match effect {
            GossipEffect::Send { peer, message } => {
                let Some(bytes) = encode(&message) else {
                    continue;
                };
                if let Err(e) = sink.send_to(peer, &bytes).await {
                    tracing::debug!("send {} to {peer} failed: {e}", message.command());
                }
            }
            GossipEffect::Relay(message) => {
                let Some(bytes) = encode(&message) else {
                    continue;
                };
                if let Err(e) = sink.relay(&bytes).await {
                    tracing::debug!("relay {} failed: {e}", message.command());
                }
            }
            GossipEffect::Misbehaving { peer, score } => {
                sink.misbehaving(peer, score).await;
            }
            GossipEffect::SyncProgress(hash) => {
                sink.sync_progress(hash).await;
            }
            GossipEffect::AddPeerAddress(addr) => {
                sink.add_peer(addr).await;
            }
            GossipEffect::LocalNodeAnnounced { outpoint, addr } => {
                if let Some(node) = active.as_mut() {
                    node.enable_remotely(outpoint, addr);
                    registry.set_local_node(node.operator_pubkey().to_vec(), Some(outpoint));
                }
            }
        }
    }
}

fn encode(message: &GossipMessage) -> Option<Vec<u8>> {
    match message.to_bytes() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!("encode {} failed: {e}", message.command());
            None
        }
    }
}
