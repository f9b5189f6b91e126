//! Gossip messages exchanged with peers, MessagePack-encoded.

use serde::{Deserialize, Serialize};

use crate::announce::Announcement;
use crate::error::RegistryError;
use crate::ping::LivenessProof;
use crate::types::Outpoint;

/// Which list a `SyncStatusCount` reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncItem {
    ServiceNodeList,
}

/// Registry gossip on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Full identity claim plus embedded ping.
    Announce(Announcement),
    /// Liveness proof.
    Ping(LivenessProof),
    /// Ask for one record, or for the whole table with [`Outpoint::null`].
    GetList(Outpoint),
    /// How many announcements answered a full-list request.
    SyncStatusCount { item: SyncItem, count: u32 },
}

impl GossipMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, RegistryError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegistryError> {
        rmp_serde::from_slice(bytes).map_err(Into::into)
    }

    /// Short command name for logs.
    pub fn command(&self) -> &'static str {
        match self {
            GossipMessage::Announce(_) => "announce",
            GossipMessage::Ping(_) => "ping",
            GossipMessage::GetList(_) => "get_list",
            GossipMessage::SyncStatusCount { .. } => "sync_status_count",
        }
    }
}
