//! Service node registry.
//!
//! Tracks the collateral-backed service nodes of the network, validates
//! their gossiped announcements and liveness pings, and elects block
//! payees deterministically from the registry and chain data.
//!
//! Wire format: MessagePack (compact binary).
//! Crypto: Ed25519 signatures over double-SHA-256 digests.

pub mod active;
pub mod announce;
pub mod chain;
pub mod config;
pub mod election;
pub mod error;
pub mod hash;
pub mod payments;
pub mod persist;
pub mod ping;
pub mod queries;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod signing;
pub mod types;
pub mod wire;

pub use active::{ActiveNode, ActiveStatus, PingSendError};
pub use announce::Announcement;
pub use chain::{ChainUnavailable, ChainView, CollateralInfo, MemoryChain};
pub use config::{Network, NetworkParams, RegistryConfig, PROTOCOL_VERSION};
pub use election::calculate_score;
pub use error::{LoadError, RegistryError, ValidationError};
pub use payments::{BlockPayees, PaymentVotes};
pub use persist::RegistrySnapshot;
pub use ping::LivenessProof;
pub use queries::{BlockPayeeVotes, NodeCounts, QueuePosition, RankEntry};
pub use record::{HealthWindows, NodeRecord, NodeState};
pub use registry::{GossipEffect, LocalNode, Registry};
pub use runtime::{
    GossipSink, InboundGossip, RegistryRuntime, RuntimeCommand, RuntimeConfig, RuntimeHandle,
};
pub use signing::{SignatureDomain, SignedMessage};
pub use types::{now_secs, Hash256, Outpoint};
pub use wire::{GossipMessage, SyncItem};
