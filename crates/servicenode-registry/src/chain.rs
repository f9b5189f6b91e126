//! Read-only view of chain state the registry depends on.
//!
//! The chain index is owned elsewhere; the registry only asks questions.
//! Calls that would need the chain lock return [`ChainUnavailable::Busy`]
//! instead of blocking, and the caller defers the message.

use std::collections::HashMap;

use crate::types::{Hash256, Outpoint};

/// Chain data could not be consulted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChainUnavailable {
    /// The chain lock is held elsewhere; try again later.
    #[error("chain state busy")]
    Busy,
    /// Not indexed (yet).
    #[error("not found in chain index")]
    NotFound,
}

/// What the chain knows about a collateral output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralInfo {
    /// Output value in base units.
    pub value: i64,
    /// Output script.
    pub script: Vec<u8>,
    /// Confirmations of the funding transaction.
    pub confirmations: u32,
    /// Height of the block that included it.
    pub included_height: u32,
}

/// Chain queries used by validation and election.
pub trait ChainView: Send + Sync {
    /// Height of the active tip, `None` before genesis.
    fn tip_height(&self) -> Option<u32>;

    /// Hash of the active-chain block at `height`.
    fn block_hash(&self, height: u32) -> Option<Hash256>;

    /// Active-chain height of `hash`, `None` if unknown or off the active chain.
    fn height_of(&self, hash: &Hash256) -> Result<Option<u32>, ChainUnavailable>;

    /// Timestamp of the active-chain block at `height`.
    fn block_time(&self, height: u32) -> Option<i64>;

    /// Unspent collateral output lookup.
    fn collateral(&self, outpoint: &Outpoint) -> Result<CollateralInfo, ChainUnavailable>;

    /// Gossip is ignored until the chain is caught up.
    fn is_synced(&self) -> bool {
        true
    }
}

// ── MemoryChain ──────────────────────────────────────────────────────

/// In-memory chain for tests and tooling.
///
/// Block `h` has a deterministic hash derived from `h` unless overridden,
/// and timestamps `genesis_time + h * spacing`.
#[derive(Debug, Clone)]
pub struct MemoryChain {
    tip: Option<u32>,
    genesis_time: i64,
    spacing: i64,
    hashes: HashMap<u32, Hash256>,
    collateral: HashMap<Outpoint, CollateralInfo>,
    busy: bool,
    synced: bool,
}

impl MemoryChain {
    pub fn new(tip: u32, genesis_time: i64, spacing: i64) -> Self {
        Self {
            tip: Some(tip),
            genesis_time,
            spacing,
            hashes: HashMap::new(),
            collateral: HashMap::new(),
            busy: false,
            synced: true,
        }
    }

    fn default_hash(height: u32) -> Hash256 {
        crate::hash::HashWriter::new()
            .write_raw(b"memory-chain")
            .write_u32(height)
            .finish()
    }

    pub fn set_tip(&mut self, tip: u32) {
        self.tip = Some(tip);
    }

    pub fn set_block_hash(&mut self, height: u32, hash: Hash256) {
        self.hashes.insert(height, hash);
    }

    pub fn add_collateral(&mut self, outpoint: Outpoint, info: CollateralInfo) {
        self.collateral.insert(outpoint, info);
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    /// Timestamp of the block at `height`, even past the tip.
    pub fn time_at(&self, height: u32) -> i64 {
        self.genesis_time + height as i64 * self.spacing
    }
}

impl ChainView for MemoryChain {
    fn tip_height(&self) -> Option<u32> {
        self.tip
    }

    fn block_hash(&self, height: u32) -> Option<Hash256> {
        if height > self.tip? {
            return None;
        }
        Some(
            self.hashes
                .get(&height)
                .copied()
                .unwrap_or_else(|| Self::default_hash(height)),
        )
    }

    fn height_of(&self, hash: &Hash256) -> Result<Option<u32>, ChainUnavailable> {
        if self.busy {
            return Err(ChainUnavailable::Busy);
        }
        let Some(tip) = self.tip else {
            return Ok(None);
        };
        Ok((0..=tip).rev().find(|h| self.block_hash(*h).as_ref() == Some(hash)))
    }

    fn block_time(&self, height: u32) -> Option<i64> {
        (height <= self.tip?).then(|| self.time_at(height))
    }

    fn collateral(&self, outpoint: &Outpoint) -> Result<CollateralInfo, ChainUnavailable> {
        if self.busy {
            return Err(ChainUnavailable::Busy);
        }
        self.collateral
            .get(outpoint)
            .cloned()
            .ok_or(ChainUnavailable::NotFound)
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}
