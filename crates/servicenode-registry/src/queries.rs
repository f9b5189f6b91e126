//! Read-only views for operators and RPC layers.
//!
//! Everything here is a serde snapshot built from the registry, the chain
//! and the payment-vote ledger. None of it feeds back into consensus.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::chain::ChainView;
use crate::election::{last_paid, last_paid_depth, score_at};
use crate::error::RegistryError;
use crate::payments::PaymentVotes;
use crate::registry::Registry;
use crate::signing;
use crate::types::Outpoint;

/// One row of the ranked node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: usize,
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub state: String,
    pub protocol_version: u32,
    /// Key id of the collateral key, which is also the payee.
    pub payee: String,
    /// Score hex at the queried height, absent for non-enabled records.
    pub score: Option<String>,
    pub last_seen: i64,
    pub active_seconds: i64,
    pub last_paid: i64,
}

/// Table size summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: usize,
    pub enabled: usize,
    pub stable: usize,
    pub ipv4: usize,
    pub ipv6: usize,
}

/// The next payee and how many records competed for the slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub height: u32,
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub payee: String,
    pub candidates: usize,
}

/// Voted payees for one block, as `"<payee>:<votes>, ..."`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayeeVotes {
    pub height: u32,
    pub payees: String,
}

impl Registry {
    /// Every record at or above the payment protocol, ranked at `height`.
    pub fn rank_list(
        &mut self,
        chain: &dyn ChainView,
        votes: &PaymentVotes,
        height: u32,
        now: i64,
    ) -> Vec<RankEntry> {
        let min_protocol = self.config.min_payments_protocol();
        let ranked = self.get_ranks(chain, height, min_protocol, now);
        let depth = last_paid_depth(self.count_enabled(None, now));

        ranked
            .into_iter()
            .map(|(rank, r)| {
                let last_seen = r.last_ping_time();
                RankEntry {
                    rank,
                    outpoint: r.outpoint,
                    addr: r.addr,
                    state: r.state.as_str().to_string(),
                    protocol_version: r.protocol_version,
                    payee: signing::key_id_hex(&r.collateral_pubkey),
                    score: r
                        .is_enabled()
                        .then(|| score_at(&r.outpoint, chain, height))
                        .flatten()
                        .map(|s| s.to_hex()),
                    last_seen,
                    active_seconds: last_seen - r.sig_time,
                    last_paid: last_paid(&r, chain, votes, depth),
                }
            })
            .collect()
    }

    pub fn node_counts(&mut self, now: i64) -> NodeCounts {
        let (ipv4, ipv6) = self.count_networks(None, now);
        NodeCounts {
            total: self.len(),
            enabled: self.count_enabled(None, now),
            stable: self.stable_size(now),
            ipv4,
            ipv6,
        }
    }

    /// Next payee for the block after the tip.
    ///
    /// `Ok(None)` when nothing is eligible; a busy chain is an error so
    /// callers can ask again instead of showing a different payee.
    pub fn queue_position(
        &mut self,
        chain: &dyn ChainView,
        votes: &PaymentVotes,
        now: i64,
    ) -> Result<Option<QueuePosition>, RegistryError> {
        let Some(height) = chain.tip_height().and_then(|tip| tip.checked_add(1)) else {
            return Ok(None);
        };
        let (winner, candidates) = match self.next_in_queue(chain, votes, height, true, now) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!("queue position for {height} deferred: {e}");
                return Err(e.into());
            }
        };
        Ok(winner.map(|r| QueuePosition {
            height,
            outpoint: r.outpoint,
            addr: r.addr,
            payee: signing::key_id_hex(&r.collateral_pubkey),
            candidates,
        }))
    }
}

/// Vote strings for `from..=to`, oldest first.
pub fn payee_history(votes: &PaymentVotes, from: u32, to: u32) -> Vec<BlockPayeeVotes> {
    (from..=to)
        .map(|height| BlockPayeeVotes {
            height,
            payees: votes.required_payments_string(height),
        })
        .collect()
}

/// Render a query result for an RPC response.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, RegistryError> {
    serde_json::to_string_pretty(value).map_err(|e| RegistryError::Serialization(e.to_string()))
}
