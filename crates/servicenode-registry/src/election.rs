//! Deterministic scoring, ranking and payee selection.
//!
//! Every function here depends only on the registry contents, chain data
//! and the payment-vote ledger, so independent nodes holding the same
//! inputs agree on the result. Sorting is stable: equal scores keep table
//! (insertion) order.

use crate::chain::{ChainUnavailable, ChainView};
use crate::hash::HashWriter;
use crate::payments::PaymentVotes;
use crate::record::NodeRecord;
use crate::registry::Registry;
use crate::types::{Hash256, Outpoint, LAST_PAID_MIN_VOTES, MONTH_SECONDS, WINNER_MINIMUM_AGE};

/// Score given to non-enabled records by [`Registry::get_ranks`].
const INACTIVE_SCORE: u32 = 9999;

/// Payee scoring looks this many blocks behind the target height.
const QUEUE_SCORE_DEPTH: u32 = 100;

/// Seconds per enabled node a record must have been announced before it
/// joins the payment queue (2.6 minutes).
const QUEUE_AGE_PER_NODE: i64 = 156;

/// Offset range mixed into `last_paid` to spread equal block times.
const LAST_PAID_SPREAD: u32 = 150;

/// `|H(block_hash) - H(block_hash ‖ outpoint)|`.
pub fn calculate_score(outpoint: &Outpoint, block_hash: &Hash256) -> Hash256 {
    let base = HashWriter::new().write_hash(block_hash).finish();
    let mixed = HashWriter::new()
        .write_hash(block_hash)
        .write_hash(&outpoint.as_integer())
        .finish();
    mixed.abs_diff(&base)
}

/// Score of `outpoint` at `height`, or `None` if the block is unknown.
pub fn score_at(outpoint: &Outpoint, chain: &dyn ChainView, height: u32) -> Option<Hash256> {
    let hash = chain.block_hash(height)?;
    Some(calculate_score(outpoint, &hash))
}

/// Per-record constant derived from its outpoint and announce time.
fn payment_tiebreak(record: &NodeRecord) -> u32 {
    HashWriter::new()
        .write_outpoint(&record.outpoint)
        .write_i64(record.sig_time)
        .finish()
        .compact()
}

/// Block time (plus a small per-record offset) of the most recent block
/// that paid `record` with enough votes, scanning `scan_depth` blocks back
/// from the tip. 0 when none is found.
pub fn last_paid(
    record: &NodeRecord,
    chain: &dyn ChainView,
    votes: &PaymentVotes,
    scan_depth: usize,
) -> i64 {
    let Some(mut height) = chain.tip_height() else {
        return 0;
    };
    let script = record.payout_script();
    let offset = (payment_tiebreak(record) % LAST_PAID_SPREAD) as i64;

    for _ in 0..scan_depth {
        if height == 0 {
            break;
        }
        if votes.has_payee_with_votes(height, &script, LAST_PAID_MIN_VOTES) {
            return chain.block_time(height).unwrap_or(0) + offset;
        }
        height -= 1;
    }
    0
}

/// Seconds since the record was last paid, capped at a month.
///
/// Records unpaid for longer get a month plus a deterministic
/// per-record value so they never tie at the cap.
pub fn seconds_since_payment(
    record: &NodeRecord,
    chain: &dyn ChainView,
    votes: &PaymentVotes,
    scan_depth: usize,
    now: i64,
) -> i64 {
    let since = now - last_paid(record, chain, votes, scan_depth);
    if since < MONTH_SECONDS {
        return since;
    }
    MONTH_SECONDS + payment_tiebreak(record) as i64
}

/// Blocks `last_paid` scans for a network of `enabled` nodes.
pub(crate) fn last_paid_depth(enabled: usize) -> usize {
    enabled * 5 / 4
}

/// Whether the collateral of `outpoint` has at least `required`
/// confirmations. Unindexed collateral is not mature; a busy chain is
/// passed on.
fn collateral_is_mature(
    chain: &dyn ChainView,
    outpoint: &Outpoint,
    required: usize,
) -> Result<bool, ChainUnavailable> {
    match chain.collateral(outpoint) {
        Ok(info) => Ok(info.confirmations as usize >= required),
        Err(ChainUnavailable::NotFound) => Ok(false),
        Err(ChainUnavailable::Busy) => Err(ChainUnavailable::Busy),
    }
}

/// Sort descending by score, keeping insertion order among equals.
///
/// Deployed nodes order on the compact form of the score
/// ([`Hash256::compact`]) and leave ties among equal compact keys to
/// table order. Ordering on the full value agrees with that wherever the
/// compact keys differ.
fn sort_by_score<T>(scored: &mut [(Hash256, T)]) {
    scored.sort_by(|a, b| b.0.cmp(&a.0));
}

impl Registry {
    /// 1-based rank of `outpoint` at `height`.
    ///
    /// `None` if the block is unknown or the record is not eligible.
    pub fn get_rank(
        &mut self,
        outpoint: &Outpoint,
        chain: &dyn ChainView,
        height: u32,
        min_protocol: u32,
        only_active: bool,
        now: i64,
    ) -> Option<usize> {
        let block_hash = chain.block_hash(height)?;
        let enforce = self.config.is_payment_enforcement_active();
        if only_active {
            self.check(now);
        }

        let mut scored: Vec<(Hash256, Outpoint)> = self
            .records
            .iter()
            .filter(|r| r.protocol_version >= min_protocol)
            .filter(|r| !enforce || now - r.sig_time >= WINNER_MINIMUM_AGE)
            .filter(|r| !only_active || r.is_enabled())
            .map(|r| (calculate_score(&r.outpoint, &block_hash), r.outpoint))
            .collect();
        sort_by_score(&mut scored);

        scored
            .iter()
            .position(|(_, op)| op == outpoint)
            .map(|i| i + 1)
    }

    /// Every record at or above `min_protocol`, ranked at `height`.
    ///
    /// Non-enabled records score [`INACTIVE_SCORE`] and sink to the end.
    /// Empty when the block is unknown.
    pub fn get_ranks(
        &mut self,
        chain: &dyn ChainView,
        height: u32,
        min_protocol: u32,
        now: i64,
    ) -> Vec<(usize, NodeRecord)> {
        let Some(block_hash) = chain.block_hash(height) else {
            return Vec::new();
        };
        self.check(now);
        let inactive = Hash256::ZERO.add_u32(INACTIVE_SCORE);

        let mut scored: Vec<(Hash256, &NodeRecord)> = self
            .records
            .iter()
            .filter(|r| r.protocol_version >= min_protocol)
            .map(|r| {
                let score = if r.is_enabled() {
                    calculate_score(&r.outpoint, &block_hash)
                } else {
                    inactive
                };
                (score, r)
            })
            .collect();
        sort_by_score(&mut scored);

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (_, r))| (i + 1, r.clone()))
            .collect()
    }

    /// The record holding `rank` (1-based) at `height`.
    pub fn get_by_rank(
        &mut self,
        rank: usize,
        chain: &dyn ChainView,
        height: u32,
        min_protocol: u32,
        only_active: bool,
        now: i64,
    ) -> Option<NodeRecord> {
        let block_hash = chain.block_hash(height)?;
        if only_active {
            self.check(now);
        }
        let mut scored: Vec<(Hash256, &NodeRecord)> = self
            .records
            .iter()
            .filter(|r| r.protocol_version >= min_protocol)
            .filter(|r| !only_active || r.is_enabled())
            .map(|r| (calculate_score(&r.outpoint, &block_hash), r))
            .collect();
        sort_by_score(&mut scored);

        let index = rank.checked_sub(1)?;
        scored.get(index).map(|(_, r)| (*r).clone())
    }

    /// The enabled record with the highest score at `height`.
    ///
    /// Compares full scores; see [`sort_by_score`] for how that relates to
    /// the compact keys deployed nodes use.
    pub fn get_current(
        &mut self,
        chain: &dyn ChainView,
        height: u32,
        min_protocol: u32,
        now: i64,
    ) -> Option<NodeRecord> {
        let block_hash = chain.block_hash(height)?;
        self.check(now);

        let mut winner: Option<(Hash256, &NodeRecord)> = None;
        for r in self
            .records
            .iter()
            .filter(|r| r.protocol_version >= min_protocol && r.is_enabled())
        {
            let score = calculate_score(&r.outpoint, &block_hash);
            if winner.map_or(true, |(best, _)| score > best) {
                winner = Some((score, r));
            }
        }
        winner.map(|(_, r)| r.clone())
    }

    /// Pick the payee for `height`.
    ///
    /// Candidates are enabled, current-protocol, not already scheduled in
    /// the lookahead window and old enough in collateral confirmations.
    /// With `filter_sig_time`, records announced less than 2.6 minutes per
    /// enabled node ago are skipped unless that leaves fewer than a third
    /// of the network. The longest-unpaid tenth is then scored at
    /// `height - 100` and the best score wins.
    ///
    /// Returns the winner and the number of candidates considered. Fails
    /// with [`ChainUnavailable::Busy`] when a collateral lookup could not
    /// be answered; the caller retries later instead of electing from a
    /// partial candidate set.
    pub fn next_in_queue(
        &mut self,
        chain: &dyn ChainView,
        votes: &PaymentVotes,
        height: u32,
        filter_sig_time: bool,
        now: i64,
    ) -> Result<(Option<NodeRecord>, usize), ChainUnavailable> {
        let enabled = self.count_enabled(None, now);
        let min_protocol = self.config.min_payments_protocol();
        let tip = chain.tip_height().unwrap_or(0);
        let depth = last_paid_depth(enabled);

        let mut filter = filter_sig_time;
        let mut queue: Vec<(i64, &NodeRecord)> = loop {
            let mut candidates: Vec<(i64, &NodeRecord)> = Vec::new();
            for r in self
                .records
                .iter()
                .filter(|r| r.is_enabled() && r.protocol_version >= min_protocol)
                .filter(|r| !votes.is_scheduled(&r.payout_script(), tip, height))
                .filter(|r| !filter || r.sig_time + enabled as i64 * QUEUE_AGE_PER_NODE <= now)
            {
                if !collateral_is_mature(chain, &r.outpoint, enabled)? {
                    continue;
                }
                candidates.push((seconds_since_payment(r, chain, votes, depth, now), r));
            }

            // upgrading networks: don't starve nodes that just restarted
            if filter && candidates.len() < enabled / 3 {
                filter = false;
                continue;
            }
            break candidates;
        };
        let count = queue.len();

        queue.sort_by(|a, b| b.0.cmp(&a.0));

        let tenth = (enabled / 10).max(1);
        let score_height = height.saturating_sub(QUEUE_SCORE_DEPTH);
        let Some(score_hash) = chain.block_hash(score_height) else {
            tracing::debug!("next_in_queue: no block at {score_height}");
            return Ok((None, count));
        };

        let mut best: Option<(Hash256, &NodeRecord)> = None;
        for (_, r) in queue.iter().take(tenth) {
            let score = calculate_score(&r.outpoint, &score_hash);
            if best.map_or(true, |(high, _)| score > high) {
                best = Some((score, *r));
            }
        }
        Ok((best.map(|(_, r)| r.clone()), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{CollateralInfo, MemoryChain};
    use crate::config::RegistryConfig;
    use crate::registry::tests::{record, T0};
    use crate::types::{COLLATERAL, MIN_PING_SECONDS};

    const TIP: u32 = 5000;

    fn setup(count: u8) -> (Registry, MemoryChain) {
        let mut reg = Registry::new(RegistryConfig::default());
        let mut chain = MemoryChain::new(TIP, T0 - TIP as i64 * 60, 60);
        for n in 1..=count {
            let r = record(n, T0 - 50_000, T0 - 60);
            chain.add_collateral(
                r.outpoint,
                CollateralInfo {
                    value: COLLATERAL,
                    script: r.payout_script(),
                    confirmations: 1000,
                    included_height: 100,
                },
            );
            assert!(reg.add(r));
        }
        (reg, chain)
    }

    #[test]
    fn score_is_symmetric_difference() {
        let op = Outpoint::new(Hash256([7; 32]), 3);
        let bh = Hash256([1; 32]);
        let base = HashWriter::new().write_hash(&bh).finish();
        let mixed = HashWriter::new()
            .write_hash(&bh)
            .write_hash(&op.as_integer())
            .finish();
        let score = calculate_score(&op, &bh);
        assert_eq!(score, base.abs_diff(&mixed));
        assert_ne!(score, calculate_score(&op, &Hash256([2; 32])));
    }

    #[test]
    fn rank_needs_a_known_block() {
        let (mut reg, chain) = setup(3);
        let op = reg.records()[0].outpoint;
        assert!(reg.get_rank(&op, &chain, TIP + 1, 0, true, T0).is_none());
        assert!(reg.get_rank(&op, &chain, TIP, 0, true, T0).is_some());
    }

    #[test]
    fn ranks_are_a_permutation() {
        let (mut reg, chain) = setup(6);
        let ranks = reg.get_ranks(&chain, TIP, 0, T0);
        let mut seen: Vec<usize> = ranks.iter().map(|(rank, _)| *rank).collect();
        seen.sort();
        assert_eq!(seen, (1..=6).collect::<Vec<_>>());
        for (rank, r) in &ranks {
            assert_eq!(
                reg.get_rank(&r.outpoint, &chain, TIP, 0, true, T0),
                Some(*rank)
            );
            assert_eq!(
                reg.get_by_rank(*rank, &chain, TIP, 0, true, T0).map(|x| x.outpoint),
                Some(r.outpoint)
            );
        }
        assert!(reg.get_by_rank(0, &chain, TIP, 0, true, T0).is_none());
        assert!(reg.get_by_rank(7, &chain, TIP, 0, true, T0).is_none());
    }

    #[test]
    fn inactive_records_rank_last() {
        let (mut reg, chain) = setup(4);
        let stale = record(9, T0 - 50_000, T0 - 20_000);
        reg.records.push(stale.clone());
        let ranks = reg.get_ranks(&chain, TIP, 0, T0);
        assert_eq!(ranks.last().unwrap().1.outpoint, stale.outpoint);
        assert_eq!(reg.get_rank(&stale.outpoint, &chain, TIP, 0, true, T0), None);
    }

    #[test]
    fn current_is_rank_one() {
        let (mut reg, chain) = setup(5);
        let current = reg.get_current(&chain, TIP, 0, T0).unwrap();
        assert_eq!(
            reg.get_rank(&current.outpoint, &chain, TIP, 0, true, T0),
            Some(1)
        );
    }

    #[test]
    fn young_records_skipped_under_enforcement() {
        let mut reg = Registry::new(RegistryConfig::default().payment_enforcement(true));
        let chain = MemoryChain::new(TIP, 0, 60);
        let young = record(1, T0 - 100, T0 - 100 + MIN_PING_SECONDS);
        let old = record(2, T0 - WINNER_MINIMUM_AGE, T0 - 60);
        reg.add(young.clone());
        reg.add(old.clone());
        assert_eq!(reg.get_rank(&young.outpoint, &chain, TIP, 0, false, T0), None);
        assert_eq!(reg.get_rank(&old.outpoint, &chain, TIP, 0, false, T0), Some(1));
    }

    #[test]
    fn last_paid_finds_voted_block() {
        let (reg, chain) = setup(1);
        let r = reg.records()[0].clone();
        let mut votes = PaymentVotes::new();
        votes.add_payee(TIP - 3, &r.payout_script(), 2);
        let paid = last_paid(&r, &chain, &votes, 10);
        let block_time = chain.time_at(TIP - 3);
        assert!(paid >= block_time && paid < block_time + LAST_PAID_SPREAD as i64);

        // one vote is not enough, and the scan depth is honored
        let mut weak = PaymentVotes::new();
        weak.add_payee(TIP - 3, &r.payout_script(), 1);
        assert_eq!(last_paid(&r, &chain, &weak, 10), 0);
        assert_eq!(last_paid(&r, &chain, &votes, 3), 0);
    }

    #[test]
    fn unpaid_records_exceed_a_month() {
        let (reg, chain) = setup(2);
        let votes = PaymentVotes::new();
        let a = seconds_since_payment(&reg.records()[0], &chain, &votes, 10, T0);
        let b = seconds_since_payment(&reg.records()[1], &chain, &votes, 10, T0);
        assert!(a > MONTH_SECONDS && b > MONTH_SECONDS);
        assert_ne!(a, b);
    }

    #[test]
    fn scheduled_records_are_not_queued() {
        let (mut reg, chain) = setup(1);
        let r = reg.records()[0].clone();
        let mut votes = PaymentVotes::new();
        votes.add_payee(TIP + 2, &r.payout_script(), 1);
        let (winner, count) = reg.next_in_queue(&chain, &votes, TIP + 1, false, T0).unwrap();
        assert!(winner.is_none());
        assert_eq!(count, 0);
    }

    #[test]
    fn young_collateral_is_not_queued() {
        let (mut reg, mut chain) = setup(3);
        for r in reg.records().to_vec() {
            chain.add_collateral(
                r.outpoint,
                CollateralInfo {
                    value: COLLATERAL,
                    script: r.payout_script(),
                    confirmations: 2,
                    included_height: TIP - 1,
                },
            );
        }
        let (winner, _) = reg.next_in_queue(&chain, &PaymentVotes::new(), TIP + 1, true, T0).unwrap();
        assert!(winner.is_none());
    }

    #[test]
    fn busy_chain_defers_the_election() {
        let (mut reg, mut chain) = setup(3);
        let votes = PaymentVotes::new();
        let calm = reg.next_in_queue(&chain, &votes, TIP + 1, true, T0).unwrap();

        chain.set_busy(true);
        assert_eq!(
            reg.next_in_queue(&chain, &votes, TIP + 1, true, T0),
            Err(ChainUnavailable::Busy)
        );

        chain.set_busy(false);
        assert_eq!(reg.next_in_queue(&chain, &votes, TIP + 1, true, T0).unwrap(), calm);
    }

    #[test]
    fn unindexed_collateral_is_not_queued() {
        let (mut reg, chain) = setup(3);
        // enabled, but its collateral is unknown to the chain
        assert!(reg.add(record(9, T0 - 50_000, T0 - 60)));
        let (winner, count) = reg
            .next_in_queue(&chain, &PaymentVotes::new(), TIP + 1, true, T0)
            .unwrap();
        assert_eq!(count, 3);
        assert_ne!(winner.unwrap().outpoint, reg.records()[3].outpoint);
    }

    #[test]
    fn recency_filter_falls_back_when_too_few_remain() {
        // 5 nodes need 780 s of age, every record has 600
        let (mut reg, chain) = setup(5);
        for r in reg.records.iter_mut() {
            r.sig_time = T0 - 100;
            r.last_ping = r
                .last_ping
                .take()
                .map(|mut p| {
                    p.sig_time = T0 - 100 + MIN_PING_SECONDS;
                    p
                });
        }
        let now = T0 - 100 + MIN_PING_SECONDS;
        let (winner, count) = reg.next_in_queue(&chain, &PaymentVotes::new(), TIP + 1, true, now).unwrap();
        assert!(winner.is_some());
        assert_eq!(count, 5);
    }
}
