/// Integration test: payee election over a network built from gossip.
///
/// Scenario: twelve nodes announce and ping. Eleven of them were paid in
/// the last blocks; the twelfth never was, so it must be next in queue on
/// every node that holds the same data, regardless of arrival order.
use std::net::SocketAddr;

use rand::{rngs::StdRng, RngCore, SeedableRng};
use servicenode_registry::signing::{payout_script, public_key};
use servicenode_registry::types::COLLATERAL;
use servicenode_registry::{
    calculate_score, Announcement, ChainUnavailable, ChainView, CollateralInfo, GossipMessage,
    Hash256, LivenessProof, MemoryChain, Outpoint, PaymentVotes, Registry, RegistryConfig,
    PROTOCOL_VERSION,
};

const NOW: i64 = 1_700_000_000;
const TIP: u32 = 2000;
const ANNOUNCED: i64 = NOW - 10_000;

struct Node {
    outpoint: Outpoint,
    addr: SocketAddr,
    collateral: [u8; 32],
    operator: [u8; 32],
}

fn nodes(count: u64) -> Vec<Node> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|i| {
            let mut txid = [0u8; 32];
            let mut collateral = [0u8; 32];
            let mut operator = [0u8; 32];
            rng.fill_bytes(&mut txid);
            rng.fill_bytes(&mut collateral);
            rng.fill_bytes(&mut operator);
            Node {
                outpoint: Outpoint::new(Hash256(txid), 0),
                addr: format!("8.8.{}.1:10135", i + 1).parse().unwrap(),
                collateral,
                operator,
            }
        })
        .collect()
}

fn chain_for(nodes: &[Node]) -> MemoryChain {
    let mut chain = MemoryChain::new(TIP, NOW - TIP as i64 * 60, 60);
    for n in nodes {
        chain.add_collateral(
            n.outpoint,
            CollateralInfo {
                value: COLLATERAL,
                script: payout_script(&public_key(&n.collateral)),
                confirmations: 500,
                included_height: 1000,
            },
        );
    }
    chain
}

/// Announce every node, then ping it so it is enabled at `NOW`.
fn build(nodes: &[&Node], chain: &MemoryChain) -> Registry {
    let peer: SocketAddr = "9.9.9.9:10135".parse().unwrap();
    let mut reg = Registry::new(RegistryConfig::default());
    for n in nodes {
        let a = Announcement::create(
            n.outpoint,
            n.addr,
            &n.collateral,
            &n.operator,
            PROTOCOL_VERSION,
            chain,
            ANNOUNCED,
        )
        .unwrap();
        reg.process_message(peer, GossipMessage::Announce(a), chain, ANNOUNCED);
    }
    for n in nodes {
        let ping = LivenessProof::create(n.outpoint, chain, NOW - 60, &n.operator).unwrap();
        reg.process_message(peer, GossipMessage::Ping(ping), chain, NOW);
    }
    reg
}

#[test]
fn every_node_is_enabled_after_pinging() {
    let all = nodes(12);
    let chain = chain_for(&all);
    let mut reg = build(&all.iter().collect::<Vec<_>>(), &chain);
    assert_eq!(reg.count_enabled(None, NOW), 12);
    assert_eq!(reg.node_counts(NOW).stable, 12);
}

#[test]
fn unpaid_node_is_next_in_queue() {
    let all = nodes(12);
    let chain = chain_for(&all);
    let mut reg = build(&all.iter().collect::<Vec<_>>(), &chain);

    let mut votes = PaymentVotes::new();
    for (i, n) in all.iter().take(11).enumerate() {
        let height = TIP - 1 - i as u32;
        votes.add_payee(height, &payout_script(&public_key(&n.collateral)), 2);
    }

    let (winner, candidates) = reg.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    assert_eq!(candidates, 12);
    assert_eq!(winner.unwrap().outpoint, all[11].outpoint);
}

#[test]
fn single_vote_does_not_count_as_paid() {
    let all = nodes(12);
    let chain = chain_for(&all);
    let mut reg = build(&all.iter().collect::<Vec<_>>(), &chain);

    // everyone but node 0 was paid with enough votes; node 0 had one vote
    let mut votes = PaymentVotes::new();
    for (i, n) in all.iter().enumerate() {
        let script = payout_script(&public_key(&n.collateral));
        votes.add_payee(TIP - 1 - i as u32, &script, if i == 0 { 1 } else { 2 });
    }

    let (winner, _) = reg.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    assert_eq!(winner.unwrap().outpoint, all[0].outpoint);
}

#[test]
fn scheduled_payee_is_skipped() {
    let all = nodes(12);
    let chain = chain_for(&all);
    let mut reg = build(&all.iter().collect::<Vec<_>>(), &chain);

    let mut votes = PaymentVotes::new();
    for (i, n) in all.iter().take(11).enumerate() {
        votes.add_payee(TIP - 1 - i as u32, &payout_script(&public_key(&n.collateral)), 2);
    }
    // the unpaid node already won an upcoming block
    votes.add_payee(TIP + 3, &payout_script(&public_key(&all[11].collateral)), 6);

    let (winner, candidates) = reg.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    assert_eq!(candidates, 11);
    assert_ne!(winner.unwrap().outpoint, all[11].outpoint);
}

#[test]
fn arrival_order_does_not_change_the_outcome() {
    let all = nodes(12);
    let chain = chain_for(&all);
    let forward: Vec<&Node> = all.iter().collect();
    let backward: Vec<&Node> = all.iter().rev().collect();
    let mut a = build(&forward, &chain);
    let mut b = build(&backward, &chain);

    let min = PROTOCOL_VERSION;
    for height in [TIP - 50, TIP - 10, TIP] {
        let ranks_a: Vec<Outpoint> = a
            .get_ranks(&chain, height, min, NOW)
            .into_iter()
            .map(|(_, r)| r.outpoint)
            .collect();
        let ranks_b: Vec<Outpoint> = b
            .get_ranks(&chain, height, min, NOW)
            .into_iter()
            .map(|(_, r)| r.outpoint)
            .collect();
        assert_eq!(ranks_a, ranks_b);

        let current_a = a.get_current(&chain, height, min, NOW).map(|r| r.outpoint);
        let current_b = b.get_current(&chain, height, min, NOW).map(|r| r.outpoint);
        assert_eq!(current_a, current_b);
        assert_eq!(current_a, Some(ranks_a[0]));
    }

    let votes = PaymentVotes::new();
    let next_a = a.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    let next_b = b.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    assert_eq!(
        next_a.0.map(|r| r.outpoint),
        next_b.0.map(|r| r.outpoint)
    );
}

#[test]
fn rank_matches_score_order() {
    let all = nodes(6);
    let chain = chain_for(&all);
    let mut reg = build(&all.iter().collect::<Vec<_>>(), &chain);
    let block = chain.block_hash(TIP).unwrap();

    let mut scored: Vec<(Hash256, Outpoint)> = all
        .iter()
        .map(|n| (calculate_score(&n.outpoint, &block), n.outpoint))
        .collect();
    scored.sort_by(|x, y| y.0.cmp(&x.0));

    for (i, (_, outpoint)) in scored.iter().enumerate() {
        let rank = reg.get_rank(outpoint, &chain, TIP, PROTOCOL_VERSION, true, NOW);
        assert_eq!(rank, Some(i + 1));
        let by_rank = reg.get_by_rank(i + 1, &chain, TIP, PROTOCOL_VERSION, true, NOW);
        assert_eq!(by_rank.map(|r| r.outpoint), Some(*outpoint));
    }
}

/// Chain whose lock is held whenever one particular collateral is looked up.
struct ContendedChain<'a> {
    inner: &'a MemoryChain,
    contended: Outpoint,
}

impl ChainView for ContendedChain<'_> {
    fn tip_height(&self) -> Option<u32> {
        self.inner.tip_height()
    }

    fn block_hash(&self, height: u32) -> Option<Hash256> {
        self.inner.block_hash(height)
    }

    fn height_of(&self, hash: &Hash256) -> Result<Option<u32>, ChainUnavailable> {
        self.inner.height_of(hash)
    }

    fn block_time(&self, height: u32) -> Option<i64> {
        self.inner.block_time(height)
    }

    fn collateral(&self, outpoint: &Outpoint) -> Result<CollateralInfo, ChainUnavailable> {
        if *outpoint == self.contended {
            return Err(ChainUnavailable::Busy);
        }
        self.inner.collateral(outpoint)
    }
}

#[test]
fn busy_chain_never_elects_a_different_payee() {
    let all = nodes(12);
    let chain = chain_for(&all);
    let mut reg = build(&all.iter().collect::<Vec<_>>(), &chain);
    let votes = PaymentVotes::new();

    let (calm, count) = reg.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    assert_eq!(count, 12);
    let calm = calm.unwrap().outpoint;

    for n in &all {
        let contended = ContendedChain {
            inner: &chain,
            contended: n.outpoint,
        };
        assert_eq!(
            reg.next_in_queue(&contended, &votes, TIP + 1, true, NOW),
            Err(ChainUnavailable::Busy)
        );
    }

    // once the lock is free the answer is unchanged
    let (again, _) = reg.next_in_queue(&chain, &votes, TIP + 1, true, NOW).unwrap();
    assert_eq!(again.map(|r| r.outpoint), Some(calm));
}
