//! Payment-vote ledger: who the network voted to pay at each height.
//!
//! Votes themselves are gossiped and verified elsewhere; this ledger only
//! tallies accepted votes per block so the election can tell who was paid
//! recently and who is already scheduled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signing::PAYOUT_SCRIPT_LEN;
use crate::types::PAYMENT_LOOKAHEAD;

/// One candidate payee for a block and its vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub script: Vec<u8>,
    pub votes: u32,
}

/// Tallied payees for one block height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayees {
    pub height: u32,
    pub payees: Vec<Payee>,
}

impl BlockPayees {
    pub fn new(height: u32) -> Self {
        Self {
            height,
            payees: Vec::new(),
        }
    }

    pub fn add_payee(&mut self, script: &[u8], increment: u32) {
        if let Some(p) = self.payees.iter_mut().find(|p| p.script == script) {
            p.votes += increment;
            return;
        }
        self.payees.push(Payee {
            script: script.to_vec(),
            votes: increment,
        });
    }

    /// Payee with the most votes; the first one seen wins a tie.
    pub fn payee(&self) -> Option<&[u8]> {
        let mut best: Option<&Payee> = None;
        for p in &self.payees {
            if best.map_or(true, |b| p.votes > b.votes) {
                best = Some(p);
            }
        }
        best.map(|p| p.script.as_slice())
    }

    pub fn has_payee_with_votes(&self, script: &[u8], votes: u32) -> bool {
        self.payees
            .iter()
            .any(|p| p.script == script && p.votes >= votes)
    }

    /// `"<payee>:<votes>, <payee>:<votes>"`, or `"Unknown"` with no votes.
    pub fn required_payments_string(&self) -> String {
        if self.payees.is_empty() {
            return "Unknown".to_string();
        }
        self.payees
            .iter()
            .map(|p| format!("{}:{}", script_label(&p.script), p.votes))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Key id hex for standard scripts, raw script hex otherwise.
fn script_label(script: &[u8]) -> String {
    if script.len() == PAYOUT_SCRIPT_LEN {
        hex::encode(&script[3..23])
    } else {
        hex::encode(script)
    }
}

// ── PaymentVotes ─────────────────────────────────────────────────────

/// Vote tallies for every tracked block height.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentVotes {
    blocks: BTreeMap<u32, BlockPayees>,
}

impl PaymentVotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `increment` votes for `script` at `height`.
    pub fn add_payee(&mut self, height: u32, script: &[u8], increment: u32) {
        self.blocks
            .entry(height)
            .or_insert_with(|| BlockPayees::new(height))
            .add_payee(script, increment);
    }

    pub fn block(&self, height: u32) -> Option<&BlockPayees> {
        self.blocks.get(&height)
    }

    pub fn block_payee(&self, height: u32) -> Option<&[u8]> {
        self.blocks.get(&height)?.payee()
    }

    pub fn has_payee_with_votes(&self, height: u32, script: &[u8], votes: u32) -> bool {
        self.blocks
            .get(&height)
            .is_some_and(|b| b.has_payee_with_votes(script, votes))
    }

    pub fn required_payments_string(&self, height: u32) -> String {
        self.blocks
            .get(&height)
            .map_or_else(|| "Unknown".to_string(), BlockPayees::required_payments_string)
    }

    /// Whether `script` is the voted payee anywhere in
    /// `tip..=tip + PAYMENT_LOOKAHEAD`, ignoring `not_height`.
    pub fn is_scheduled(&self, script: &[u8], tip: u32, not_height: u32) -> bool {
        (tip..=tip.saturating_add(PAYMENT_LOOKAHEAD))
            .filter(|h| *h != not_height)
            .any(|h| self.block_payee(h) == Some(script))
    }

    /// Drop tallies below `height`.
    pub fn prune_below(&mut self, height: u32) {
        self.blocks = self.blocks.split_off(&height);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(n: u8) -> Vec<u8> {
        let mut s = vec![0x76, 0xa9, 0x14];
        s.extend_from_slice(&[n; 20]);
        s.extend_from_slice(&[0x88, 0xac]);
        s
    }

    #[test]
    fn votes_accumulate_per_script() {
        let mut v = PaymentVotes::new();
        v.add_payee(10, &script(1), 1);
        v.add_payee(10, &script(1), 2);
        v.add_payee(10, &script(2), 1);
        assert!(v.has_payee_with_votes(10, &script(1), 3));
        assert!(!v.has_payee_with_votes(10, &script(2), 2));
        assert_eq!(v.block_payee(10), Some(script(1).as_slice()));
    }

    #[test]
    fn first_payee_wins_ties() {
        let mut b = BlockPayees::new(1);
        b.add_payee(&script(4), 2);
        b.add_payee(&script(5), 2);
        assert_eq!(b.payee(), Some(script(4).as_slice()));
    }

    #[test]
    fn scheduled_window_excludes_not_height() {
        let mut v = PaymentVotes::new();
        v.add_payee(105, &script(1), 6);
        assert!(v.is_scheduled(&script(1), 100, 0));
        assert!(!v.is_scheduled(&script(1), 100, 105));
        assert!(!v.is_scheduled(&script(1), 96, 0));
        assert!(v.is_scheduled(&script(1), 97, 0));
    }

    #[test]
    fn payments_string() {
        let mut v = PaymentVotes::new();
        assert_eq!(v.required_payments_string(3), "Unknown");
        v.add_payee(3, &script(0xab), 4);
        assert_eq!(
            v.required_payments_string(3),
            format!("{}:4", "ab".repeat(20))
        );
    }

    #[test]
    fn prune_keeps_recent_heights() {
        let mut v = PaymentVotes::new();
        for h in 1..=5 {
            v.add_payee(h, &script(1), 1);
        }
        v.prune_below(4);
        assert_eq!(v.len(), 2);
        assert!(v.block(3).is_none());
        assert!(v.block(4).is_some());
    }
}
