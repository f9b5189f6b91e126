//! Liveness proofs ("pings").
//!
//! A ping proves a service node is online and following the chain: it is
//! anchored to a block hash [`PING_ANCHOR_DEPTH`] blocks behind the signer's
//! tip and signed with the node's operator key. Validation against the
//! registry lives in `registry::validate`.

use serde::{Deserialize, Serialize};

use crate::chain::ChainView;
use crate::error::ValidationError;
use crate::hash::HashWriter;
use crate::signing::{SignatureDomain, SignedMessage};
use crate::types::{Hash256, Outpoint, MAX_FUTURE_SKEW, MAX_PING_AGE, PING_ANCHOR_DEPTH};

/// Signed "still alive" message for one collateral outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessProof {
    pub outpoint: Outpoint,
    /// Hash of a block shortly behind the signer's tip.
    pub anchor_block_hash: Hash256,
    pub sig_time: i64,
    pub signature: Vec<u8>,
    pub domain: SignatureDomain,
}

impl LivenessProof {
    /// Unsigned ping.
    pub fn new(outpoint: Outpoint, anchor_block_hash: Hash256, sig_time: i64) -> Self {
        Self {
            outpoint,
            anchor_block_hash,
            sig_time,
            signature: Vec::new(),
            domain: SignatureDomain::HashDigest,
        }
    }

    /// Signed ping anchored [`PING_ANCHOR_DEPTH`] blocks behind the tip.
    ///
    /// `None` while the chain is too short to anchor.
    pub fn create(
        outpoint: Outpoint,
        chain: &dyn ChainView,
        sig_time: i64,
        operator_secret: &[u8; 32],
    ) -> Option<Self> {
        let tip = chain.tip_height()?;
        if tip <= PING_ANCHOR_DEPTH {
            return None;
        }
        let anchor = chain.block_hash(tip - PING_ANCHOR_DEPTH)?;
        let mut ping = Self::new(outpoint, anchor, sig_time);
        ping.sign(operator_secret);
        Some(ping)
    }

    /// Seen-cache key. The anchor is only committed in the hash domain.
    pub fn hash(&self) -> Hash256 {
        let w = HashWriter::new().write_outpoint(&self.outpoint);
        let w = match self.domain {
            SignatureDomain::HashDigest => w.write_hash(&self.anchor_block_hash),
            SignatureDomain::LegacyString => w,
        };
        w.write_i64(self.sig_time).finish()
    }

    /// Clock checks that need no registry state.
    pub fn check_timing(&self, now: i64) -> Result<(), ValidationError> {
        if self.sig_time > now + MAX_FUTURE_SKEW {
            tracing::debug!(
                "ping {}: signature too far into the future",
                self.outpoint.short()
            );
            return Err(ValidationError::FutureTimestamp {
                sig_time: self.sig_time,
                now,
            });
        }
        if self.sig_time <= now - MAX_PING_AGE {
            tracing::debug!(
                "ping {}: signature too far into the past ({} vs {now})",
                self.outpoint.short(),
                self.sig_time
            );
            return Err(ValidationError::PastTimestamp {
                sig_time: self.sig_time,
                now,
            });
        }
        Ok(())
    }
}

impl SignedMessage for LivenessProof {
    fn signature_hash(&self) -> Hash256 {
        self.hash()
    }

    fn legacy_message(&self) -> String {
        format!(
            "{}{}{}",
            self.outpoint,
            self.anchor_block_hash.to_hex(),
            self.sig_time
        )
    }

    fn signature_domain(&self) -> SignatureDomain {
        self.domain
    }

    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>, domain: SignatureDomain) {
        self.signature = signature;
        self.domain = domain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::signing::{public_key, sign_message};

    fn outpoint(n: u8) -> Outpoint {
        Outpoint::new(Hash256([n; 32]), 0)
    }

    #[test]
    fn create_anchors_twelve_behind_tip() {
        let chain = MemoryChain::new(100, 0, 60);
        let ping = LivenessProof::create(outpoint(1), &chain, 5_000, &[1u8; 32]).unwrap();
        assert_eq!(Some(ping.anchor_block_hash), chain.block_hash(88));
        assert!(ping.verify(&public_key(&[1u8; 32])));
    }

    #[test]
    fn create_needs_a_deep_enough_chain() {
        let chain = MemoryChain::new(12, 0, 60);
        assert!(LivenessProof::create(outpoint(1), &chain, 5_000, &[1u8; 32]).is_none());
    }

    #[test]
    fn legacy_hash_ignores_anchor() {
        let mut a = LivenessProof::new(outpoint(2), Hash256([1; 32]), 10);
        let mut b = LivenessProof::new(outpoint(2), Hash256([2; 32]), 10);
        assert_ne!(a.hash(), b.hash());
        a.domain = SignatureDomain::LegacyString;
        b.domain = SignatureDomain::LegacyString;
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn legacy_signature_verifies() {
        let seed = [5u8; 32];
        let mut ping = LivenessProof::new(outpoint(3), Hash256([9; 32]), 77);
        let sig = sign_message(&ping.legacy_message(), &seed);
        ping.set_signature(sig, SignatureDomain::LegacyString);
        assert!(ping.verify(&public_key(&seed)));
    }

    #[test]
    fn timing_boundaries() {
        let now = 100_000;
        let at = |t| LivenessProof::new(outpoint(4), Hash256::ZERO, t);
        assert!(at(now + MAX_FUTURE_SKEW).check_timing(now).is_ok());
        assert!(at(now + MAX_FUTURE_SKEW + 1).check_timing(now).is_err());
        assert!(at(now - MAX_PING_AGE + 1).check_timing(now).is_ok());
        assert_eq!(
            at(now - MAX_PING_AGE).check_timing(now).unwrap_err().misbehavior(),
            1
        );
    }
}
