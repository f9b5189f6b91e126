//! Core value types shared by every registry module.
//!
//! [`Hash256`] is a 256-bit unsigned integer stored little-endian (byte 0
//! is least significant), matching how chain hashes are compared and
//! subtracted during payee scoring.

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Timing constants (seconds) ───────────────────────────────────────

/// Confirmations the collateral output needs before a record is accepted.
pub const MIN_CONFIRMATIONS: u32 = 15;

/// Minimum spacing between two accepted pings for the same record.
pub const MIN_PING_SECONDS: i64 = 10 * 60;

/// Minimum spacing between two accepted announcements for the same record.
pub const MIN_BROADCAST_SECONDS: i64 = 5 * 60;

/// How often the local node re-broadcasts its ping.
pub const PING_SECONDS: i64 = 5 * 60;

/// No ping within this window: record is EXPIRED.
pub const EXPIRATION_SECONDS: i64 = 120 * 60;

/// No ping within this window: record is REMOVE (purge-eligible).
pub const REMOVAL_SECONDS: i64 = 130 * 60;

/// Per-record state recomputation throttle.
pub const CHECK_SECONDS: i64 = 5;

/// Records younger than this are skipped by ranking when payment
/// enforcement is active. Must stay above [`REMOVAL_SECONDS`].
pub const WINNER_MINIMUM_AGE: i64 = 8000;

/// Clock skew tolerated for signature times in the future.
pub const MAX_FUTURE_SKEW: i64 = 60 * 60;

/// Oldest acceptable ping signature time, relative to now.
pub const MAX_PING_AGE: i64 = 60 * 60;

/// A peer may ask for the full list once per this window.
pub const LIST_REASK_SECONDS: i64 = 3 * 60 * 60;

/// Thirty days, the cap used by `seconds_since_payment`.
pub const MONTH_SECONDS: i64 = 60 * 60 * 24 * 30;

// ── Chain constants ──────────────────────────────────────────────────

/// Base units per coin.
pub const COIN: i64 = 100_000_000;

/// Exact collateral a service node locks.
pub const COLLATERAL: i64 = 10_000 * COIN;

/// Pings anchor to the block this many blocks behind the signer's tip.
pub const PING_ANCHOR_DEPTH: u32 = 12;

/// A ping anchor further than this behind our tip is refused.
pub const PING_ANCHOR_MAX_DEPTH: u32 = 24;

/// Blocks ahead of the tip checked by `is_scheduled`.
pub const PAYMENT_LOOKAHEAD: u32 = 8;

/// Votes a block payee needs before `last_paid` trusts it.
pub const LAST_PAID_MIN_VOTES: u32 = 2;

/// Current wall-clock time in unix seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ── Hash256 ──────────────────────────────────────────────────────────

/// A 256-bit little-endian unsigned integer (block hashes, message hashes, scores).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// `self + n`, wrapping at 2^256.
    pub fn add_u32(&self, n: u32) -> Self {
        let mut out = self.0;
        let mut carry = n as u64;
        for byte in out.iter_mut() {
            if carry == 0 {
                break;
            }
            let sum = *byte as u64 + (carry & 0xff);
            *byte = sum as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        Self(out)
    }

    /// `self - other`, wrapping at 2^256.
    pub fn wrapping_sub(&self, other: &Hash256) -> Self {
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for (i, slot) in out.iter_mut().enumerate() {
            let mut diff = self.0[i] as i16 - other.0[i] as i16 - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            *slot = diff as u8;
        }
        Self(out)
    }

    /// `|self - other|`.
    pub fn abs_diff(&self, other: &Hash256) -> Self {
        if self >= other {
            self.wrapping_sub(other)
        } else {
            other.wrapping_sub(self)
        }
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u32 {
        for i in (0..32).rev() {
            if self.0[i] != 0 {
                return i as u32 * 8 + (8 - self.0[i].leading_zeros());
            }
        }
        0
    }

    /// Compact "nBits" encoding: one size byte plus a 23-bit mantissa.
    pub fn compact(&self) -> u32 {
        let mut size = self.bits().div_ceil(8);
        let mut compact: u32 = if size <= 3 {
            let low = u32::from_le_bytes([self.0[0], self.0[1], self.0[2], 0]);
            low << (8 * (3 - size))
        } else {
            let s = size as usize;
            u32::from_le_bytes([self.0[s - 3], self.0[s - 2], self.0[s - 1], 0])
        };
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        compact | (size << 24)
    }

    /// Big-endian hex, most significant byte first.
    pub fn to_hex(&self) -> String {
        let mut be = self.0;
        be.reverse();
        hex::encode(be)
    }

    /// Parse the big-endian hex produced by [`Hash256::to_hex`].
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes: [u8; 32] = hex::decode(s).ok()?.try_into().ok()?;
        bytes.reverse();
        Some(Self(bytes))
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ── Outpoint ─────────────────────────────────────────────────────────

/// Reference to the collateral output: transaction hash plus output index.
///
/// Primary key of the registry.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub hash: Hash256,
    pub index: u32,
}

impl Outpoint {
    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    /// The "no specific outpoint" sentinel (full-list requests).
    pub fn null() -> Self {
        Self {
            hash: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == u32::MAX
    }

    /// Collateral hash plus index as one integer, the per-node term of the score.
    pub fn as_integer(&self) -> Hash256 {
        self.hash.add_u32(self.index)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        let hex = self.hash.to_hex();
        format!("{}..-{}", &hex[..8], self.index)
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outpoint({}-{})", self.hash.to_hex(), self.index)
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.hash.to_hex(), self.index)
    }
}
