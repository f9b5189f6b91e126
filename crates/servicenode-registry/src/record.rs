//! Service node records and their health state.
//!
//! State is decided by the pure [`compute_state`] and written back by
//! [`NodeRecord::check`]; the decision never mutates anything.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::announce::Announcement;
use crate::ping::LivenessProof;
use crate::signing::{self, SignatureDomain, SignedMessage};
use crate::types::{Outpoint, CHECK_SECONDS, EXPIRATION_SECONDS, MIN_PING_SECONDS, REMOVAL_SECONDS};

/// Health of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Announced, but pinging for less than the minimum ping interval.
    #[default]
    PreEnabled,
    Enabled,
    /// No ping within the expiration window.
    Expired,
    /// No ping within the removal window; purged by the next sweep.
    Remove,
    WatchdogExpired,
    PoseBan,
    /// Collateral spent. Frozen until purged.
    VinSpent,
    PosError,
    /// Not in the table. Only reported by lookups.
    Missing,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::PreEnabled => "PRE_ENABLED",
            NodeState::Enabled => "ENABLED",
            NodeState::Expired => "EXPIRED",
            NodeState::Remove => "REMOVE",
            NodeState::WatchdogExpired => "WATCHDOG_EXPIRED",
            NodeState::PoseBan => "POSE_BAN",
            NodeState::VinSpent => "VIN_SPENT",
            NodeState::PosError => "POS_ERROR",
            NodeState::Missing => "MISSING",
        }
    }

    /// Dead states purged on every sweep.
    pub fn is_dead(&self) -> bool {
        matches!(self, NodeState::Remove | NodeState::VinSpent)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Health windows ───────────────────────────────────────────────────

/// Time thresholds used by [`compute_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthWindows {
    pub removal: i64,
    pub expiration: i64,
    pub min_ping: i64,
}

impl HealthWindows {
    pub fn new() -> Self {
        Self {
            removal: REMOVAL_SECONDS,
            expiration: EXPIRATION_SECONDS,
            min_ping: MIN_PING_SECONDS,
        }
    }

    /// Custom thresholds, mostly for tests.
    pub fn with_thresholds(removal: i64, expiration: i64, min_ping: i64) -> Self {
        Self {
            removal,
            expiration,
            min_ping,
        }
    }
}

impl Default for HealthWindows {
    fn default() -> Self {
        Self::new()
    }
}

/// Decide a record's state at `now`. Pure.
pub fn compute_state(record: &NodeRecord, now: i64, windows: &HealthWindows) -> NodeState {
    if record.state == NodeState::VinSpent {
        return NodeState::VinSpent;
    }
    if !record.is_pinged_within(windows.removal, now) {
        return NodeState::Remove;
    }
    if !record.is_pinged_within(windows.expiration, now) {
        return NodeState::Expired;
    }
    let ping_time = record.last_ping.as_ref().map_or(0, |p| p.sig_time);
    if ping_time - record.sig_time < windows.min_ping {
        return NodeState::PreEnabled;
    }
    NodeState::Enabled
}

// ── NodeRecord ───────────────────────────────────────────────────────

/// One service node as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: Vec<u8>,
    pub operator_pubkey: Vec<u8>,
    pub protocol_version: u32,
    /// Signature time of the announcement that introduced or last updated it.
    pub sig_time: i64,
    pub signature: Vec<u8>,
    pub domain: SignatureDomain,
    pub last_ping: Option<LivenessProof>,
    pub state: NodeState,
    /// Local check throttle, not shared.
    #[serde(skip)]
    pub last_checked_at: i64,
}

impl NodeRecord {
    pub fn from_announcement(a: &Announcement) -> Self {
        Self {
            outpoint: a.outpoint,
            addr: a.addr,
            collateral_pubkey: a.collateral_pubkey.clone(),
            operator_pubkey: a.operator_pubkey.clone(),
            protocol_version: a.protocol_version,
            sig_time: a.sig_time,
            signature: a.signature.clone(),
            domain: a.domain,
            last_ping: a.last_ping.clone(),
            state: NodeState::Enabled,
            last_checked_at: 0,
        }
    }

    /// Replace identity fields from a strictly newer announcement.
    ///
    /// The embedded ping is adopted only if it carries a valid operator
    /// signature and does not move the ping time backwards. Returns `false`
    /// (and changes nothing) for older-or-equal announcements.
    pub fn update_from_announcement(&mut self, a: &Announcement) -> bool {
        if a.sig_time <= self.sig_time {
            return false;
        }
        self.operator_pubkey = a.operator_pubkey.clone();
        self.collateral_pubkey = a.collateral_pubkey.clone();
        self.sig_time = a.sig_time;
        self.signature = a.signature.clone();
        self.domain = a.domain;
        self.protocol_version = a.protocol_version;
        self.addr = a.addr;
        self.last_checked_at = 0;
        if let Some(ping) = &a.last_ping {
            let newer = self
                .last_ping
                .as_ref()
                .map_or(true, |current| ping.sig_time >= current.sig_time);
            if newer && ping.outpoint == self.outpoint && ping.verify(&self.operator_pubkey) {
                self.last_ping = Some(ping.clone());
            }
        }
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.state == NodeState::Enabled
    }

    /// Whether the last ping is less than `seconds` old at `now`.
    pub fn is_pinged_within(&self, seconds: i64, now: i64) -> bool {
        self.last_ping
            .as_ref()
            .is_some_and(|p| now - p.sig_time < seconds)
    }

    /// Whether the announcement is less than `seconds` old at `now`.
    pub fn is_broadcast_within(&self, seconds: i64, now: i64) -> bool {
        now - self.sig_time < seconds
    }

    /// Recompute and store the state, at most once per [`CHECK_SECONDS`]
    /// unless `force`.
    pub fn check(&mut self, now: i64, force: bool) {
        self.check_with(now, force, &HealthWindows::new());
    }

    pub fn check_with(&mut self, now: i64, force: bool, windows: &HealthWindows) {
        if !force && now - self.last_checked_at < CHECK_SECONDS {
            return;
        }
        self.last_checked_at = now;
        let next = compute_state(self, now, windows);
        if next != self.state {
            tracing::debug!(
                "service node {} {} -> {}",
                self.outpoint.short(),
                self.state,
                next
            );
        }
        self.state = next;
    }

    /// Hook for the external spent-collateral detector.
    pub fn mark_collateral_spent(&mut self) {
        self.state = NodeState::VinSpent;
    }

    pub fn payout_script(&self) -> Vec<u8> {
        signing::payout_script(&self.collateral_pubkey)
    }

    pub fn last_ping_time(&self) -> i64 {
        self.last_ping.as_ref().map_or(0, |p| p.sig_time)
    }
}
