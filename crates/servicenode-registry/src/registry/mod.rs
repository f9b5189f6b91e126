//! The service node table and its gossip bookkeeping.
//!
//! `Registry` is a plain single-owner struct: the runtime wraps it in one
//! mutex so every read and write is serialized. Records are kept in
//! insertion order, which is also the iteration order election tie-breaks
//! depend on.

pub mod effect;
mod handler;
pub mod seen;
mod validate;

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use servicenode_metrics::RegistryMetrics;

use crate::announce::Announcement;
use crate::config::RegistryConfig;
use crate::ping::LivenessProof;
use crate::record::{HealthWindows, NodeRecord, NodeState};
use crate::types::{Outpoint, REMOVAL_SECONDS, WINNER_MINIMUM_AGE};

pub use effect::GossipEffect;
pub use seen::{SeenCache, SeenEntry};

/// Identity of the service node this process operates, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    pub operator_pubkey: Vec<u8>,
    /// Known once our announcement was accepted.
    pub outpoint: Option<Outpoint>,
}

/// Records plus anti-spam and sync bookkeeping.
pub struct Registry {
    pub(crate) config: RegistryConfig,
    pub(crate) windows: HealthWindows,
    pub(crate) records: Vec<NodeRecord>,
    /// Peer IP -> time it may ask for the full list again.
    pub(crate) asked_us_for_list: HashMap<IpAddr, i64>,
    /// Peer IP -> time we may ask it for the full list again.
    pub(crate) we_asked_for_list: HashMap<IpAddr, i64>,
    /// Outpoint -> time we may ask for that single record again.
    pub(crate) we_asked_for_entry: HashMap<Outpoint, i64>,
    pub(crate) seen_announcements: SeenCache<Announcement>,
    pub(crate) seen_pings: SeenCache<LivenessProof>,
    pub(crate) local: Option<LocalNode>,
    pub(crate) metrics: Arc<RegistryMetrics>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_metrics(config, Arc::new(RegistryMetrics::new()))
    }

    pub fn with_metrics(config: RegistryConfig, metrics: Arc<RegistryMetrics>) -> Self {
        let capacity = config.seen_capacity;
        Self {
            config,
            windows: HealthWindows::new(),
            records: Vec::new(),
            asked_us_for_list: HashMap::new(),
            we_asked_for_list: HashMap::new(),
            we_asked_for_entry: HashMap::new(),
            seen_announcements: SeenCache::new(capacity),
            seen_pings: SeenCache::new(capacity),
            local: None,
            metrics,
        }
    }

    /// Override health thresholds (tests).
    pub fn with_windows(mut self, windows: HealthWindows) -> Self {
        self.windows = windows;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    /// Declare the operator key this process runs with.
    pub fn set_local_node(&mut self, operator_pubkey: Vec<u8>, outpoint: Option<Outpoint>) {
        self.local = Some(LocalNode {
            operator_pubkey,
            outpoint,
        });
    }

    pub fn local_node(&self) -> Option<&LocalNode> {
        self.local.as_ref()
    }

    // ── Table ────────────────────────────────────────────────────────

    /// Insert a healthy record unless its outpoint is already present.
    pub fn add(&mut self, record: NodeRecord) -> bool {
        if !record.is_enabled() {
            return false;
        }
        if self.find(&record.outpoint).is_some() {
            return false;
        }
        tracing::debug!(
            "adding service node {} ({} now)",
            record.outpoint.short(),
            self.records.len() + 1
        );
        self.records.push(record);
        true
    }

    pub fn find(&self, outpoint: &Outpoint) -> Option<&NodeRecord> {
        self.records.iter().find(|r| r.outpoint == *outpoint)
    }

    pub fn find_mut(&mut self, outpoint: &Outpoint) -> Option<&mut NodeRecord> {
        self.records.iter_mut().find(|r| r.outpoint == *outpoint)
    }

    pub fn find_by_payee(&self, script: &[u8]) -> Option<&NodeRecord> {
        self.records.iter().find(|r| r.payout_script() == script)
    }

    pub fn find_by_operator(&self, operator_pubkey: &[u8]) -> Option<&NodeRecord> {
        self.records
            .iter()
            .find(|r| r.operator_pubkey == operator_pubkey)
    }

    /// Erase one record. Seen caches are left alone.
    pub fn remove(&mut self, outpoint: &Outpoint) -> bool {
        let Some(pos) = self.records.iter().position(|r| r.outpoint == *outpoint) else {
            return false;
        };
        self.records.remove(pos);
        tracing::debug!(
            "removed service node {} ({} now)",
            outpoint.short(),
            self.records.len()
        );
        true
    }

    /// Re-evaluate every record's state (throttled per record).
    pub fn check(&mut self, now: i64) {
        let windows = self.windows;
        for record in &mut self.records {
            record.check_with(now, false, &windows);
        }
    }

    /// Sweep: purge dead or obsolete records and expire bookkeeping.
    ///
    /// Returns the number of records removed.
    pub fn check_and_remove(&mut self, force_expired: bool, now: i64) -> usize {
        self.check(now);
        let min_protocol = self.config.min_payments_protocol();

        let doomed: Vec<Outpoint> = self
            .records
            .iter()
            .filter(|r| {
                r.state.is_dead()
                    || (force_expired && r.state == NodeState::Expired)
                    || r.protocol_version < min_protocol
            })
            .map(|r| r.outpoint)
            .collect();

        for outpoint in &doomed {
            tracing::debug!("removing inactive service node {}", outpoint.short());
            self.records.retain(|r| r.outpoint != *outpoint);
            // forget its announcements so the node can come back without a fresh one
            self.seen_announcements.remove_outpoint(outpoint);
            self.we_asked_for_entry.remove(outpoint);
        }

        self.asked_us_for_list.retain(|_, t| *t >= now);
        self.we_asked_for_list.retain(|_, t| *t >= now);
        self.we_asked_for_entry.retain(|_, t| *t >= now);

        let cutoff = now - REMOVAL_SECONDS * 2;
        self.seen_announcements.prune_older_than(cutoff);
        self.seen_pings.prune_older_than(cutoff);

        self.metrics.sweeps.inc();
        self.metrics.records_purged.add(doomed.len() as u64);
        doomed.len()
    }

    /// Drop all records and bookkeeping.
    pub fn clear(&mut self) {
        self.records.clear();
        self.asked_us_for_list.clear();
        self.we_asked_for_list.clear();
        self.we_asked_for_entry.clear();
        self.seen_announcements.clear();
        self.seen_pings.clear();
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn seen_announcement_count(&self) -> usize {
        self.seen_announcements.len()
    }

    pub fn seen_ping_count(&self) -> usize {
        self.seen_pings.len()
    }

    /// Whether a message hash is in either seen cache.
    pub fn has_seen(&self, hash: &crate::types::Hash256) -> bool {
        self.seen_announcements.contains(hash) || self.seen_pings.contains(hash)
    }

    // ── Counts ───────────────────────────────────────────────────────

    /// Enabled records at or above `min_protocol` (payments minimum if `None`).
    pub fn count_enabled(&mut self, min_protocol: Option<u32>, now: i64) -> usize {
        let min = min_protocol.unwrap_or_else(|| self.config.min_payments_protocol());
        self.check(now);
        self.records
            .iter()
            .filter(|r| r.protocol_version >= min && r.is_enabled())
            .count()
    }

    /// Enabled records old enough to be paid under enforcement.
    pub fn stable_size(&mut self, now: i64) -> usize {
        let min = self.config.active_protocol_version();
        let enforce = self.config.is_payment_enforcement_active();
        self.check(now);
        self.records
            .iter()
            .filter(|r| r.protocol_version >= min)
            .filter(|r| !enforce || now - r.sig_time >= WINNER_MINIMUM_AGE)
            .filter(|r| r.is_enabled())
            .count()
    }

    /// `(ipv4, ipv6)` record counts at or above `min_protocol`.
    pub fn count_networks(&mut self, min_protocol: Option<u32>, now: i64) -> (usize, usize) {
        let min = min_protocol.unwrap_or_else(|| self.config.min_payments_protocol());
        self.check(now);
        self.records
            .iter()
            .filter(|r| r.protocol_version >= min)
            .fold((0, 0), |(v4, v6), r| match r.addr {
                SocketAddr::V4(_) => (v4 + 1, v6),
                SocketAddr::V6(_) => (v4, v6 + 1),
            })
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service nodes: {}, peers who asked us for the list: {}, peers we asked for the list: {}, entries we asked for: {}",
            self.records.len(),
            self.asked_us_for_list.len(),
            self.we_asked_for_list.len(),
            self.we_asked_for_entry.len()
        )
    }
}
