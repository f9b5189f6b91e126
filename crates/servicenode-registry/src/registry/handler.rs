//! Inbound gossip dispatch.
//!
//! Pure with respect to I/O: every handler returns the effects the
//! runtime must execute (sends, relays, peer penalties, sync progress).

use std::net::SocketAddr;

use crate::announce::Announcement;
use crate::chain::ChainView;
use crate::config::is_rfc1918;
use crate::error::ValidationError;
use crate::ping::LivenessProof;
use crate::types::{Hash256, Outpoint, LIST_REASK_SECONDS, MIN_PING_SECONDS};
use crate::wire::{GossipMessage, SyncItem};

use super::{GossipEffect, Registry};

/// Penalty for asking for the full list again inside the re-ask window.
const LIST_REASK_SCORE: u32 = 34;

fn is_local_peer(peer: &SocketAddr) -> bool {
    is_rfc1918(peer) || peer.ip().is_loopback()
}

impl Registry {
    /// Handle one message from `peer`. Nothing happens until the chain is synced.
    pub fn process_message(
        &mut self,
        peer: SocketAddr,
        message: GossipMessage,
        chain: &dyn ChainView,
        now: i64,
    ) -> Vec<GossipEffect> {
        if !chain.is_synced() {
            return Vec::new();
        }
        match message {
            GossipMessage::Announce(a) => self.handle_announce(peer, a, chain, now),
            GossipMessage::Ping(p) => self.handle_ping(peer, p, chain, now),
            GossipMessage::GetList(outpoint) => self.handle_get_list(peer, outpoint, now),
            GossipMessage::SyncStatusCount { item, count } => {
                tracing::debug!("peer {peer} reports {count} {item:?} entries");
                Vec::new()
            }
        }
    }

    fn handle_announce(
        &mut self,
        peer: SocketAddr,
        a: Announcement,
        chain: &dyn ChainView,
        now: i64,
    ) -> Vec<GossipEffect> {
        let hash = a.hash();
        if !self.seen_announcements.insert(hash, a.clone()) {
            self.metrics.announcements_duplicate.inc();
            return vec![GossipEffect::SyncProgress(hash)];
        }

        let mut effects = match self.check_and_update(&a, now) {
            Ok(effects) => effects,
            Err(e) => return self.reject_announcement(peer, hash, e),
        };

        match self.check_inputs_and_add(&a, chain, now) {
            Ok(more) => {
                self.metrics.announcements_accepted.inc();
                effects.extend(more);
                effects.push(GossipEffect::AddPeerAddress(a.addr));
                effects.push(GossipEffect::SyncProgress(hash));
            }
            Err(e) => {
                tracing::debug!("rejected service node entry {}: {e}", a.outpoint.short());
                effects.extend(self.reject_announcement(peer, hash, e));
            }
        }
        effects
    }

    fn reject_announcement(
        &mut self,
        peer: SocketAddr,
        hash: Hash256,
        e: ValidationError,
    ) -> Vec<GossipEffect> {
        self.metrics.announcements_rejected.inc();
        if e.is_retryable() {
            // let a later delivery try again
            self.seen_announcements.remove(&hash);
        }
        self.penalize(peer, &e).into_iter().collect()
    }

    fn penalize(&self, peer: SocketAddr, e: &ValidationError) -> Option<GossipEffect> {
        let score = e.misbehavior();
        if score == 0 {
            return None;
        }
        tracing::warn!("peer {peer} misbehaving ({score}): {e}");
        self.metrics.misbehavior_points.add(score as u64);
        Some(GossipEffect::Misbehaving { peer, score })
    }

    fn handle_ping(
        &mut self,
        peer: SocketAddr,
        ping: LivenessProof,
        chain: &dyn ChainView,
        now: i64,
    ) -> Vec<GossipEffect> {
        let hash = ping.hash();
        if !self.seen_pings.insert(hash, ping.clone()) {
            return Vec::new();
        }

        let e = match self.check_ping(&ping, chain, now, true) {
            Ok(effects) => {
                self.metrics.pings_accepted.inc();
                return effects;
            }
            Err(e) => e,
        };

        self.metrics.pings_rejected.inc();
        if e.is_retryable() {
            self.seen_pings.remove(&hash);
        }

        let mut effects = Vec::new();
        match self.penalize(peer, &e) {
            Some(penalty) => effects.push(penalty),
            // harmless failure for a record we know, no need to ask
            None if self.find(&ping.outpoint).is_some() => return effects,
            None => {}
        }
        effects.extend(self.ask_for_entry(peer, ping.outpoint, now));
        effects
    }

    /// Ask `peer` for one record, at most once per [`MIN_PING_SECONDS`] per outpoint.
    pub fn ask_for_entry(
        &mut self,
        peer: SocketAddr,
        outpoint: Outpoint,
        now: i64,
    ) -> Vec<GossipEffect> {
        if self
            .we_asked_for_entry
            .get(&outpoint)
            .is_some_and(|until| now < *until)
        {
            return Vec::new();
        }
        tracing::debug!("asking {peer} for missing entry {}", outpoint.short());
        self.we_asked_for_entry
            .insert(outpoint, now + MIN_PING_SECONDS);
        self.metrics.entry_requests.inc();
        vec![GossipEffect::Send {
            peer,
            message: GossipMessage::GetList(outpoint),
        }]
    }

    /// Answer a list request: one record, or every enabled routable record
    /// followed by a count.
    fn handle_get_list(
        &mut self,
        peer: SocketAddr,
        outpoint: Outpoint,
        now: i64,
    ) -> Vec<GossipEffect> {
        let full = outpoint.is_null();
        if full && !is_local_peer(&peer) && self.config.params().rate_limits_list_requests() {
            let ip = peer.ip();
            if self.asked_us_for_list.get(&ip).is_some_and(|until| now < *until) {
                tracing::warn!("peer {peer} already asked for the list");
                self.metrics.misbehavior_points.add(LIST_REASK_SCORE as u64);
                return vec![GossipEffect::Misbehaving {
                    peer,
                    score: LIST_REASK_SCORE,
                }];
            }
            self.asked_us_for_list.insert(ip, now + LIST_REASK_SECONDS);
        }

        let mut effects = Vec::new();
        let served: Vec<Announcement> = self
            .records
            .iter()
            .filter(|r| !is_rfc1918(&r.addr) && r.is_enabled())
            .filter(|r| full || r.outpoint == outpoint)
            .map(Announcement::from_record)
            .collect();

        for a in served {
            self.seen_announcements.insert(a.hash(), a.clone());
            effects.push(GossipEffect::Send {
                peer,
                message: GossipMessage::Announce(a),
            });
            if !full {
                tracing::debug!("sent 1 service node entry to {peer}");
                return effects;
            }
        }

        if full {
            self.metrics.list_requests_served.inc();
            let count = effects.len() as u32;
            tracing::debug!("sent {count} service node entries to {peer}");
            effects.push(GossipEffect::Send {
                peer,
                message: GossipMessage::SyncStatusCount {
                    item: SyncItem::ServiceNodeList,
                    count,
                },
            });
        }
        effects
    }

    /// Ask `peer` for its full table, at most once per
    /// [`LIST_REASK_SECONDS`] on networks that rate limit.
    pub fn request_full_list(&mut self, peer: SocketAddr, now: i64) -> Vec<GossipEffect> {
        let ip = peer.ip();
        if self.config.params().rate_limits_list_requests()
            && !is_local_peer(&peer)
            && self.we_asked_for_list.get(&ip).is_some_and(|until| now < *until)
        {
            tracing::debug!("already asked {peer} for the list, skipping");
            return Vec::new();
        }
        self.we_asked_for_list.insert(ip, now + LIST_REASK_SECONDS);
        vec![GossipEffect::Send {
            peer,
            message: GossipMessage::GetList(Outpoint::null()),
        }]
    }

    /// Apply our own freshly signed announcement without network checks.
    pub fn update_from_local_announcement(&mut self, a: &Announcement) -> Vec<GossipEffect> {
        let hash = a.hash();
        if let Some(ping) = &a.last_ping {
            self.seen_pings.insert(ping.hash(), ping.clone());
        }
        self.seen_announcements.insert(hash, a.clone());
        tracing::debug!("local announcement for {}", a.outpoint.short());

        match self.find_mut(&a.outpoint) {
            Some(record) => {
                record.update_from_announcement(a);
            }
            None => {
                self.add(crate::record::NodeRecord::from_announcement(a));
            }
        }
        vec![GossipEffect::SyncProgress(hash)]
    }
}
