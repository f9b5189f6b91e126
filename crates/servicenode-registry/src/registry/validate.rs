//! Announcement and ping validation against the current table.
//!
//! Every check returns `Err(ValidationError)` instead of a flag plus an
//! out-parameter; the handler turns the error into peer scoring and seen
//! cache maintenance.

use crate::announce::Announcement;
use crate::chain::ChainView;
use crate::error::ValidationError;
use crate::ping::LivenessProof;
use crate::record::NodeRecord;
use crate::signing::{SignedMessage, PAYOUT_SCRIPT_LEN};
use crate::types::{
    COLLATERAL, MAX_FUTURE_SKEW, MIN_BROADCAST_SECONDS, MIN_CONFIRMATIONS, MIN_PING_SECONDS,
    PING_ANCHOR_MAX_DEPTH,
};
use crate::wire::GossipMessage;

use super::{GossipEffect, Registry};

/// Bad announcement signatures from current protocols.
const BAD_SIGNATURE_SCORE: u32 = 100;

impl Registry {
    // ── Pings ────────────────────────────────────────────────────────

    /// Validate a standalone ping and apply it to its record.
    ///
    /// On success the record's proof is replaced, the seen copy of its
    /// announcement is refreshed and the ping is relayed.
    pub fn check_ping(
        &mut self,
        ping: &LivenessProof,
        chain: &dyn ChainView,
        now: i64,
        require_enabled: bool,
    ) -> Result<Vec<GossipEffect>, ValidationError> {
        ping.check_timing(now)?;

        let min_protocol = self.config.min_payments_protocol();
        let windows = self.windows;
        let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.outpoint == ping.outpoint && r.protocol_version >= min_protocol)
        else {
            tracing::debug!(
                "ping {}: no compatible service node entry",
                ping.outpoint.short()
            );
            return Err(ValidationError::UnknownNode(ping.outpoint));
        };

        if require_enabled && !record.is_enabled() {
            return Err(ValidationError::NotEnabled(ping.outpoint));
        }

        // also rejects pings older than the current one
        if record.is_pinged_within(MIN_PING_SECONDS - 60, ping.sig_time) {
            tracing::debug!("ping {}: arrived too early", ping.outpoint.short());
            return Err(ValidationError::TooEarly);
        }

        if !ping.verify(&record.operator_pubkey) {
            return Err(ValidationError::BadPingSignature);
        }

        let Some(anchor_height) = chain.height_of(&ping.anchor_block_hash)? else {
            tracing::debug!(
                "ping {}: anchor block {} not known",
                ping.outpoint.short(),
                ping.anchor_block_hash
            );
            return Err(ValidationError::UnknownAnchor);
        };
        let tip = chain.tip_height().unwrap_or(0);
        let depth = tip.saturating_sub(anchor_height);
        if depth > PING_ANCHOR_MAX_DEPTH {
            // the record stays visible, only this ping is refused
            return Err(ValidationError::StaleAnchor { depth });
        }

        record.last_ping = Some(ping.clone());
        record.check_with(now, true, &windows);
        let enabled = record.is_enabled();
        let seen_key = Announcement::from_record(record).hash();

        if let Some(seen) = self.seen_announcements.get_mut(&seen_key) {
            seen.last_ping = Some(ping.clone());
        }

        if !enabled {
            return Err(ValidationError::NotEnabled(ping.outpoint));
        }

        tracing::debug!("ping {}: accepted", ping.outpoint.short());
        Ok(vec![GossipEffect::Relay(GossipMessage::Ping(ping.clone()))])
    }

    /// Timing and signature checks for the ping embedded in an announcement.
    ///
    /// The proof must belong to the announced outpoint and be signed by
    /// the announced operator key. Nothing is mutated.
    fn check_embedded_ping(&self, a: &Announcement, now: i64) -> Result<(), ValidationError> {
        let ping = a.last_ping.as_ref().ok_or(ValidationError::MissingPing)?;
        let wrap = |e: ValidationError| ValidationError::InvalidPing(Box::new(e));
        ping.check_timing(now).map_err(wrap)?;
        if ping.outpoint != a.outpoint || !ping.verify(&a.operator_pubkey) {
            return Err(wrap(ValidationError::BadPingSignature));
        }
        Ok(())
    }

    // ── Announcements ────────────────────────────────────────────────

    /// Stateless checks plus the update path for known records.
    ///
    /// `Ok` with no effects means either "new record, continue with
    /// [`Registry::check_inputs_and_add`]" or "known record, nothing to
    /// update". An accepted update relays the announcement.
    pub fn check_and_update(
        &mut self,
        a: &Announcement,
        now: i64,
    ) -> Result<Vec<GossipEffect>, ValidationError> {
        if a.sig_time > now + MAX_FUTURE_SKEW {
            tracing::debug!(
                "announcement {}: signature too far into the future",
                a.outpoint.short()
            );
            return Err(ValidationError::FutureTimestamp {
                sig_time: a.sig_time,
                now,
            });
        }

        self.check_embedded_ping(a, now)?;

        let minimum = self.config.min_payments_protocol();
        if a.protocol_version < minimum {
            tracing::debug!(
                "announcement {}: outdated protocol {}",
                a.outpoint.short(),
                a.protocol_version
            );
            return Err(ValidationError::ObsoleteProtocol {
                version: a.protocol_version,
                minimum,
            });
        }

        if a.collateral_script().len() != PAYOUT_SCRIPT_LEN
            || a.operator_script().len() != PAYOUT_SCRIPT_LEN
        {
            return Err(ValidationError::MalformedKey);
        }

        if !a.script_sig.is_empty() {
            tracing::debug!(
                "announcement {}: non-empty script_sig",
                a.outpoint.short()
            );
            return Err(ValidationError::NonEmptyScriptSig);
        }

        if !a.verify(&a.collateral_pubkey) {
            // older nodes signed with a broken format
            let score = if a.protocol_version < self.config.signing_fix_protocol() {
                0
            } else {
                BAD_SIGNATURE_SCORE
            };
            tracing::warn!("announcement {}: bad signature", a.outpoint.short());
            return Err(ValidationError::BadSignature { score });
        }

        let expected = self.config.params().default_port;
        if a.addr.port() != expected {
            return Err(ValidationError::WrongPort {
                port: a.addr.port(),
                expected,
            });
        }

        let windows = self.windows;
        let Some(record) = self.records.iter_mut().find(|r| r.outpoint == a.outpoint) else {
            return Ok(Vec::new());
        };

        if record.sig_time >= a.sig_time {
            // duplicates are filtered by the seen cache before we get here
            tracing::error!(
                "announcement {} at {} is not newer than the existing record ({})",
                a.outpoint,
                a.sig_time,
                record.sig_time
            );
            return Err(ValidationError::NotNewer {
                incoming: a.sig_time,
                existing: record.sig_time,
            });
        }

        if !record.is_enabled() {
            return Ok(Vec::new());
        }

        let mut effects = Vec::new();
        if record.collateral_pubkey == a.collateral_pubkey
            && !record.is_broadcast_within(MIN_BROADCAST_SECONDS, now)
        {
            tracing::debug!("announcement {}: updated entry", a.outpoint.short());
            if record.update_from_announcement(a) {
                record.check_with(now, true, &windows);
                if record.is_enabled() {
                    effects.push(GossipEffect::Relay(GossipMessage::Announce(a.clone())));
                }
            }
        }
        Ok(effects)
    }

    /// Collateral checks for a never-seen record, then insert it.
    ///
    /// Chain lookups that cannot be answered yet and missing confirmations
    /// are retryable: the caller forgets the announcement so a later
    /// delivery is evaluated again.
    pub fn check_inputs_and_add(
        &mut self,
        a: &Announcement,
        chain: &dyn ChainView,
        now: i64,
    ) -> Result<Vec<GossipEffect>, ValidationError> {
        if let Some(local) = &self.local {
            if local.outpoint == Some(a.outpoint) && local.operator_pubkey == a.operator_pubkey {
                return Ok(Vec::new());
            }
        }

        self.check_embedded_ping(a, now)?;

        if let Some(existing) = self.find(&a.outpoint) {
            if existing.is_enabled() {
                return Ok(Vec::new());
            }
            self.remove(&a.outpoint);
        }

        let info = chain.collateral(&a.outpoint)?;
        if info.value != COLLATERAL || info.script != a.collateral_script() {
            tracing::warn!(
                "announcement {}: collateral output does not match the collateral key",
                a.outpoint.short()
            );
            return Err(ValidationError::CollateralMismatch {
                expected: COLLATERAL,
            });
        }

        if info.confirmations < MIN_CONFIRMATIONS {
            tracing::debug!(
                "announcement {}: collateral has {} confirmations",
                a.outpoint.short(),
                info.confirmations
            );
            return Err(ValidationError::InsufficientConfirmations {
                confirmations: info.confirmations,
                required: MIN_CONFIRMATIONS,
            });
        }

        let matured_height = info.included_height + MIN_CONFIRMATIONS - 1;
        if let Some(matured_at) = chain.block_time(matured_height) {
            if matured_at > a.sig_time {
                tracing::debug!(
                    "announcement {}: sig_time {} before collateral matured at {matured_at}",
                    a.outpoint.short(),
                    a.sig_time
                );
                return Err(ValidationError::Backdated {
                    sig_time: a.sig_time,
                    matured_at,
                });
            }
        }

        tracing::debug!(
            "new service node entry {} at {}",
            a.outpoint.short(),
            a.sig_time
        );
        self.add(NodeRecord::from_announcement(a));

        let mut effects = Vec::new();
        let ours = self
            .local
            .as_ref()
            .is_some_and(|l| l.operator_pubkey == a.operator_pubkey);
        if ours && a.protocol_version == self.config.active_protocol_version() {
            effects.push(GossipEffect::LocalNodeAnnounced {
                outpoint: a.outpoint,
                addr: a.addr,
            });
        }
        if !self.config.params().is_local(&a.addr) {
            effects.push(GossipEffect::Relay(GossipMessage::Announce(a.clone())));
        }
        Ok(effects)
    }
}
