//! The service node this process operates.
//!
//! A hot node only holds the operator key. It is activated remotely once
//! the network accepts an announcement carrying that key, and from then on
//! re-broadcasts a ping every [`PING_SECONDS`].

use std::fmt;
use std::net::SocketAddr;

use crate::announce::Announcement;
use crate::chain::ChainView;
use crate::config::Network;
use crate::error::RegistryError;
use crate::ping::LivenessProof;
use crate::registry::{GossipEffect, Registry};
use crate::signing;
use crate::types::{Outpoint, PING_SECONDS};
use crate::wire::GossipMessage;

/// Lifecycle of the local node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveStatus {
    #[default]
    Initial,
    SyncInProcess,
    NotCapable,
    Started,
}

impl fmt::Display for ActiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActiveStatus::Initial => "initial",
            ActiveStatus::SyncInProcess => "sync in process",
            ActiveStatus::NotCapable => "not capable",
            ActiveStatus::Started => "started",
        };
        f.write_str(s)
    }
}

/// Why a ping was not sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PingSendError {
    #[error("active service node not initialized")]
    NotInitialized,

    #[error("service node is not running")]
    NotStarted,

    #[error("chain too short to anchor a ping")]
    NoAnchor,

    #[error("too early to send a ping")]
    TooEarly,

    #[error("registry does not include our service node {0}")]
    NotListed(Outpoint),
}

/// Hot-node state: operator key, activation and ping schedule.
pub struct ActiveNode {
    operator_secret: [u8; 32],
    operator_pubkey: Vec<u8>,
    status: ActiveStatus,
    not_capable_reason: String,
    outpoint: Option<Outpoint>,
    service: Option<SocketAddr>,
}

impl ActiveNode {
    pub fn new(operator_secret: [u8; 32]) -> Self {
        Self {
            operator_pubkey: signing::public_key(&operator_secret),
            operator_secret,
            status: ActiveStatus::Initial,
            not_capable_reason: String::new(),
            outpoint: None,
            service: None,
        }
    }

    pub fn operator_pubkey(&self) -> &[u8] {
        &self.operator_pubkey
    }

    pub fn status(&self) -> ActiveStatus {
        self.status
    }

    pub fn outpoint(&self) -> Option<Outpoint> {
        self.outpoint
    }

    pub fn service(&self) -> Option<SocketAddr> {
        self.service
    }

    pub fn status_message(&self) -> String {
        match self.status {
            ActiveStatus::Initial => "Node just started, not yet activated".into(),
            ActiveStatus::SyncInProcess => {
                "Sync in progress. Must wait until sync is complete to start service node".into()
            }
            ActiveStatus::NotCapable => {
                format!("Not capable service node: {}", self.not_capable_reason)
            }
            ActiveStatus::Started => "Service node successfully started".into(),
        }
    }

    /// Start operating `outpoint` at `addr`.
    pub fn enable_remotely(&mut self, outpoint: Outpoint, addr: SocketAddr) {
        tracing::info!("service node {} enabled at {addr}", outpoint.short());
        self.status = ActiveStatus::Started;
        self.outpoint = Some(outpoint);
        self.service = Some(addr);
    }

    /// Go back to [`ActiveStatus::Initial`] and re-run status management.
    pub fn reset_status(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        now: i64,
    ) -> Vec<GossipEffect> {
        self.status = ActiveStatus::Initial;
        self.manage_status(registry, chain, now)
    }

    /// Advance the status machine and ping when running.
    pub fn manage_status(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        now: i64,
    ) -> Vec<GossipEffect> {
        if registry.config().params().network != Network::Regtest && !chain.is_synced() {
            self.status = ActiveStatus::SyncInProcess;
            tracing::debug!("{}", self.status_message());
            return Vec::new();
        }
        if self.status == ActiveStatus::SyncInProcess {
            self.status = ActiveStatus::Initial;
        }

        if self.status == ActiveStatus::Initial {
            registry.check(now);
            let protocol = registry.config().active_protocol_version();
            let found = registry
                .find_by_operator(&self.operator_pubkey)
                .filter(|r| r.is_enabled() && r.protocol_version == protocol)
                .map(|r| (r.outpoint, r.addr));
            if let Some((outpoint, addr)) = found {
                self.enable_remotely(outpoint, addr);
                registry.set_local_node(self.operator_pubkey.clone(), Some(outpoint));
            }
        }

        if self.status != ActiveStatus::Started {
            self.status = ActiveStatus::NotCapable;
            self.not_capable_reason = "Hot node, waiting for remote activation.".into();
            tracing::debug!("{}", self.status_message());
            return Vec::new();
        }

        match self.send_ping(registry, chain, now) {
            Ok(effects) => effects,
            Err(e) => {
                tracing::debug!("ping not sent: {e}");
                Vec::new()
            }
        }
    }

    /// Sign a fresh ping, store it on our record and relay it.
    pub fn send_ping(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        now: i64,
    ) -> Result<Vec<GossipEffect>, PingSendError> {
        let outpoint = self.outpoint.ok_or(PingSendError::NotInitialized)?;
        if self.status != ActiveStatus::Started {
            return Err(PingSendError::NotStarted);
        }
        let ping = LivenessProof::create(outpoint, chain, now, &self.operator_secret)
            .ok_or(PingSendError::NoAnchor)?;

        let Some(record) = registry.find_mut(&outpoint) else {
            let e = PingSendError::NotListed(outpoint);
            tracing::warn!("{e}, stopping the ping service");
            self.status = ActiveStatus::NotCapable;
            self.not_capable_reason = e.to_string();
            return Err(e);
        };
        if record.is_pinged_within(PING_SECONDS, ping.sig_time) {
            return Err(PingSendError::TooEarly);
        }

        record.last_ping = Some(ping.clone());
        let seen_key = Announcement::from_record(record).hash();
        registry.seen_pings.insert(ping.hash(), ping.clone());
        if let Some(seen) = registry.seen_announcements.get_mut(&seen_key) {
            seen.last_ping = Some(ping.clone());
        }

        tracing::info!("relaying ping for {}", outpoint.short());
        Ok(vec![GossipEffect::Relay(GossipMessage::Ping(ping))])
    }

    /// Sign and broadcast an announcement for `outpoint` (cold start).
    ///
    /// The collateral key is used once and not retained.
    pub fn announce(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        outpoint: Outpoint,
        addr: SocketAddr,
        collateral_secret: &[u8; 32],
        now: i64,
    ) -> Result<Vec<GossipEffect>, RegistryError> {
        let expected = registry.config().params().default_port;
        if addr.port() != expected {
            self.status = ActiveStatus::NotCapable;
            self.not_capable_reason = format!("Invalid port {}, only {expected} is supported", addr.port());
            return Err(RegistryError::InvalidKey(self.not_capable_reason.clone()));
        }

        let a = Announcement::create(
            outpoint,
            addr,
            collateral_secret,
            &self.operator_secret,
            registry.config().active_protocol_version(),
            chain,
            now,
        )?;
        let mut effects = registry.update_from_local_announcement(&a);
        effects.push(GossipEffect::Relay(GossipMessage::Announce(a)));
        Ok(effects)
    }
}
