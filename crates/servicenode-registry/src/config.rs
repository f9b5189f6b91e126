//! Network parameters and registry configuration.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Which chain the registry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Main,
    Testnet,
    Regtest,
}

/// Per-network constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub network: Network,
    /// The only port service nodes may announce.
    pub default_port: u16,
    /// Identifies the network in persisted caches.
    pub magic: [u8; 4],
}

impl NetworkParams {
    pub fn main() -> Self {
        Self {
            network: Network::Main,
            default_port: 10135,
            magic: [0x03, 0xc4, 0xfd, 0x13],
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            default_port: 10132,
            magic: [0x45, 0x76, 0x65, 0xba],
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            default_port: 51476,
            magic: [0xa1, 0xcf, 0x7e, 0xac],
        }
    }

    /// Full-list requests are rate limited per peer on mainnet only.
    pub fn rate_limits_list_requests(&self) -> bool {
        self.network == Network::Main
    }

    /// Whether `addr` counts as local (RFC1918 or loopback).
    ///
    /// Regtest treats every address as routable.
    pub fn is_local(&self, addr: &SocketAddr) -> bool {
        self.network != Network::Regtest && (is_rfc1918(addr) || addr.ip().is_loopback())
    }
}

/// Private IPv4 ranges (10/8, 172.16/12, 192.168/16).
pub fn is_rfc1918(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some_and(|v4| v4.is_private()),
    }
}

// ── RegistryConfig ───────────────────────────────────────────────────

/// Protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 70_920;

/// Minimum protocol accepted before new-protocol enforcement.
pub const MIN_PROTOCOL_BEFORE_ENFORCEMENT: u32 = 70_918;

/// Oldest protocol that signs announcements correctly.
///
/// Bad signatures below it are refused without penalty.
pub const MIN_PROTOCOL_SIGNING_FIX: u32 = 70_913;

/// Default capacity of each seen-message cache.
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Registry behaviour knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub(crate) params: NetworkParams,
    /// Protocol version peers must run once enforcement is on.
    pub(crate) active_protocol: u32,
    /// Protocol version accepted while enforcement is off.
    pub(crate) legacy_min_protocol: u32,
    /// Below this, bad announcement signatures earn no penalty.
    pub(crate) signing_fix_protocol: u32,
    /// Ranking skips records younger than the minimum winner age.
    pub(crate) payment_enforcement: bool,
    /// Payment computations require `active_protocol`.
    pub(crate) new_protocol_enforcement: bool,
    /// Entries per seen cache.
    pub(crate) seen_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(NetworkParams::main())
    }
}

impl RegistryConfig {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            active_protocol: PROTOCOL_VERSION,
            legacy_min_protocol: MIN_PROTOCOL_BEFORE_ENFORCEMENT,
            signing_fix_protocol: MIN_PROTOCOL_SIGNING_FIX,
            payment_enforcement: false,
            new_protocol_enforcement: true,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }

    /// Set the protocol version required under enforcement.
    pub fn active_protocol(mut self, version: u32) -> Self {
        self.active_protocol = version;
        self
    }

    /// Set the protocol version accepted before enforcement.
    pub fn legacy_min_protocol(mut self, version: u32) -> Self {
        self.legacy_min_protocol = version;
        self
    }

    /// Toggle minimum-age filtering in ranking and stable counts.
    pub fn payment_enforcement(mut self, on: bool) -> Self {
        self.payment_enforcement = on;
        self
    }

    /// Toggle new-protocol enforcement for payments.
    pub fn new_protocol_enforcement(mut self, on: bool) -> Self {
        self.new_protocol_enforcement = on;
        self
    }

    /// Set the seen-cache capacity (default: 10 000).
    pub fn seen_capacity(mut self, capacity: usize) -> Self {
        self.seen_capacity = capacity.max(1);
        self
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Minimum protocol for anything payment related.
    pub fn min_payments_protocol(&self) -> u32 {
        if self.new_protocol_enforcement {
            self.active_protocol
        } else {
            self.legacy_min_protocol
        }
    }

    pub fn is_payment_enforcement_active(&self) -> bool {
        self.payment_enforcement
    }

    pub fn signing_fix_protocol(&self) -> u32 {
        self.signing_fix_protocol
    }

    pub fn active_protocol_version(&self) -> u32 {
        self.active_protocol
    }
}
