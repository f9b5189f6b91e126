//! Announcement ("broadcast") wire message.
//!
//! The announcement introduces or refreshes a service node network-wide.
//! It carries every identity field of a [`NodeRecord`] plus the latest
//! [`LivenessProof`], signed by the collateral key. Records are built from
//! announcements at the registry boundary, never the other way around
//! except when re-serving a known record to a peer.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::chain::ChainView;
use crate::error::RegistryError;
use crate::hash::HashWriter;
use crate::ping::LivenessProof;
use crate::record::NodeRecord;
use crate::signing::{self, SignatureDomain, SignedMessage};
use crate::types::{Hash256, Outpoint};

/// Signed identity claim for one collateral outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub outpoint: Outpoint,
    /// Spend authorization of the collateral input. Must stay empty.
    pub script_sig: Vec<u8>,
    pub addr: SocketAddr,
    pub collateral_pubkey: Vec<u8>,
    pub operator_pubkey: Vec<u8>,
    pub protocol_version: u32,
    pub sig_time: i64,
    pub signature: Vec<u8>,
    pub domain: SignatureDomain,
    pub last_ping: Option<LivenessProof>,
}

impl Announcement {
    /// Build and sign a fresh announcement for the local node.
    ///
    /// The embedded ping is signed by the operator key, the announcement
    /// by the collateral key.
    pub fn create(
        outpoint: Outpoint,
        addr: SocketAddr,
        collateral_secret: &[u8; 32],
        operator_secret: &[u8; 32],
        protocol_version: u32,
        chain: &dyn ChainView,
        now: i64,
    ) -> Result<Self, RegistryError> {
        let ping = LivenessProof::create(outpoint, chain, now, operator_secret)
            .ok_or(RegistryError::NoChainTip)?;

        let mut announcement = Self {
            outpoint,
            script_sig: Vec::new(),
            addr,
            collateral_pubkey: signing::public_key(collateral_secret),
            operator_pubkey: signing::public_key(operator_secret),
            protocol_version,
            sig_time: now,
            signature: Vec::new(),
            domain: SignatureDomain::HashDigest,
            last_ping: Some(ping),
        };
        announcement.sign(collateral_secret);
        if !announcement.verify(&announcement.collateral_pubkey) {
            return Err(RegistryError::InvalidKey(
                "announcement signature does not verify".into(),
            ));
        }
        tracing::debug!(
            "created announcement for {} at {}",
            outpoint.short(),
            announcement.sig_time
        );
        Ok(announcement)
    }

    /// Re-serve a known record as an announcement.
    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            outpoint: record.outpoint,
            script_sig: Vec::new(),
            addr: record.addr,
            collateral_pubkey: record.collateral_pubkey.clone(),
            operator_pubkey: record.operator_pubkey.clone(),
            protocol_version: record.protocol_version,
            sig_time: record.sig_time,
            signature: record.signature.clone(),
            domain: record.domain,
            last_ping: record.last_ping.clone(),
        }
    }

    /// Seen-cache key: signature time plus collateral key.
    ///
    /// Identical for every relay of the same announcement regardless of
    /// which ping it currently embeds.
    pub fn hash(&self) -> Hash256 {
        HashWriter::new()
            .write_i64(self.sig_time)
            .write_bytes(&self.collateral_pubkey)
            .finish()
    }

    pub fn collateral_script(&self) -> Vec<u8> {
        signing::payout_script(&self.collateral_pubkey)
    }

    pub fn operator_script(&self) -> Vec<u8> {
        signing::payout_script(&self.operator_pubkey)
    }
}

fn domain_tag(domain: SignatureDomain) -> u32 {
    match domain {
        SignatureDomain::LegacyString => 1,
        SignatureDomain::HashDigest => 2,
    }
}

impl SignedMessage for Announcement {
    fn signature_hash(&self) -> Hash256 {
        HashWriter::new()
            .write_u32(domain_tag(self.domain))
            .write_addr(&self.addr)
            .write_i64(self.sig_time)
            .write_bytes(&self.collateral_pubkey)
            .write_bytes(&self.operator_pubkey)
            .write_u32(self.protocol_version)
            .finish()
    }

    fn legacy_message(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.sig_time,
            signing::key_id_hex(&self.collateral_pubkey),
            signing::key_id_hex(&self.operator_pubkey),
            self.protocol_version
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
