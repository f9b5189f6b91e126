//! Deterministic hashing of registry messages.
//!
//! Every value is fed little-endian into a SHA-256 stream; the result is
//! hashed a second time (SHA-256d). Variable-length fields carry a u32
//! length prefix so concatenations cannot collide.

use std::net::{IpAddr, SocketAddr};

use sha2::{Digest, Sha256};

use crate::types::{Hash256, Outpoint};

/// Double SHA-256 of `data`.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256(second.into())
}

/// Incremental SHA-256d writer.
#[derive(Default)]
pub struct HashWriter {
    inner: Sha256,
}

impl HashWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_raw(mut self, bytes: &[u8]) -> Self {
        self.inner.update(bytes);
        self
    }

    pub fn write_bytes(self, bytes: &[u8]) -> Self {
        self.write_u32(bytes.len() as u32).write_raw(bytes)
    }

    pub fn write_u32(self, v: u32) -> Self {
        self.write_raw(&v.to_le_bytes())
    }

    pub fn write_i64(self, v: i64) -> Self {
        self.write_raw(&v.to_le_bytes())
    }

    pub fn write_hash(self, h: &Hash256) -> Self {
        self.write_raw(h.as_bytes())
    }

    pub fn write_outpoint(self, op: &Outpoint) -> Self {
        self.write_hash(&op.hash).write_u32(op.index)
    }

    /// Address as 16 bytes (IPv4 mapped into IPv6) plus big-endian port.
    pub fn write_addr(self, addr: &SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        self.write_raw(&ip.octets()).write_raw(&addr.port().to_be_bytes())
    }

    pub fn finish(self) -> Hash256 {
        let first = self.inner.finalize();
        Hash256(Sha256::digest(first).into())
    }
}
