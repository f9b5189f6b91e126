//! Checksummed on-disk cache of the registry.
//!
//! Layout:
//!
//! ```text
//! u32 LE len ‖ "ServiceNodeCache" ‖ network magic (4) ‖ rmp snapshot ‖ sha256d (32)
//! ```
//!
//! The checksum covers everything before it. Each way a file can be
//! unusable maps to its own [`LoadError`] so the caller can decide between
//! rebuilding from the network and leaving the file for an operator.

use std::fs::{self, File};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::announce::Announcement;
use crate::config::NetworkParams;
use crate::error::{LoadError, RegistryError};
use crate::hash::sha256d;
use crate::ping::LivenessProof;
use crate::record::NodeRecord;
use crate::registry::Registry;
use crate::types::{Hash256, Outpoint};

/// Identifies the file type.
pub const CACHE_MAGIC: &str = "ServiceNodeCache";

/// Default file name inside the data directory.
pub const CACHE_FILE_NAME: &str = "servicenodes.dat";

const CHECKSUM_LEN: usize = 32;

/// Everything the registry persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub records: Vec<NodeRecord>,
    pub asked_us_for_list: Vec<(IpAddr, i64)>,
    pub we_asked_for_list: Vec<(IpAddr, i64)>,
    pub we_asked_for_entry: Vec<(Outpoint, i64)>,
    /// Oldest first, so reloading keeps eviction order.
    pub seen_announcements: Vec<(Hash256, Announcement)>,
    pub seen_pings: Vec<(Hash256, LivenessProof)>,
}

/// Serialize `snapshot` into a cache blob for `params`' network.
pub fn encode(snapshot: &RegistrySnapshot, params: &NetworkParams) -> Result<Vec<u8>, RegistryError> {
    let body = rmp_serde::to_vec(snapshot)?;
    let mut blob = Vec::with_capacity(4 + CACHE_MAGIC.len() + 4 + body.len() + CHECKSUM_LEN);
    blob.extend_from_slice(&(CACHE_MAGIC.len() as u32).to_le_bytes());
    blob.extend_from_slice(CACHE_MAGIC.as_bytes());
    blob.extend_from_slice(&params.magic);
    blob.extend_from_slice(&body);
    let checksum = sha256d(&blob);
    blob.extend_from_slice(checksum.as_bytes());
    Ok(blob)
}

/// Verify and parse a cache blob.
pub fn decode(blob: &[u8], params: &NetworkParams) -> Result<RegistrySnapshot, LoadError> {
    if blob.len() < CHECKSUM_LEN {
        return Err(LoadError::HashReadError);
    }
    let (data, checksum) = blob.split_at(blob.len() - CHECKSUM_LEN);
    if sha256d(data).as_bytes()[..] != checksum[..] {
        return Err(LoadError::IncorrectHash);
    }

    let (magic, rest) = read_magic(data).ok_or(LoadError::IncorrectMagicMessage)?;
    if magic != CACHE_MAGIC.as_bytes() {
        return Err(LoadError::IncorrectMagicMessage);
    }

    if rest.len() < 4 {
        return Err(LoadError::IncorrectFormat("missing network magic".into()));
    }
    let (network, body) = rest.split_at(4);
    if network != params.magic {
        return Err(LoadError::IncorrectMagicNumber);
    }

    rmp_serde::from_slice(body).map_err(|e| LoadError::IncorrectFormat(e.to_string()))
}

fn read_magic(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let len_bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let end = 4usize.checked_add(len)?;
    Some((data.get(4..end)?, data.get(end..)?))
}

/// Read and verify the cache at `path`.
pub fn read_file(path: &Path, params: &NetworkParams) -> Result<RegistrySnapshot, LoadError> {
    let blob = fs::read(path).map_err(|e| LoadError::FileError(e.to_string()))?;
    decode(&blob, params)
}

/// Write `data` to a sibling temp file, then rename over `path`.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)
}

impl Registry {
    /// Copy of everything persisted.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            records: self.records.clone(),
            asked_us_for_list: self.asked_us_for_list.iter().map(|(k, v)| (*k, *v)).collect(),
            we_asked_for_list: self.we_asked_for_list.iter().map(|(k, v)| (*k, *v)).collect(),
            we_asked_for_entry: self.we_asked_for_entry.iter().map(|(k, v)| (*k, *v)).collect(),
            seen_announcements: self.seen_announcements.entries(),
            seen_pings: self.seen_pings.entries(),
        }
    }

    /// Replace all state with `snapshot`.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.clear();
        self.records = snapshot.records;
        self.asked_us_for_list.extend(snapshot.asked_us_for_list);
        self.we_asked_for_list.extend(snapshot.we_asked_for_list);
        self.we_asked_for_entry.extend(snapshot.we_asked_for_entry);
        for (hash, a) in snapshot.seen_announcements {
            self.seen_announcements.insert(hash, a);
        }
        for (hash, p) in snapshot.seen_pings {
            self.seen_pings.insert(hash, p);
        }
    }

    /// Write the cache file.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let blob = encode(&self.snapshot(), self.config.params())?;
        atomic_write(path, &blob)?;
        tracing::debug!("wrote {} bytes to {}", blob.len(), path.display());
        tracing::debug!("{self}");
        Ok(())
    }

    /// Load the cache file.
    ///
    /// A dry run only verifies the file. A real load replaces the table and
    /// sweeps it, expired records included. On failure the registry is left
    /// empty.
    pub fn load(&mut self, path: &Path, dry_run: bool, now: i64) -> Result<(), RegistryError> {
        let snapshot = match read_file(path, self.config.params()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if !dry_run {
                    self.clear();
                }
                return Err(e.into());
            }
        };
        if dry_run {
            return Ok(());
        }
        self.restore(snapshot);
        tracing::info!("loaded service node cache from {}", path.display());
        let purged = self.check_and_remove(true, now);
        tracing::debug!("cache cleanup removed {purged} records; {self}");
        Ok(())
    }

    /// Verify the existing file, then overwrite it.
    ///
    /// A missing file or one with a valid header but unreadable body is
    /// rewritten. Any other load failure (wrong checksum, wrong magic,
    /// wrong network) leaves the file untouched for manual inspection.
    pub fn dump(&self, path: &Path) -> Result<(), RegistryError> {
        match read_file(path, self.config.params()) {
            Ok(_) => {}
            Err(LoadError::FileError(_)) => {
                tracing::info!("no service node cache at {}, creating it", path.display());
            }
            Err(LoadError::IncorrectFormat(e)) => {
                tracing::warn!("service node cache has an invalid body ({e}), recreating");
            }
            Err(e) => {
                tracing::warn!("refusing to overwrite service node cache: {e}");
                return Err(e.into());
            }
        }
        self.save(path)
    }
}
