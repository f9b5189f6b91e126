//! Bounded de-duplication caches keyed by message hash.
//!
//! A hit means "already processed": the message is not re-validated.
//! Entries leave the cache by LRU eviction, by age pruning during the
//! sweep, or explicitly when a retryable failure should allow re-delivery.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::announce::Announcement;
use crate::ping::LivenessProof;
use crate::types::{Hash256, Outpoint};

/// Something kept in a seen cache.
pub trait SeenEntry: Clone {
    fn outpoint(&self) -> Outpoint;

    /// Time the entry ages from.
    fn seen_time(&self) -> i64;
}

impl SeenEntry for Announcement {
    fn outpoint(&self) -> Outpoint {
        self.outpoint
    }

    fn seen_time(&self) -> i64 {
        self.last_ping.as_ref().map_or(self.sig_time, |p| p.sig_time)
    }
}

impl SeenEntry for LivenessProof {
    fn outpoint(&self) -> Outpoint {
        self.outpoint
    }

    fn seen_time(&self) -> i64 {
        self.sig_time
    }
}

pub struct SeenCache<T: SeenEntry> {
    entries: LruCache<Hash256, T>,
}

impl<T: SeenEntry> SeenCache<T> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
        }
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains(hash)
    }

    /// Insert unless already present. Returns `true` if inserted.
    pub fn insert(&mut self, hash: Hash256, entry: T) -> bool {
        if self.entries.contains(&hash) {
            return false;
        }
        self.entries.put(hash, entry);
        true
    }

    pub fn get(&self, hash: &Hash256) -> Option<&T> {
        self.entries.peek(hash)
    }

    pub fn get_mut(&mut self, hash: &Hash256) -> Option<&mut T> {
        self.entries.peek_mut(hash)
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<T> {
        self.entries.pop(hash)
    }

    /// Drop every entry for `outpoint`. Returns how many were dropped.
    pub fn remove_outpoint(&mut self, outpoint: &Outpoint) -> usize {
        self.remove_where(|e| e.outpoint() == *outpoint)
    }

    /// Drop entries whose seen time is before `cutoff`.
    pub fn prune_older_than(&mut self, cutoff: i64) -> usize {
        self.remove_where(|e| e.seen_time() < cutoff)
    }

    fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> usize {
        let doomed: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(h, _)| *h)
            .collect();
        for h in &doomed {
            self.entries.pop(h);
        }
        doomed.len()
    }

    /// Entries from least to most recently inserted.
    pub fn entries(&self) -> Vec<(Hash256, T)> {
        self.entries
            .iter()
            .rev()
            .map(|(h, e)| (*h, e.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
