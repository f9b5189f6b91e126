//! Metrics primitives for the service node registry.
//!
//! [`Counter`] is a lock-free monotonic counter; [`RegistryMetrics`] bundles
//! the counters the registry updates while processing gossip and sweeping,
//! and [`RegistryMetrics::snapshot`] freezes them into a plain serializable
//! struct for operators.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A monotonically increasing counter.
///
/// Relaxed ordering: values are statistics, never used for synchronization.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.get())
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get())
    }
}

// ── RegistryMetrics ──────────────────────────────────────────────────

/// Counters updated by the registry. Share behind an `Arc`.
#[derive(Debug, Default, Serialize)]
pub struct RegistryMetrics {
    pub announcements_accepted: Counter,
    pub announcements_rejected: Counter,
    pub announcements_duplicate: Counter,
    pub pings_accepted: Counter,
    pub pings_rejected: Counter,
    /// Sum of misbehavior scores reported to peer scoring.
    pub misbehavior_points: Counter,
    /// Single-record requests sent for unknown pings.
    pub entry_requests: Counter,
    /// Full-list requests answered.
    pub list_requests_served: Counter,
    pub records_purged: Counter,
    pub sweeps: Counter,
}

/// Point-in-time copy of [`RegistryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub announcements_accepted: u64,
    pub announcements_rejected: u64,
    pub announcements_duplicate: u64,
    pub pings_accepted: u64,
    pub pings_rejected: u64,
    pub misbehavior_points: u64,
    pub entry_requests: u64,
    pub list_requests_served: u64,
    pub records_purged: u64,
    pub sweeps: u64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            announcements_accepted: self.announcements_accepted.get(),
            announcements_rejected: self.announcements_rejected.get(),
            announcements_duplicate: self.announcements_duplicate.get(),
            pings_accepted: self.pings_accepted.get(),
            pings_rejected: self.pings_rejected.get(),
            misbehavior_points: self.misbehavior_points.get(),
            entry_requests: self.entry_requests.get(),
            list_requests_served: self.list_requests_served.get(),
            records_purged: self.records_purged.get(),
            sweeps: self.sweeps.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_adds() {
        let c = Counter::new();
        c.inc();
        c.add(41);
        assert_eq!(c.get(), 42);
    }

    #[test]
    fn counter_serializes_as_number() {
        let c = Counter::new();
        c.add(7);
        assert_eq!(serde_json::to_string(&c).unwrap(), "7");
    }

    #[test]
    fn concurrent_increments_are_counted() {
        let metrics = Arc::new(RegistryMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.pings_accepted.inc();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().pings_accepted, 4000);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let metrics = RegistryMetrics::new();
        metrics.records_purged.add(3);
        metrics.misbehavior_points.add(100);
        let snap = metrics.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.records_purged, 3);
    }

    #[test]
    fn live_metrics_serialize_like_snapshot() {
        let metrics = RegistryMetrics::new();
        metrics.sweeps.inc();
        let live: serde_json::Value = serde_json::to_value(&metrics).unwrap();
        let snap: serde_json::Value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(live, snap);
    }
}
