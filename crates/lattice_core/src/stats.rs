//! Lattice statistics.
//!
//! Counters are atomic and can be read while operations are in progress.
//! All of them only ever increase during the life of a handle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters for one open lattice.
#[derive(Debug, Default)]
pub struct LatticeStats {
    adds: AtomicU64,
    chunked_adds: AtomicU64,
    reads: AtomicU64,
    prefix_queries: AtomicU64,
    index_keys_visited: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    wal_entries_written: AtomicU64,
    wal_entries_replayed: AtomicU64,
    wal_entries_discarded: AtomicU64,
    corrupt_records_skipped: AtomicU64,
    tier_rejections: AtomicU64,
    capacity_rejections: AtomicU64,
    checkpoints: AtomicU64,
    saves: AtomicU64,
}

impl LatticeStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_add(&self, bytes: u64) {
        self.adds.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_chunked_add(&self, bytes: u64) {
        self.chunked_adds.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_prefix_query(&self, keys_visited: usize) {
        self.prefix_queries.fetch_add(1, Ordering::Relaxed);
        self.index_keys_visited
            .fetch_add(keys_visited as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_wal_written(&self, entries: u64) {
        self.wal_entries_written.fetch_add(entries, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self, replayed: u64, discarded: u64, corrupt: u64) {
        self.wal_entries_replayed.fetch_add(replayed, Ordering::Relaxed);
        self.wal_entries_discarded.fetch_add(discarded, Ordering::Relaxed);
        self.corrupt_records_skipped.fetch_add(corrupt, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self, err: &crate::LatticeError) {
        match err {
            crate::LatticeError::TierLimitExceeded { .. } => {
                self.tier_rejections.fetch_add(1, Ordering::Relaxed);
            }
            crate::LatticeError::CapacityExceeded { .. } => {
                self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of inline adds.
    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }

    /// Returns the number of prefix queries.
    pub fn prefix_queries(&self) -> u64 {
        self.prefix_queries.load(Ordering::Relaxed)
    }

    /// Returns the total index keys examined by prefix queries.
    pub fn index_keys_visited(&self) -> u64 {
        self.index_keys_visited.load(Ordering::Relaxed)
    }

    /// Returns the number of checkpoints.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            adds: load(&self.adds),
            chunked_adds: load(&self.chunked_adds),
            reads: load(&self.reads),
            prefix_queries: load(&self.prefix_queries),
            index_keys_visited: load(&self.index_keys_visited),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            wal_entries_written: load(&self.wal_entries_written),
            wal_entries_replayed: load(&self.wal_entries_replayed),
            wal_entries_discarded: load(&self.wal_entries_discarded),
            corrupt_records_skipped: load(&self.corrupt_records_skipped),
            tier_rejections: load(&self.tier_rejections),
            capacity_rejections: load(&self.capacity_rejections),
            checkpoints: load(&self.checkpoints),
            saves: load(&self.saves),
        }
    }
}

/// A point-in-time copy of [`LatticeStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Inline adds.
    pub adds: u64,
    /// Chunked adds.
    pub chunked_adds: u64,
    /// Id and name lookups.
    pub reads: u64,
    /// Prefix queries.
    pub prefix_queries: u64,
    /// Index keys examined by prefix queries.
    pub index_keys_visited: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Payload bytes returned by reads.
    pub bytes_read: u64,
    /// WAL entries appended.
    pub wal_entries_written: u64,
    /// WAL entries applied during recovery.
    pub wal_entries_replayed: u64,
    /// WAL entries skipped during recovery.
    pub wal_entries_discarded: u64,
    /// Snapshot records skipped as corrupt.
    pub corrupt_records_skipped: u64,
    /// Writes refused by the tier ceiling.
    pub tier_rejections: u64,
    /// Writes refused by physical capacity.
    pub capacity_rejections: u64,
    /// Checkpoints.
    pub checkpoints: u64,
    /// Snapshot saves, checkpoints included.
    pub saves: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::Tier;
    use crate::LatticeError;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(LatticeStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = LatticeStats::new();
        stats.record_add(10);
        stats.record_chunked_add(2000);
        stats.record_read(5);
        stats.record_prefix_query(4);
        stats.record_prefix_query(2);

        let snap = stats.snapshot();
        assert_eq!(snap.adds, 1);
        assert_eq!(snap.chunked_adds, 1);
        assert_eq!(snap.bytes_written, 2010);
        assert_eq!(snap.bytes_read, 5);
        assert_eq!(stats.prefix_queries(), 2);
        assert_eq!(stats.index_keys_visited(), 6);
    }

    #[test]
    fn rejections_are_split_by_kind() {
        let stats = LatticeStats::new();
        stats.record_rejection(&LatticeError::TierLimitExceeded {
            tier: Tier::Free,
            ceiling: 10_000,
        });
        stats.record_rejection(&LatticeError::CapacityExceeded { max_nodes: 1 });
        stats.record_rejection(&LatticeError::LatticeClosed);

        let snap = stats.snapshot();
        assert_eq!(snap.tier_rejections, 1);
        assert_eq!(snap.capacity_rejections, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(LatticeStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_read(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().reads, 800);
    }
}
