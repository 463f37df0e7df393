//! Monotonic run statistics (spec.md §3).
//!
//! All four counters are lock-free atomics updated with `fetch_add`; spec.md
//! invariant 4 requires they are never decremented, so there is no API to
//! subtract from them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide (or per-dump, depending on how the caller scopes it)
/// monotonic counters.
#[derive(Debug, Default)]
pub struct Stats {
    total_collections: AtomicU64,
    total_batches: AtomicU64,
    total_received: AtomicU64,
    total_written: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&self) {
        self.total_collections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch(&self) {
        self.total_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_received(&self, bytes: u64) {
        self.total_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_written(&self, bytes: u64) {
        self.total_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_collections(&self) -> u64 {
        self.total_collections.load(Ordering::Relaxed)
    }

    pub fn total_batches(&self) -> u64 {
        self.total_batches.load(Ordering::Relaxed)
    }

    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }

    pub fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.add_collection();
        stats.add_collection();
        stats.add_batch();
        stats.add_received(100);
        stats.add_written(90);
        assert_eq!(stats.total_collections(), 2);
        assert_eq!(stats.total_batches(), 1);
        assert_eq!(stats.total_received(), 100);
        assert_eq!(stats.total_written(), 90);
    }
}
