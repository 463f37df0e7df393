//! Two-axis bidirectional block-counter telemetry (spec.md §4.I, §9).
//!
//! Each parallel dump job (§4.H) owns one [`BlockCounter`]. The *local* axis
//! tracks blocking on the in-process bounded channel (§4.A); the *remote*
//! axis accumulates the `x-arango-dump-block-counts` deltas the server
//! reports on each batch. Both are signed atomics with saturating
//! log-and-reset semantics: crossing ±100 logs a diagnostic naming the
//! suspected bottleneck and re-arms by subtracting the offending 100, so the
//! counter can report the same condition again if it persists instead of
//! latching forever.

use std::sync::atomic::{AtomicI64, Ordering};

const REARM_THRESHOLD: i64 = 100;

/// Bidirectional saturating-log-and-reset block counter.
#[derive(Debug, Default)]
pub struct BlockCounter {
    local: AtomicI64,
    remote: AtomicI64,
}

impl BlockCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer thread blocked popping from an empty channel: too few
    /// network threads (or the server isn't keeping up).
    pub fn writer_blocked_on_empty(&self) {
        let v = self.local.fetch_sub(1, Ordering::Relaxed) - 1;
        Self::check(v, &self.local, "too few local-network threads (writer starved)");
    }

    /// A network thread blocked pushing into a full channel: too few
    /// writer threads.
    pub fn network_blocked_on_full(&self) {
        let v = self.local.fetch_add(1, Ordering::Relaxed) + 1;
        Self::check(v, &self.local, "too few local-writer threads (channel full)");
    }

    /// Applies the server-reported block-count delta to the remote axis.
    pub fn apply_remote_delta(&self, delta: i64) {
        let v = self.remote.fetch_add(delta, Ordering::Relaxed) + delta;
        Self::check_remote(v, &self.remote);
    }

    fn check(value: i64, axis: &AtomicI64, positive_msg: &str) {
        if value >= REARM_THRESHOLD {
            tracing::warn!(value, "block-counter bottleneck: {positive_msg}");
            axis.fetch_sub(REARM_THRESHOLD, Ordering::Relaxed);
        } else if value <= -REARM_THRESHOLD {
            tracing::warn!(value, "block-counter bottleneck: too few dbserver-side producers");
            axis.fetch_add(REARM_THRESHOLD, Ordering::Relaxed);
        }
    }

    fn check_remote(value: i64, axis: &AtomicI64) {
        if value >= REARM_THRESHOLD {
            tracing::warn!(value, "block-counter bottleneck: too little dbserver parallelism");
            axis.fetch_sub(REARM_THRESHOLD, Ordering::Relaxed);
        } else if value <= -REARM_THRESHOLD {
            tracing::warn!(value, "block-counter bottleneck: too few dbserver worker threads");
            axis.fetch_add(REARM_THRESHOLD, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn local_value(&self) -> i64 {
        self.local.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn remote_value(&self) -> i64 {
        self.remote.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_axis_rearms_after_threshold() {
        let bc = BlockCounter::new();
        for _ in 0..100 {
            bc.network_blocked_on_full();
        }
        assert_eq!(bc.local_value(), 0);
    }

    #[test]
    fn local_axis_tracks_negative_direction() {
        let bc = BlockCounter::new();
        for _ in 0..50 {
            bc.writer_blocked_on_empty();
        }
        assert_eq!(bc.local_value(), -50);
    }

    #[test]
    fn remote_axis_rearms_after_threshold() {
        let bc = BlockCounter::new();
        bc.apply_remote_delta(100);
        assert_eq!(bc.remote_value(), 0);
        bc.apply_remote_delta(-100);
        assert_eq!(bc.remote_value(), 0);
    }
}
