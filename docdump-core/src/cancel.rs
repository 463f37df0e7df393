//! Cooperative cancellation (spec.md §9 design note: "a reimplementation
//! should consider an explicit cancel token wired into the HTTP client to
//! shorten shutdown time").
//!
//! This is deliberately thin: a single shared flag. Wiring it in does not
//! change the shutdown *shape* spec.md §5 describes ("drain the queue and
//! let inflight calls complete") - it just lets an external signal (the
//! CLI's Ctrl-C handler) trigger that same drain instead of only a worker
//! error doing so.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply cloneable flag that [`crate::inventory::run_dump_full`] polls
/// between database runs and while a worker pool is draining.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
