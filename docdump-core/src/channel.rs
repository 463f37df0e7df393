//! Bounded, multi-producer/multi-consumer channel (spec.md §4.A).
//!
//! Grounded on the `Mutex`+`Condvar` bounded-queue-per-file pattern used for
//! cross-thread writes in `other_examples` frawk's `runtime::writers`
//! (`Notification`, `build_handle`): a plain mutex-guarded queue with two
//! condition variables, rather than reaching for an async channel. `push`
//! and `pop` report whether the caller blocked, so the block-counter
//! telemetry (§4.I) can be driven without a second round of polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// A fixed-capacity queue of opaque response frames.
///
/// `push` blocks while the queue is full; `close` wakes every blocked
/// `push` (returning `stopped = true`) and every blocked `pop` (returning
/// `item = None`).
pub struct BoundedChannel<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    producers: AtomicUsize,
}

impl<T> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            producers: AtomicUsize::new(0),
        })
    }

    /// Pushes `item`, blocking while the channel is full.
    ///
    /// Returns `(stopped, was_full)`: `stopped` is `true` if the channel
    /// was (or became) closed before the item could be enqueued, in which
    /// case the item is dropped; `was_full` is `true` if this call had to
    /// wait for room, for block-counter accounting.
    pub fn push(&self, item: T) -> (bool, bool) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut was_full = false;
        loop {
            if guard.closed {
                return (true, was_full);
            }
            if guard.queue.len() < self.capacity {
                guard.queue.push_back(item);
                self.not_empty.notify_one();
                return (false, was_full);
            }
            was_full = true;
            guard = self
                .not_full
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Pops the next item, blocking while the channel is empty and open.
    ///
    /// Returns `(item, was_empty)`. `item` is `None` once the channel is
    /// closed and drained.
    pub fn pop(&self) -> (Option<T>, bool) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut was_empty = false;
        loop {
            if let Some(item) = guard.queue.pop_front() {
                self.not_full.notify_one();
                return (Some(item), was_empty);
            }
            if guard.closed {
                return (None, was_empty);
            }
            was_empty = true;
            guard = self
                .not_empty
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Closes the channel: every blocked `push` returns `stopped = true`,
    /// every blocked `pop` drains remaining items then returns `None`.
    pub fn close(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    fn register_producer(&self) {
        self.producers.fetch_add(1, Ordering::SeqCst);
    }

    fn release_producer(&self) {
        if self.producers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.close();
        }
    }
}

/// A token that keeps a channel open. Dropping the last outstanding guard
/// auto-closes the channel, so the last network thread to finish (§4.H)
/// closes the pipe for the writer threads without any explicit
/// coordination.
pub struct ProducerGuard<T> {
    channel: Arc<BoundedChannel<T>>,
}

impl<T> ProducerGuard<T> {
    pub fn new(channel: Arc<BoundedChannel<T>>) -> Self {
        channel.register_producer();
        Self { channel }
    }
}

impl<T> Clone for ProducerGuard<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.channel))
    }
}

impl<T> Drop for ProducerGuard<T> {
    fn drop(&mut self) {
        self.channel.release_producer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_then_pop_roundtrips() {
        let ch = BoundedChannel::new(4);
        let (stopped, was_full) = ch.push(1);
        assert!(!stopped && !was_full);
        let (item, was_empty) = ch.pop();
        assert_eq!(item, Some(1));
        assert!(!was_empty);
    }

    #[test]
    fn pop_on_closed_empty_channel_returns_none() {
        let ch: Arc<BoundedChannel<i32>> = BoundedChannel::new(2);
        ch.close();
        let (item, _) = ch.pop();
        assert_eq!(item, None);
    }

    #[test]
    fn push_blocks_while_full_and_reports_was_full() {
        let ch = BoundedChannel::new(1);
        let (stopped, was_full) = ch.push(1);
        assert!(!stopped && !was_full);

        let ch2 = Arc::clone(&ch);
        let handle = thread::spawn(move || ch2.push(2));

        thread::sleep(Duration::from_millis(50));
        let (_, was_empty) = ch.pop();
        assert!(!was_empty);

        let (stopped, was_full) = handle.join().unwrap();
        assert!(!stopped);
        assert!(was_full);
    }

    #[test]
    fn closing_wakes_blocked_push() {
        let ch = BoundedChannel::new(1);
        ch.push(1);
        let ch2 = Arc::clone(&ch);
        let handle = thread::spawn(move || ch2.push(2));
        thread::sleep(Duration::from_millis(50));
        ch.close();
        let (stopped, _) = handle.join().unwrap();
        assert!(stopped);
    }

    #[test]
    fn producer_guard_auto_closes_on_last_drop() {
        let ch: Arc<BoundedChannel<i32>> = BoundedChannel::new(4);
        let g1 = ProducerGuard::new(Arc::clone(&ch));
        let g2 = g1.clone();
        assert!(!ch.is_closed());
        drop(g1);
        assert!(!ch.is_closed());
        drop(g2);
        assert!(ch.is_closed());
    }
}
