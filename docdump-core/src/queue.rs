//! Task Queue & Worker Pool (spec.md §4.F).
//!
//! A FIFO job queue drained by N worker threads, each owning one long-lived
//! HTTP client. The first failure wins: `report_error` appends to a
//! mutex-protected error list and drains the remaining queue so later
//! workers return immediately, matching spec.md invariant 6 for `force =
//! false` runs (the orchestrator decides whether to keep going based on
//! `force`; the queue's job here is only to stop handing out work).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::error::DumpError;
use crate::http::ReqwestHttpClient;
use crate::interfaces::HttpClient;

/// A unit of work handed to a worker thread.
pub trait Job: Send {
    fn run(&self, http_client: &dyn HttpClient) -> Result<(), DumpError>;
    /// Short label for logging.
    fn label(&self) -> String;
}

struct QueueState {
    jobs: VecDeque<Box<dyn Job>>,
    draining: bool,
    closed: bool,
    in_flight: usize,
}

/// Shared FIFO queue plus the mutex-protected error list (spec.md §4.F).
pub struct TaskQueue {
    state: Mutex<QueueState>,
    idle: Condvar,
    errors: Mutex<Vec<String>>,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                draining: false,
                closed: false,
                in_flight: 0,
            }),
            idle: Condvar::new(),
            errors: Mutex::new(Vec::new()),
        })
    }

    /// Enqueues one job. A no-op once the queue has started draining after
    /// a failure, so jobs spawned by an in-progress worker (e.g. PerShard
    /// jobs fanned out by a PerCollection job) don't resurrect a queue
    /// that's already failing fast.
    pub fn push(&self, job: Box<dyn Job>) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.draining {
            return;
        }
        guard.jobs.push_back(job);
        self.idle.notify_all();
    }

    /// Pops the next job, blocking while the queue is empty but neither
    /// draining nor closed. A job's own `run` may push more jobs (e.g. a
    /// `PerCollectionJob` fanning out `PerShardJob`s) before it returns, so a
    /// worker that finds the queue momentarily empty must wait rather than
    /// exit - otherwise those newly pushed jobs could be stranded with no
    /// worker left to pop them.
    fn pop(&self) -> Option<Box<dyn Job>> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(job) = guard.jobs.pop_front() {
                guard.in_flight += 1;
                return Some(job);
            }
            if guard.closed || guard.draining {
                return None;
            }
            guard = self.idle.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Signals every worker blocked in [`Self::pop`] to exit once the queue
    /// is empty. Called by the orchestrator after [`Self::wait_for_idle`]
    /// returns, since no more jobs will ever be pushed at that point.
    pub fn close(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.closed = true;
        self.idle.notify_all();
    }

    fn finish_one(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.in_flight -= 1;
        if guard.in_flight == 0 && guard.jobs.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Records `message` and clears all queued (not yet started) jobs.
    pub fn report_error(&self, message: String) {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).push(message);
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.jobs.clear();
        guard.draining = true;
        self.idle.notify_all();
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Blocks until the queue has no pending or in-flight jobs.
    pub fn wait_for_idle(&self) {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = self
            .idle
            .wait_while(guard, |s| !s.jobs.is_empty() || s.in_flight > 0)
            .unwrap_or_else(|e| e.into_inner());
    }
}

/// Spawns `thread_count` workers, each building its own [`ReqwestHttpClient`]
/// (reconnect-on-failure is implicit: a fresh client per worker, never
/// shared). Returns the join handles; callers should call
/// [`TaskQueue::wait_for_idle`], then [`TaskQueue::close`] to release workers
/// parked in [`TaskQueue::pop`], then join the handles.
pub fn spawn_workers(
    queue: Arc<TaskQueue>,
    thread_count: usize,
    request_timeout: std::time::Duration,
    use_gzip_for_transport: bool,
) -> Vec<thread::JoinHandle<()>> {
    (0..thread_count.max(1))
        .map(|worker_index| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let client = match ReqwestHttpClient::new(request_timeout, use_gzip_for_transport) {
                    Ok(client) => client,
                    Err(e) => {
                        queue.report_error(format!("worker {worker_index}: {e}"));
                        return;
                    }
                };
                loop {
                    let job = match queue.pop() {
                        Some(job) => job,
                        None => break,
                    };
                    let label = job.label();
                    if let Err(e) = job.run(&client) {
                        tracing::error!(job = %label, error = %e, "job failed");
                        queue.report_error(format!("{label}: {e}"));
                    }
                    queue.finish_one();
                }
            })
        })
        .collect()
}
