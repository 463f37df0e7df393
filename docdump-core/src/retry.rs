//! Retry classification and bounded backoff for HTTP/transport failures
//! (spec.md §4.B).
//!
//! Shaped as a `FailureKind` classification enum plus a `RetryPolicy` that
//! turns a classification and an attempt count into a decision, with the
//! decision table and constants spec.md actually specifies: a flat 500 ms
//! backoff (not exponential) and a 100-attempt ceiling per call-site.
//!
//! # Open question resolved (spec.md §9)
//!
//! The original client calls a process-aborting `FATAL_ERROR_EXIT` when a
//! call-site exceeds its retry budget. This port treats that condition as a
//! recoverable [`RetryExhausted`] error instead: a library must never call
//! `process::exit` out from under its caller, and `RetryExhausted` flows
//! through the same `report_error` path (§4.F) as any other job failure, so
//! the net effect on an unattended run (abort the database, or the whole
//! dump if `force` is false) is unchanged.

use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Default maximum retry attempts per call-site (spec.md §4.B).
pub const DEFAULT_MAX_RETRIES: u32 = 100;
/// Fixed backoff before every retryable attempt (spec.md §4.B: "sleep 500 ms
/// before retry" for `could_not_connect`; applied uniformly to every
/// retryable kind per the bounded-backoff wording in spec.md §2).
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Classification of a transport/server outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// TCP/TLS connect failure.
    CouldNotConnect,
    /// Error while writing the request.
    WriteError,
    /// Error while reading the response.
    ReadError,
    /// Server reported a cluster-internal timeout.
    ClusterTimeout,
    /// Gateway/upstream timeout (e.g. HTTP 504).
    GatewayTimeout,
}

impl FailureKind {
    fn is_retryable(self) -> bool {
        true // every variant of FailureKind is, by construction, retryable.
    }
}

/// What a single attempt returned, as seen by the retry policy.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Retryable per spec.md §4.B.
    Retryable { kind: FailureKind, message: String },
    /// Everything else: invalid response, unexpected status, fatal I/O.
    /// Not retried at this call-site.
    Fatal(String),
}

/// Raised when a call-site exceeds [`RetryPolicy::max_retries`].
#[derive(Debug, Error)]
#[error("{call_site}: exceeded {attempts} retries (last error: {last_error})")]
pub struct RetryExhausted {
    pub call_site: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Bounded-retry, fixed-backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A policy with zero backoff, for tests that need to exhaust the
    /// retry budget without actually sleeping 50 seconds.
    #[doc(hidden)]
    pub fn no_sleep(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `attempt` until it succeeds, is classified fatal, or exhausts
    /// the retry budget.
    pub fn execute<T>(
        &self,
        call_site: &str,
        mut attempt: impl FnMut() -> Result<T, Outcome>,
    ) -> Result<T, RetryOrFatal> {
        let mut attempts: u32 = 0;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(Outcome::Fatal(message)) => return Err(RetryOrFatal::Fatal(message)),
                Err(Outcome::Retryable { kind, message }) => {
                    debug_assert!(kind.is_retryable());
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(RetryOrFatal::Exhausted(RetryExhausted {
                            call_site: call_site.to_string(),
                            attempts: attempts - 1,
                            last_error: message,
                        }));
                    }
                    tracing::warn!(
                        call_site,
                        attempt = attempts,
                        kind = ?kind,
                        error = %message,
                        "retrying after transport failure"
                    );
                    if !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
    }
}

/// The two terminal outcomes of [`RetryPolicy::execute`] besides success.
#[derive(Debug, Error)]
pub enum RetryOrFatal {
    #[error("{0}")]
    Fatal(String),
    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),
}

/// Classifies a transport-layer failure into a retry [`Outcome`]
/// (spec.md §4.B). Shared by every call-site that issues an HTTP request
/// through [`crate::interfaces::HttpClient`].
pub fn classify_transport(e: crate::interfaces::TransportError) -> Outcome {
    use crate::interfaces::TransportError as T;
    match e {
        T::Connect(msg) => Outcome::Retryable {
            kind: FailureKind::CouldNotConnect,
            message: msg,
        },
        T::Write(msg) => Outcome::Retryable {
            kind: FailureKind::WriteError,
            message: msg,
        },
        T::Read(msg) => Outcome::Retryable {
            kind: FailureKind::ReadError,
            message: msg,
        },
        T::Other(msg) => Outcome::Fatal(msg),
    }
}

/// Classifies a logical (non-2xx or error-envelope) HTTP outcome
/// (spec.md §4.B: `cluster_timeout` and `gateway_timeout` are retryable;
/// everything else fatal). `body_snippet` is matched case-insensitively
/// for a "timeout" substring to distinguish a cluster-internal timeout
/// from an unrecoverable server error, since the wire format doesn't
/// define a dedicated error code for it (spec.md treats the underlying
/// protocol as out of scope, §1).
pub fn classify_logical_status(status: u16, body_snippet: &str) -> Outcome {
    if status == 504 {
        return Outcome::Retryable {
            kind: FailureKind::GatewayTimeout,
            message: format!("gateway timeout (status {status})"),
        };
    }
    if body_snippet.to_ascii_lowercase().contains("timeout") {
        return Outcome::Retryable {
            kind: FailureKind::ClusterTimeout,
            message: format!("cluster timeout (status {status}): {body_snippet}"),
        };
    }
    Outcome::Fatal(format!("server returned status {status}: {body_snippet}"))
}
