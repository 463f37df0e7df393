//! Crate-wide error taxonomy.
//!
//! Each module owns a narrow `thiserror` enum for the failures it can
//! produce; [`DumpError`] aggregates them at the boundaries the
//! orchestrator (§4.J) and CLI actually observe. Transport-retryable
//! failures (spec.md §7) never reach this type - they are resolved inside
//! [`crate::retry::RetryPolicy`] before a job ever returns.

use thiserror::Error;

use crate::batch::BatchError;
use crate::file_provider::FileProviderError;
use crate::inventory::InventoryError;
use crate::options::ConfigError;
use crate::retry::{RetryExhausted, RetryOrFatal};

/// Top-level error returned by a dump job or the inventory orchestrator.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The server returned a response this client cannot interpret:
    /// unexpected status code, missing required header, malformed body.
    #[error("transport-fatal: {0}")]
    TransportFatal(String),

    /// The server's response was syntactically fine but reported failure.
    #[error("server returned an error: {0}")]
    ServerLogical(String),

    /// A file or directory could not be created, opened, or written.
    #[error("file system error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// Conflicting or out-of-range configuration; never produced mid-dump.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A semantic precondition failed (e.g. no collections matched).
    #[error("semantic error: {0}")]
    Semantic(String),

    /// A retry budget of 100 attempts at one call-site was exhausted.
    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),

    /// Batch/dump-context session lifecycle error.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Output file provider error.
    #[error(transparent)]
    FileProvider(#[from] FileProviderError),

    /// Inventory orchestration error.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

pub type DumpResult<T> = Result<T, DumpError>;

impl From<RetryOrFatal> for DumpError {
    fn from(value: RetryOrFatal) -> Self {
        match value {
            RetryOrFatal::Fatal(message) => DumpError::TransportFatal(message),
            RetryOrFatal::Exhausted(e) => DumpError::RetryExhausted(e),
        }
    }
}
