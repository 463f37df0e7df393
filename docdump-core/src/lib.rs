//! Core library for the parallel logical-backup client.
//!
//! This library provides the pipeline that discovers a document database's
//! databases/collections/views/shards and streams their contents to a
//! restore-compatible on-disk layout, saturating server-side parallelism
//! while respecting server-imposed batch contracts.
//!
//! # Architecture
//!
//! - [`cancel`] - cooperative cancellation flag polled by the orchestrator
//! - [`options`] - validated, clamped configuration bag
//! - [`model`] - shared data model (collection/shard/view descriptors, stats)
//! - [`interfaces`] - the external collaborators (HTTP client, directory
//!   sink, maskings) as traits, plus the `dumpData` contract
//! - [`http`] / [`directory`] - concrete `reqwest`/filesystem implementations
//! - [`channel`] - bounded MPMC channel for the parallel pipeline
//! - [`retry`] - HTTP/transport retry classification and bounded backoff
//! - [`batch`] - replication batch session lifecycle
//! - [`file_provider`] - combined/split output file policy
//! - [`stats`] - lock-free run-wide counters (collections/batches/bytes)
//! - [`collection_dumper`] - the classical adaptive-chunk pull loop
//! - [`parallel`] - the per-dbserver parallel dump coordinator
//! - [`telemetry`] - two-axis block-counter bottleneck diagnostics
//! - [`queue`] - the task queue and worker pool
//! - [`jobs`] - the tagged dump-job variants dispatched through the queue
//! - [`inventory`] - the inventory orchestrator: the single public entry
//!   point that ties every other module together into a full dump run
//! - [`vpack`] - a simplified binary array body format
//! - [`error`] - the crate-wide error taxonomy

pub mod batch;
pub mod cancel;
pub mod channel;
pub mod collection_dumper;
pub mod directory;
pub mod error;
pub mod file_provider;
pub mod http;
pub mod interfaces;
pub mod inventory;
pub mod jobs;
pub mod model;
pub mod options;
pub mod parallel;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod telemetry;
pub mod vpack;

pub use error::{DumpError, DumpResult};
pub use cancel::CancellationToken;
pub use inventory::{run_dump, run_dump_full, run_dump_with_stats};
pub use options::{ConfigError, Options, RawOptions};
pub use stats::Stats;
