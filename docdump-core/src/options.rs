//! The validated option bag threaded through every component (spec.md §3).
//!
//! [`RawOptions`] is what a CLI (or any other front-end) fills in directly
//! from user input; [`Options::from_raw`] performs the clamping and
//! conflicting-flag validation spec.md §7 requires to happen "before any
//! I/O", and is the only way to obtain an [`Options`].

use std::path::PathBuf;

use thiserror::Error;

/// Lower bound for `initial_chunk_size` / `max_chunk_size` (128 KiB).
pub const MIN_CHUNK_SIZE: u64 = 128 * 1024;
/// Upper bound for `initial_chunk_size` / `max_chunk_size` (96 MiB).
pub const MAX_CHUNK_SIZE: u64 = 96 * 1024 * 1024;

/// Errors raised while validating a [`RawOptions`] into an [`Options`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Two options were set that cannot both be honored.
    #[error("conflicting options: {0}")]
    ConflictingFlags(String),

    /// An output path is required but was not given.
    #[error("output directory is required")]
    MissingOutputPath,
}

/// Unvalidated options as collected from a CLI or config file.
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub server_url: String,
    pub database: Option<String>,
    pub all_databases: bool,

    pub collections: Vec<String>,
    pub shards: Vec<String>,

    pub initial_chunk_size: u64,
    pub max_chunk_size: u64,
    pub thread_count: usize,

    pub dump_data: bool,
    pub dump_views: bool,
    pub include_system_collections: bool,
    pub force: bool,
    pub ignore_distribute_shards_like_errors: bool,
    pub overwrite: bool,
    pub progress: bool,

    pub output_path: Option<PathBuf>,
    pub maskings_file: Option<PathBuf>,

    pub use_gzip_for_storage: bool,
    pub use_gzip_for_transport: bool,
    pub use_vpack: bool,
    pub use_parallel_dump: bool,
    pub split_files: bool,

    pub dbserver_worker_threads: usize,
    pub dbserver_prefetch_batches: usize,
    pub local_writer_threads: usize,
    pub local_network_threads: usize,
}

/// Fully validated, clamped configuration. Cheap to clone; shared (usually
/// behind an `Arc`) by every worker and job.
#[derive(Debug, Clone)]
pub struct Options {
    pub server_url: String,
    pub database: Option<String>,
    pub all_databases: bool,

    pub collections: Vec<String>,
    pub shards: Vec<String>,

    pub initial_chunk_size: u64,
    pub max_chunk_size: u64,
    pub thread_count: usize,

    pub dump_data: bool,
    pub dump_views: bool,
    pub include_system_collections: bool,
    pub force: bool,
    pub ignore_distribute_shards_like_errors: bool,
    pub overwrite: bool,
    pub progress: bool,

    pub output_path: PathBuf,
    pub maskings_file: Option<PathBuf>,

    pub use_gzip_for_storage: bool,
    pub use_gzip_for_transport: bool,
    pub use_vpack: bool,
    pub use_parallel_dump: bool,
    pub split_files: bool,

    pub dbserver_worker_threads: usize,
    pub dbserver_prefetch_batches: usize,
    pub local_writer_threads: usize,
    pub local_network_threads: usize,
}

impl Options {
    /// Validates and clamps a [`RawOptions`] into a usable [`Options`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingFlags`] if `split_files` is set
    /// without `use_parallel_dump`, or if `all_databases` is combined with
    /// an explicit `database`. Returns [`ConfigError::MissingOutputPath`] if
    /// no output directory was given.
    pub fn from_raw(raw: RawOptions) -> Result<Self, ConfigError> {
        if raw.split_files && !raw.use_parallel_dump {
            return Err(ConfigError::ConflictingFlags(
                "--split-files requires --use-parallel-dump".into(),
            ));
        }
        if raw.all_databases && raw.database.is_some() {
            return Err(ConfigError::ConflictingFlags(
                "--all-databases cannot be combined with --server.database".into(),
            ));
        }
        let output_path = raw.output_path.ok_or(ConfigError::MissingOutputPath)?;

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let thread_count = raw.thread_count.clamp(1, 4 * cores);

        let initial_chunk_size = raw.initial_chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        let max_chunk_size = raw
            .max_chunk_size
            .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
            .max(initial_chunk_size);

        Ok(Options {
            server_url: raw.server_url,
            database: raw.database,
            all_databases: raw.all_databases,
            collections: raw.collections,
            shards: raw.shards,
            initial_chunk_size,
            max_chunk_size,
            thread_count,
            dump_data: raw.dump_data,
            dump_views: raw.dump_views,
            include_system_collections: raw.include_system_collections,
            force: raw.force,
            ignore_distribute_shards_like_errors: raw.ignore_distribute_shards_like_errors,
            overwrite: raw.overwrite,
            progress: raw.progress,
            output_path,
            maskings_file: raw.maskings_file,
            use_gzip_for_storage: raw.use_gzip_for_storage,
            use_gzip_for_transport: raw.use_gzip_for_transport,
            use_vpack: raw.use_vpack,
            use_parallel_dump: raw.use_parallel_dump,
            split_files: raw.split_files,
            dbserver_worker_threads: raw.dbserver_worker_threads.max(1),
            dbserver_prefetch_batches: raw.dbserver_prefetch_batches.max(1),
            local_writer_threads: raw.local_writer_threads.max(1),
            local_network_threads: raw.local_network_threads.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_raw(output_path: PathBuf) -> RawOptions {
        RawOptions {
            server_url: "http://localhost:8529".into(),
            initial_chunk_size: 1024 * 1024,
            max_chunk_size: 96 * 1024 * 1024,
            thread_count: 2,
            dump_data: true,
            output_path: Some(output_path),
            dbserver_worker_threads: 2,
            dbserver_prefetch_batches: 4,
            local_writer_threads: 2,
            local_network_threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn split_files_without_parallel_dump_is_rejected() {
        let mut raw = default_raw("/tmp/out".into());
        raw.split_files = true;
        raw.use_parallel_dump = false;
        let err = Options::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingFlags(_)));
    }

    #[test]
    fn all_databases_with_database_is_rejected() {
        let mut raw = default_raw("/tmp/out".into());
        raw.all_databases = true;
        raw.database = Some("mydb".into());
        let err = Options::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingFlags(_)));
    }

    #[test]
    fn chunk_sizes_are_clamped_to_bounds() {
        let mut raw = default_raw("/tmp/out".into());
        raw.initial_chunk_size = 16;
        raw.max_chunk_size = u64::MAX;
        let opts = Options::from_raw(raw).unwrap();
        assert_eq!(opts.initial_chunk_size, MIN_CHUNK_SIZE);
        assert_eq!(opts.max_chunk_size, MAX_CHUNK_SIZE);
    }

    #[test]
    fn thread_count_is_clamped_to_at_least_one() {
        let mut raw = default_raw("/tmp/out".into());
        raw.thread_count = 0;
        let opts = Options::from_raw(raw).unwrap();
        assert!(opts.thread_count >= 1);
    }

    #[test]
    fn missing_output_path_is_rejected() {
        let raw = RawOptions::default();
        let err = Options::from_raw(raw).unwrap_err();
        assert_eq!(err, ConfigError::MissingOutputPath);
    }
}
