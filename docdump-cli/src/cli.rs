//! CLI argument definitions using clap derive macros (spec.md §6 "CLI
//! surface", §3 "Options").

use std::path::PathBuf;

use clap::Parser;
use docdump_core::options::{ConfigError, RawOptions};

/// Parallel logical-backup client for a distributed document database.
///
/// Connects to a single server or a cluster coordinator, discovers the
/// databases/collections/views/shards to export, and streams their
/// contents into `output-directory` in a restore-compatible layout.
#[derive(Parser, Debug)]
#[command(name = "docdump")]
#[command(author, version, about)]
pub struct Args {
    /// Output directory; one subdirectory per dumped database.
    pub output_directory: PathBuf,

    /// Base URL of the server or cluster coordinator.
    #[arg(long = "server", default_value = "http://localhost:8529")]
    pub server_url: String,

    /// Database to dump. Mutually exclusive with `--all-databases`.
    #[arg(long = "server.database")]
    pub database: Option<String>,

    /// Dump every database the connecting user can access.
    #[arg(long)]
    pub all_databases: bool,

    /// Restrict the dump to these collection names (repeatable).
    #[arg(long, value_delimiter = ',')]
    pub collections: Vec<String>,

    /// Restrict the dump to these shard ids (repeatable, parallel mode).
    #[arg(long, value_delimiter = ',')]
    pub shards: Vec<String>,

    /// Initial per-request chunk size in bytes (clamped to [128 KiB, 96 MiB]).
    #[arg(long, default_value_t = 1024 * 1024)]
    pub initial_chunk_size: u64,

    /// Maximum chunk size in bytes the adaptive policy grows to.
    #[arg(long, default_value_t = 96 * 1024 * 1024)]
    pub max_chunk_size: u64,

    /// Worker pool size (clamped to [1, 4x available cores]).
    #[arg(short = 't', long, default_value_t = 2)]
    pub thread_count: usize,

    /// Dump document data, not just collection structure.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dump_data: bool,

    /// Dump view definitions as `<view>.view.json`.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dump_views: bool,

    /// Include system collections (names starting with `_`).
    #[arg(long)]
    pub include_system_collections: bool,

    /// Continue past a failing database instead of stopping at the first.
    #[arg(long)]
    pub force: bool,

    /// Don't abort when a `distributeShardsLike` prototype is missing from
    /// the dump set.
    #[arg(long)]
    pub ignore_distribute_shards_like_errors: bool,

    /// Overwrite an existing output directory instead of failing.
    #[arg(long)]
    pub overwrite: bool,

    /// Report live progress while the dump runs.
    #[arg(long)]
    pub progress: bool,

    /// Path to a maskings JSON file; omit to dump every document verbatim.
    #[arg(long)]
    pub maskings_file: Option<PathBuf>,

    /// Gzip-compress output files on disk.
    #[arg(long)]
    pub use_gzip_for_storage: bool,

    /// Request gzip-compressed bodies from the server.
    #[arg(long)]
    pub use_gzip_for_transport: bool,

    /// Use the binary VPack array body format instead of newline-delimited JSON.
    #[arg(long)]
    pub use_vpack: bool,

    /// Use the parallel per-dbserver streamed pipeline (cluster only).
    #[arg(long)]
    pub use_parallel_dump: bool,

    /// One output file per batch instead of one per collection. Requires
    /// `--use-parallel-dump`.
    #[arg(long)]
    pub split_files: bool,

    /// dbserver-side worker threads requested per dump context.
    #[arg(long, default_value_t = 2)]
    pub dbserver_worker_threads: usize,

    /// dbserver-side batches to prefetch per dump context.
    #[arg(long, default_value_t = 4)]
    pub dbserver_prefetch_batches: usize,

    /// Local writer threads per parallel dbserver job.
    #[arg(long, default_value_t = 2)]
    pub local_writer_threads: usize,

    /// Local network threads per parallel dbserver job.
    #[arg(long, default_value_t = 2)]
    pub local_network_threads: usize,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Converts parsed CLI arguments into the core's unvalidated option bag.
    /// [`docdump_core::options::Options::from_raw`] does the actual clamping
    /// and conflicting-flag validation (spec.md §7 "Configuration" errors).
    pub fn into_raw_options(self) -> Result<RawOptions, ConfigError> {
        Ok(RawOptions {
            server_url: self.server_url,
            database: self.database,
            all_databases: self.all_databases,
            collections: self.collections,
            shards: self.shards,
            initial_chunk_size: self.initial_chunk_size,
            max_chunk_size: self.max_chunk_size,
            thread_count: self.thread_count,
            dump_data: self.dump_data,
            dump_views: self.dump_views,
            include_system_collections: self.include_system_collections,
            force: self.force,
            ignore_distribute_shards_like_errors: self.ignore_distribute_shards_like_errors,
            overwrite: self.overwrite,
            progress: self.progress,
            output_path: Some(self.output_directory),
            maskings_file: self.maskings_file,
            use_gzip_for_storage: self.use_gzip_for_storage,
            use_gzip_for_transport: self.use_gzip_for_transport,
            use_vpack: self.use_vpack,
            use_parallel_dump: self.use_parallel_dump,
            split_files: self.split_files,
            dbserver_worker_threads: self.dbserver_worker_threads,
            dbserver_prefetch_batches: self.dbserver_prefetch_batches,
            local_writer_threads: self.local_writer_threads,
            local_network_threads: self.local_network_threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_with_only_the_output_directory() {
        let args = Args::try_parse_from(["docdump", "/tmp/out"]).unwrap();
        assert_eq!(args.output_directory, PathBuf::from("/tmp/out"));
        assert_eq!(args.server_url, "http://localhost:8529");
        assert!(args.dump_data);
        assert!(args.dump_views);
        assert!(!args.use_parallel_dump);
        assert!(!args.split_files);
    }

    #[test]
    fn missing_output_directory_is_rejected() {
        let result = Args::try_parse_from(["docdump"]);
        assert!(result.is_err());
    }

    #[test]
    fn collections_accepts_comma_separated_list() {
        let args = Args::try_parse_from(["docdump", "/tmp/out", "--collections=a,b,c"]).unwrap();
        assert_eq!(args.collections, vec!["a", "b", "c"]);
    }

    #[test]
    fn dump_data_can_be_explicitly_disabled() {
        let args = Args::try_parse_from(["docdump", "/tmp/out", "--dump-data=false"]).unwrap();
        assert!(!args.dump_data);
    }

    #[test]
    fn verbose_flag_is_countable() {
        let args = Args::try_parse_from(["docdump", "/tmp/out", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn split_files_without_parallel_dump_is_rejected_by_options_validation() {
        let args = Args::try_parse_from(["docdump", "/tmp/out", "--split-files"]).unwrap();
        let raw = args.into_raw_options().unwrap();
        let err = docdump_core::options::Options::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingFlags(_)));
    }
}
