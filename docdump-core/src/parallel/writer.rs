//! Writer thread of the per-dbserver parallel dump coordinator
//! (spec.md §4.H).
//!
//! Pops frames from the shared [`BoundedChannel`] until it's closed and
//! drained, resolving each frame's shard to its collection's output file
//! and handing the (possibly decompressed) body to the `dumpData`
//! contract. A small per-thread cache remembers the `(file, collection)`
//! pair for the first shard resolved, since one writer thread typically
//! sees the same handful of shards repeatedly.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;

use crate::channel::BoundedChannel;
use crate::error::DumpError;
use crate::file_provider::OutputFileProvider;
use crate::interfaces::{dump_data, Maskings, OutputFile};
use crate::stats::Stats;
use crate::telemetry::BlockCounter;

use super::{Frame, ShardTarget};

pub fn run_writer_thread(
    channel: &BoundedChannel<Frame>,
    block_counter: &BlockCounter,
    file_provider: &OutputFileProvider,
    stats: &Stats,
    maskings: &dyn Maskings,
    shards_by_id: &HashMap<String, ShardTarget>,
    use_vpack: bool,
) -> Result<(), DumpError> {
    let mut cache: HashMap<String, Arc<dyn OutputFile>> = HashMap::new();

    loop {
        let (frame, was_empty) = channel.pop();
        if was_empty {
            block_counter.writer_blocked_on_empty();
        }
        let frame = match frame {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if let Some(delta) = frame.block_counts {
            block_counter.apply_remote_delta(delta);
        }

        let target = shards_by_id.get(&frame.shard_id).ok_or_else(|| {
            DumpError::TransportFatal(format!("unknown shard id in response: {}", frame.shard_id))
        })?;

        let file = match cache.get(&target.shard_id) {
            Some(file) => Arc::clone(file),
            None => {
                let file = file_provider.get_file(&target.collection_name, &target.collection_fallback_id)?;
                cache.insert(target.shard_id.clone(), Arc::clone(&file));
                file
            }
        };

        let body = if frame.gzip_encoded {
            let mut decoder = GzDecoder::new(frame.body.as_slice());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| {
                DumpError::TransportFatal(format!("failed to inflate response: {e}"))
            })?;
            out
        } else {
            frame.body
        };

        dump_data(stats, maskings, file.as_ref(), &body, &target.collection_name, use_vpack)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_provider::FileMode;
    use crate::interfaces::fakes::FakeFile;
    use crate::interfaces::{DirectorySink, NoMaskings};
    use std::sync::Mutex;

    struct FakeDirectory {
        files: Mutex<HashMap<String, Arc<dyn OutputFile>>>,
    }

    impl DirectorySink for FakeDirectory {
        fn create_database_dir(
            &self,
            _database: &str,
            _overwrite: bool,
        ) -> Result<(), crate::interfaces::DirectoryError> {
            Ok(())
        }
        fn create_file(
            &self,
            _database: &str,
            relative_name: &str,
            _gzip: bool,
        ) -> Result<Arc<dyn OutputFile>, crate::interfaces::DirectoryError> {
            let mut files = self.files.lock().unwrap();
            Ok(Arc::clone(
                files
                    .entry(relative_name.to_string())
                    .or_insert_with(|| Arc::new(FakeFile::new())),
            ))
        }
    }

    fn target(shard: &str, collection: &str) -> ShardTarget {
        ShardTarget {
            shard_id: shard.to_string(),
            collection_name: collection.to_string(),
            collection_fallback_id: "1".to_string(),
        }
    }

    #[test]
    fn writes_frames_to_the_collection_file_by_shard_id() {
        let directory = Arc::new(FakeDirectory {
            files: Mutex::new(HashMap::new()),
        });
        let provider = OutputFileProvider::new(directory, "db", FileMode::Combined, false, false);
        let channel: Arc<BoundedChannel<Frame>> = BoundedChannel::new(4);
        let stats = Stats::new();
        let block_counter = BlockCounter::new();

        let mut shards = HashMap::new();
        shards.insert("s1".to_string(), target("s1", "orders"));

        channel.push(Frame {
            shard_id: "s1".to_string(),
            block_counts: Some(5),
            gzip_encoded: false,
            body: b"{\"a\":1}\n".to_vec(),
        });
        channel.close();

        run_writer_thread(
            &channel,
            &block_counter,
            &provider,
            &stats,
            &NoMaskings,
            &shards,
            false,
        )
        .unwrap();

        assert_eq!(stats.total_written(), 8);
        assert_eq!(block_counter.remote_value(), 5);
    }

    #[test]
    fn unknown_shard_id_is_fatal() {
        let directory = Arc::new(FakeDirectory {
            files: Mutex::new(HashMap::new()),
        });
        let provider = OutputFileProvider::new(directory, "db", FileMode::Combined, false, false);
        let channel: Arc<BoundedChannel<Frame>> = BoundedChannel::new(4);
        let stats = Stats::new();
        let block_counter = BlockCounter::new();
        let shards = HashMap::new();

        channel.push(Frame {
            shard_id: "unknown".to_string(),
            block_counts: None,
            gzip_encoded: false,
            body: b"{}".to_vec(),
        });
        channel.close();

        let err = run_writer_thread(
            &channel,
            &block_counter,
            &provider,
            &stats,
            &NoMaskings,
            &shards,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, DumpError::TransportFatal(_)));
    }

    #[test]
    fn pop_on_closed_empty_channel_returns_ok() {
        let directory = Arc::new(FakeDirectory {
            files: Mutex::new(HashMap::new()),
        });
        let provider = OutputFileProvider::new(directory, "db", FileMode::Combined, false, false);
        let channel: Arc<BoundedChannel<Frame>> = BoundedChannel::new(4);
        channel.close();
        let stats = Stats::new();
        let block_counter = BlockCounter::new();
        let shards = HashMap::new();

        run_writer_thread(
            &channel,
            &block_counter,
            &provider,
            &stats,
            &NoMaskings,
            &shards,
            false,
        )
        .unwrap();
    }
}
