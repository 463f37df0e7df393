//! Parallel Dump Coordinator, per dbserver (spec.md §4.H).

mod network;
mod writer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::channel::BoundedChannel;
use crate::error::DumpError;
use crate::file_provider::OutputFileProvider;
use crate::interfaces::{HttpClient, HttpMethod, Maskings};
use crate::retry::RetryPolicy;
use crate::stats::Stats;
use crate::telemetry::BlockCounter;

/// A single shard assigned to this dbserver job.
#[derive(Debug, Clone)]
pub struct ShardTarget {
    pub shard_id: String,
    pub collection_name: String,
    pub collection_fallback_id: String,
}

/// A frame handed from a network thread to a writer thread.
pub struct Frame {
    pub shard_id: String,
    pub block_counts: Option<i64>,
    pub gzip_encoded: bool,
    pub body: Vec<u8>,
}

/// Builds a fresh [`HttpClient`] for a network/writer/teardown thread.
/// Each parallel-dump thread owns its client so a transport failure on one
/// thread never affects another's connection pool.
pub type ClientFactory = dyn Fn() -> Result<Box<dyn HttpClient>, crate::interfaces::TransportError> + Send + Sync;

pub struct ParallelDumpRequest {
    pub base_url: String,
    pub dbserver: String,
    pub shards: Vec<ShardTarget>,
    pub use_vpack: bool,
    pub batch_size: u64,
    pub prefetch_count: u32,
    /// dbserver-side worker threads requested for this dump context (spec.md
    /// §3 `dbserver_worker_threads`), sent as the `parallelism` body field.
    /// Independent of `local_network_threads` (spec.md §9).
    pub dbserver_worker_threads: usize,
    pub local_network_threads: usize,
    pub local_writer_threads: usize,
}

/// Runs the full per-dbserver parallel pipeline: creates the dump context,
/// spawns network and writer threads, joins them, and tears the context
/// down with a fresh client (spec.md §4.H).
pub fn run_parallel_dbserver(
    client_factory: Arc<ClientFactory>,
    retry_policy: Arc<RetryPolicy>,
    request: ParallelDumpRequest,
    file_provider: Arc<OutputFileProvider>,
    stats: Arc<Stats>,
    maskings: Arc<dyn Maskings + Send + Sync>,
) -> Result<(), DumpError> {
    let setup_client = client_factory().map_err(|e| DumpError::TransportFatal(e.to_string()))?;
    let dump_id = create_dump_context(setup_client.as_ref(), &request)?;

    let channel: Arc<BoundedChannel<Frame>> =
        BoundedChannel::new(request.local_writer_threads.max(1));
    let batch_counter = Arc::new(AtomicU64::new(1));
    let block_counter = Arc::new(BlockCounter::default());
    let errors: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();

    for network_index in 0..request.local_network_threads.max(1) {
        let guard = crate::channel::ProducerGuard::new(Arc::clone(&channel));
        let client_factory = Arc::clone(&client_factory);
        let retry_policy = Arc::clone(&retry_policy);
        let batch_counter = Arc::clone(&batch_counter);
        let block_counter = Arc::clone(&block_counter);
        let errors = Arc::clone(&errors);
        let base_url = request.base_url.clone();
        let dbserver = request.dbserver.clone();
        let dump_id = dump_id.clone();
        let stats = Arc::clone(&stats);

        handles.push(thread::spawn(move || {
            let _guard = guard;
            let client = match client_factory() {
                Ok(c) => c,
                Err(e) => {
                    errors.lock().unwrap().push(format!("network-{network_index}: {e}"));
                    return;
                }
            };
            if let Err(e) = network::run_network_thread(
                network_index,
                client.as_ref(),
                &retry_policy,
                &base_url,
                &dbserver,
                &dump_id,
                &batch_counter,
                &channel,
                &block_counter,
                stats.as_ref(),
            ) {
                errors.lock().unwrap().push(format!("network-{network_index}: {e}"));
            }
        }));
    }

    let shards_by_id: Arc<std::collections::HashMap<String, ShardTarget>> = Arc::new(
        request
            .shards
            .iter()
            .map(|s| (s.shard_id.clone(), s.clone()))
            .collect(),
    );

    for writer_index in 0..request.local_writer_threads.max(1) {
        let channel = Arc::clone(&channel);
        let block_counter = Arc::clone(&block_counter);
        let file_provider = Arc::clone(&file_provider);
        let stats = Arc::clone(&stats);
        let maskings = Arc::clone(&maskings);
        let errors = Arc::clone(&errors);
        let shards_by_id = Arc::clone(&shards_by_id);
        let use_vpack = request.use_vpack;

        handles.push(thread::spawn(move || {
            if let Err(e) = writer::run_writer_thread(
                &channel,
                &block_counter,
                file_provider.as_ref(),
                stats.as_ref(),
                maskings.as_ref(),
                shards_by_id.as_ref(),
                use_vpack,
            ) {
                errors.lock().unwrap().push(format!("writer-{writer_index}: {e}"));
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    finish_dump_context(client_factory.as_ref(), &request, &dump_id);

    let errors = errors.lock().unwrap().clone();
    if let Some(first) = errors.into_iter().next() {
        return Err(DumpError::TransportFatal(first));
    }
    Ok(())
}

fn create_dump_context(
    client: &dyn HttpClient,
    request: &ParallelDumpRequest,
) -> Result<String, DumpError> {
    let shards: Vec<String> = request.shards.iter().map(|s| s.shard_id.clone()).collect();
    let body = serde_json::json!({
        "batchSize": request.batch_size,
        "prefetchCount": request.prefetch_count,
        "parallelism": request.dbserver_worker_threads.max(1),
        "shards": shards,
    });
    let url = format!(
        "{}/_api/dump/start?useVPack={}&dbserver={}",
        request.base_url, request.use_vpack, request.dbserver
    );
    let response = client
        .request(
            HttpMethod::Post,
            &url,
            &[("content-type".to_string(), "application/json".to_string())],
            Some(serde_json::to_vec(&body).unwrap_or_default()),
        )
        .map_err(|e| DumpError::TransportFatal(e.to_string()))?;

    response
        .header("x-arango-dump-id")
        .ok_or_else(|| DumpError::TransportFatal("missing x-arango-dump-id header".into()))
}

fn finish_dump_context(client_factory: &ClientFactory, request: &ParallelDumpRequest, dump_id: &str) {
    let client = match client_factory() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "could not build client to tear down dump context");
            return;
        }
    };
    let url = format!(
        "{}/_api/dump/{}?dbserver={}",
        request.base_url, dump_id, request.dbserver
    );
    if let Err(e) = client.request(HttpMethod::Delete, &url, &[], None) {
        tracing::warn!(error = %e, dump_id, "failed to tear down dump context");
    }
}
