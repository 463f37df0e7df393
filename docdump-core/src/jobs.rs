//! The Dump Job tagged variant (spec.md §4.E).
//!
//! Three concrete job types are dispatched through [`crate::queue::TaskQueue`]:
//! [`PerCollectionJob`], [`PerShardJob`], and [`PerServerParallelJob`]. The
//! fourth variant spec.md names, *Inventory*, is handled directly by
//! [`crate::inventory::run_dump`] rather than as a queued job, per the
//! "chosen design" note in spec.md §4.E.

use std::sync::Arc;

use serde_json::Value;

use crate::batch::{BatchSession, ProcessIdentity, SharedBatch};
use crate::collection_dumper::{pull_collection, PullRequest};
use crate::error::DumpError;
use crate::file_provider::OutputFileProvider;
use crate::interfaces::{DirectorySink, HttpClient, Maskings};
use crate::model::{CollectionDescriptor, DeploymentMode};
use crate::options::Options;
use crate::parallel::{self, ParallelDumpRequest, ShardTarget};
use crate::queue::{Job, TaskQueue};
use crate::retry::RetryPolicy;
use crate::stats::Stats;

/// Everything a job needs besides its own specific target, shared via `Arc`
/// across every job of one database dump.
pub struct JobContext {
    pub base_url: String,
    pub database: String,
    pub options: Arc<Options>,
    pub identity: Arc<ProcessIdentity>,
    pub retry_policy: Arc<RetryPolicy>,
    pub directory: Arc<dyn DirectorySink>,
    pub file_provider: Arc<OutputFileProvider>,
    pub stats: Arc<Stats>,
    pub maskings: Arc<dyn Maskings + Send + Sync>,
}

/// Strips server-assigned/ephemeral fields from a collection's `parameters`
/// blob before it's echoed as `<coll>.structure.json` (spec.md §3:
/// `parameters.shadowCollections` stripped; SPEC_FULL.md §6 additionally
/// strips `objectId`/`globallyUniqueId`, neither of which a restore-compatible
/// structure file should pin).
pub fn strip_internal_fields(parameters: &Value) -> Value {
    let mut cleaned = parameters.clone();
    if let Some(obj) = cleaned.as_object_mut() {
        obj.remove("shadowCollections");
        obj.remove("objectId");
        obj.remove("globallyUniqueId");
    }
    cleaned
}

fn write_structure_file(
    directory: &dyn DirectorySink,
    database: &str,
    collection: &CollectionDescriptor,
) -> Result<(), DumpError> {
    let sanitized = serde_json::json!({
        "parameters": strip_internal_fields(&collection.parameters),
        "indexes": collection.parameters.get("indexes").cloned().unwrap_or(Value::Array(vec![])),
    });
    let file = directory
        .create_file(database, &format!("{}.structure.json", collection.name), false)
        .map_err(crate::file_provider::FileProviderError::from)?;
    let bytes = serde_json::to_vec_pretty(&sanitized)
        .map_err(|e| DumpError::TransportFatal(format!("failed to serialize structure: {e}")))?;
    file.write(&bytes)?;
    Ok(())
}

/// Classical-path job for one collection (spec.md §4.E "PerCollection").
pub struct PerCollectionJob {
    pub ctx: Arc<JobContext>,
    pub collection: CollectionDescriptor,
    pub deployment: DeploymentMode,
    /// `Some` in single-server mode: the database-wide batch every
    /// `PerCollectionJob` extends before pulling (spec.md §4.E).
    pub shared_batch: Option<Arc<SharedBatch>>,
    /// Where `PerShardJob`s get fanned out to in cluster mode.
    pub queue: Arc<TaskQueue>,
    /// `false` when a `PerServerParallelJob` already covers this collection's
    /// data (parallel cluster mode, spec.md §4.J step 9): this job then only
    /// writes the structure file and skips spawning `PerShardJob`s.
    pub spawn_shard_jobs: bool,
}

impl Job for PerCollectionJob {
    fn run(&self, http_client: &dyn HttpClient) -> Result<(), DumpError> {
        if !self.ctx.maskings.should_dump_structure(&self.collection.name) {
            return Ok(());
        }

        write_structure_file(self.ctx.directory.as_ref(), &self.ctx.database, &self.collection)?;
        self.ctx.stats.add_collection();

        if !self.ctx.options.dump_data || !self.ctx.maskings.should_dump_data(&self.collection.name) {
            return Ok(());
        }

        self.ctx
            .file_provider
            .prepare_collection(&self.collection.name, &self.collection.id)?;

        match self.deployment {
            DeploymentMode::SingleServer => {
                let batch = self
                    .shared_batch
                    .as_ref()
                    .expect("single-server PerCollectionJob always carries a shared batch");
                batch.extend(http_client);
                let file = self
                    .ctx
                    .file_provider
                    .get_file(&self.collection.name, &self.collection.id)?;
                let request = PullRequest {
                    base_url: &self.ctx.base_url,
                    collection: &self.collection.name,
                    dbserver: None,
                    use_vpack: self.ctx.options.use_vpack,
                    use_gzip_for_transport: self.ctx.options.use_gzip_for_transport,
                    initial_chunk_size: self.ctx.options.initial_chunk_size,
                    max_chunk_size: self.ctx.options.max_chunk_size,
                };
                pull_collection(
                    http_client,
                    &self.ctx.retry_policy,
                    batch.id(),
                    &self.ctx.stats,
                    self.ctx.maskings.as_ref(),
                    file.as_ref(),
                    &request,
                )?;
            }
            DeploymentMode::Cluster if !self.spawn_shard_jobs => {}
            DeploymentMode::Cluster => {
                for (shard_id, servers) in self.collection.shards() {
                    let Some(primary) = servers.first() else {
                        continue;
                    };
                    self.queue.push(Box::new(PerShardJob {
                        ctx: Arc::clone(&self.ctx),
                        collection_name: self.collection.name.clone(),
                        collection_id: self.collection.id.clone(),
                        shard_id,
                        dbserver: primary.clone(),
                    }));
                }
            }
        }
        Ok(())
    }

    fn label(&self) -> String {
        format!("per-collection:{}", self.collection.name)
    }
}

/// Cluster classical-path job for one shard (spec.md §4.E "PerShard"): opens
/// its own batch against the shard's primary dbserver, pulls it, and closes
/// the batch when the job returns.
pub struct PerShardJob {
    pub ctx: Arc<JobContext>,
    pub collection_name: String,
    pub collection_id: String,
    pub shard_id: String,
    pub dbserver: String,
}

impl Job for PerShardJob {
    fn run(&self, http_client: &dyn HttpClient) -> Result<(), DumpError> {
        let batch = BatchSession::create(
            http_client,
            &self.ctx.base_url,
            Some(&self.dbserver),
            &self.ctx.identity,
            600,
        )?;
        let file = self
            .ctx
            .file_provider
            .get_file(&self.collection_name, &self.collection_id)?;
        let request = PullRequest {
            base_url: &self.ctx.base_url,
            collection: &self.shard_id,
            dbserver: Some(&self.dbserver),
            use_vpack: self.ctx.options.use_vpack,
            use_gzip_for_transport: self.ctx.options.use_gzip_for_transport,
            initial_chunk_size: self.ctx.options.initial_chunk_size,
            max_chunk_size: self.ctx.options.max_chunk_size,
        };
        pull_collection(
            http_client,
            &self.ctx.retry_policy,
            batch.id(),
            &self.ctx.stats,
            self.ctx.maskings.as_ref(),
            file.as_ref(),
            &request,
        )
    }

    fn label(&self) -> String {
        format!("per-shard:{}/{}", self.collection_name, self.shard_id)
    }
}

/// Parallel-path job for one dbserver (spec.md §4.E "PerServerParallel").
/// Ignores the worker's own `http_client` - the pipeline it drives builds
/// its own short-lived clients per thread (spec.md §4.H) - and simply blocks
/// until every network/writer thread it spawns has joined.
pub struct PerServerParallelJob {
    pub ctx: Arc<JobContext>,
    pub dbserver: String,
    pub shards: Vec<ShardTarget>,
    pub client_factory: Arc<parallel::ClientFactory>,
}

impl Job for PerServerParallelJob {
    fn run(&self, _http_client: &dyn HttpClient) -> Result<(), DumpError> {
        let request = ParallelDumpRequest {
            base_url: self.ctx.base_url.clone(),
            dbserver: self.dbserver.clone(),
            shards: self.shards.clone(),
            use_vpack: self.ctx.options.use_vpack,
            batch_size: self.ctx.options.initial_chunk_size,
            prefetch_count: self.ctx.options.dbserver_prefetch_batches as u32,
            dbserver_worker_threads: self.ctx.options.dbserver_worker_threads,
            local_network_threads: self.ctx.options.local_network_threads,
            local_writer_threads: self.ctx.options.local_writer_threads,
        };
        parallel::run_parallel_dbserver(
            Arc::clone(&self.client_factory),
            Arc::clone(&self.ctx.retry_policy),
            request,
            Arc::clone(&self.ctx.file_provider),
            Arc::clone(&self.ctx.stats),
            Arc::clone(&self.ctx.maskings),
        )
    }

    fn label(&self) -> String {
        format!("per-server-parallel:{}", self.dbserver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_internal_fields_removes_ephemeral_keys() {
        let parameters = json!({
            "shadowCollections": ["x"],
            "objectId": "123",
            "globallyUniqueId": "h/1",
            "keepMe": true,
        });
        let cleaned = strip_internal_fields(&parameters);
        assert!(cleaned.get("shadowCollections").is_none());
        assert!(cleaned.get("objectId").is_none());
        assert!(cleaned.get("globallyUniqueId").is_none());
        assert_eq!(cleaned["keepMe"], json!(true));
    }
}
