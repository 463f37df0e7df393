//! Inventory Orchestrator (spec.md §4.J): the single entry point that ties
//! every other module together into a full dump run. For each target
//! database it detects the deployment mode, fetches the inventory, writes
//! the database-level metadata files, filters and validates the collection
//! set, and fans dump jobs out onto a [`TaskQueue`] before waiting for them
//! to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::batch::{ProcessIdentity, SharedBatch};
use crate::cancel::CancellationToken;
use crate::error::{DumpError, DumpResult};
use crate::file_provider::{FileMode, OutputFileProvider};
use crate::http::ReqwestHttpClient;
use crate::interfaces::{DirectorySink, HttpClient, HttpMethod, HttpResponse, Maskings};
use crate::jobs::{JobContext, PerCollectionJob, PerServerParallelJob};
use crate::model::{CollectionDescriptor, DeploymentMode, DumpMeta, ViewDescriptor};
use crate::options::Options;
use crate::parallel::{self, ShardTarget};
use crate::queue::{spawn_workers, TaskQueue};
use crate::retry::{classify_logical_status, classify_transport, RetryOrFatal, RetryPolicy};
use crate::stats::Stats;

/// Request timeout for every HTTP client this crate builds. Not exposed as
/// an option: spec.md §5 leaves HTTP timeouts to the transport layer, and
/// `reqwest`'s own connect/read timeouts are what actually bound a hung
/// call - this is a generous backstop, not a tuning knob.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("request to {call_site} failed: {message}")]
    Http { call_site: String, message: String },

    #[error("could not parse server response: {0}")]
    InvalidResponse(String),

    #[error("no collections matched the requested restrict list")]
    NoCollectionsMatched,

    #[error("distributeShardsLike target '{0}' is not included in this dump")]
    DistributeShardsLikeMissing(String),

    #[error(transparent)]
    Directory(#[from] crate::interfaces::DirectoryError),

    #[error(transparent)]
    Batch(#[from] crate::batch::BatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of a full (possibly multi-database) dump run.
pub struct DumpOutcome {
    pub stats: Arc<Stats>,
    /// One entry per database that failed, only ever non-empty when
    /// `options.force` let the run continue past earlier failures.
    pub errors: Vec<String>,
}

/// Runs the inventory orchestrator end to end against every database in
/// `options`'s target set, writing through `directory` and applying
/// `maskings` to every document. This is the crate's single public entry
/// point (spec.md §4.J).
pub fn run_dump(
    options: Options,
    directory: Arc<dyn DirectorySink>,
    maskings: Arc<dyn Maskings + Send + Sync>,
) -> DumpResult<DumpOutcome> {
    run_dump_full(options, directory, maskings, Arc::new(Stats::new()), None)
}

/// Same as [`run_dump`], but lets the caller supply the [`Stats`] handle up
/// front instead of only receiving it in the returned [`DumpOutcome`]. The
/// CLI's `--progress` reporting (SPEC_FULL.md §6) polls this handle from a
/// separate thread while the dump is still running; `run_dump` itself has
/// no use for a pre-built handle and just creates one.
pub fn run_dump_with_stats(
    options: Options,
    directory: Arc<dyn DirectorySink>,
    maskings: Arc<dyn Maskings + Send + Sync>,
    stats: Arc<Stats>,
) -> DumpResult<DumpOutcome> {
    run_dump_full(options, directory, maskings, stats, None)
}

/// Full entry point: like [`run_dump`], but also accepts an optional
/// [`CancellationToken`]. When the token is cancelled (typically from a
/// Ctrl-C handler, SPEC_FULL.md §6), the run behaves exactly like a worker
/// error (spec.md §4.F "report_error"): the current database's task queue
/// is drained of queued-but-not-started jobs, in-flight HTTP calls finish,
/// and no further database in a `--all-databases` run is started.
pub fn run_dump_full(
    options: Options,
    directory: Arc<dyn DirectorySink>,
    maskings: Arc<dyn Maskings + Send + Sync>,
    stats: Arc<Stats>,
    cancel: Option<CancellationToken>,
) -> DumpResult<DumpOutcome> {
    let options = Arc::new(options);
    let identity = Arc::new(ProcessIdentity::new());
    let retry_policy = Arc::new(RetryPolicy::default());

    let setup_client = ReqwestHttpClient::new(DEFAULT_REQUEST_TIMEOUT, options.use_gzip_for_transport)
        .map_err(|e| DumpError::TransportFatal(e.to_string()))?;

    let target_databases = if options.all_databases {
        list_accessible_databases(&setup_client, &retry_policy, &options.server_url)
            .map_err(DumpError::from)?
    } else {
        vec![options
            .database
            .clone()
            .unwrap_or_else(|| "_system".to_string())]
    };

    let mut errors = Vec::new();
    for database in &target_databases {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            errors.push(format!("{database}: dump cancelled before it started"));
            break;
        }
        let outcome = dump_one_database(
            &options,
            database,
            Arc::clone(&directory),
            Arc::clone(&maskings),
            Arc::clone(&identity),
            Arc::clone(&retry_policy),
            Arc::clone(&stats),
            &setup_client,
            cancel.clone(),
        );
        if let Err(e) = outcome {
            tracing::error!(database, error = %e, "database dump failed");
            errors.push(format!("{database}: {e}"));
            if !options.force {
                return Err(DumpError::Semantic(errors.join("; ")));
            }
        }
    }

    Ok(DumpOutcome { stats, errors })
}

#[allow(clippy::too_many_arguments)]
fn dump_one_database(
    options: &Arc<Options>,
    database: &str,
    directory: Arc<dyn DirectorySink>,
    maskings: Arc<dyn Maskings + Send + Sync>,
    identity: Arc<ProcessIdentity>,
    retry_policy: Arc<RetryPolicy>,
    stats: Arc<Stats>,
    setup_client: &dyn HttpClient,
    cancel: Option<CancellationToken>,
) -> Result<(), InventoryError> {
    directory.create_database_dir(database, options.overwrite)?;

    let deployment = detect_deployment_mode(setup_client, &retry_policy, &options.server_url)?;

    let use_gzip = options.use_gzip_for_transport;
    let shared_batch: Option<Arc<SharedBatch>> = match deployment {
        DeploymentMode::SingleServer => Some(Arc::new(SharedBatch::create(
            setup_client,
            &options.server_url,
            None,
            &identity,
            600,
            move || {
                ReqwestHttpClient::new(DEFAULT_REQUEST_TIMEOUT, use_gzip)
                    .map(|c| Box::new(c) as Box<dyn HttpClient>)
            },
        )?)),
        DeploymentMode::Cluster => None,
    };

    let inventory = fetch_inventory(
        setup_client,
        &retry_policy,
        &options.server_url,
        deployment,
        options.include_system_collections,
        shared_batch.as_ref().map(|b| b.id()),
    )?;

    let properties = fetch_database_properties(setup_client, &retry_policy, &options.server_url)
        .unwrap_or(Value::Null);

    let meta = DumpMeta {
        database: database.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        last_tick_at_dump_start: inventory.last_tick,
        use_envelope: false,
        use_vpack: options.use_vpack,
        properties,
    };
    write_dump_meta(directory.as_ref(), database, &meta)?;

    if options.dump_views {
        for view in &inventory.views {
            if !view.name.is_empty() {
                write_view_file(directory.as_ref(), database, view)?;
            }
        }
    }

    let kept = filter_collections(inventory.collections, options)?;

    let file_provider = Arc::new(OutputFileProvider::new(
        Arc::clone(&directory),
        database.to_string(),
        if options.split_files {
            FileMode::Split
        } else {
            FileMode::Combined
        },
        options.use_vpack,
        options.use_gzip_for_storage,
    ));

    let queue = TaskQueue::new();
    let ctx = Arc::new(JobContext {
        base_url: options.server_url.clone(),
        database: database.to_string(),
        options: Arc::clone(options),
        identity: Arc::clone(&identity),
        retry_policy: Arc::clone(&retry_policy),
        directory: Arc::clone(&directory),
        file_provider: Arc::clone(&file_provider),
        stats: Arc::clone(&stats),
        maskings: Arc::clone(&maskings),
    });

    let parallel_cluster = options.use_parallel_dump && deployment == DeploymentMode::Cluster;

    for collection in &kept {
        queue.push(Box::new(PerCollectionJob {
            ctx: Arc::clone(&ctx),
            collection: collection.clone(),
            deployment,
            shared_batch: shared_batch.clone(),
            queue: Arc::clone(&queue),
            spawn_shard_jobs: !parallel_cluster,
        }));
    }

    if parallel_cluster && options.dump_data {
        let use_gzip = options.use_gzip_for_transport;
        let client_factory: Arc<parallel::ClientFactory> = Arc::new(move || {
            ReqwestHttpClient::new(DEFAULT_REQUEST_TIMEOUT, use_gzip)
                .map(|c| Box::new(c) as Box<dyn HttpClient>)
        });
        let data_eligible: Vec<CollectionDescriptor> = kept
            .iter()
            .filter(|c| maskings.should_dump_data(&c.name))
            .cloned()
            .collect();
        for (dbserver, shards) in build_shards_by_server(&data_eligible) {
            queue.push(Box::new(PerServerParallelJob {
                ctx: Arc::clone(&ctx),
                dbserver,
                shards,
                client_factory: Arc::clone(&client_factory),
            }));
        }
    }

    let handles = spawn_workers(
        Arc::clone(&queue),
        options.thread_count,
        DEFAULT_REQUEST_TIMEOUT,
        options.use_gzip_for_transport,
    );

    let cancel_watcher = cancel.map(|token| {
        let queue = Arc::clone(&queue);
        let watch_done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watch_done_for_thread = Arc::clone(&watch_done);
        let handle = std::thread::spawn(move || {
            while !watch_done_for_thread.load(std::sync::atomic::Ordering::Relaxed) {
                if token.is_cancelled() {
                    queue.report_error("dump cancelled by user".to_string());
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        });
        (handle, watch_done)
    });

    queue.wait_for_idle();
    queue.close();
    for handle in handles {
        let _ = handle.join();
    }
    if let Some((handle, watch_done)) = cancel_watcher {
        watch_done.store(true, std::sync::atomic::Ordering::Relaxed);
        let _ = handle.join();
    }

    // The shared batch (single-server mode) is only safe to tear down once
    // every PerCollectionJob that might still extend it has returned, which
    // `wait_for_idle` above guarantees.
    drop(shared_batch);

    let worker_errors = queue.errors();
    if let Some(first) = worker_errors.into_iter().next() {
        return Err(InventoryError::Http {
            call_site: "worker".into(),
            message: first,
        });
    }
    Ok(())
}

fn request_with_retry(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    call_site: &str,
    method: HttpMethod,
    url: &str,
) -> Result<Box<dyn HttpResponse>, InventoryError> {
    retry_policy
        .execute(call_site, || {
            let response = http
                .request(method, url, &[], None)
                .map_err(classify_transport)?;
            if response.status() >= 300 {
                let snippet = String::from_utf8_lossy(response.body()).to_string();
                return Err(classify_logical_status(response.status(), &snippet));
            }
            Ok(response)
        })
        .map_err(|e| InventoryError::Http {
            call_site: call_site.to_string(),
            message: match e {
                RetryOrFatal::Fatal(m) => m,
                RetryOrFatal::Exhausted(e) => e.to_string(),
            },
        })
}

fn list_accessible_databases(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    base_url: &str,
) -> Result<Vec<String>, InventoryError> {
    #[derive(Deserialize)]
    struct Response {
        result: Vec<String>,
    }
    let url = format!("{base_url}/_api/database/user");
    let response = request_with_retry(http, retry_policy, "list-databases", HttpMethod::Get, &url)?;
    let parsed: Response = serde_json::from_slice(response.body())
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;
    Ok(parsed.result)
}

fn detect_deployment_mode(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    base_url: &str,
) -> Result<DeploymentMode, InventoryError> {
    #[derive(Deserialize)]
    struct Response {
        role: String,
    }
    let url = format!("{base_url}/_admin/server/role");
    let response = request_with_retry(http, retry_policy, "server-role", HttpMethod::Get, &url)?;
    let parsed: Response = serde_json::from_slice(response.body())
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;
    Ok(if parsed.role.eq_ignore_ascii_case("single") {
        DeploymentMode::SingleServer
    } else {
        DeploymentMode::Cluster
    })
}

struct InventoryResponse {
    collections: Vec<CollectionDescriptor>,
    views: Vec<ViewDescriptor>,
    last_tick: String,
}

fn fetch_inventory(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    base_url: &str,
    deployment: DeploymentMode,
    include_system: bool,
    batch_id: Option<u64>,
) -> Result<InventoryResponse, InventoryError> {
    #[derive(Deserialize)]
    struct RawInventory {
        #[serde(default)]
        collections: Vec<CollectionDescriptor>,
        #[serde(default)]
        views: Vec<ViewDescriptor>,
        #[serde(default)]
        state: Value,
    }

    let url = match deployment {
        DeploymentMode::SingleServer => {
            let batch_id = batch_id.unwrap_or(0);
            format!(
                "{base_url}/_api/replication/inventory?includeSystem={include_system}&includeFoxxQueues=false&batchId={batch_id}"
            )
        }
        DeploymentMode::Cluster => {
            format!("{base_url}/_api/replication/clusterInventory?includeSystem={include_system}")
        }
    };

    let response = request_with_retry(http, retry_policy, "fetch-inventory", HttpMethod::Get, &url)?;
    let parsed: RawInventory = serde_json::from_slice(response.body())
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;

    let last_tick = parsed
        .state
        .get("lastLogTick")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "0".to_string());

    Ok(InventoryResponse {
        collections: parsed.collections,
        views: parsed.views,
        last_tick,
    })
}

fn fetch_database_properties(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    base_url: &str,
) -> Result<Value, InventoryError> {
    let url = format!("{base_url}/_api/database/current");
    let response = request_with_retry(http, retry_policy, "database-properties", HttpMethod::Get, &url)?;
    let parsed: Value = serde_json::from_slice(response.body())
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;
    Ok(parsed.get("result").cloned().unwrap_or(parsed))
}

fn write_dump_meta(
    directory: &dyn DirectorySink,
    database: &str,
    meta: &DumpMeta,
) -> Result<(), InventoryError> {
    let file = directory.create_file(database, "dump.json", false)?;
    let bytes = serde_json::to_vec_pretty(meta)
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;
    file.write(&bytes)?;
    Ok(())
}

fn write_view_file(
    directory: &dyn DirectorySink,
    database: &str,
    view: &ViewDescriptor,
) -> Result<(), InventoryError> {
    let file = directory.create_file(database, &format!("{}.view.json", view.name), false)?;
    let bytes = serde_json::to_vec_pretty(view)
        .map_err(|e| InventoryError::InvalidResponse(e.to_string()))?;
    file.write(&bytes)?;
    Ok(())
}

/// Skips deleted, system (unless opted in), and enterprise-hidden
/// collections; restricts to `options.collections` when non-empty; then
/// validates `distributeShardsLike` references (spec.md §4.J steps 6-8).
fn filter_collections(
    collections: Vec<CollectionDescriptor>,
    options: &Options,
) -> Result<Vec<CollectionDescriptor>, InventoryError> {
    let restrict_list: std::collections::HashSet<&str> =
        options.collections.iter().map(String::as_str).collect();

    let kept: Vec<CollectionDescriptor> = collections
        .into_iter()
        .filter(|c| !c.deleted)
        .filter(|c| options.include_system_collections || !c.is_system())
        .filter(|c| options.force || !is_enterprise_hidden(c))
        .filter(|c| restrict_list.is_empty() || restrict_list.contains(c.name.as_str()))
        .collect();

    if !options.collections.is_empty() && kept.is_empty() {
        return Err(InventoryError::NoCollectionsMatched);
    }

    if !options.ignore_distribute_shards_like_errors {
        let names: std::collections::HashSet<&str> = kept.iter().map(|c| c.name.as_str()).collect();
        for collection in &kept {
            if let Some(target) = collection.distribute_shards_like() {
                if !names.contains(target) {
                    return Err(InventoryError::DistributeShardsLikeMissing(target.to_string()));
                }
            }
        }
    }

    Ok(kept)
}

fn is_enterprise_hidden(collection: &CollectionDescriptor) -> bool {
    collection
        .parameters
        .get("hidden")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn build_shards_by_server(collections: &[CollectionDescriptor]) -> HashMap<String, Vec<ShardTarget>> {
    let mut by_server: HashMap<String, Vec<ShardTarget>> = HashMap::new();
    for collection in collections {
        for (shard_id, servers) in collection.shards() {
            let Some(primary) = servers.into_iter().next() else {
                continue;
            };
            by_server.entry(primary).or_default().push(ShardTarget {
                shard_id,
                collection_name: collection.name.clone(),
                collection_fallback_id: collection.id.clone(),
            });
        }
    }
    by_server
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(name: &str, deleted: bool, parameters: Value) -> CollectionDescriptor {
        CollectionDescriptor {
            name: name.to_string(),
            id: "1".to_string(),
            deleted,
            parameters,
        }
    }

    fn base_options() -> Options {
        Options::from_raw(crate::options::RawOptions {
            server_url: "http://x".into(),
            output_path: Some("/tmp/out".into()),
            dump_data: true,
            thread_count: 1,
            initial_chunk_size: crate::options::MIN_CHUNK_SIZE,
            max_chunk_size: crate::options::MAX_CHUNK_SIZE,
            dbserver_worker_threads: 1,
            dbserver_prefetch_batches: 1,
            local_writer_threads: 1,
            local_network_threads: 1,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn filter_collections_drops_deleted_and_system() {
        let options = base_options();
        let collections = vec![
            collection("orders", false, json!({})),
            collection("stale", true, json!({})),
            collection("_statistics", false, json!({})),
        ];
        let kept = filter_collections(collections, &options).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "orders");
    }

    #[test]
    fn filter_collections_restrict_list_rejects_no_match() {
        let mut options = base_options();
        options.collections = vec!["nonexistent".into()];
        let collections = vec![collection("orders", false, json!({}))];
        let err = filter_collections(collections, &options).unwrap_err();
        assert!(matches!(err, InventoryError::NoCollectionsMatched));
    }

    #[test]
    fn filter_collections_detects_missing_distribute_shards_like_target() {
        let options = base_options();
        let collections = vec![collection(
            "shadow",
            false,
            json!({"distributeShardsLike": "missing"}),
        )];
        let err = filter_collections(collections, &options).unwrap_err();
        assert!(matches!(err, InventoryError::DistributeShardsLikeMissing(_)));
    }

    #[test]
    fn filter_collections_ignores_distribute_shards_like_when_opted_out() {
        let mut options = base_options();
        options.ignore_distribute_shards_like_errors = true;
        let collections = vec![collection(
            "shadow",
            false,
            json!({"distributeShardsLike": "missing"}),
        )];
        let kept = filter_collections(collections, &options).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn build_shards_by_server_groups_by_primary() {
        let collections = vec![collection(
            "orders",
            false,
            json!({"shards": {"s01": ["dbserver1", "dbserver2"], "s02": ["dbserver1"]}}),
        )];
        let by_server = build_shards_by_server(&collections);
        assert_eq!(by_server["dbserver1"].len(), 2);
        assert!(by_server.get("dbserver2").is_none());
    }

    #[test]
    fn enterprise_hidden_collections_are_skipped_unless_forced() {
        let options = base_options();
        let collections = vec![collection("hidden_one", false, json!({"hidden": true}))];
        let kept = filter_collections(collections, &options).unwrap();
        assert!(kept.is_empty());

        let mut forced = base_options();
        forced.force = true;
        let collections = vec![collection("hidden_one", false, json!({"hidden": true}))];
        let kept = filter_collections(collections, &forced).unwrap();
        assert_eq!(kept.len(), 1);
    }
}
