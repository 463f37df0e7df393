//! Classical per-collection/per-shard dumper (spec.md §4.G).

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::DumpError;
use crate::interfaces::{dump_data, HttpClient, HttpMethod, HttpResponse, Maskings, OutputFile};
use crate::retry::{classify_logical_status, classify_transport, RetryPolicy};
use crate::stats::Stats;

/// Parameters for one adaptive-chunk pull against a single collection or
/// shard (spec.md §4.G). `dbserver` is `Some` only when pulling a specific
/// shard directly from its primary dbserver in cluster mode.
pub struct PullRequest<'a> {
    pub base_url: &'a str,
    pub collection: &'a str,
    pub dbserver: Option<&'a str>,
    pub use_vpack: bool,
    pub use_gzip_for_transport: bool,
    pub initial_chunk_size: u64,
    pub max_chunk_size: u64,
}

fn accept_header(use_vpack: bool) -> &'static str {
    if use_vpack {
        "application/x-vpack"
    } else {
        "application/x-arango-dump"
    }
}

fn next_chunk_size(current: u64, max: u64) -> u64 {
    let grown = ((current as f64) * 1.5) as u64;
    grown.min(max).max(current)
}

/// Runs the full adaptive-chunk pull loop for one collection/shard,
/// writing every batch through `file`. `batch_id` is the already-extended
/// batch this pull runs under - extending it is the caller's
/// responsibility (spec.md §5 "the classical dumper extends before each
/// collection"), since the batch may be a per-job [`crate::batch::BatchSession`]
/// or a database-wide [`crate::batch::SharedBatch`] extended by a different
/// worker thread each time.
pub fn pull_collection(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    batch_id: u64,
    stats: &Stats,
    maskings: &dyn Maskings,
    file: &dyn OutputFile,
    request: &PullRequest,
) -> Result<(), DumpError> {
    let mut chunk_size = request.initial_chunk_size.clamp(
        crate::options::MIN_CHUNK_SIZE,
        crate::options::MAX_CHUNK_SIZE,
    );
    let max_chunk_size = request.max_chunk_size.max(chunk_size);

    loop {
        let url = build_dump_url(request, batch_id, chunk_size);
        let response = fetch_one(http, retry_policy, &url, request)?;

        let checkmore = response
            .header("x-arango-replication-checkmore")
            .ok_or_else(|| {
                DumpError::TransportFatal("missing x-arango-replication-checkmore header".into())
            })?;
        let checkmore: bool = checkmore.parse().map_err(|_| {
            DumpError::TransportFatal(format!("invalid checkmore header value: {checkmore}"))
        })?;

        validate_content_type(response.as_ref(), request.use_vpack)?;

        let body = decompress_if_needed(&response)?;
        stats.add_received(body.len() as u64);
        dump_data(stats, maskings, file, &body, request.collection, request.use_vpack)?;
        stats.add_batch();

        if !checkmore {
            return Ok(());
        }
        chunk_size = next_chunk_size(chunk_size, max_chunk_size);
    }
}

fn build_dump_url(request: &PullRequest, batch_id: u64, chunk_size: u64) -> String {
    let mut url = format!(
        "{}/_api/replication/dump?collection={}&batchId={}&useEnvelope=false&array={}&chunkSize={}",
        request.base_url, request.collection, batch_id, request.use_vpack, chunk_size
    );
    if let Some(dbserver) = request.dbserver {
        url.push_str("&DBserver=");
        url.push_str(dbserver);
    }
    url
}

fn fetch_one(
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    url: &str,
    request: &PullRequest,
) -> Result<Box<dyn HttpResponse>, DumpError> {
    let mut headers = vec![("accept".to_string(), accept_header(request.use_vpack).to_string())];
    if request.use_gzip_for_transport {
        headers.push(("accept-encoding".to_string(), "gzip".to_string()));
    }

    retry_policy
        .execute("dump-collection", || {
            let response = http
                .request(HttpMethod::Get, url, &headers, None)
                .map_err(classify_transport)?;
            if response.status() >= 300 {
                let snippet = String::from_utf8_lossy(response.body()).to_string();
                return Err(classify_logical_status(response.status(), &snippet));
            }
            Ok(response)
        })
        .map_err(DumpError::from)
}

/// Validates that the response's `Content-Type` matches the body format we
/// requested via `Accept` (spec.md §4.G step 3). A server that silently
/// switches format mid-dump (e.g. falls back to JSON when vpack was
/// requested) would otherwise corrupt every downstream batch.
fn validate_content_type(response: &dyn HttpResponse, use_vpack: bool) -> Result<(), DumpError> {
    let expected = accept_header(use_vpack);
    match response.header("content-type") {
        Some(actual) if actual.split(';').next().unwrap_or("").trim() == expected => Ok(()),
        Some(actual) => Err(DumpError::TransportFatal(format!(
            "unexpected content-type: expected {expected}, got {actual}"
        ))),
        None => Err(DumpError::TransportFatal(
            "missing content-type header".into(),
        )),
    }
}

fn decompress_if_needed(response: &dyn HttpResponse) -> Result<Vec<u8>, DumpError> {
    if response
        .header("content-encoding")
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
    {
        let mut decoder = GzDecoder::new(response.body());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DumpError::TransportFatal(format!("failed to inflate response: {e}")))?;
        Ok(out)
    } else {
        Ok(response.body().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::fakes::{FakeFile, FakeHttpClient, FakeResponse};
    use crate::interfaces::NoMaskings;

    fn response(checkmore: bool, body: &[u8]) -> Result<FakeResponse, crate::interfaces::TransportError> {
        Ok(FakeResponse {
            status: 200,
            headers: vec![
                (
                    "x-arango-replication-checkmore".to_string(),
                    checkmore.to_string(),
                ),
                (
                    "content-type".to_string(),
                    accept_header(false).to_string(),
                ),
            ],
            body: body.to_vec(),
        })
    }

    #[test]
    fn gateway_timeout_is_retried_then_succeeds() {
        let client = FakeHttpClient::new(vec![
            Ok(FakeResponse {
                status: 504,
                headers: vec![],
                body: b"gateway timeout".to_vec(),
            }),
            response(false, b"{\"a\":1}\n"),
        ]);
        let stats = Stats::new();
        let file = FakeFile::new();
        let request = PullRequest {
            base_url: "http://x",
            collection: "orders",
            dbserver: None,
            use_vpack: false,
            use_gzip_for_transport: false,
            initial_chunk_size: crate::options::MIN_CHUNK_SIZE,
            max_chunk_size: crate::options::MAX_CHUNK_SIZE,
        };
        pull_collection(
            &client,
            &RetryPolicy::no_sleep(3),
            42,
            &stats,
            &NoMaskings,
            &file,
            &request,
        )
        .unwrap();

        assert_eq!(stats.total_batches(), 1);
        assert_eq!(file.contents(), b"{\"a\":1}\n".to_vec());
    }

    #[test]
    fn pulls_until_checkmore_is_false_growing_chunk_size() {
        let client = FakeHttpClient::new(vec![
            response(true, b"{\"a\":1}\n"),
            response(false, b"{\"a\":2}\n"),
        ]);
        let stats = Stats::new();
        let file = FakeFile::new();
        let request = PullRequest {
            base_url: "http://x",
            collection: "orders",
            dbserver: None,
            use_vpack: false,
            use_gzip_for_transport: false,
            initial_chunk_size: crate::options::MIN_CHUNK_SIZE,
            max_chunk_size: crate::options::MAX_CHUNK_SIZE,
        };
        pull_collection(
            &client,
            &RetryPolicy::no_sleep(3),
            42,
            &stats,
            &NoMaskings,
            &file,
            &request,
        )
        .unwrap();

        assert_eq!(stats.total_batches(), 2);
        assert_eq!(file.contents(), b"{\"a\":1}\n{\"a\":2}\n".to_vec());
    }

    #[test]
    fn missing_checkmore_header_is_transport_fatal() {
        let client = FakeHttpClient::new(vec![Ok(FakeResponse {
            status: 200,
            headers: vec![],
            body: b"{}".to_vec(),
        })]);
        let stats = Stats::new();
        let file = FakeFile::new();
        let request = PullRequest {
            base_url: "http://x",
            collection: "orders",
            dbserver: None,
            use_vpack: false,
            use_gzip_for_transport: false,
            initial_chunk_size: crate::options::MIN_CHUNK_SIZE,
            max_chunk_size: crate::options::MAX_CHUNK_SIZE,
        };
        let err = pull_collection(
            &client,
            &RetryPolicy::no_sleep(3),
            42,
            &stats,
            &NoMaskings,
            &file,
            &request,
        )
        .unwrap_err();
        assert!(matches!(err, DumpError::TransportFatal(_)));
    }

    #[test]
    fn mismatched_content_type_is_transport_fatal() {
        let client = FakeHttpClient::new(vec![Ok(FakeResponse {
            status: 200,
            headers: vec![
                ("x-arango-replication-checkmore".to_string(), "false".to_string()),
                ("content-type".to_string(), "application/x-vpack".to_string()),
            ],
            body: b"{}".to_vec(),
        })]);
        let stats = Stats::new();
        let file = FakeFile::new();
        let request = PullRequest {
            base_url: "http://x",
            collection: "orders",
            dbserver: None,
            use_vpack: false,
            use_gzip_for_transport: false,
            initial_chunk_size: crate::options::MIN_CHUNK_SIZE,
            max_chunk_size: crate::options::MAX_CHUNK_SIZE,
        };
        let err = pull_collection(
            &client,
            &RetryPolicy::no_sleep(3),
            42,
            &stats,
            &NoMaskings,
            &file,
            &request,
        )
        .unwrap_err();
        assert!(matches!(err, DumpError::TransportFatal(_)));
    }

    #[test]
    fn chunk_size_growth_is_capped_at_max() {
        assert_eq!(next_chunk_size(1_000_000, 1_200_000), 1_200_000);
        assert_eq!(next_chunk_size(1_000_000, 10_000_000), 1_500_000);
    }
}
