//! Network thread of the per-dbserver parallel dump coordinator
//! (spec.md §4.H).
//!
//! Each network thread loops calling `POST /_api/dump/next/<dump_id>`,
//! pushing every delivered batch onto the shared [`BoundedChannel`] for a
//! writer thread to pick up. HTTP 204 means the server has nothing left for
//! this dump and ends the thread; 2xx delivers a batch; anything else goes
//! through the retry policy before the thread gives up.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::BoundedChannel;
use crate::error::DumpError;
use crate::interfaces::{HttpClient, HttpMethod, HttpResponse};
use crate::retry::{classify_logical_status, classify_transport, RetryPolicy};
use crate::stats::Stats;
use crate::telemetry::BlockCounter;

use super::Frame;

#[allow(clippy::too_many_arguments)]
pub fn run_network_thread(
    thread_index: usize,
    http: &dyn HttpClient,
    retry_policy: &RetryPolicy,
    base_url: &str,
    dbserver: &str,
    dump_id: &str,
    batch_counter: &AtomicU64,
    channel: &BoundedChannel<Frame>,
    block_counter: &BlockCounter,
    stats: &Stats,
) -> Result<(), DumpError> {
    let mut last_batch: Option<u64> = None;

    loop {
        let batch_id = batch_counter.fetch_add(1, Ordering::SeqCst);
        let url = next_batch_url(base_url, dump_id, dbserver, batch_id, last_batch);

        let response = retry_policy
            .execute(&format!("dump-next-{thread_index}"), || {
                let response = http
                    .request(HttpMethod::Post, &url, &[], None)
                    .map_err(classify_transport)?;
                if response.status() == 204 || (200..300).contains(&response.status()) {
                    Ok(response)
                } else {
                    let snippet = String::from_utf8_lossy(response.body());
                    Err(classify_logical_status(response.status(), &snippet))
                }
            })
            .map_err(DumpError::from)?;

        if response.status() == 204 {
            return Ok(());
        }

        let frame = frame_from_response(response.as_ref())?;
        stats.add_batch();
        stats.add_received(frame.body.len() as u64);

        let (stopped, was_full) = channel.push(frame);
        if was_full {
            block_counter.network_blocked_on_full();
        }
        if stopped {
            return Ok(());
        }

        last_batch = Some(batch_id);
    }
}

fn next_batch_url(
    base_url: &str,
    dump_id: &str,
    dbserver: &str,
    batch_id: u64,
    last_batch: Option<u64>,
) -> String {
    let mut url = format!(
        "{base_url}/_api/dump/next/{dump_id}?batchId={batch_id}&dbserver={dbserver}"
    );
    if let Some(last) = last_batch {
        url.push_str("&lastBatch=");
        url.push_str(&last.to_string());
    }
    url
}

fn frame_from_response(response: &dyn HttpResponse) -> Result<Frame, DumpError> {
    let shard_id = response
        .header("x-arango-dump-shard-id")
        .ok_or_else(|| DumpError::TransportFatal("missing x-arango-dump-shard-id header".into()))?;
    let block_counts = response
        .header("x-arango-dump-block-counts")
        .and_then(|v| v.parse::<i64>().ok());
    let gzip_encoded = response
        .header("content-encoding")
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    Ok(Frame {
        shard_id,
        block_counts,
        gzip_encoded,
        body: response.body().to_vec(),
    })
}
