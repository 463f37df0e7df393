//! Replication batch session lifecycle (spec.md §4.C, §3 "Batch session").
//!
//! Create/extend/end against `/_api/replication/batch...`. `extend` is
//! best-effort per spec.md; `end` runs from inside a scope guard
//! ([`BatchSession::drop`]) so an early return or panic-free error path
//! still releases the server-side resource.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::interfaces::{HttpClient, HttpMethod};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch create failed: {0}")]
    CreateFailed(String),
    #[error("server response for batch create was missing an id")]
    MissingId,
}

/// 48-bit client id and 64-bit syncer id, chosen once per process
/// (spec.md §4.C) and shared by every batch this process opens.
pub struct ProcessIdentity {
    pub client_id: u64,
    pub syncer_id: u64,
}

impl ProcessIdentity {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            client_id: rng.gen_range(0..(1u64 << 48)),
            syncer_id: rng.gen(),
        }
    }
}

impl Default for ProcessIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct BatchCreateResponse {
    id: String,
}

/// A server-side batch resource. `id == 0` means "no session"
/// (spec.md §3), used by jobs that never needed one (e.g. structure-only).
pub struct BatchSession<'a> {
    http: &'a dyn HttpClient,
    base_url: String,
    dbserver: Option<String>,
    id: AtomicU64,
    ttl_seconds: u64,
}

impl<'a> BatchSession<'a> {
    /// Creates a new batch against `base_url` (optionally targeting one
    /// `dbserver` in cluster mode).
    pub fn create(
        http: &'a dyn HttpClient,
        base_url: &str,
        dbserver: Option<&str>,
        identity: &ProcessIdentity,
        ttl_seconds: u64,
    ) -> Result<Self, BatchError> {
        let url = batch_url(base_url, dbserver, None);
        let body = serde_json::json!({
            "ttl": ttl_seconds,
            "clientId": identity.client_id.to_string(),
            "syncerId": identity.syncer_id.to_string(),
        });
        let response = http
            .request(
                HttpMethod::Post,
                &url,
                &[("content-type".into(), "application/json".into())],
                Some(serde_json::to_vec(&body).unwrap_or_default()),
            )
            .map_err(|e| BatchError::CreateFailed(e.to_string()))?;

        if response.status() >= 300 {
            return Err(BatchError::CreateFailed(format!(
                "server returned status {}",
                response.status()
            )));
        }
        let parsed: BatchCreateResponse = serde_json::from_slice(response.body())
            .map_err(|e| BatchError::CreateFailed(e.to_string()))?;
        let id: u64 = parsed.id.parse().map_err(|_| BatchError::MissingId)?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            dbserver: dbserver.map(str::to_string),
            id: AtomicU64::new(id),
            ttl_seconds,
        })
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    /// Extends the batch's TTL. Best-effort: the return value is
    /// deliberately discarded by callers (spec.md §4.C).
    pub fn extend(&self) -> Result<(), BatchError> {
        let id = self.id();
        if id == 0 {
            return Ok(());
        }
        let url = batch_url(&self.base_url, self.dbserver.as_deref(), Some(id));
        let body = serde_json::json!({ "ttl": self.ttl_seconds });
        let _ = self.http.request(
            HttpMethod::Put,
            &url,
            &[("content-type".into(), "application/json".into())],
            Some(serde_json::to_vec(&body).unwrap_or_default()),
        );
        Ok(())
    }

    fn end(&self) {
        let id = self.id.swap(0, Ordering::Relaxed);
        if id == 0 {
            return;
        }
        let url = batch_url(&self.base_url, self.dbserver.as_deref(), Some(id));
        if let Err(e) = self.http.request(HttpMethod::Delete, &url, &[], None) {
            tracing::warn!(error = %e, batch_id = id, "failed to end batch session");
        }
    }
}

impl<'a> Drop for BatchSession<'a> {
    fn drop(&mut self) {
        self.end();
    }
}

fn batch_url(base_url: &str, dbserver: Option<&str>, id: Option<u64>) -> String {
    let mut url = format!("{base_url}/_api/replication/batch");
    if let Some(id) = id {
        url.push('/');
        url.push_str(&id.to_string());
    }
    if let Some(dbserver) = dbserver {
        url.push_str("?DBserver=");
        url.push_str(dbserver);
    }
    url
}

/// A batch session shared by every classical [`crate::jobs::PerCollectionJob`]
/// of one single-server database dump (spec.md §4.E: "extend the shared
/// batch"). Unlike [`BatchSession`], it stores no borrowed `HttpClient` -
/// each worker thread extends it with its own client - so it can be held
/// behind an `Arc` and handed to jobs running on any worker. Teardown
/// happens once, via a stored client factory, when the orchestrator drops
/// its handle after every collection job has returned (spec.md §9
/// "scope-guarded resource release"), the same fresh-client-for-teardown
/// pattern [`crate::parallel`] uses for its dump context.
pub struct SharedBatch {
    base_url: String,
    dbserver: Option<String>,
    id: AtomicU64,
    ttl_seconds: u64,
    teardown_client: Box<dyn Fn() -> Result<Box<dyn HttpClient>, crate::interfaces::TransportError> + Send + Sync>,
}

impl SharedBatch {
    pub fn create(
        http: &dyn HttpClient,
        base_url: &str,
        dbserver: Option<&str>,
        identity: &ProcessIdentity,
        ttl_seconds: u64,
        teardown_client: impl Fn() -> Result<Box<dyn HttpClient>, crate::interfaces::TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Result<Self, BatchError> {
        let url = batch_url(base_url, dbserver, None);
        let body = serde_json::json!({
            "ttl": ttl_seconds,
            "clientId": identity.client_id.to_string(),
            "syncerId": identity.syncer_id.to_string(),
        });
        let response = http
            .request(
                HttpMethod::Post,
                &url,
                &[("content-type".into(), "application/json".into())],
                Some(serde_json::to_vec(&body).unwrap_or_default()),
            )
            .map_err(|e| BatchError::CreateFailed(e.to_string()))?;

        if response.status() >= 300 {
            return Err(BatchError::CreateFailed(format!(
                "server returned status {}",
                response.status()
            )));
        }
        let parsed: BatchCreateResponse = serde_json::from_slice(response.body())
            .map_err(|e| BatchError::CreateFailed(e.to_string()))?;
        let id: u64 = parsed.id.parse().map_err(|_| BatchError::MissingId)?;

        Ok(Self {
            base_url: base_url.to_string(),
            dbserver: dbserver.map(str::to_string),
            id: AtomicU64::new(id),
            ttl_seconds,
            teardown_client: Box::new(teardown_client),
        })
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    /// Extends the batch's TTL using the caller's own client. Best-effort:
    /// failures are logged, not propagated (spec.md §4.C).
    pub fn extend(&self, http: &dyn HttpClient) {
        let id = self.id();
        if id == 0 {
            return;
        }
        let url = batch_url(&self.base_url, self.dbserver.as_deref(), Some(id));
        let body = serde_json::json!({ "ttl": self.ttl_seconds });
        if let Err(e) = http.request(
            HttpMethod::Put,
            &url,
            &[("content-type".into(), "application/json".into())],
            Some(serde_json::to_vec(&body).unwrap_or_default()),
        ) {
            tracing::warn!(error = %e, batch_id = id, "failed to extend shared batch session");
        }
    }
}

impl Drop for SharedBatch {
    fn drop(&mut self) {
        let id = self.id.swap(0, Ordering::Relaxed);
        if id == 0 {
            return;
        }
        let url = batch_url(&self.base_url, self.dbserver.as_deref(), Some(id));
        match (self.teardown_client)() {
            Ok(client) => {
                if let Err(e) = client.request(HttpMethod::Delete, &url, &[], None) {
                    tracing::warn!(error = %e, batch_id = id, "failed to end shared batch session");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not build client to end shared batch session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::fakes::{FakeHttpClient, FakeResponse};

    fn ok_create(id: &str) -> Result<FakeResponse, crate::interfaces::TransportError> {
        Ok(FakeResponse {
            status: 200,
            headers: vec![],
            body: serde_json::to_vec(&serde_json::json!({ "id": id })).unwrap(),
        })
    }

    #[test]
    fn create_parses_id_from_response() {
        let client = FakeHttpClient::new(vec![ok_create("12345")]);
        let identity = ProcessIdentity::new();
        let batch = BatchSession::create(&client, "http://x", None, &identity, 60).unwrap();
        assert_eq!(batch.id(), 12345);
    }

    #[test]
    fn create_rejects_error_status() {
        let client = FakeHttpClient::new(vec![Ok(FakeResponse {
            status: 500,
            headers: vec![],
            body: vec![],
        })]);
        let identity = ProcessIdentity::new();
        let err = BatchSession::create(&client, "http://x", None, &identity, 60).unwrap_err();
        assert!(matches!(err, BatchError::CreateFailed(_)));
    }

    #[test]
    fn drop_issues_delete_exactly_once() {
        let client = FakeHttpClient::new(vec![
            ok_create("7"),
            Ok(FakeResponse {
                status: 200,
                headers: vec![],
                body: vec![],
            }),
        ]);
        let identity = ProcessIdentity::new();
        {
            let batch = BatchSession::create(&client, "http://x", None, &identity, 60).unwrap();
            assert_eq!(batch.id(), 7);
        }
        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, HttpMethod::Delete);
    }

    #[test]
    fn extend_is_a_noop_when_id_is_zero() {
        let client = FakeHttpClient::new(vec![]);
        let batch = BatchSession {
            http: &client,
            base_url: "http://x".into(),
            dbserver: None,
            id: AtomicU64::new(0),
            ttl_seconds: 60,
        };
        batch.extend().unwrap();
        assert!(client.calls.lock().unwrap().is_empty());
        std::mem::forget(batch);
    }

    #[test]
    fn shared_batch_extends_with_a_caller_supplied_client() {
        let create_client = FakeHttpClient::new(vec![ok_create("9")]);
        let identity = ProcessIdentity::new();
        let batch = SharedBatch::create(
            &create_client,
            "http://x",
            None,
            &identity,
            600,
            || Ok(Box::new(FakeHttpClient::new(vec![])) as Box<dyn HttpClient>),
        )
        .unwrap();
        assert_eq!(batch.id(), 9);

        let extend_client = FakeHttpClient::new(vec![Ok(FakeResponse {
            status: 200,
            headers: vec![],
            body: vec![],
        })]);
        batch.extend(&extend_client);
        assert_eq!(extend_client.calls.lock().unwrap()[0].0, HttpMethod::Put);
    }

    #[test]
    fn shared_batch_tears_down_exactly_once_via_the_teardown_client() {
        let create_client = FakeHttpClient::new(vec![ok_create("11")]);
        let identity = ProcessIdentity::new();
        let teardown_calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let teardown_calls_for_closure = teardown_calls.clone();
        {
            let _batch = SharedBatch::create(
                &create_client,
                "http://x",
                None,
                &identity,
                600,
                move || {
                    teardown_calls_for_closure.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(FakeHttpClient::new(vec![Ok(FakeResponse {
                        status: 200,
                        headers: vec![],
                        body: vec![],
                    })])) as Box<dyn HttpClient>)
                },
            )
            .unwrap();
        }
        assert_eq!(teardown_calls.load(Ordering::SeqCst), 1);
    }
}
