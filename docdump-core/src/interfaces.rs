//! The external interfaces facade (spec.md §4.K, §6).
//!
//! The pipeline in `docdump-core` never touches `reqwest` or `std::fs`
//! directly; it calls through these four traits. Concrete implementations
//! live in [`crate::http`] and [`crate::directory`]; tests use the
//! in-memory fakes at the bottom of this file to drive the pipeline
//! against canned responses instead of a live HTTP server.

use std::sync::Arc;

use thiserror::Error;

use crate::stats::Stats;

/// HTTP method for a single request/response round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Transport-level failure, classified enough for [`crate::retry`] to act
/// on. Anything that isn't one of the three I/O buckets is `Other` and is
/// always fatal at the call-site (never retried).
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("write error: {0}")]
    Write(String),
    #[error("read error: {0}")]
    Read(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// A received HTTP response.
pub trait HttpResponse: Send {
    fn status(&self) -> u16;
    /// Case-insensitive header lookup.
    fn header(&self, name: &str) -> Option<String>;
    fn body(&self) -> &[u8];
}

/// Abstract HTTP client. One instance is owned per worker thread (§4.F);
/// implementations reconnect transparently on the next call after a
/// transport failure.
pub trait HttpClient: Send + Sync {
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Box<dyn HttpResponse>, TransportError>;
}

/// A single writable output file. Implementations that may be shared across
/// multiple shards of one collection (spec.md invariant 2, combined mode)
/// MUST serialize `write` internally - this is a documented requirement of
/// the directory collaborator (spec.md §9), not something the provider
/// layer arranges on the caller's behalf.
pub trait OutputFile: Send + Sync {
    fn write(&self, bytes: &[u8]) -> std::io::Result<()>;
    /// Current size in bytes, used by empty-collection assertions in tests.
    fn len(&self) -> std::io::Result<u64>;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("output directory already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Managed output directory/file sink (spec.md §4.K "Managed directory").
/// Encryption-at-rest, if any, is this collaborator's concern and is not
/// modeled here (explicit Non-goal, spec.md §1).
pub trait DirectorySink: Send + Sync {
    /// Creates (or, if `overwrite`, truncates) the database output
    /// directory. Fails if it exists and `overwrite` is false.
    fn create_database_dir(&self, database: &str, overwrite: bool) -> Result<(), DirectoryError>;

    /// Opens `relative_name` under `database`'s directory for writing,
    /// optionally gzip-wrapped transparently.
    fn create_file(
        &self,
        database: &str,
        relative_name: &str,
        gzip: bool,
    ) -> Result<Arc<dyn OutputFile>, DirectoryError>;
}

/// Per-collection masking predicates and document transform (spec.md §4.K).
pub trait Maskings: Send + Sync {
    fn should_dump_structure(&self, collection: &str) -> bool;
    fn should_dump_data(&self, collection: &str) -> bool;
    fn mask(&self, collection: &str, doc_in: &serde_json::Value) -> serde_json::Value;
    /// `true` for the no-op maskings: lets [`dump_data`] skip the
    /// parse/mask/re-encode round trip entirely and write bodies verbatim.
    fn is_noop(&self) -> bool {
        false
    }
}

/// The maskings collaborator used when no `--maskings-file` was given.
pub struct NoMaskings;

impl Maskings for NoMaskings {
    fn should_dump_structure(&self, _collection: &str) -> bool {
        true
    }
    fn should_dump_data(&self, _collection: &str) -> bool {
        true
    }
    fn mask(&self, _collection: &str, doc_in: &serde_json::Value) -> serde_json::Value {
        doc_in.clone()
    }
    fn is_noop(&self) -> bool {
        true
    }
}

/// The `dumpData` contract (spec.md §4.K): write a response body to `file`,
/// applying maskings if configured. Newline-delimited JSON bodies are
/// masked line by line so a single malformed trailing line doesn't force
/// buffering the whole batch; VPack-array bodies go through
/// [`crate::vpack`].
pub fn dump_data(
    stats: &Stats,
    maskings: &dyn Maskings,
    file: &dyn OutputFile,
    body: &[u8],
    collection_name: &str,
    use_vpack: bool,
) -> std::io::Result<()> {
    if maskings.is_noop() || !maskings.should_dump_data(collection_name) {
        if maskings.should_dump_data(collection_name) {
            file.write(body)?;
            stats.add_written(body.len() as u64);
        }
        return Ok(());
    }

    if use_vpack {
        let docs = crate::vpack::decode_array(body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let masked: Vec<serde_json::Value> = docs
            .iter()
            .map(|d| maskings.mask(collection_name, d))
            .collect();
        let out = crate::vpack::encode_array(&masked)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        file.write(&out)?;
        stats.add_written(out.len() as u64);
    } else {
        let mut out = Vec::with_capacity(body.len());
        for line in body.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let doc: serde_json::Value = serde_json::from_slice(line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let masked = maskings.mask(collection_name, &doc);
            serde_json::to_writer(&mut out, &masked)?;
            out.push(b'\n');
        }
        file.write(&out)?;
        stats.add_written(out.len() as u64);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fakes::FakeFile;
    use super::*;
    use serde_json::json;

    struct UppercaseMaskings;
    impl Maskings for UppercaseMaskings {
        fn should_dump_structure(&self, _c: &str) -> bool {
            true
        }
        fn should_dump_data(&self, c: &str) -> bool {
            c != "skip_me"
        }
        fn mask(&self, _c: &str, doc_in: &serde_json::Value) -> serde_json::Value {
            json!({"masked": true, "orig": doc_in})
        }
    }

    #[test]
    fn dump_data_writes_verbatim_without_maskings() {
        let stats = Stats::new();
        let file = FakeFile::new();
        let body = b"{\"a\":1}\n";
        dump_data(&stats, &NoMaskings, &file, body, "c", false).unwrap();
        assert_eq!(file.contents(), body);
        assert_eq!(stats.total_written(), body.len() as u64);
    }

    #[test]
    fn dump_data_masks_ndjson_lines() {
        let stats = Stats::new();
        let file = FakeFile::new();
        let body = b"{\"a\":1}\n{\"a\":2}\n";
        dump_data(&stats, &UppercaseMaskings, &file, body, "c", false).unwrap();
        let written: Vec<serde_json::Value> = String::from_utf8(file.contents())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0]["masked"], json!(true));
    }

    #[test]
    fn dump_data_masks_vpack_array() {
        let stats = Stats::new();
        let file = FakeFile::new();
        let docs = vec![json!({"a": 1}), json!({"a": 2})];
        let body = crate::vpack::encode_array(&docs).unwrap();
        dump_data(&stats, &UppercaseMaskings, &file, &body, "c", true).unwrap();
        let decoded = crate::vpack::decode_array(&file.contents()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0]["masked"], json!(true));
    }

    #[test]
    fn dump_data_skips_collection_excluded_by_maskings() {
        let stats = Stats::new();
        let file = FakeFile::new();
        dump_data(&stats, &UppercaseMaskings, &file, b"{}", "skip_me", false).unwrap();
        assert_eq!(file.contents(), Vec::<u8>::new());
        assert_eq!(stats.total_written(), 0);
    }
}
