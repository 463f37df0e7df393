//! Output File Provider (spec.md §4.D): maps `(collection[, shard/batch])`
//! to an open [`crate::interfaces::OutputFile`], enforcing combined-vs-split
//! policy and collision-safe filenames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use std::sync::OnceLock;

use dashmap::DashMap;
use md5::{Digest, Md5};
use rand::Rng;
use regex::Regex;
use thiserror::Error;

use crate::directory::data_file_extension;
use crate::interfaces::{DirectorySink, OutputFile};

fn safe_component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

#[derive(Debug, Error)]
pub enum FileProviderError {
    #[error("directory error: {0}")]
    Directory(#[from] crate::interfaces::DirectoryError),
}

/// Whether a collection keeps one shared output file or gets a fresh one
/// per batch (spec.md §4.D, bound to `--split-files`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Combined,
    Split,
}

/// Sanitizes `name` for use as a filename component, falling back to
/// `fallback_id` (the collection's numeric id) or a random 64-bit value if
/// neither is filesystem-safe.
fn sanitize_component(name: &str, fallback_id: &str) -> String {
    let is_safe = safe_component_pattern().is_match(name);
    if is_safe {
        name.to_string()
    } else if !fallback_id.is_empty() {
        fallback_id.to_string()
    } else {
        let mut rng = rand::thread_rng();
        format!("{:016x}", rng.gen::<u64>())
    }
}

fn name_hash(name: &str) -> String {
    let digest = Md5::digest(name.as_bytes());
    format!("{digest:x}")
}

fn data_file_name(collection_name: &str, fallback_id: &str, ext: &str, batch_no: Option<u64>) -> String {
    let stem = sanitize_component(collection_name, fallback_id);
    let hash = name_hash(collection_name);
    match batch_no {
        Some(n) => format!("{stem}_{hash}.{n}.data{ext}"),
        None => format!("{stem}_{hash}.data{ext}"),
    }
}

struct SplitState {
    sequence: AtomicU64,
}

/// Per-database output file provider. One instance is shared by every job
/// working on a database; in combined mode every collection's file is
/// opened eagerly at construction so the restore tool never observes a
/// missing file (spec.md §4.D).
pub struct OutputFileProvider {
    directory: Arc<dyn DirectorySink>,
    database: String,
    mode: FileMode,
    gzip: bool,
    ext: &'static str,
    combined_files: DashMap<String, Arc<dyn OutputFile>>,
    split_sequences: DashMap<String, Mutex<SplitState>>,
}

impl OutputFileProvider {
    pub fn new(
        directory: Arc<dyn DirectorySink>,
        database: impl Into<String>,
        mode: FileMode,
        use_vpack: bool,
        gzip: bool,
    ) -> Self {
        Self {
            directory,
            database: database.into(),
            mode,
            gzip,
            ext: data_file_extension(use_vpack, gzip),
            combined_files: DashMap::new(),
            split_sequences: DashMap::new(),
        }
    }

    /// Eagerly opens the combined-mode file for `collection_name`/`fallback_id`.
    /// No-op in split mode.
    pub fn prepare_collection(
        &self,
        collection_name: &str,
        fallback_id: &str,
    ) -> Result<(), FileProviderError> {
        if self.mode != FileMode::Combined {
            return Ok(());
        }
        if self.combined_files.contains_key(collection_name) {
            return Ok(());
        }
        let name = data_file_name(collection_name, fallback_id, self.ext, None);
        let file = self.directory.create_file(&self.database, &name, self.gzip)?;
        self.combined_files.insert(collection_name.to_string(), file);
        Ok(())
    }

    /// Returns the file handle to write `collection_name`'s next batch to.
    /// In combined mode this is always the same shared handle (prepared
    /// via [`Self::prepare_collection`] or lazily here); in split mode a
    /// fresh file is opened with a monotonically increasing sequence
    /// number, guarded by a per-collection mutex (spec.md §4.D).
    pub fn get_file(
        &self,
        collection_name: &str,
        fallback_id: &str,
    ) -> Result<Arc<dyn OutputFile>, FileProviderError> {
        match self.mode {
            FileMode::Combined => {
                if let Some(file) = self.combined_files.get(collection_name) {
                    return Ok(Arc::clone(&file));
                }
                self.prepare_collection(collection_name, fallback_id)?;
                Ok(Arc::clone(
                    &self
                        .combined_files
                        .get(collection_name)
                        .expect("just inserted"),
                ))
            }
            FileMode::Split => {
                let state = self
                    .split_sequences
                    .entry(collection_name.to_string())
                    .or_insert_with(|| Mutex::new(SplitState {
                        sequence: AtomicU64::new(0),
                    }));
                let guard = state.lock().unwrap_or_else(|e| e.into_inner());
                let batch_no = guard.sequence.fetch_add(1, Ordering::SeqCst);
                let name = data_file_name(collection_name, fallback_id, self.ext, Some(batch_no));
                let file = self.directory.create_file(&self.database, &name, self.gzip)?;
                Ok(file)
            }
        }
    }
}
