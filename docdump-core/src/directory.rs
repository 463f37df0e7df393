//! Concrete filesystem-backed [`crate::interfaces::DirectorySink`].

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::interfaces::{DirectoryError, DirectorySink, OutputFile};

/// Either a plain file handle or a gzip-wrapped one; both are driven behind
/// a single mutex so concurrent writers for the same combined-mode file
/// (spec.md invariant 2) never interleave their writes.
enum Sink {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl Sink {
    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Sink::Plain(f) => f.write_all(bytes),
            Sink::Gzip(e) => e.write_all(bytes),
        }
    }

    fn len(&self) -> std::io::Result<u64> {
        match self {
            Sink::Plain(f) => f.metadata().map(|m| m.len()),
            Sink::Gzip(e) => e.get_ref().metadata().map(|m| m.len()),
        }
    }
}

pub struct FsOutputFile {
    sink: Mutex<Sink>,
}

impl OutputFile for FsOutputFile {
    fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner()).write_all(bytes)
    }

    fn len(&self) -> std::io::Result<u64> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A single root directory under which each database gets its own
/// subdirectory of dump files (spec.md §4.D, §4.K).
pub struct FsDirectorySink {
    root: PathBuf,
}

impl FsDirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }
}

impl DirectorySink for FsDirectorySink {
    fn create_database_dir(&self, database: &str, overwrite: bool) -> Result<(), DirectoryError> {
        let dir = self.database_dir(database);
        if dir.exists() {
            if !overwrite {
                return Err(DirectoryError::AlreadyExists(dir.display().to_string()));
            }
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(())
    }

    fn create_file(
        &self,
        database: &str,
        relative_name: &str,
        gzip: bool,
    ) -> Result<Arc<dyn OutputFile>, DirectoryError> {
        let path: PathBuf = self.database_dir(database).join(relative_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        let sink = if gzip {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        };
        Ok(Arc::new(FsOutputFile {
            sink: Mutex::new(sink),
        }))
    }
}

/// Resolves the on-disk extension for a data/structure file given the
/// transport/storage options (spec.md §4.D): `.json`, `.json.gz`, `.vpack`
/// or `.vpack.gz`.
pub fn data_file_extension(use_vpack: bool, use_gzip: bool) -> &'static str {
    match (use_vpack, use_gzip) {
        (true, true) => ".vpack.gz",
        (true, false) => ".vpack",
        (false, true) => ".json.gz",
        (false, false) => ".json",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_database_dir_rejects_existing_without_overwrite() {
        let dir = tempdir().unwrap();
        let sink = FsDirectorySink::new(dir.path());
        sink.create_database_dir("mydb", false).unwrap();
        let err = sink.create_database_dir("mydb", false).unwrap_err();
        assert!(matches!(err, DirectoryError::AlreadyExists(_)));
    }

    #[test]
    fn create_database_dir_overwrite_truncates() {
        let dir = tempdir().unwrap();
        let sink = FsDirectorySink::new(dir.path());
        sink.create_database_dir("mydb", false).unwrap();
        let file = sink.create_file("mydb", "stale.json", false).unwrap();
        file.write(b"old").unwrap();
        sink.create_database_dir("mydb", true).unwrap();
        assert!(!dir.path().join("mydb").join("stale.json").exists());
    }

    #[test]
    fn plain_file_roundtrips_bytes() {
        let dir = tempdir().unwrap();
        let sink = FsDirectorySink::new(dir.path());
        sink.create_database_dir("mydb", false).unwrap();
        let file = sink.create_file("mydb", "a.json", false).unwrap();
        file.write(b"hello").unwrap();
        assert_eq!(file.len().unwrap(), 5);
        let on_disk = fs::read(dir.path().join("mydb").join("a.json")).unwrap();
        assert_eq!(on_disk, b"hello");
    }

    #[test]
    fn gzip_file_produces_valid_gzip_header() {
        let dir = tempdir().unwrap();
        let sink = FsDirectorySink::new(dir.path());
        sink.create_database_dir("mydb", false).unwrap();
        let file = sink.create_file("mydb", "a.json.gz", true).unwrap();
        file.write(b"hello, world").unwrap();
        drop(file);
        let on_disk = fs::read(dir.path().join("mydb").join("a.json.gz")).unwrap();
        assert_eq!(&on_disk[0..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn extension_matches_format_and_compression() {
        assert_eq!(data_file_extension(false, false), ".json");
        assert_eq!(data_file_extension(false, true), ".json.gz");
        assert_eq!(data_file_extension(true, false), ".vpack");
        assert_eq!(data_file_extension(true, true), ".vpack.gz");
    }
}
