use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::BlobConfig;
use crate::error::{BlobError, BlobResult};
use crate::handler::{FileHandler, ReadSeek};
use crate::reference::RefType;

/// Shortest slice of a file name hashed into one directory level.
const MIN_CHUNK_LENGTH: usize = 4;

/// Filesystem backend that shards files into a hashed directory tree.
///
/// A file named `n` lands at `<root>/<l0>/<l1>/.../n`, where each level name
/// is one byte (0-255) of a BLAKE3 hash over a slice of `n` and a random
/// salt. The returned link is the path relative to the root.
pub struct FsFileHandler {
    root: PathBuf,
    levels: u32,
    write_attempts: u32,
    backoff: Duration,
}

impl FsFileHandler {
    pub fn new(root: impl Into<PathBuf>, levels: u32) -> Self {
        let defaults = BlobConfig::default();
        Self {
            root: root.into(),
            levels,
            write_attempts: defaults.write_attempts,
            backoff: defaults.retry_backoff(),
        }
    }

    pub fn from_config(config: &BlobConfig) -> Self {
        Self {
            root: config.fs_root.clone(),
            levels: config.hierarchy_depth,
            write_attempts: config.write_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory level names for a file called `name`.
    pub fn hierarchy(&self, name: &str) -> Vec<String> {
        let bytes = name.as_bytes();
        if self.levels == 0 || bytes.is_empty() {
            return Vec::new();
        }
        let chunk = (bytes.len() / self.levels as usize)
            .max(MIN_CHUNK_LENGTH)
            .min(bytes.len());
        let span = bytes.len() - chunk;
        (0..self.levels as usize)
            .map(|i| {
                let start = if span == 0 { 0 } else { (i * chunk) % span };
                let mut hasher = blake3::Hasher::new();
                hasher.update(&bytes[start..start + chunk]);
                hasher.update(&rand::random::<u64>().to_le_bytes());
                hasher.finalize().as_bytes()[0].to_string()
            })
            .collect()
    }

    fn resolve(&self, link: &str) -> PathBuf {
        self.root.join(link)
    }

    fn write_with_retry(&self, path: &Path, data: &[u8]) -> BlobResult<()> {
        let mut last_error = String::new();
        for attempt in 1..=self.write_attempts {
            match write_file(path, data) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "blob file write failed");
                    last_error = e.to_string();
                    if attempt < self.write_attempts {
                        std::thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(BlobError::RetriesExhausted {
            path: path.to_path_buf(),
            attempts: self.write_attempts,
            reason: last_error,
        })
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

impl FileHandler for FsFileHandler {
    fn ref_type(&self) -> RefType {
        RefType::Fs
    }

    fn upload_file(
        &self,
        _database: &str,
        _collection: &str,
        key: &str,
        data: &[u8],
    ) -> BlobResult<String> {
        let mut parts = self.hierarchy(key);
        parts.push(key.to_string());
        let link = parts.join("/");
        let path = self.resolve(&link);
        self.write_with_retry(&path, data)?;
        debug!(link = %link, bytes = data.len(), "stored blob file");
        Ok(link)
    }

    fn delete_file(&self, _database: &str, _collection: &str, link: &str) -> BlobResult<bool> {
        let path = self.resolve(link);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(BlobError::FileIo { path, source }),
        }
    }

    fn get_file(&self, _database: &str, _collection: &str, link: &str) -> BlobResult<Vec<u8>> {
        let path = self.resolve(link);
        fs::read(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => BlobError::MissingFile { link: link.into() },
            _ => BlobError::FileIo { path, source },
        })
    }

    fn get_file_stream(
        &self,
        _database: &str,
        _collection: &str,
        link: &str,
    ) -> BlobResult<Box<dyn ReadSeek>> {
        let path = self.resolve(link);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobError::MissingFile { link: link.into() })
            }
            Err(source) => Err(BlobError::FileIo { path, source }),
        }
    }

    fn file_path(&self, link: &str) -> Option<PathBuf> {
        Some(self.resolve(link))
    }
}

impl std::fmt::Debug for FsFileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsFileHandler")
            .field("root", &self.root)
            .field("levels", &self.levels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    fn handler(dir: &Path, levels: u32) -> FsFileHandler {
        FsFileHandler::new(dir, levels)
    }

    #[test]
    fn hierarchy_has_one_entry_per_level() {
        let h = FsFileHandler::new("/unused", 3);
        let levels = h.hierarchy("6ba7b810-9dad-11d1-80b4-00c04fd430c8");
        assert_eq!(levels.len(), 3);
        for level in levels {
            let n: u32 = level.parse().unwrap();
            assert!(n < 256);
        }
    }

    #[test]
    fn hierarchy_handles_short_names() {
        let h = FsFileHandler::new("/unused", 2);
        assert_eq!(h.hierarchy("ab").len(), 2);
        assert!(h.hierarchy("").is_empty());
        assert!(FsFileHandler::new("/unused", 0).hierarchy("abcdef").is_empty());
    }

    #[test]
    fn upload_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 2);
        let link = h.upload_file("db", "proj", "blobfile", b"payload").unwrap();

        assert_eq!(link.split('/').count(), 3);
        assert!(link.ends_with("/blobfile"));
        assert_eq!(h.get_file("db", "proj", &link).unwrap(), b"payload");
        assert!(h.file_path(&link).unwrap().exists());
    }

    #[test]
    fn zero_levels_store_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 0);
        let link = h.upload_file("db", "proj", "flat", b"x").unwrap();
        assert_eq!(link, "flat");
        assert!(dir.path().join("flat").exists());
    }

    #[test]
    fn stream_supports_seeking() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 1);
        let link = h.upload_file("db", "proj", "seekable", b"0123456789").unwrap();
        let mut stream = h.get_file_stream("db", "proj", &link).unwrap();
        stream.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456");
    }

    #[test]
    fn delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 2);
        let link = h.upload_file("db", "proj", "gone", b"x").unwrap();
        assert!(h.delete_file("db", "proj", &link).unwrap());
        assert!(!h.delete_file("db", "proj", &link).unwrap());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), 2);
        assert!(matches!(
            h.get_file("db", "proj", "1/2/nothing"),
            Err(BlobError::MissingFile { .. })
        ));
        assert!(matches!(
            h.get_file_stream("db", "proj", "1/2/nothing"),
            Err(BlobError::MissingFile { .. })
        ));
    }

    #[test]
    fn unwritable_root_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = BlobConfig {
            fs_root: blocker,
            hierarchy_depth: 1,
            retry_backoff_ms: 0,
            ..BlobConfig::default()
        };
        let h = FsFileHandler::from_config(&config);
        let err = h.upload_file("db", "proj", "name", b"x").unwrap_err();
        match err {
            BlobError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
