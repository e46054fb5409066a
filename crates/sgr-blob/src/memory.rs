use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::{BlobError, BlobResult};
use crate::handler::{FileHandler, ReadSeek};
use crate::reference::RefType;

/// In-memory blob backend.
///
/// Intended for tests and embedding. Files are kept in a `HashMap` keyed by
/// link; the link is `<database>/<collection>/<key>`. Reports itself as
/// [`RefType::Gridfs`], the backend that keeps files inside the database.
pub struct InMemoryFileHandler {
    files: RwLock<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl InMemoryFileHandler {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// Number of files currently stored.
    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful uploads since creation.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Sorted links of all stored files.
    pub fn links(&self) -> Vec<String> {
        let mut links: Vec<String> = self
            .files
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        links.sort();
        links
    }

    /// Size of the file behind `link`, if stored.
    pub fn file_size(&self, link: &str) -> Option<usize> {
        self.files.read().ok()?.get(link).map(Vec::len)
    }

    /// Make every following upload fail, simulating an unreachable store.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    fn lock_error(e: impl std::fmt::Display) -> BlobError {
        BlobError::Io(std::io::Error::other(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryFileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHandler for InMemoryFileHandler {
    fn ref_type(&self) -> RefType {
        RefType::Gridfs
    }

    fn upload_file(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        data: &[u8],
    ) -> BlobResult<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BlobError::Io(std::io::Error::other("upload rejected")));
        }
        let link = format!("{database}/{collection}/{key}");
        self.files
            .write()
            .map_err(Self::lock_error)?
            .insert(link.clone(), data.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(link)
    }

    fn delete_file(&self, _database: &str, _collection: &str, link: &str) -> BlobResult<bool> {
        Ok(self
            .files
            .write()
            .map_err(Self::lock_error)?
            .remove(link)
            .is_some())
    }

    fn get_file(&self, _database: &str, _collection: &str, link: &str) -> BlobResult<Vec<u8>> {
        self.files
            .read()
            .map_err(Self::lock_error)?
            .get(link)
            .cloned()
            .ok_or_else(|| BlobError::MissingFile { link: link.into() })
    }

    fn get_file_stream(
        &self,
        database: &str,
        collection: &str,
        link: &str,
    ) -> BlobResult<Box<dyn ReadSeek>> {
        let data = self.get_file(database, collection, link)?;
        Ok(Box::new(Cursor::new(data)))
    }
}

impl std::fmt::Debug for InMemoryFileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFileHandler")
            .field("file_count", &self.len())
            .field("uploads", &self.upload_count())
            .finish()
    }
}
