use std::io::{Read, Seek};
use std::path::PathBuf;

use crate::error::BlobResult;
use crate::reference::RefType;

/// A readable, seekable byte stream returned by a backend.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Storage backend for blob files.
///
/// A backend stores opaque byte buffers and hands back a `link` that locates
/// them later. It knows nothing about reference documents; the
/// [`FileManager`](crate::FileManager) keeps those.
pub trait FileHandler: Send + Sync {
    /// Backend type recorded in reference documents.
    fn ref_type(&self) -> RefType;

    /// Store `data` under `key` and return its link.
    fn upload_file(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        data: &[u8],
    ) -> BlobResult<String>;

    /// Delete a stored file. Returns `true` if it existed.
    fn delete_file(&self, database: &str, collection: &str, link: &str) -> BlobResult<bool>;

    /// Fetch a whole file.
    fn get_file(&self, database: &str, collection: &str, link: &str) -> BlobResult<Vec<u8>>;

    /// Open a file for random access.
    fn get_file_stream(
        &self,
        database: &str,
        collection: &str,
        link: &str,
    ) -> BlobResult<Box<dyn ReadSeek>>;

    /// Local path of a stored file. Only filesystem backends can answer.
    fn file_path(&self, _link: &str) -> Option<PathBuf> {
        None
    }
}
