use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use sgr_store::DatabaseHandler;
use sgr_types::RepoUuid;
use tracing::{debug, error, warn};

use crate::config::Encoding;
use crate::error::{BlobError, BlobResult};
use crate::handler::{FileHandler, ReadSeek};
use crate::reference::{BlobReference, RefId, RefType, CHECKSUM_FIELD, ENCODING_FIELD};

/// Suffix of the collection holding blob references for a group.
pub const REF_SUFFIX: &str = "ref";

/// Stores files through a backend and keeps their reference documents.
///
/// Uploads always go to the default handler. Reads dispatch on the backend
/// type recorded in the reference, so files written by other registered
/// backends stay readable.
pub struct FileManager {
    database: Arc<dyn DatabaseHandler>,
    default_handler: Arc<dyn FileHandler>,
    handlers: HashMap<RefType, Arc<dyn FileHandler>>,
    encoding: Encoding,
}

impl FileManager {
    pub fn new(database: Arc<dyn DatabaseHandler>, default_handler: Arc<dyn FileHandler>) -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(default_handler.ref_type(), Arc::clone(&default_handler));
        Self {
            database,
            default_handler,
            handlers,
            encoding: Encoding::None,
        }
    }

    /// Encode uploaded contents with `encoding`.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Register an additional backend for reading and deleting.
    pub fn with_handler(mut self, handler: Arc<dyn FileHandler>) -> Self {
        self.handlers.insert(handler.ref_type(), handler);
        self
    }

    pub fn database(&self) -> &Arc<dyn DatabaseHandler> {
        &self.database
    }

    pub fn default_ref_type(&self) -> RefType {
        self.default_handler.ref_type()
    }

    /// Collection holding the references of `group`.
    pub fn ref_collection(group: &str) -> String {
        format!("{group}.{REF_SUFFIX}")
    }

    /// Reduce a path-like name to the part used as a reference id.
    ///
    /// Everything up to the last `revision/` is dropped; without such a
    /// segment every leading directory is dropped.
    pub fn clean_file_name(name: &str) -> String {
        const MARKER: &str = "revision/";
        if let Some(pos) = name.rfind(MARKER) {
            return name[pos + MARKER.len()..].to_string();
        }
        match name.rfind('/') {
            Some(pos) => name[pos + 1..].to_string(),
            None => name.to_string(),
        }
    }

    fn normalize(id: &RefId) -> RefId {
        match id {
            RefId::Name(name) => RefId::Name(Self::clean_file_name(name)),
            other => other.clone(),
        }
    }

    fn handler_for(&self, ref_type: RefType) -> BlobResult<&Arc<dyn FileHandler>> {
        self.handlers
            .get(&ref_type)
            .ok_or(BlobError::UnsupportedBackend(ref_type))
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Store `data` and upsert its reference into `<group>.ref`.
    pub fn upload_file_and_commit(
        &self,
        database: &str,
        group: &str,
        id: RefId,
        data: &[u8],
        mut metadata: Map<String, Value>,
    ) -> BlobResult<BlobReference> {
        let id = Self::normalize(&id);
        let stored = encode(self.encoding, data)?;
        if self.encoding != Encoding::None {
            metadata.insert(ENCODING_FIELD.into(), Value::from(self.encoding.as_str()));
        }
        metadata.insert(
            CHECKSUM_FIELD.into(),
            Value::from(blake3::hash(&stored).to_hex().to_string()),
        );

        let key = RepoUuid::new().to_string();
        let link = self.default_handler.upload_file(database, group, &key, &stored)?;
        let reference = BlobReference {
            id,
            ref_type: self.default_handler.ref_type(),
            link,
            size: stored.len() as u64,
            name: None,
            metadata,
        };

        let collection = Self::ref_collection(group);
        if let Err(e) =
            self.database
                .upsert_document(database, &collection, &reference.to_document(), true)
        {
            if let Err(cleanup) = self.default_handler.delete_file(database, group, &reference.link) {
                error!(link = %reference.link, error = %cleanup, "failed to remove unreferenced blob file");
            }
            return Err(e.into());
        }
        debug!(id = %reference.id, size = reference.size, collection = %collection, "committed blob file");
        Ok(reference)
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    pub fn get_file_ref(
        &self,
        database: &str,
        group: &str,
        id: &RefId,
    ) -> BlobResult<Option<BlobReference>> {
        let key = Self::normalize(id).key();
        let collection = Self::ref_collection(group);
        let filter = sgr_store::QueryFilter::eq(sgr_store::ID_FIELD, key);
        match self.database.find_one_by_criteria(database, &collection, &filter)? {
            Some(doc) => BlobReference::from_document(&doc).map(Some),
            None => Ok(None),
        }
    }

    fn require_ref(&self, database: &str, group: &str, id: &RefId) -> BlobResult<BlobReference> {
        self.get_file_ref(database, group, id)?
            .ok_or_else(|| BlobError::NotFound {
                group: group.to_string(),
                id: id.key(),
            })
    }

    /// Fetch and decode the file behind a reference, verifying its checksum.
    pub fn get_file(&self, database: &str, group: &str, id: &RefId) -> BlobResult<Vec<u8>> {
        let reference = self.require_ref(database, group, id)?;
        let handler = self.handler_for(reference.ref_type)?;
        let stored = handler.get_file(database, group, &reference.link)?;
        if let Some(expected) = reference.checksum() {
            let computed = blake3::hash(&stored).to_hex().to_string();
            if computed != expected {
                return Err(BlobError::ChecksumMismatch {
                    id: reference.id.key(),
                    expected: expected.to_string(),
                    computed,
                });
            }
        }
        decode(reference.encoding(), stored)
    }

    /// Open the file behind a reference for random access.
    ///
    /// Encoded files are decoded into memory first.
    pub fn get_file_stream(
        &self,
        database: &str,
        group: &str,
        id: &RefId,
    ) -> BlobResult<Box<dyn ReadSeek>> {
        let reference = self.require_ref(database, group, id)?;
        if reference.encoding() != Encoding::None {
            let data = self.get_file(database, group, id)?;
            return Ok(Box::new(Cursor::new(data)));
        }
        self.handler_for(reference.ref_type)?
            .get_file_stream(database, group, &reference.link)
    }

    /// Local path of a referenced file, for filesystem references only.
    pub fn get_file_path(&self, reference: &BlobReference) -> Option<PathBuf> {
        if reference.ref_type != RefType::Fs {
            return None;
        }
        self.handlers.get(&RefType::Fs)?.file_path(&reference.link)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete a file and its reference. Returns `false` if no reference
    /// existed.
    pub fn delete_file_and_ref(&self, database: &str, group: &str, id: &RefId) -> BlobResult<bool> {
        let Some(reference) = self.get_file_ref(database, group, id)? else {
            warn!(id = %id, group, "no blob reference to delete");
            return Ok(false);
        };
        let handler = self.handler_for(reference.ref_type)?;
        if !handler.delete_file(database, group, &reference.link)? {
            warn!(link = %reference.link, "blob file already gone, dropping its reference");
        }
        self.database
            .drop_document(database, &Self::ref_collection(group), &reference.id.key())?;
        Ok(true)
    }
}

fn encode(encoding: Encoding, data: &[u8]) -> BlobResult<Vec<u8>> {
    match encoding {
        Encoding::None => Ok(data.to_vec()),
        Encoding::Zstd => zstd::encode_all(data, 3).map_err(|e| BlobError::Encoding(e.to_string())),
    }
}

fn decode(encoding: Encoding, stored: Vec<u8>) -> BlobResult<Vec<u8>> {
    match encoding {
        Encoding::None => Ok(stored),
        Encoding::Zstd => {
            zstd::decode_all(stored.as_slice()).map_err(|e| BlobError::Encoding(e.to_string()))
        }
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(RefType::as_str).collect();
        types.sort();
        f.debug_struct("FileManager")
            .field("default", &self.default_handler.ref_type())
            .field("handlers", &types)
            .field("encoding", &self.encoding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsFileHandler;
    use crate::memory::InMemoryFileHandler;
    use serde_json::json;
    use sgr_store::{InMemoryDatabase, QueryFilter};
    use std::io::{Read, Seek, SeekFrom};

    fn memory_manager() -> (Arc<InMemoryDatabase>, Arc<InMemoryFileHandler>, FileManager) {
        let db = Arc::new(InMemoryDatabase::new());
        let files = Arc::new(InMemoryFileHandler::new());
        let manager = FileManager::new(db.clone(), files.clone());
        (db, files, manager)
    }

    // -----------------------------------------------------------------------
    // clean_file_name
    // -----------------------------------------------------------------------

    #[test]
    fn clean_file_name_strips_revision_prefix() {
        assert_eq!(
            FileManager::clean_file_name("/db/proj/revision/abc/model.ifc"),
            "abc/model.ifc"
        );
    }

    #[test]
    fn clean_file_name_strips_directories() {
        assert_eq!(FileManager::clean_file_name("/tmp/upload/model.ifc"), "model.ifc");
        assert_eq!(FileManager::clean_file_name("model.ifc"), "model.ifc");
    }

    // -----------------------------------------------------------------------
    // Upload / read
    // -----------------------------------------------------------------------

    #[test]
    fn upload_writes_reference() {
        let (db, files, manager) = memory_manager();
        let mut meta = Map::new();
        meta.insert("kind".into(), json!("original"));
        let reference = manager
            .upload_file_and_commit("db", "proj.history", RefId::from("dir/a.obj"), b"obj", meta)
            .unwrap();

        assert_eq!(reference.id, RefId::Name("a.obj".into()));
        assert_eq!(reference.ref_type, RefType::Gridfs);
        assert_eq!(reference.size, 3);
        assert_eq!(files.len(), 1);

        let stored = db
            .find_one_by_criteria("db", "proj.history.ref", &QueryFilter::eq("_id", "a.obj"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.get_str("kind"), Some("original"));
        assert!(stored.get_str("checksum").is_some());

        assert_eq!(
            manager.get_file("db", "proj.history", &RefId::from("a.obj")).unwrap(),
            b"obj"
        );
    }

    #[test]
    fn zstd_encoding_is_transparent() {
        let db = Arc::new(InMemoryDatabase::new());
        let files = Arc::new(InMemoryFileHandler::new());
        let manager = FileManager::new(db, files.clone()).with_encoding(Encoding::Zstd);
        let data = vec![7u8; 4096];
        let reference = manager
            .upload_file_and_commit("db", "g", RefId::from("big"), &data, Map::new())
            .unwrap();
        assert_eq!(reference.encoding(), Encoding::Zstd);
        assert!(reference.size < data.len() as u64);
        assert_eq!(manager.get_file("db", "g", &RefId::from("big")).unwrap(), data);

        let mut stream = manager.get_file_stream("db", "g", &RefId::from("big")).unwrap();
        stream.seek(SeekFrom::Start(4000)).unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 96);
    }

    #[test]
    fn tampered_file_fails_checksum() {
        let (_db, files, manager) = memory_manager();
        let reference = manager
            .upload_file_and_commit("db", "g", RefId::from("f"), b"original", Map::new())
            .unwrap();
        // Overwrite the stored bytes behind the same link.
        files.delete_file("db", "g", &reference.link).unwrap();
        let parts: Vec<&str> = reference.link.splitn(3, '/').collect();
        files.upload_file(parts[0], parts[1], parts[2], b"tampered").unwrap();

        assert!(matches!(
            manager.get_file("db", "g", &RefId::from("f")),
            Err(BlobError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn missing_reference_is_not_found() {
        let (_db, _files, manager) = memory_manager();
        assert!(matches!(
            manager.get_file("db", "g", &RefId::from("nope")),
            Err(BlobError::NotFound { .. })
        ));
        assert!(manager.get_file_ref("db", "g", &RefId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn unregistered_backend_is_unsupported() {
        let (db, _files, manager) = memory_manager();
        let foreign = BlobReference {
            id: RefId::from("s3file"),
            ref_type: RefType::S3,
            link: "bucket/key".into(),
            size: 1,
            name: None,
            metadata: Map::new(),
        };
        db.insert_document("db", "g.ref", &foreign.to_document()).unwrap();
        assert!(matches!(
            manager.get_file("db", "g", &RefId::from("s3file")),
            Err(BlobError::UnsupportedBackend(RefType::S3))
        ));
    }

    #[test]
    fn failed_reference_write_removes_the_file() {
        let db = Arc::new(InMemoryDatabase::with_size_limit(10));
        let files = Arc::new(InMemoryFileHandler::new());
        let manager = FileManager::new(db, files.clone());
        let err = manager
            .upload_file_and_commit("db", "g", RefId::from("f"), b"x", Map::new())
            .unwrap_err();
        assert!(matches!(err, BlobError::Store(_)));
        assert!(files.is_empty());
    }

    // -----------------------------------------------------------------------
    // Delete / paths
    // -----------------------------------------------------------------------

    #[test]
    fn delete_removes_file_and_reference() {
        let (db, files, manager) = memory_manager();
        manager
            .upload_file_and_commit("db", "g", RefId::from("f"), b"x", Map::new())
            .unwrap();
        assert!(manager.delete_file_and_ref("db", "g", &RefId::from("f")).unwrap());
        assert!(files.is_empty());
        assert_eq!(db.len("db", "g.ref").unwrap(), 0);
        assert!(!manager.delete_file_and_ref("db", "g", &RefId::from("f")).unwrap());
    }

    #[test]
    fn file_path_only_for_filesystem_refs() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(InMemoryDatabase::new());
        let manager = FileManager::new(db, Arc::new(FsFileHandler::new(dir.path(), 2)));
        let reference = manager
            .upload_file_and_commit("db", "g", RefId::from("f"), b"on disk", Map::new())
            .unwrap();
        let path = manager.get_file_path(&reference).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"on disk");

        let mut other = reference.clone();
        other.ref_type = RefType::Gridfs;
        assert!(manager.get_file_path(&other).is_none());
    }
}
