//! Fixtures shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sgr_blob::{FileManager, InMemoryFileHandler};
use sgr_store::{DatabaseHandler, Document, IndexSpec, InMemoryDatabase, QueryFilter, StoreError, StoreResult};

use crate::context::StorageContext;

/// Database wrapper that fails chosen operations.
pub struct FlakyDatabase {
    inner: InMemoryDatabase,
    unreachable: AtomicBool,
    failing_collections: Mutex<Vec<String>>,
    bulk_inserts: AtomicUsize,
}

impl FlakyDatabase {
    pub fn new() -> Self {
        Self::wrap(InMemoryDatabase::new())
    }

    pub fn wrap(inner: InMemoryDatabase) -> Self {
        Self {
            inner,
            unreachable: AtomicBool::new(false),
            failing_collections: Mutex::new(Vec::new()),
            bulk_inserts: AtomicUsize::new(0),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make every write to `collection` fail.
    pub fn fail_writes_to(&self, collection: &str) {
        self.failing_collections.lock().unwrap().push(collection.to_string());
    }

    pub fn heal(&self) {
        self.failing_collections.lock().unwrap().clear();
        self.set_unreachable(false);
    }

    pub fn bulk_inserts(&self) -> usize {
        self.bulk_inserts.load(Ordering::SeqCst)
    }

    pub fn len(&self, database: &str, collection: &str) -> usize {
        self.inner.len(database, collection).unwrap()
    }

    fn check_write(&self, operation: &str, collection: &str) -> StoreResult<()> {
        if self.failing_collections.lock().unwrap().iter().any(|c| c == collection) {
            return Err(StoreError::transport(operation, "mongodb://user:secret@db:27017", "connection reset"));
        }
        Ok(())
    }
}

impl DatabaseHandler for FlakyDatabase {
    fn ping(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::transport("ping", "mongodb://db:27017", "timed out"));
        }
        Ok(())
    }

    fn insert_document(&self, database: &str, collection: &str, doc: &Document) -> StoreResult<()> {
        self.check_write("insert", collection)?;
        self.inner.insert_document(database, collection, doc)
    }

    fn insert_many_documents(&self, database: &str, collection: &str, docs: &[Document]) -> StoreResult<()> {
        self.check_write("insertMany", collection)?;
        self.bulk_inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_many_documents(database, collection, docs)
    }

    fn upsert_document(&self, database: &str, collection: &str, doc: &Document, overwrite: bool) -> StoreResult<()> {
        self.check_write("upsert", collection)?;
        self.inner.upsert_document(database, collection, doc, overwrite)
    }

    fn find_all_by_criteria(&self, database: &str, collection: &str, filter: &QueryFilter) -> StoreResult<Vec<Document>> {
        self.inner.find_all_by_criteria(database, collection, filter)
    }

    fn create_index(&self, database: &str, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        self.inner.create_index(database, collection, index)
    }

    fn list_indexes(&self, database: &str, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        self.inner.list_indexes(database, collection)
    }

    fn drop_document(&self, database: &str, collection: &str, id: &str) -> StoreResult<bool> {
        self.inner.drop_document(database, collection, id)
    }

    fn drop_documents(&self, database: &str, collection: &str, filter: &QueryFilter) -> StoreResult<u64> {
        self.inner.drop_documents(database, collection, filter)
    }

    fn count(&self, database: &str, collection: &str, filter: &QueryFilter) -> StoreResult<u64> {
        self.inner.count(database, collection, filter)
    }

    fn document_size_limit(&self) -> usize {
        self.inner.document_size_limit()
    }
}

/// A context over an in-memory database and blob store.
pub fn memory_context() -> (StorageContext, Arc<FlakyDatabase>, Arc<InMemoryFileHandler>) {
    context_over(FlakyDatabase::new())
}

pub fn context_over(db: FlakyDatabase) -> (StorageContext, Arc<FlakyDatabase>, Arc<InMemoryFileHandler>) {
    let db = Arc::new(db);
    let files = Arc::new(InMemoryFileHandler::new());
    let manager = FileManager::new(db.clone(), files.clone());
    (StorageContext::new(Arc::new(manager)), db, files)
}
