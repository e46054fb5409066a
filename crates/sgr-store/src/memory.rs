use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::query::{IndexSpec, QueryFilter};
use crate::traits::{DatabaseHandler, DEFAULT_DOCUMENT_SIZE_LIMIT};

#[derive(Default)]
struct Collection {
    /// Documents in insertion order.
    docs: Vec<Document>,
    /// `_id` key -> position in `docs`.
    by_id: HashMap<String, usize>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    fn remove_at(&mut self, pos: usize) {
        self.docs.remove(pos);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_id = self
            .docs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.id_key().map(|k| (k, i)))
            .collect();
    }
}

type Key = (String, String);

/// In-memory document database.
///
/// Intended for tests and embedding. Collections are held behind a `RwLock`
/// so one instance can be shared between threads like a pooled driver.
pub struct InMemoryDatabase {
    collections: RwLock<HashMap<Key, Collection>>,
    size_limit: usize,
}

impl InMemoryDatabase {
    /// Create an empty database with the default document size limit.
    pub fn new() -> Self {
        Self::with_size_limit(DEFAULT_DOCUMENT_SIZE_LIMIT)
    }

    /// Create an empty database that rejects documents over `limit` bytes.
    pub fn with_size_limit(limit: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            size_limit: limit,
        }
    }

    /// Number of documents in one collection.
    pub fn len(&self, database: &str, collection: &str) -> StoreResult<usize> {
        let map = self.read()?;
        Ok(map
            .get(&key(database, collection))
            .map_or(0, |c| c.docs.len()))
    }

    /// Sorted names of the non-empty collections of `database`.
    pub fn collection_names(&self, database: &str) -> StoreResult<Vec<String>> {
        let map = self.read()?;
        let mut names: Vec<String> = map
            .iter()
            .filter(|((db, _), c)| db == database && !c.docs.is_empty())
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove every collection.
    pub fn clear(&self) -> StoreResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<Key, Collection>>> {
        self.collections
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<Key, Collection>>> {
        self.collections
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn validate(&self, doc: &Document) -> StoreResult<String> {
        let id = doc.id_key().ok_or_else(|| StoreError::Malformed {
            field: crate::ID_FIELD.into(),
            reason: "document has no _id".into(),
        })?;
        if doc.has_binaries() {
            return Err(StoreError::InlineBinary {
                id,
                count: doc.binaries().len(),
            });
        }
        let size = doc.size_estimate();
        if size > self.size_limit {
            return Err(StoreError::DocumentTooLarge {
                id,
                size,
                limit: self.size_limit,
            });
        }
        Ok(id)
    }
}

fn key(database: &str, collection: &str) -> Key {
    (database.to_string(), collection.to_string())
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseHandler for InMemoryDatabase {
    fn insert_document(&self, database: &str, collection: &str, doc: &Document) -> StoreResult<()> {
        let id = self.validate(doc)?;
        let mut map = self.write()?;
        let coll = map.entry(key(database, collection)).or_default();
        if coll.by_id.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        coll.by_id.insert(id, coll.docs.len());
        coll.docs.push(doc.clone());
        Ok(())
    }

    fn upsert_document(
        &self,
        database: &str,
        collection: &str,
        doc: &Document,
        overwrite: bool,
    ) -> StoreResult<()> {
        let id = self.validate(doc)?;
        let mut map = self.write()?;
        let coll = map.entry(key(database, collection)).or_default();
        match coll.by_id.get(&id).copied() {
            Some(pos) if overwrite => coll.docs[pos] = doc.clone(),
            Some(pos) => {
                let mut merged = coll.docs[pos].clone();
                for (k, v) in doc.fields() {
                    merged.set(k.clone(), v.clone());
                }
                let size = merged.size_estimate();
                if size > self.size_limit {
                    return Err(StoreError::DocumentTooLarge {
                        id,
                        size,
                        limit: self.size_limit,
                    });
                }
                coll.docs[pos] = merged;
            }
            None => {
                coll.by_id.insert(id, coll.docs.len());
                coll.docs.push(doc.clone());
            }
        }
        Ok(())
    }

    fn find_all_by_criteria(
        &self,
        database: &str,
        collection: &str,
        filter: &QueryFilter,
    ) -> StoreResult<Vec<Document>> {
        let map = self.read()?;
        Ok(map
            .get(&key(database, collection))
            .map(|c| c.docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn create_index(&self, database: &str, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        let mut map = self.write()?;
        let coll = map.entry(key(database, collection)).or_default();
        if !coll.indexes.contains(index) {
            debug!(collection, index = %index, "created index");
            coll.indexes.push(index.clone());
        }
        Ok(())
    }

    fn list_indexes(&self, database: &str, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        let map = self.read()?;
        Ok(map
            .get(&key(database, collection))
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    fn drop_document(&self, database: &str, collection: &str, id: &str) -> StoreResult<bool> {
        let mut map = self.write()?;
        let Some(coll) = map.get_mut(&key(database, collection)) else {
            return Ok(false);
        };
        match coll.by_id.get(id).copied() {
            Some(pos) => {
                coll.remove_at(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn drop_documents(
        &self,
        database: &str,
        collection: &str,
        filter: &QueryFilter,
    ) -> StoreResult<u64> {
        let mut map = self.write()?;
        let Some(coll) = map.get_mut(&key(database, collection)) else {
            return Ok(0);
        };
        let before = coll.docs.len();
        coll.docs.retain(|d| !filter.matches(d));
        let removed = before - coll.docs.len();
        if removed > 0 {
            coll.reindex();
        }
        Ok(removed as u64)
    }

    fn count(&self, database: &str, collection: &str, filter: &QueryFilter) -> StoreResult<u64> {
        let map = self.read()?;
        Ok(map
            .get(&key(database, collection))
            .map_or(0, |c| c.docs.iter().filter(|d| filter.matches(d)).count()) as u64)
    }

    fn document_size_limit(&self) -> usize {
        self.size_limit
    }
}

impl std::fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("InMemoryDatabase")
            .field("collection_count", &count)
            .field("size_limit", &self.size_limit)
            .finish()
    }
}
