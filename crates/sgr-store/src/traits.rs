use sgr_types::RepoUuid;

use crate::document::{Document, ID_FIELD};
use crate::error::StoreResult;
use crate::query::{compare_values, IndexSpec, QueryFilter};

/// Default maximum size of one stored document (16 MiB).
pub const DEFAULT_DOCUMENT_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Handle to a schema-flexible document database.
///
/// Implementations wrap a pooled driver connection and may be shared across
/// threads. Every call blocks until the database answers.
///
/// All implementations must satisfy these invariants:
/// - A document carrying in-memory binaries is rejected, never silently
///   stripped.
/// - Documents over [`DatabaseHandler::document_size_limit`] are rejected with
///   [`StoreError::DocumentTooLarge`](crate::StoreError::DocumentTooLarge).
/// - `create_index` is idempotent.
pub trait DatabaseHandler: Send + Sync {
    /// Check that the database is reachable.
    fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Insert one document. Fails if its `_id` already exists.
    fn insert_document(&self, database: &str, collection: &str, doc: &Document) -> StoreResult<()>;

    /// Insert several documents in order, stopping at the first failure.
    ///
    /// Default implementation calls `insert_document()` for each document.
    fn insert_many_documents(
        &self,
        database: &str,
        collection: &str,
        docs: &[Document],
    ) -> StoreResult<()> {
        docs.iter()
            .try_for_each(|doc| self.insert_document(database, collection, doc))
    }

    /// Insert or update the document with the same `_id`.
    ///
    /// With `overwrite` the stored document is replaced; otherwise the given
    /// fields are merged into it.
    fn upsert_document(
        &self,
        database: &str,
        collection: &str,
        doc: &Document,
        overwrite: bool,
    ) -> StoreResult<()>;

    /// All documents matching `filter`, in storage order.
    fn find_all_by_criteria(
        &self,
        database: &str,
        collection: &str,
        filter: &QueryFilter,
    ) -> StoreResult<Vec<Document>>;

    /// The first document matching `filter`.
    fn find_one_by_criteria(
        &self,
        database: &str,
        collection: &str,
        filter: &QueryFilter,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .find_all_by_criteria(database, collection, filter)?
            .into_iter()
            .next())
    }

    /// The matching document with the greatest value of `sort_field`.
    fn find_one_sorted_desc(
        &self,
        database: &str,
        collection: &str,
        filter: &QueryFilter,
        sort_field: &str,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .find_all_by_criteria(database, collection, filter)?
            .into_iter()
            .max_by(|a, b| compare_values(a.get(sort_field), b.get(sort_field))))
    }

    fn find_one_by_unique_id(
        &self,
        database: &str,
        collection: &str,
        id: &RepoUuid,
    ) -> StoreResult<Option<Document>> {
        self.find_one_by_criteria(database, collection, &QueryFilter::eq(ID_FIELD, id.to_string()))
    }

    /// Documents whose `_id` is any of `ids`.
    fn find_all_by_unique_ids(
        &self,
        database: &str,
        collection: &str,
        ids: &[RepoUuid],
    ) -> StoreResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = QueryFilter::is_in(ID_FIELD, ids.iter().map(ToString::to_string));
        self.find_all_by_criteria(database, collection, &filter)
    }

    /// Newest document of a lineage, ordered by `sort_field`.
    fn find_latest_by_shared_id(
        &self,
        database: &str,
        collection: &str,
        shared_id: &RepoUuid,
        sort_field: &str,
        extra: QueryFilter,
    ) -> StoreResult<Option<Document>> {
        let filter = QueryFilter::eq("shared_id", shared_id.to_string()).and(extra);
        self.find_one_sorted_desc(database, collection, &filter, sort_field)
    }

    /// Create an index if it does not already exist.
    fn create_index(&self, database: &str, collection: &str, index: &IndexSpec) -> StoreResult<()>;

    fn list_indexes(&self, database: &str, collection: &str) -> StoreResult<Vec<IndexSpec>>;

    /// Delete by `_id`. Returns `true` if the document existed.
    fn drop_document(&self, database: &str, collection: &str, id: &str) -> StoreResult<bool>;

    /// Delete every matching document. Returns the number removed.
    fn drop_documents(
        &self,
        database: &str,
        collection: &str,
        filter: &QueryFilter,
    ) -> StoreResult<u64>;

    fn count(&self, database: &str, collection: &str, filter: &QueryFilter) -> StoreResult<u64>;

    /// Largest document the database accepts, in bytes.
    fn document_size_limit(&self) -> usize {
        DEFAULT_DOCUMENT_SIZE_LIMIT
    }
}
