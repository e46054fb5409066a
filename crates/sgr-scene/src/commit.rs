//! The commit protocol.
//!
//! A commit turns the working graph's change-set into a new revision:
//!
//! 1. Check preconditions (graph with a root, identifiers, reachable
//!    database). Nothing is written when they fail.
//! 2. Build the revision record on top of the previous head.
//! 3. Ensure the collection indexes.
//! 4. Upload the original source files into the history group. Files
//!    already uploaded are deleted again if a later one fails.
//! 5. Write the revision record at `GEN_DEFAULT`.
//! 6. Write every added or modified node, externalizing binaries through a
//!    blob packer, then move the record to `GEN_REPO_STASH`.
//! 7. Run the derived-stage pipeline, which moves the status on and finally
//!    to `COMPLETE`.
//!
//! Head lookups only see complete records, so readers keep seeing the
//! previous head until step 7 finishes. A failure in step 6 leaves the
//! record at `GEN_DEFAULT`, naming everything the recovery pass removes.

use std::path::Path;

use serde_json::{Map, Value};
use sgr_blob::resolver::write_binaries;
use sgr_blob::{BlobReference, RefId};
use sgr_store::{IndexSpec, QueryFilter};
use sgr_types::RepoUuid;
use tracing::{debug, error, info, warn};

use crate::context::StorageContext;
use crate::error::{SceneError, SceneResult};
use crate::node::{Node, REVISION_ID_FIELD, SHARED_ID_FIELD, TYPE_FIELD};
use crate::pipeline::{PipelineOutcome, StagePipeline};
use crate::revision::{head_filter, RevisionNode, UploadStatus, TIMESTAMP_FIELD};
use crate::scene::Scene;

/// What a commit wrote.
#[derive(Clone, Debug)]
pub struct CommitReport {
    pub revision_id: RepoUuid,
    pub nodes_written: usize,
    /// Packed blob files committed for node binaries.
    pub blob_files: Vec<String>,
    /// References of the uploaded original files.
    pub original_files: Vec<BlobReference>,
    pub pipeline: PipelineOutcome,
}

impl CommitReport {
    pub fn status(&self) -> UploadStatus {
        self.pipeline.final_status
    }
}

/// Result of writing one batch of nodes.
struct NodeWrite {
    written: usize,
    blob_files: Vec<String>,
}

impl Scene {
    /// Commit the working graph as a new revision of the scene's branch.
    pub fn commit(
        &mut self,
        ctx: &StorageContext,
        pipeline: &StagePipeline,
        author: &str,
        message: Option<&str>,
        tag: Option<&str>,
    ) -> SceneResult<CommitReport> {
        self.check_commit_preconditions(ctx)?;
        let collections = ctx.collections(&self.project);
        let db = ctx.database();

        let parent = match &self.revision_node {
            Some(rev) => Some(rev.unique_id),
            None => db
                .find_one_sorted_desc(&self.database, &collections.history, &head_filter(&self.branch), TIMESTAMP_FIELD)?
                .map(|doc| RevisionNode::from_document(&doc))
                .transpose()?
                .map(|rev| rev.unique_id),
        };

        let mut rev = RevisionNode::new(self.branch, author);
        rev.message = message.map(str::to_owned);
        rev.tag = tag.map(str::to_owned);
        rev.parents = parent.into_iter().collect();
        rev.current = self.current_unique_ids();
        rev.added = self.stored_ids(&self.changes.added);
        rev.modified = self.stored_ids(&self.changes.modified);
        rev.removed = self.changes.removed.iter().copied().collect();
        rev.world_offset = self.world_offset.unwrap_or_default();
        let uploads: Vec<(String, &Path)> = self
            .original_files
            .iter()
            .map(|path| (original_file_name(&rev.unique_id, path), path.as_path()))
            .collect();
        rev.original_files = uploads.iter().map(|(name, _)| name.clone()).collect();

        info!(
            database = %self.database,
            project = %self.project,
            revision = %rev.unique_id,
            added = rev.added.len(),
            modified = rev.modified.len(),
            removed = rev.removed.len(),
            "committing revision"
        );

        self.ensure_indexes(ctx)?;

        let mut original_refs = Vec::with_capacity(uploads.len());
        for (name, path) in &uploads {
            match upload_original(ctx, &self.database, &collections.history, &rev.unique_id, name, path) {
                Ok(reference) => original_refs.push(reference),
                Err(e) => {
                    discard_originals(ctx, &self.database, &collections.history, &original_refs);
                    return Err(e);
                }
            }
        }

        if let Err(e) = db.insert_document(&self.database, &collections.history, &rev.to_document()) {
            discard_originals(ctx, &self.database, &collections.history, &original_refs);
            return Err(e.into());
        }

        let mut to_write: Vec<Node> = rev
            .added
            .iter()
            .chain(&rev.modified)
            .filter_map(|shared| self.graph.get_by_shared(shared))
            .cloned()
            .collect();
        for node in &mut to_write {
            node.set_revision_id(rev.unique_id);
        }
        let write = write_nodes(ctx, &self.database, &collections.scene, &collections.scene, to_write)?;
        rev.advance_to(UploadStatus::GenRepoStash)?;
        db.upsert_document(&self.database, &collections.history, &rev.to_document(), true)?;

        for shared in rev.added.iter().chain(&rev.modified) {
            if let Some(node) = self.graph.get_by_shared_mut(shared) {
                node.set_revision_id(rev.unique_id);
            }
        }
        let revision_id = rev.unique_id;
        self.revision = Some(revision_id);
        self.revision_node = Some(rev);
        self.revisioned = true;
        self.changes.clear();
        self.to_remove.clear();
        self.original_files.clear();
        debug!(revision = %revision_id, nodes = write.written, "base graph written");

        let outcome = pipeline.run_from(self, ctx, UploadStatus::GenRepoStash)?;
        Ok(CommitReport {
            revision_id,
            nodes_written: write.written,
            blob_files: write.blob_files,
            original_files: original_refs,
            pipeline: outcome,
        })
    }

    /// Write the optimized graph into the stash collection under the
    /// loaded revision. Stash nodes already stored for that revision are
    /// replaced. Returns the number of nodes written.
    pub fn commit_stash(&mut self, ctx: &StorageContext) -> SceneResult<usize> {
        let revision = self
            .revision_node
            .as_ref()
            .map(|rev| rev.unique_id)
            .ok_or_else(|| SceneError::NoRevision(self.location()))?;
        if self.stash.is_empty() {
            return Err(SceneError::Precondition("the optimized graph is empty".into()));
        }
        let collections = ctx.collections(&self.project);
        let dropped = ctx.database().drop_documents(
            &self.database,
            &collections.stash,
            &QueryFilter::eq(REVISION_ID_FIELD, revision.to_string()),
        )?;
        if dropped > 0 {
            debug!(revision = %revision, dropped, "replacing stored stash graph");
        }

        let mut nodes: Vec<Node> = self.stash.nodes().cloned().collect();
        nodes.sort_by_key(Node::unique_id);
        for node in &mut nodes {
            node.set_revision_id(revision);
        }
        let write = write_nodes(ctx, &self.database, &collections.stash, &collections.stash, nodes)?;
        for node in self.stash.nodes_mut() {
            node.set_revision_id(revision);
        }
        info!(revision = %revision, nodes = write.written, "stash graph written");
        Ok(write.written)
    }

    /// Record a new upload status on the loaded revision.
    pub fn update_revision_status(&mut self, ctx: &StorageContext, status: UploadStatus) -> SceneResult<()> {
        let Some(current) = self.revision_node.as_mut() else {
            return Err(SceneError::NoRevision(format!("{}/{}", self.database, self.project)));
        };
        let mut next = current.clone();
        next.advance_to(status)?;
        let history = ctx.collections(&self.project).history;
        ctx.database()
            .upsert_document(&self.database, &history, &next.to_document(), true)?;
        debug!(revision = %next.unique_id, status = %status, "upload status recorded");
        *current = next;
        Ok(())
    }

    /// Create the indexes commits and loads rely on. Safe to repeat.
    pub fn ensure_indexes(&self, ctx: &StorageContext) -> SceneResult<()> {
        let collections = ctx.collections(&self.project);
        let db = ctx.database();
        let by_revision = IndexSpec::new()
            .ascending(REVISION_ID_FIELD)
            .ascending(SHARED_ID_FIELD)
            .ascending(TYPE_FIELD);
        db.create_index(&self.database, &collections.scene, &by_revision)?;
        db.create_index(&self.database, &collections.scene, &IndexSpec::new().ascending(SHARED_ID_FIELD))?;
        db.create_index(&self.database, &collections.stash, &by_revision)?;
        db.create_index(&self.database, &collections.history, &IndexSpec::new().ascending(TIMESTAMP_FIELD))?;
        db.create_index(&self.database, &collections.history, &IndexSpec::new().descending(TIMESTAMP_FIELD))?;
        Ok(())
    }

    fn check_commit_preconditions(&self, ctx: &StorageContext) -> SceneResult<()> {
        if self.database.is_empty() || self.project.is_empty() {
            return Err(SceneError::Precondition("database and project names are required".into()));
        }
        if self.graph.is_empty() {
            return Err(SceneError::Precondition("the scene graph is empty".into()));
        }
        if self.graph.root().is_none() {
            return Err(SceneError::Precondition("the scene graph has no root".into()));
        }
        ctx.database()
            .ping()
            .map_err(|e| SceneError::Precondition(format!("database unreachable: {e}")))
    }

    /// Sorted shared ids of stored nodes, without federation nodes.
    fn stored_ids<'a>(&self, ids: impl IntoIterator<Item = &'a RepoUuid>) -> Vec<RepoUuid> {
        ids.into_iter()
            .filter(|id| !self.synthetic.contains(id))
            .copied()
            .collect()
    }
}

fn upload_original(
    ctx: &StorageContext,
    database: &str,
    group: &str,
    revision: &RepoUuid,
    name: &str,
    path: &Path,
) -> SceneResult<BlobReference> {
    let data = std::fs::read(path).map_err(|source| SceneError::OriginalFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut metadata = Map::new();
    metadata.insert(REVISION_ID_FIELD.into(), Value::from(revision.to_string()));
    Ok(ctx
        .files()
        .upload_file_and_commit(database, group, RefId::Name(name.to_string()), &data, metadata)?)
}

/// Delete original files of a commit that never recorded its revision.
fn discard_originals(ctx: &StorageContext, database: &str, group: &str, refs: &[BlobReference]) {
    for reference in refs {
        if let Err(e) = ctx.files().delete_file_and_ref(database, group, &reference.id) {
            error!(id = %reference.id, error = %e, "failed to remove original file of aborted commit");
        }
    }
}

fn original_file_name(revision: &RepoUuid, path: &Path) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{revision}{base}")
}

/// Insert node documents in batches, packing their binaries into blob files
/// of `group`.
fn write_nodes(
    ctx: &StorageContext,
    database: &str,
    collection: &str,
    group: &str,
    nodes: Vec<Node>,
) -> SceneResult<NodeWrite> {
    let db = ctx.database();
    let limit = db.document_size_limit();
    let batch_size = ctx.config().node_batch_size.max(1);
    let mut packer = ctx.packer(database, group);
    let mut batch = Vec::new();
    let mut batch_bytes = 0;
    let mut written = 0;

    for node in nodes {
        let mut doc = node.to_document();
        write_binaries(&mut packer, &mut doc)?;
        let size = doc.size_estimate();
        if ctx.config().enforce_size_limit && size > limit {
            warn!(node = %node.unique_id(), size, limit, "node document too large");
            return Err(SceneError::NodeTooLarge {
                shared_id: node.shared_id(),
                unique_id: node.unique_id(),
                size,
                limit,
            });
        }
        if !batch.is_empty() && (batch.len() >= batch_size || batch_bytes + size > limit) {
            db.insert_many_documents(database, collection, &batch)?;
            written += batch.len();
            batch.clear();
            batch_bytes = 0;
        }
        batch.push(doc);
        batch_bytes += size;
    }
    if !batch.is_empty() {
        db.insert_many_documents(database, collection, &batch)?;
        written += batch.len();
    }
    packer.finished()?;
    Ok(NodeWrite {
        written,
        blob_files: packer.committed_files().to_vec(),
    })
}
