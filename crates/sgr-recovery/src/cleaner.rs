use std::collections::BTreeSet;
use std::fmt;

use sgr_blob::resolver::blob_reference;
use sgr_blob::{RefId, BLOB_REF_FIELD};
use sgr_scene::node::REVISION_ID_FIELD;
use sgr_scene::revision::incomplete_filter;
use sgr_scene::{RevisionNode, Scene, StagePipeline, StorageContext, UploadStatus};
use sgr_store::{QueryFilter, ID_FIELD};
use sgr_types::RepoUuid;
use tracing::{debug, error, info, warn};

use crate::error::RecoveryResult;

const BLOB_FILE_FIELD: &str = "buffer.name";

// ---------------------------------------------------------------------------
// RecoveryReport
// ---------------------------------------------------------------------------

/// What one recovery pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Revisions whose partial base write was removed.
    pub removed: Vec<RepoUuid>,
    /// Revisions brought to COMPLETE.
    pub completed: Vec<RepoUuid>,
    /// Revisions whose derived stages failed again, with the status they
    /// were left at.
    pub stalled: Vec<(RepoUuid, UploadStatus)>,
    /// Revisions with a status recovery does not act on.
    pub skipped: Vec<RepoUuid>,
}

impl RecoveryReport {
    /// True when nothing is left for a later pass.
    pub fn is_clean(&self) -> bool {
        self.stalled.is_empty() && self.skipped.is_empty()
    }

    pub fn total(&self) -> usize {
        self.removed.len() + self.completed.len() + self.stalled.len() + self.skipped.len()
    }
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} removed, {} completed, {} stalled, {} skipped",
            self.removed.len(),
            self.completed.len(),
            self.stalled.len(),
            self.skipped.len()
        )
    }
}

// ---------------------------------------------------------------------------
// SceneCleaner
// ---------------------------------------------------------------------------

/// Recovery pass over one project's incomplete revisions.
pub struct SceneCleaner<'a> {
    database: String,
    project: String,
    ctx: &'a StorageContext,
    pipeline: &'a StagePipeline,
}

impl<'a> SceneCleaner<'a> {
    /// `pipeline` holds the derived stages that revisions are resumed with.
    pub fn new(
        database: impl Into<String>,
        project: impl Into<String>,
        ctx: &'a StorageContext,
        pipeline: &'a StagePipeline,
    ) -> Self {
        Self {
            database: database.into(),
            project: project.into(),
            ctx,
            pipeline,
        }
    }

    /// Every revision record of the project not at COMPLETE, oldest first.
    ///
    /// Records that cannot be parsed are logged and left out.
    pub fn incomplete_revisions(&self) -> RecoveryResult<Vec<RevisionNode>> {
        let history = self.ctx.collections(&self.project).history;
        let docs = self
            .ctx
            .database()
            .find_all_by_criteria(&self.database, &history, &incomplete_filter())?;
        let mut revisions = Vec::with_capacity(docs.len());
        for doc in docs {
            match RevisionNode::from_document(&doc) {
                Ok(rev) => revisions.push(rev),
                Err(e) => error!(
                    id = %doc.id_key().unwrap_or_default(),
                    error = %e,
                    "unreadable revision record"
                ),
            }
        }
        revisions.sort_by_key(|rev| rev.timestamp);
        debug!(project = %self.project, count = revisions.len(), "incomplete revisions");
        Ok(revisions)
    }

    /// Run the pass: remove or resume every incomplete revision.
    pub fn execute(&self) -> RecoveryResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for rev in self.incomplete_revisions()? {
            let id = rev.unique_id;
            match rev.status {
                UploadStatus::GenDefault => {
                    self.remove_revision(&rev)?;
                    report.removed.push(id);
                }
                status => match status.resume_point() {
                    Some(start) => match self.resume_revision(&rev, start)? {
                        UploadStatus::Complete => report.completed.push(id),
                        left_at => report.stalled.push((id, left_at)),
                    },
                    None => {
                        warn!(revision = %id, status = %status, "no recovery for revision status, skipping");
                        report.skipped.push(id);
                    }
                },
            }
        }
        info!(project = %self.project, %report, "recovery pass finished");
        Ok(report)
    }

    /// Delete everything a revision that never finished its base write may
    /// have stored. The revision record goes last, so an interrupted removal
    /// is picked up again by the next pass.
    fn remove_revision(&self, rev: &RevisionNode) -> RecoveryResult<()> {
        let collections = self.ctx.collections(&self.project);
        let db = self.ctx.database();
        let revision = rev.unique_id.to_string();
        info!(revision = %revision, project = %self.project, "removing unfinished revision");

        let own_nodes = QueryFilter::is_in(ID_FIELD, rev.current.iter().map(|id| id.to_string()))
            .and(QueryFilter::eq(REVISION_ID_FIELD, revision.clone()));
        let blobs = self.blob_files_of(&collections.scene, &own_nodes, &revision)?;
        self.delete_blob_files(&collections.scene, &blobs)?;
        let nodes = db.drop_documents(&self.database, &collections.scene, &own_nodes)?;

        let stash_nodes = QueryFilter::eq(REVISION_ID_FIELD, revision.clone());
        let stash_blobs = self.blob_files_of(&collections.stash, &stash_nodes, &revision)?;
        self.delete_blob_files(&collections.stash, &stash_blobs)?;
        let stash = db.drop_documents(&self.database, &collections.stash, &stash_nodes)?;

        let originals: BTreeSet<String> = rev.original_files.iter().cloned().collect();
        self.delete_blob_files(&collections.history, &originals)?;

        db.drop_document(&self.database, &collections.history, &revision)?;
        info!(
            revision = %revision,
            nodes,
            stash,
            blob_files = blobs.len() + stash_blobs.len(),
            original_files = originals.len(),
            "unfinished revision removed"
        );
        Ok(())
    }

    /// Blob files referenced by the documents `filter` selects, minus those
    /// still referenced by documents of other revisions.
    fn blob_files_of(
        &self,
        collection: &str,
        filter: &QueryFilter,
        revision: &str,
    ) -> RecoveryResult<BTreeSet<String>> {
        let db = self.ctx.database();
        let mut files = BTreeSet::new();
        for doc in db.find_all_by_criteria(&self.database, collection, filter)? {
            match blob_reference(&doc)? {
                Some(data_ref) if data_ref.size > 0 => {
                    files.insert(data_ref.file_name);
                }
                _ => {}
            }
        }

        let field = format!("{BLOB_REF_FIELD}.{BLOB_FILE_FIELD}");
        let mut owned = BTreeSet::new();
        for file in files {
            let users = db.find_all_by_criteria(&self.database, collection, &QueryFilter::eq(&field, file.clone()))?;
            let shared = users
                .iter()
                .any(|doc| doc.get_str(REVISION_ID_FIELD) != Some(revision));
            if shared {
                debug!(file = %file, "blob file still used by another revision, keeping it");
            } else {
                owned.insert(file);
            }
        }
        Ok(owned)
    }

    fn delete_blob_files(&self, group: &str, names: &BTreeSet<String>) -> RecoveryResult<()> {
        let files = self.ctx.files();
        for name in names {
            let id = RefId::Name(name.clone());
            if !files.delete_file_and_ref(&self.database, group, &id)? {
                warn!(file = %name, group, "blob file of unfinished revision already gone");
            }
        }
        Ok(())
    }

    /// Reload the scene at the revision and rerun the derived stages from
    /// `start`. Returns the status the revision was left at.
    fn resume_revision(&self, rev: &RevisionNode, start: UploadStatus) -> RecoveryResult<UploadStatus> {
        info!(revision = %rev.unique_id, from = %start, "resuming derived stages");
        let mut scene = Scene::new(&self.database, &self.project)
            .with_branch(rev.branch)
            .with_revision(rev.unique_id);
        scene.load_revision(self.ctx)?;
        scene.load_scene(self.ctx)?;
        scene.load_stash(self.ctx)?;
        let outcome = self.pipeline.run_from(&mut scene, self.ctx, start)?;
        if let Some(failure) = outcome.failure() {
            warn!(
                revision = %rev.unique_id,
                stage = %failure.stage_name,
                reason = failure.reason.as_deref().unwrap_or_default(),
                "revision still incomplete"
            );
        }
        Ok(outcome.final_status)
    }
}

impl fmt::Debug for SceneCleaner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneCleaner")
            .field("database", &self.database)
            .field("project", &self.project)
            .field("stages", &self.pipeline.stage_count())
            .finish()
    }
}
