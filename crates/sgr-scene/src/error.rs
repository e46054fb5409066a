use std::path::PathBuf;

use sgr_blob::BlobError;
use sgr_store::StoreError;
use sgr_types::RepoUuid;
use thiserror::Error;
use tracing::{error, warn};

use crate::revision::UploadStatus;

/// Fatal errors: the current operation stops.
#[derive(Debug, Error)]
pub enum SceneError {
    /// Commit or load requirements not met; no I/O was attempted.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// One node document is over the database's size limit even after its
    /// binaries were externalized.
    #[error("node {shared_id} (unique id {unique_id}) is {size} bytes, over the {limit} byte document limit")]
    NodeTooLarge {
        shared_id: RepoUuid,
        unique_id: RepoUuid,
        size: usize,
        limit: usize,
    },

    #[error("revision {0} not found")]
    RevisionNotFound(RepoUuid),

    /// An operation needs a revision record but none is loaded.
    #[error("no revision loaded for {0}")]
    NoRevision(String),

    /// A derived stage of a revision failed; the revision stays at `stage`.
    #[error("revision {revision} failed at {stage}: {reason}")]
    StageFailed {
        revision: RepoUuid,
        stage: UploadStatus,
        reason: String,
    },

    #[error("upload status cannot move from {from} to {to}")]
    StatusRegression { from: UploadStatus, to: UploadStatus },

    /// An original source file could not be read for upload.
    #[error("cannot read original file {path}: {source}")]
    OriginalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored node or revision document cannot be decoded.
    #[error("malformed document {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
}

impl SceneError {
    /// Returns `true` for document size-limit violations, wherever they were
    /// detected.
    pub fn is_size_limit(&self) -> bool {
        match self {
            Self::NodeTooLarge { .. } => true,
            Self::Store(e) | Self::Blob(BlobError::Store(e)) => e.is_size_limit(),
            _ => false,
        }
    }
}

/// Result alias for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// How serious a structural issue is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Non-fatal structural problem found while building or editing a graph.
///
/// Issues are logged and collected on the scene; the operation that found
/// them carries on and the scene is treated as degraded.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum GraphIssue {
    #[error("second root {candidate} while {existing} is root (identical: {identical})")]
    DuplicateRoot {
        existing: RepoUuid,
        candidate: RepoUuid,
        identical: bool,
    },

    #[error("node {0} not found")]
    MissingNode(RepoUuid),

    #[error("{child} is not a child of {parent}")]
    MissingChild { parent: RepoUuid, child: RepoUuid },

    #[error("skipped malformed node {id}: {reason}")]
    MalformedNode { id: String, reason: String },

    #[error("reference {shared_id} to {project} could not be loaded: {reason}")]
    UnresolvedReference {
        shared_id: RepoUuid,
        project: String,
        reason: String,
    },

    #[error("reference {shared_id} to {project} loops back into an enclosing scene")]
    CyclicReference { shared_id: RepoUuid, project: String },

    #[error("metadata {name} matches no node")]
    UnmatchedMetadata { name: String },
}

impl GraphIssue {
    pub fn severity(&self) -> Severity {
        match self {
            Self::DuplicateRoot {
                identical: true, ..
            }
            | Self::MissingChild { .. }
            | Self::UnmatchedMetadata { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Emit this issue through `tracing` at its severity.
    pub fn log(&self) {
        match self.severity() {
            Severity::Warning => warn!(issue = %self, "scene graph issue"),
            Severity::Error => error!(issue = %self, "scene graph issue"),
        }
    }
}
