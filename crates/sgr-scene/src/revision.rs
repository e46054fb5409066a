use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sgr_store::{Document, QueryFilter, ID_FIELD};
use sgr_types::{RepoUuid, Vector3d};

use crate::error::{SceneError, SceneResult};
use crate::node::{NodeType, PARENTS_FIELD, SHARED_ID_FIELD, TYPE_FIELD};

pub const STATUS_FIELD: &str = "incomplete";
pub const TIMESTAMP_FIELD: &str = "timestamp";
const AUTHOR_FIELD: &str = "author";
const MESSAGE_FIELD: &str = "message";
const TAG_FIELD: &str = "tag";
const CURRENT_FIELD: &str = "current";
const ADDED_FIELD: &str = "added";
const DELETED_FIELD: &str = "deleted";
const MODIFIED_FIELD: &str = "modified";
const ORIGINAL_FILES_FIELD: &str = "rFile";
const OFFSET_FIELD: &str = "coordOffset";

/// Position of a revision in the derived-artifact pipeline.
///
/// The numeric codes are the stored form of the `incomplete` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Complete,
    GenDefault,
    GenRepoStash,
    GenWebStash,
    GenSelTree,
    /// Web buffers are missing; regenerated like `GenWebStash`.
    MissingBundles,
    /// Never advanced automatically.
    Unknown,
}

impl UploadStatus {
    /// Derived stages in the order they run after the base write.
    pub const DERIVED: [UploadStatus; 3] = [Self::GenRepoStash, Self::GenWebStash, Self::GenSelTree];

    pub fn code(&self) -> i64 {
        match self {
            Self::Complete => 0,
            Self::GenDefault => 1,
            Self::GenRepoStash => 2,
            Self::GenWebStash => 3,
            Self::GenSelTree => 4,
            Self::MissingBundles => 5,
            Self::Unknown => 6,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Complete,
            1 => Self::GenDefault,
            2 => Self::GenRepoStash,
            3 => Self::GenWebStash,
            4 => Self::GenSelTree,
            5 => Self::MissingBundles,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::GenDefault => "GEN_DEFAULT",
            Self::GenRepoStash => "GEN_REPO_STASH",
            Self::GenWebStash => "GEN_WEB_STASH",
            Self::GenSelTree => "GEN_SEL_TREE",
            Self::MissingBundles => "MISSING_BUNDLES",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::GenDefault => Some(0),
            Self::GenRepoStash => Some(1),
            Self::GenWebStash | Self::MissingBundles => Some(2),
            Self::GenSelTree => Some(3),
            Self::Complete => Some(4),
            Self::Unknown => None,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    pub fn can_advance_to(&self, next: UploadStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to >= from,
            _ => *self == next,
        }
    }

    /// The first derived stage to regenerate for a revision left here.
    ///
    /// `None` for complete revisions, for `GenDefault` (whose base write is
    /// discarded, not resumed) and for `Unknown`.
    pub fn resume_point(&self) -> Option<UploadStatus> {
        match self {
            Self::GenRepoStash => Some(Self::GenRepoStash),
            Self::GenWebStash | Self::MissingBundles => Some(Self::GenWebStash),
            Self::GenSelTree => Some(Self::GenSelTree),
            Self::Complete | Self::GenDefault | Self::Unknown => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter matching the complete revisions of `branch`.
pub fn head_filter(branch: &RepoUuid) -> QueryFilter {
    QueryFilter::eq(SHARED_ID_FIELD, branch.to_string()).and(QueryFilter::missing(STATUS_FIELD))
}

/// Filter matching revisions left in a non-terminal stage.
pub fn incomplete_filter() -> QueryFilter {
    QueryFilter::exists(STATUS_FIELD)
}

/// One revision record of a branch.
///
/// Immutable once written except for `status`.
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionNode {
    pub unique_id: RepoUuid,
    pub branch: RepoUuid,
    pub author: String,
    pub message: Option<String>,
    pub tag: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub parents: Vec<RepoUuid>,
    /// Unique ids of every node in the revision.
    pub current: Vec<RepoUuid>,
    /// Shared ids added, removed and modified relative to the parent.
    pub added: Vec<RepoUuid>,
    pub removed: Vec<RepoUuid>,
    pub modified: Vec<RepoUuid>,
    /// Original file names, each prefixed with the revision id.
    pub original_files: Vec<String>,
    pub world_offset: Vector3d,
    pub status: UploadStatus,
}

impl RevisionNode {
    /// A new revision of `branch`, stamped now at millisecond precision and
    /// starting at `GenDefault`.
    pub fn new(branch: RepoUuid, author: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            unique_id: RepoUuid::new(),
            branch,
            author: author.into(),
            message: None,
            tag: None,
            timestamp: DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now),
            parents: Vec::new(),
            current: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
            original_files: Vec::new(),
            world_offset: Vector3d::ZERO,
            status: UploadStatus::GenDefault,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Move the status forward. Moving backwards is a `StatusRegression`.
    pub fn advance_to(&mut self, next: UploadStatus) -> SceneResult<()> {
        if !self.status.can_advance_to(next) {
            return Err(SceneError::StatusRegression {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with(ID_FIELD, self.unique_id.to_string())
            .with(SHARED_ID_FIELD, self.branch.to_string())
            .with(TYPE_FIELD, NodeType::Revision.as_str())
            .with(AUTHOR_FIELD, self.author.clone())
            .with(TIMESTAMP_FIELD, self.timestamp.timestamp_millis())
            .with(CURRENT_FIELD, id_values(&self.current));
        if !self.parents.is_empty() {
            doc.set(PARENTS_FIELD, id_values(&self.parents));
        }
        if let Some(message) = &self.message {
            doc.set(MESSAGE_FIELD, message.clone());
        }
        if let Some(tag) = &self.tag {
            doc.set(TAG_FIELD, tag.clone());
        }
        for (field, list) in [
            (ADDED_FIELD, &self.added),
            (DELETED_FIELD, &self.removed),
            (MODIFIED_FIELD, &self.modified),
        ] {
            if !list.is_empty() {
                doc.set(field, id_values(list));
            }
        }
        if !self.original_files.is_empty() {
            doc.set(ORIGINAL_FILES_FIELD, self.original_files.clone());
        }
        if !self.world_offset.is_zero() {
            doc.set(OFFSET_FIELD, self.world_offset.to_array().to_vec());
        }
        if !self.status.is_complete() {
            doc.set(STATUS_FIELD, self.status.code());
        }
        doc
    }

    pub fn from_document(doc: &Document) -> SceneResult<Self> {
        let id_text = doc.id_key().unwrap_or_else(|| "<no id>".into());
        let malformed = |reason: String| SceneError::Malformed {
            id: id_text.clone(),
            reason,
        };
        let uuid = |field: &str| doc.get_uuid(field).map_err(|e| malformed(e.to_string()));
        let uuids = |field: &str| doc.get_uuid_array(field).map_err(|e| malformed(e.to_string()));

        let unique_id = uuid(ID_FIELD)?.ok_or_else(|| malformed("missing _id".into()))?;
        let timestamp = match doc.get_i64(TIMESTAMP_FIELD) {
            Some(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| malformed(format!("timestamp {ms} out of range")))?,
            None => DateTime::<Utc>::default(),
        };
        let world_offset = match doc.get(OFFSET_FIELD).and_then(Value::as_array) {
            Some(values) => {
                let values: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                Vector3d::from_slice(&values).map_err(|e| malformed(e.to_string()))?
            }
            None => Vector3d::ZERO,
        };

        Ok(Self {
            unique_id,
            branch: uuid(SHARED_ID_FIELD)?.unwrap_or_else(RepoUuid::master_branch),
            author: doc.get_str(AUTHOR_FIELD).unwrap_or_default().to_string(),
            message: doc.get_str(MESSAGE_FIELD).map(str::to_owned),
            tag: doc.get_str(TAG_FIELD).map(str::to_owned),
            timestamp,
            parents: uuids(PARENTS_FIELD)?,
            current: uuids(CURRENT_FIELD)?,
            added: uuids(ADDED_FIELD)?,
            removed: uuids(DELETED_FIELD)?,
            modified: uuids(MODIFIED_FIELD)?,
            original_files: doc.get_str_array(ORIGINAL_FILES_FIELD),
            world_offset,
            status: doc
                .get_i64(STATUS_FIELD)
                .map(UploadStatus::from_code)
                .unwrap_or(UploadStatus::Complete),
        })
    }
}

fn id_values(ids: &[RepoUuid]) -> Vec<Value> {
    ids.iter().map(|id| Value::from(id.to_string())).collect()
}
