//! Versioned scene graphs.
//!
//! A [`Scene`] holds the working graph of one project branch, its optimized
//! (stash) graph and the federated scenes its Reference nodes point at.
//! Edits accumulate in a change-set; [`Scene::commit`] writes them as a new
//! [`RevisionNode`], externalizing node binaries into packed blob files, and
//! then runs the derived stages of a [`StagePipeline`] that move the
//! revision's [`UploadStatus`] on to COMPLETE.
//!
//! Loading reverses this: [`Scene::load_revision`] picks the newest complete
//! revision (or a pinned one), [`Scene::load_scene`] rebuilds the graph and
//! recursively loads referenced scenes, and [`Scene::hydrate_binaries`]
//! fetches binaries on demand.

mod bounds;
pub mod commit;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
mod load;
pub mod node;
pub mod pipeline;
pub mod revision;
pub mod scene;

#[cfg(test)]
mod testing;

pub use commit::CommitReport;
pub use config::{RepoConfig, SceneConfig};
pub use context::{Collections, StorageContext};
pub use error::{GraphIssue, SceneError, SceneResult, Severity};
pub use graph::{GraphInstance, GraphType};
pub use node::{Node, NodeKind, NodeType, ReferenceTarget};
pub use pipeline::{DerivedStage, PipelineOutcome, StageResult, StagePipeline, StashCommitStage};
pub use revision::{RevisionNode, UploadStatus};
pub use scene::{ChangeSet, Scene, SceneStatistics};
