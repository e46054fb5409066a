use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::context::StorageContext;
use crate::error::SceneResult;
use crate::revision::UploadStatus;
use crate::scene::Scene;

// ---------------------------------------------------------------------------
// DerivedStage
// ---------------------------------------------------------------------------

/// Producer of one derived artifact of a revision (stash graph, web
/// buffers, selection tree).
pub trait DerivedStage: Send + Sync {
    fn name(&self) -> &str;

    /// The upload status this stage works off.
    fn status(&self) -> UploadStatus;

    /// Build the artifact for the scene's current revision.
    fn generate(&self, scene: &mut Scene, ctx: &StorageContext) -> SceneResult<()>;
}

/// Outcome of one stage.
#[derive(Clone, Debug)]
pub struct StageResult {
    pub stage_name: String,
    pub status: UploadStatus,
    pub passed: bool,
    pub reason: Option<String>,
    pub elapsed: Duration,
}

/// Outcome of a pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    /// Status recorded on the revision when the run ended.
    pub final_status: UploadStatus,
    pub stage_results: Vec<StageResult>,
    pub elapsed: Duration,
}

impl PipelineOutcome {
    pub fn is_complete(&self) -> bool {
        self.final_status.is_complete()
    }

    /// The stage that stopped the run.
    pub fn failure(&self) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| !r.passed)
    }
}

// ---------------------------------------------------------------------------
// StagePipeline
// ---------------------------------------------------------------------------

/// The derived stages run after a revision's base write.
///
/// The pipeline is fail-fast: the revision records each stage's status
/// before the stage runs, the first failure stops the run and leaves the
/// status there, and COMPLETE is written only when every remaining stage
/// succeeded.
#[derive(Default)]
pub struct StagePipeline {
    stages: Vec<Box<dyn DerivedStage>>,
}

impl StagePipeline {
    /// A pipeline with no generators; every stage is skipped.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Box<dyn DerivedStage>) -> Self {
        self.add_stage(stage);
        self
    }

    pub fn add_stage(&mut self, stage: Box<dyn DerivedStage>) {
        self.stages.push(stage);
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage from `start` on against the scene's loaded revision.
    ///
    /// Stage failures end up in the outcome; errors writing the status are
    /// returned.
    pub fn run_from(
        &self,
        scene: &mut Scene,
        ctx: &StorageContext,
        start: UploadStatus,
    ) -> SceneResult<PipelineOutcome> {
        let pipeline_start = Instant::now();
        let mut stage_results = Vec::new();
        let first = UploadStatus::DERIVED
            .iter()
            .position(|s| *s == start)
            .unwrap_or(UploadStatus::DERIVED.len());

        for status in &UploadStatus::DERIVED[first..] {
            let generators: Vec<&dyn DerivedStage> = self
                .stages
                .iter()
                .filter(|s| s.status() == *status)
                .map(|s| s.as_ref())
                .collect();
            if generators.is_empty() {
                debug!(status = %status, "no generator registered, skipping stage");
                continue;
            }

            scene.update_revision_status(ctx, *status)?;
            for stage in generators {
                let stage_start = Instant::now();
                let result = stage.generate(scene, ctx);
                let elapsed = stage_start.elapsed();
                let reason = result.err().map(|e| e.to_string());
                let passed = reason.is_none();
                stage_results.push(StageResult {
                    stage_name: stage.name().to_string(),
                    status: *status,
                    passed,
                    reason: reason.clone(),
                    elapsed,
                });
                if let Some(reason) = reason {
                    warn!(stage = stage.name(), status = %status, %reason, "derived stage failed");
                    return Ok(PipelineOutcome {
                        final_status: *status,
                        stage_results,
                        elapsed: pipeline_start.elapsed(),
                    });
                }
            }
        }

        scene.update_revision_status(ctx, UploadStatus::Complete)?;
        info!(stages = stage_results.len(), "revision complete");
        Ok(PipelineOutcome {
            final_status: UploadStatus::Complete,
            stage_results,
            elapsed: pipeline_start.elapsed(),
        })
    }
}

/// Stage that writes the scene's optimized graph to the stash collection.
///
/// The optimized graph itself comes from whoever filled it through
/// [`Scene::add_stash_graph`]; with an empty stash graph the stage fails.
pub struct StashCommitStage;

impl DerivedStage for StashCommitStage {
    fn name(&self) -> &str {
        "stash"
    }

    fn status(&self) -> UploadStatus {
        UploadStatus::GenRepoStash
    }

    fn generate(&self, scene: &mut Scene, ctx: &StorageContext) -> SceneResult<()> {
        scene.commit_stash(ctx).map(|_| ())
    }
}
