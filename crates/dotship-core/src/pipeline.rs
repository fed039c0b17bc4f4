//! Release pipeline orchestration.
//!
//! Build → Publish → Release, strictly in order, stopping at the first
//! failure. The version is derived from the tag once, up front; Publish
//! receives the stripped version and Release the raw tag.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

use dotship_env::{ContainerRuntime, SourceTree};
use dotship_hosting::{Credential, ReleaseHost, ReleaseOutcome};

use crate::build::{BuildReport, BuildStage};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::obs::{
    emit_pipeline_finished, emit_pipeline_started, emit_stage_finished, emit_stage_started,
    PipelineSpan,
};
use crate::publish::{ArtifactSet, PublishStage};
use crate::release::ReleaseStage;
use crate::stage::{StageKind, StageResult};
use crate::version::Version;

/// Summary of a successful release run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,

    /// Tag as given.
    pub tag: String,

    /// Version derived from the tag.
    pub version: Version,

    /// Content reference of the source tree that was built.
    pub content_ref: String,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,

    /// One entry per executed stage, in order.
    pub stages: Vec<StageResult>,

    pub outcome: ReleaseOutcome,
}

impl PipelineReport {
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.success).count()
    }
}

/// Sequences the three stages over one runtime and one release host.
pub struct ReleasePipeline {
    runtime: Arc<dyn ContainerRuntime>,
    host: Arc<dyn ReleaseHost>,
    config: PipelineConfig,
}

impl ReleasePipeline {
    /// Validates `config` before accepting it.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        host: Arc<dyn ReleaseHost>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ReleasePipeline {
            runtime,
            host,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot `root` with the configured exclusion globs.
    pub fn snapshot(&self, root: &Path) -> Result<SourceTree> {
        Ok(SourceTree::snapshot(root, &self.config.exclude_set()?)?)
    }

    /// Build only, reporting the outcome instead of failing on it.
    pub async fn build(&self, tree: &SourceTree) -> Result<BuildReport> {
        BuildStage::new(self.runtime.clone(), &self.config)
            .diagnose(tree)
            .await
    }

    /// Build then publish into `output`. No release is created.
    pub async fn publish(
        &self,
        tree: &SourceTree,
        version: &Version,
        output: &Path,
    ) -> Result<ArtifactSet> {
        let env = BuildStage::new(self.runtime.clone(), &self.config)
            .run(tree)
            .await?;
        let result = PublishStage::new(&self.config)
            .run(&env, version, output)
            .await;
        env.discard().await;
        result
    }

    /// Full run: build, publish, create the draft release for `tag`.
    ///
    /// `credential` is moved into the release stage and dropped unused if an
    /// earlier stage fails.
    pub async fn release(
        &self,
        tree: &SourceTree,
        tag: &str,
        credential: Credential,
    ) -> Result<PipelineReport> {
        let version = Version::from_tag(tag)?;
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        emit_pipeline_started(&run_id, tag, version.as_str(), tree.short_ref());

        let mut stages = Vec::with_capacity(3);
        let result = self
            .run_stages(&run_id, tree, tag, &version, credential, &mut stages)
            .instrument(PipelineSpan::span(&run_id, tag))
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        emit_pipeline_finished(&run_id, duration_ms, stages.len(), result.is_ok());

        let outcome = result?;
        info!(release_id = outcome.release_id, "Pipeline complete");
        Ok(PipelineReport {
            run_id,
            tag: tag.to_string(),
            version,
            content_ref: tree.content_ref().to_string(),
            started_at,
            duration_ms,
            stages,
            outcome,
        })
    }

    async fn run_stages(
        &self,
        run_id: &str,
        tree: &SourceTree,
        tag: &str,
        version: &Version,
        credential: Credential,
        stages: &mut Vec<StageResult>,
    ) -> Result<ReleaseOutcome> {
        // Build
        let started = begin(run_id, StageKind::Build);
        let built = BuildStage::new(self.runtime.clone(), &self.config)
            .run(tree)
            .await;
        let env = track(run_id, stages, StageKind::Build, started, built)?;

        // Publish
        let started = begin(run_id, StageKind::Publish);
        let published = async {
            let workspace = tempfile::Builder::new()
                .prefix("dotship-artifacts-")
                .tempdir()?;
            let artifacts = PublishStage::new(&self.config)
                .run(&env, version, &workspace.path().join("publish"))
                .await?;
            Ok::<_, PipelineError>((workspace, artifacts))
        }
        .await;
        env.discard().await;
        let (_workspace, artifacts) = track(run_id, stages, StageKind::Publish, started, published)?;

        // Release
        let started = begin(run_id, StageKind::Release);
        let released = ReleaseStage::new(self.host.clone(), &self.config)
            .run(&artifacts, tag, credential)
            .await;
        track(run_id, stages, StageKind::Release, started, released)
    }
}

fn begin(run_id: &str, stage: StageKind) -> Instant {
    emit_stage_started(run_id, stage);
    Instant::now()
}

/// Record the stage outcome and pass the result through.
fn track<T>(
    run_id: &str,
    stages: &mut Vec<StageResult>,
    stage: StageKind,
    started: Instant,
    result: Result<T>,
) -> Result<T> {
    let entry = match &result {
        Ok(_) => StageResult::passed(stage, started),
        Err(e) => StageResult::failed(stage, started, e),
    };
    emit_stage_finished(run_id, &entry);
    stages.push(entry);
    result
}
