//! Structured lifecycle events for pipeline runs.
//!
//! - `PipelineSpan` RAII guard tagging everything inside a run with its id
//! - `emit_*` functions for start, stage start/finish and finish
//!
//! Events are emitted at `info!` (failures at `warn!`) and follow the
//! subscriber configured by [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::stage::{StageKind, StageResult};

/// Span guard for one pipeline run.
///
/// ```ignore
/// let _span = PipelineSpan::enter("4f0c...", "v2.0.0");
/// // every event below carries run_id and tag
/// ```
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    /// The run span itself, for `Instrument` on futures that cross awaits.
    pub fn span(run_id: &str, tag: &str) -> tracing::Span {
        tracing::info_span!("dotship.run", run_id = %run_id, tag = %tag)
    }

    /// Enter the run span on the current thread until the guard drops.
    pub fn enter(run_id: &str, tag: &str) -> Self {
        Self {
            _span: Self::span(run_id, tag).entered(),
        }
    }
}

pub fn emit_pipeline_started(run_id: &str, tag: &str, version: &str, content_ref: &str) {
    info!(
        event = "pipeline.started",
        run_id = %run_id,
        tag = %tag,
        version = %version,
        content_ref = %content_ref,
    );
}

pub fn emit_stage_started(run_id: &str, stage: StageKind) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage);
}

/// Emit event: stage finished. Failures are logged at `warn!`.
pub fn emit_stage_finished(run_id: &str, result: &StageResult) {
    if result.success {
        info!(
            event = "stage.finished",
            run_id = %run_id,
            stage = %result.stage,
            duration_ms = result.duration_ms,
            success = true,
        );
    } else {
        warn!(
            event = "stage.finished",
            run_id = %run_id,
            stage = %result.stage,
            duration_ms = result.duration_ms,
            success = false,
            error = result.error.as_deref().unwrap_or(""),
        );
    }
}

pub fn emit_pipeline_finished(run_id: &str, duration_ms: u64, stages_run: usize, success: bool) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        stages_run = stages_run,
        success = success,
    );
}
