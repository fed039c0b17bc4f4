//! Stage identifiers and per-stage results.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Compile in a fresh environment.
    Build,

    /// Produce the distributable and its manifests.
    Publish,

    /// Create the draft release with attachments.
    Release,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Build => "build",
            StageKind::Publish => "publish",
            StageKind::Release => "release",
        }
    }

    pub fn all() -> [StageKind; 3] {
        [StageKind::Build, StageKind::Publish, StageKind::Release]
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,

    pub success: bool,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Error message when the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    pub fn passed(stage: StageKind, started: Instant) -> Self {
        StageResult {
            stage,
            success: true,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        }
    }

    pub fn failed(stage: StageKind, started: Instant, error: &dyn std::fmt::Display) -> Self {
        StageResult {
            stage,
            success: false,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(error.to_string()),
        }
    }
}
