//! Pipeline error taxonomy.

use dotship_env::EnvError;
use dotship_hosting::HostingError;

/// Terminal failures of a pipeline run. Every variant is fatal; nothing is
/// retried and no stage attempts recovery.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("compilation failed (exit code {exit_code}):\n{output}")]
    Compilation { exit_code: i32, output: String },

    #[error("publish failed at step '{step}': {reason}")]
    Publish { step: String, reason: String },

    #[error("release rejected: {0}")]
    ReleaseRejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn publish(step: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Publish {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

impl From<EnvError> for PipelineError {
    fn from(err: EnvError) -> Self {
        match err {
            EnvError::InvalidPattern { .. } | EnvError::SourceNotFound(_) => {
                PipelineError::Config(err.to_string())
            }
            EnvError::Io(e) => PipelineError::Io(e),
            other => PipelineError::Transport(other.to_string()),
        }
    }
}

impl From<HostingError> for PipelineError {
    fn from(err: HostingError) -> Self {
        match err {
            HostingError::Transport(msg) => PipelineError::Transport(msg),
            HostingError::Io(msg) => PipelineError::Io(std::io::Error::other(msg)),
            other => PipelineError::ReleaseRejected(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        PipelineError::Archive(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
