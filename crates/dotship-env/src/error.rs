//! Error types for dotship-env

use thiserror::Error;

/// Errors that can occur while provisioning or driving an environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// Container runtime binary not found
    #[error("Container runtime '{0}' is not installed or not in PATH")]
    RuntimeNotFound(String),

    /// A runtime management command (create, cp, rm) failed
    #[error("Runtime command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Container does not exist (already removed, or never created)
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Exclusion glob could not be compiled
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Source root missing or not a directory
    #[error("Source tree not found at path: {0}")]
    SourceNotFound(String),

    /// Empty argv handed to exec
    #[error("Refusing to execute an empty command")]
    EmptyCommand,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
