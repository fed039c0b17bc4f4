//! Error types for dotship-hosting

use thiserror::Error;

/// Reasons the hosting provider (or the road to it) refused a release
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostingError {
    /// verify-tag: the tag does not point at a commit on the remote
    #[error("Tag '{tag}' does not exist on the remote repository")]
    TagNotFound { tag: String },

    /// A release for this tag already exists
    #[error("A release for tag '{tag}' already exists")]
    DuplicateRelease { tag: String },

    /// Token missing, expired, or lacking scope
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Any other structured rejection
    #[error("Release rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Malformed `owner/repo` coordinates
    #[error("Invalid repository: {0}")]
    InvalidRepository(String),

    /// Network failure reaching the provider
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading an attachment failed
    #[error("IO error: {0}")]
    Io(String),
}

impl HostingError {
    /// Whether this is a failure to reach the provider rather than a refusal.
    pub fn is_transport(&self) -> bool {
        matches!(self, HostingError::Transport(_))
    }
}

impl From<reqwest::Error> for HostingError {
    fn from(err: reqwest::Error) -> Self {
        HostingError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for HostingError {
    fn from(err: std::io::Error) -> Self {
        HostingError::Io(err.to_string())
    }
}
