//! Release descriptor: the single unit submitted to the hosting provider.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::HostingError;

/// Flags attached to every release submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFlags {
    /// Create unpublished; a human publishes it.
    pub draft: bool,
    /// Mark as the repository's latest release.
    pub latest: bool,
    /// Refuse if the tag does not already exist remotely.
    pub verify_tag: bool,
    /// Let the provider draft notes from commit history.
    pub generate_notes: bool,
}

impl ReleaseFlags {
    /// The only flag set the pipeline submits.
    pub const fn pipeline() -> Self {
        ReleaseFlags {
            draft: true,
            latest: true,
            verify_tag: true,
            generate_notes: true,
        }
    }
}

impl Default for ReleaseFlags {
    fn default() -> Self {
        Self::pipeline()
    }
}

/// Everything needed to create one release object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Tag, verbatim (prefix kept).
    pub tag: String,
    /// Release title. Empty lets the provider use the tag.
    pub name: String,
    /// Release body. Empty with `generate_notes` gives provider notes only.
    pub body: String,
    /// Branch or commit the release is associated with.
    pub target: String,
    /// Host paths of the attachments, uploaded under their file names.
    pub files: Vec<PathBuf>,
    pub flags: ReleaseFlags,
}

impl ReleaseDescriptor {
    /// Attachment names as they will appear on the release.
    pub fn asset_names(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect()
    }
}

/// What the provider created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub release_id: u64,
    pub html_url: String,
    pub assets: Vec<String>,
}

/// `owner/repo` coordinates on the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    /// Parse `owner/repo`, `github.com/owner/repo` or an https URL of either.
    pub fn parse(raw: &str) -> Result<Self, HostingError> {
        let trimmed = raw
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("github.com/")
            .trim_end_matches('/')
            .trim_end_matches(".git");

        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(repo), None) if valid_segment(owner) && valid_segment(repo) => {
                Ok(RepoSlug {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(HostingError::InvalidRepository(raw.to_string())),
        }
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
