//! dotship-hosting: release publication on the git hosting provider
//!
//! A release is described once ([`ReleaseDescriptor`]) and submitted once
//! through a [`ReleaseHost`]. The provider either creates exactly one
//! release object with every attachment, or rejects the submission.
//!
//! ## Layer 1 - Hosting
//!
//! Focus: one atomic submission per invocation, secrets kept out of logs.
//!
//! ## Key Components
//!
//! - `ReleaseDescriptor` / `ReleaseFlags`: what gets submitted
//! - `Credential`: redacted, zeroizing token wrapper
//! - `GitHubReleaseHost`: GitHub REST implementation (reqwest)
//! - `fakes::RecordingReleaseHost`: in-memory host for tests

mod credential;
pub mod descriptor;
mod error;
pub mod fakes;
mod github;
pub mod host;

pub use credential::Credential;
pub use descriptor::{ReleaseDescriptor, ReleaseFlags, ReleaseOutcome, RepoSlug};
pub use error::HostingError;
pub use github::GitHubReleaseHost;
pub use host::ReleaseHost;

/// Result type for hosting operations
pub type Result<T> = std::result::Result<T, HostingError>;
