//! dotship-env: execution environments for the release pipeline
//!
//! This crate provides the isolated execution layer the pipeline stages run
//! in. A stage never touches the host toolchain: it asks a
//! [`ContainerRuntime`] for a fresh container from a pinned image, copies a
//! filtered [`SourceTree`] into it and executes commands there.
//!
//! ## Layer 0 - Environment
//!
//! Focus: reproducible, disposable environments and clean source staging.
//!
//! ## Key Components
//!
//! - `ContainerRuntime`: async contract for container lifecycle + exec
//! - `DockerRuntime`: drives the `docker`/`podman` CLI
//! - `SourceTree`: content-addressed snapshot with exclusion globs
//! - `fakes::ScriptedRuntime`: in-memory runtime for tests

mod docker;
mod error;
pub mod fakes;
pub mod runtime;
pub mod staging;

pub use docker::{DockerRuntime, SESSION_LABEL};
pub use error::EnvError;
pub use runtime::{ContainerId, ContainerRuntime, ExecOutput};
pub use staging::{ExcludeSet, SourceTree, StagedTree};

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;
