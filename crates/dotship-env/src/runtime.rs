//! Container runtime contract
//!
//! The pipeline consumes containers through this trait only:
//! create from a pinned image, copy a directory in, execute commands,
//! probe for files, copy a directory out, remove.
//!
//! All methods are async and backend-agnostic. An in-memory fake is
//! provided for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

/// Identifier of a running container (the container name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    /// Generate a fresh, collision-free container name.
    pub fn generate() -> Self {
        ContainerId(format!("dotship-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output from executing a command inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Process-execution sandbox.
///
/// Guarantees expected from implementations:
/// - every `create` returns a new, isolated container;
/// - `exec` returns `Ok` for any command that ran, whatever its exit code.
///   `Err` means the runtime itself failed (spawn error, missing container);
/// - `remove` is the end of the container's life; nothing survives it.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a container from `image` and keep it alive for later execs.
    async fn create(&self, image: &str) -> Result<ContainerId>;

    /// Copy the contents of `host_dir` into `container_dir` (created if absent).
    async fn copy_in(&self, id: &ContainerId, host_dir: &Path, container_dir: &str) -> Result<()>;

    /// Run `argv` with `workdir` as the working directory.
    async fn exec(&self, id: &ContainerId, workdir: &str, argv: &[String]) -> Result<ExecOutput>;

    /// Whether `path` exists inside the container.
    async fn path_exists(&self, id: &ContainerId, path: &str) -> Result<bool>;

    /// Copy the contents of `container_dir` into `host_dir` (created if absent).
    async fn copy_out(&self, id: &ContainerId, container_dir: &str, host_dir: &Path) -> Result<()>;

    /// Stop and delete the container.
    async fn remove(&self, id: &ContainerId) -> Result<()>;
}
