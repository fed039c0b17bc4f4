//! Build stage: compile the project inside a fresh container.
//!
//! The container is created from the pinned toolchain image, receives a
//! staged copy of the [`SourceTree`] (exclusion globs already applied) and
//! runs `dotnet build -c <configuration>` in the source mount. A passing
//! build hands back the live [`BuildEnvironment`] so Publish runs against
//! the same compiled state.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dotship_env::{ContainerId, ContainerRuntime, ExecOutput, SourceTree};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Live handle to an environment in which the project compiled.
///
/// Never reused across runs. Call [`BuildEnvironment::dispose`] when done;
/// dropping without disposing leaves the container running and logs a
/// warning.
pub struct BuildEnvironment {
    runtime: Arc<dyn ContainerRuntime>,
    id: ContainerId,
    source_path: String,
    content_ref: String,
    disposed: bool,
}

impl BuildEnvironment {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Source mount inside the container.
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Content reference of the tree that was built.
    pub fn content_ref(&self) -> &str {
        &self.content_ref
    }

    /// Run `argv` in the source mount.
    pub async fn exec(&self, argv: &[String]) -> Result<ExecOutput> {
        debug!(container = %self.id, command = %argv.join(" "), "exec");
        Ok(self.runtime.exec(&self.id, &self.source_path, argv).await?)
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool> {
        Ok(self.runtime.path_exists(&self.id, path).await?)
    }

    /// Copy a container directory to the host.
    pub async fn copy_out(&self, container_dir: &str, host_dir: &Path) -> Result<()> {
        Ok(self.runtime.copy_out(&self.id, container_dir, host_dir).await?)
    }

    /// Remove the container.
    pub async fn dispose(mut self) -> Result<()> {
        self.disposed = true;
        info!(container = %self.id, "Disposing build environment");
        Ok(self.runtime.remove(&self.id).await?)
    }

    /// Dispose, logging instead of failing. Used on error paths where the
    /// original error is the one worth reporting.
    pub(crate) async fn discard(self) {
        let id = self.id.clone();
        if let Err(e) = self.dispose().await {
            warn!(container = %id, error = %e, "Failed to remove build environment");
        }
    }
}

impl std::fmt::Debug for BuildEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEnvironment")
            .field("id", &self.id)
            .field("source_path", &self.source_path)
            .field("content_ref", &self.content_ref)
            .finish()
    }
}

impl Drop for BuildEnvironment {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(container = %self.id, "Build environment dropped without dispose");
        }
    }
}

/// Captured result of a diagnostic build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub exit_code: i32,

    /// Combined stdout and stderr of the build command.
    pub output: String,

    pub duration_ms: u64,

    /// Content reference of the tree that was built.
    pub content_ref: String,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Compiles a source tree in a fresh environment.
pub struct BuildStage {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    source_mount_path: String,
    configuration: String,
}

impl BuildStage {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &PipelineConfig) -> Self {
        BuildStage {
            runtime,
            image: config.toolchain_image.clone(),
            source_mount_path: config.source_mount_path.clone(),
            configuration: config.build_configuration.clone(),
        }
    }

    /// Build command run in the source mount.
    pub fn command(&self) -> Vec<String> {
        vec![
            "dotnet".to_string(),
            "build".to_string(),
            "-c".to_string(),
            self.configuration.clone(),
        ]
    }

    /// Compile and return the live environment.
    ///
    /// A non-zero build exit discards the environment and fails with
    /// [`PipelineError::Compilation`]. No retry.
    pub async fn run(&self, tree: &SourceTree) -> Result<BuildEnvironment> {
        let (env, output) = self.compile(tree).await?;
        if output.success() {
            info!(container = %env.id(), "Build succeeded");
            return Ok(env);
        }

        warn!(
            container = %env.id(),
            exit_code = output.exit_code,
            "Build failed"
        );
        env.discard().await;
        Err(PipelineError::Compilation {
            exit_code: output.exit_code,
            output: output.combined(),
        })
    }

    /// Compile and report the outcome without raising on a failing build.
    ///
    /// The environment is discarded before returning. Only infrastructure
    /// failures produce `Err`.
    pub async fn diagnose(&self, tree: &SourceTree) -> Result<BuildReport> {
        let started = Instant::now();
        let (env, output) = self.compile(tree).await?;
        let content_ref = env.content_ref().to_string();
        env.dispose().await?;

        Ok(BuildReport {
            exit_code: output.exit_code,
            output: output.combined(),
            duration_ms: started.elapsed().as_millis() as u64,
            content_ref,
        })
    }

    async fn compile(&self, tree: &SourceTree) -> Result<(BuildEnvironment, ExecOutput)> {
        let staged = tree.stage()?;

        info!(
            image = %self.image,
            files = tree.files().len(),
            content_ref = %tree.short_ref(),
            "Creating build environment"
        );
        let id = self.runtime.create(&self.image).await?;
        let env = BuildEnvironment {
            runtime: self.runtime.clone(),
            id,
            source_path: self.source_mount_path.clone(),
            content_ref: tree.content_ref().to_string(),
            disposed: false,
        };

        if let Err(e) = self
            .runtime
            .copy_in(env.id(), staged.path(), &self.source_mount_path)
            .await
        {
            env.discard().await;
            return Err(e.into());
        }

        info!(configuration = %self.configuration, "Running dotnet build");
        match env.exec(&self.command()).await {
            Ok(output) => Ok((env, output)),
            Err(e) => {
                env.discard().await;
                Err(e)
            }
        }
    }
}
