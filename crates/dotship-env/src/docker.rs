//! Docker/Podman CLI runtime
//!
//! Each container is started detached with a bounded sleep as PID 1 so that
//! later `exec` calls share its filesystem (tools installed by one step are
//! visible to the next). Source goes in and artifacts come out with `cp`.
//!
//! Containers are started with `--rm` and labelled with the runtime's
//! session, so an interrupted process can remove everything it started with
//! [`DockerRuntime::remove_session`]. If that never happens the container
//! still exits, and is deleted, once the sleep runs out.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::EnvError;
use crate::runtime::{ContainerId, ContainerRuntime, ExecOutput};
use crate::Result;

/// Label carrying the session id on every container this crate starts.
pub const SESSION_LABEL: &str = "dotship.session";

/// Seconds a container may live before PID 1 exits on its own.
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 6 * 60 * 60;

/// Container runtime backed by the `docker` (or compatible) CLI.
///
/// Clones share the session, so a clone kept aside can clean up after the
/// original.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    session: String,
    max_lifetime_secs: u64,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::with_binary(
            std::env::var("DOTSHIP_CONTAINER_RUNTIME").unwrap_or_else(|_| "docker".to_string()),
        )
    }
}

impl DockerRuntime {
    /// Runtime using the given CLI binary (`docker`, `podman`, ...).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        DockerRuntime {
            binary: binary.into(),
            session: uuid::Uuid::new_v4().to_string(),
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
        }
    }

    /// Upper bound on how long any container of this runtime stays alive.
    pub fn with_max_lifetime(mut self, secs: u64) -> Self {
        self.max_lifetime_secs = secs.max(1);
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Value of [`SESSION_LABEL`] on this runtime's containers.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Force-remove every container started by this runtime (or a clone).
    ///
    /// Returns how many were removed.
    pub async fn remove_session(&self) -> Result<usize> {
        let listed = self.invoke_checked(&session_ps_args(&self.session)).await?;
        let ids: Vec<String> = listed
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        warn!(session = %self.session, containers = ids.len(), "Removing session containers");
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(ids.iter().cloned());
        self.invoke_checked(&args).await?;
        Ok(ids.len())
    }

    /// Check whether the runtime CLI answers `--version`.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn invoke(&self, args: &[String]) -> Result<ExecOutput> {
        debug!(runtime = %self.binary, args = ?args, "Invoking container runtime");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EnvError::RuntimeNotFound(self.binary.clone()),
                _ => EnvError::Io(e),
            })?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Like `invoke`, but a non-zero exit is an error (management commands).
    async fn invoke_checked(&self, args: &[String]) -> Result<ExecOutput> {
        let out = self.invoke(args).await?;
        if !out.success() {
            return Err(EnvError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }
}

pub(crate) fn run_args(
    id: &ContainerId,
    image: &str,
    session: &str,
    lifetime_secs: u64,
) -> Vec<String> {
    vec![
        "run".into(),
        "-d".into(),
        "--rm".into(),
        "--label".into(),
        format!("{}={}", SESSION_LABEL, session),
        "--name".into(),
        id.0.clone(),
        image.into(),
        "sleep".into(),
        lifetime_secs.to_string(),
    ]
}

pub(crate) fn session_ps_args(session: &str) -> Vec<String> {
    vec![
        "ps".into(),
        "-aq".into(),
        "--filter".into(),
        format!("label={}={}", SESSION_LABEL, session),
    ]
}

pub(crate) fn exec_args(id: &ContainerId, workdir: &str, argv: &[String]) -> Vec<String> {
    let mut args = vec!["exec".into(), "-w".into(), workdir.into(), id.0.clone()];
    args.extend(argv.iter().cloned());
    args
}

pub(crate) fn copy_in_args(id: &ContainerId, host_dir: &Path, container_dir: &str) -> Vec<String> {
    // Trailing "/." copies directory contents rather than the directory itself.
    vec![
        "cp".into(),
        format!("{}/.", host_dir.display()),
        format!("{}:{}", id.0, container_dir),
    ]
}

pub(crate) fn copy_out_args(id: &ContainerId, container_dir: &str, host_dir: &Path) -> Vec<String> {
    vec![
        "cp".into(),
        format!("{}:{}/.", id.0, container_dir.trim_end_matches('/')),
        host_dir.display().to_string(),
    ]
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, image: &str) -> Result<ContainerId> {
        let id = ContainerId::generate();
        info!(runtime = %self.binary, container = %id, image = %image, "Creating container");
        self.invoke_checked(&run_args(&id, image, &self.session, self.max_lifetime_secs))
            .await?;
        Ok(id)
    }

    async fn copy_in(&self, id: &ContainerId, host_dir: &Path, container_dir: &str) -> Result<()> {
        self.invoke_checked(&exec_args(
            id,
            "/",
            &["mkdir".into(), "-p".into(), container_dir.into()],
        ))
        .await?;
        self.invoke_checked(&copy_in_args(id, host_dir, container_dir))
            .await?;
        debug!(container = %id, from = %host_dir.display(), to = %container_dir, "Copied into container");
        Ok(())
    }

    async fn exec(&self, id: &ContainerId, workdir: &str, argv: &[String]) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(EnvError::EmptyCommand);
        }
        info!(container = %id, workdir = %workdir, command = %argv.join(" "), "Executing in container");
        let out = self.invoke(&exec_args(id, workdir, argv)).await?;
        if !out.success() {
            warn!(container = %id, exit_code = out.exit_code, command = %argv[0], "Command exited non-zero");
        }
        Ok(out)
    }

    async fn path_exists(&self, id: &ContainerId, path: &str) -> Result<bool> {
        let out = self
            .invoke(&exec_args(id, "/", &["test".into(), "-e".into(), path.into()]))
            .await?;
        Ok(out.success())
    }

    async fn copy_out(&self, id: &ContainerId, container_dir: &str, host_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(host_dir).await?;
        self.invoke_checked(&copy_out_args(id, container_dir, host_dir))
            .await?;
        debug!(container = %id, from = %container_dir, to = %host_dir.display(), "Copied out of container");
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        info!(container = %id, "Removing container");
        self.invoke_checked(&["rm".into(), "-f".into(), id.0.clone()])
            .await?;
        Ok(())
    }
}
