//! Publish stage: turn a built environment into a distributable.
//!
//! Two strategies sit behind [`PublishStage::run`]:
//!
//! - **Generic**: `dotnet publish --self-contained`, optionally followed by
//!   the mage manifest chain ([`ManifestChain`]).
//! - **ManifestProfile**: `dotnet msbuild -t:Publish` with a publish profile
//!   that signs and emits the manifests itself.
//!
//! Either way the output directory is copied to the host and enumerated
//! into an [`ArtifactSet`]. On any failure whatever this stage wrote to the
//! host directory is removed, so a partial artifact set never exists.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dotship_env::ExecOutput;

use crate::build::BuildEnvironment;
use crate::config::{ManifestSettings, PipelineConfig, PublishConfig, PublishStrategy};
use crate::error::{PipelineError, Result};
use crate::version::Version;

// ---------------------------------------------------------------------------
// ArtifactSet
// ---------------------------------------------------------------------------

/// Manifest files produced by the publish step (container paths).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPaths {
    pub application: String,
    pub deployment: String,
}

/// Files produced by Publish, on the host.
///
/// Created once by [`PublishStage::run`] and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    dir: PathBuf,
    files: Vec<PathBuf>,
    manifests: Option<ManifestPaths>,
}

impl ArtifactSet {
    /// Enumerate every file under `dir`.
    pub fn collect(dir: &Path, manifests: Option<ManifestPaths>) -> Result<Self> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;
        files.sort();
        Ok(ArtifactSet {
            dir: dir.to_path_buf(),
            files,
            manifests,
        })
    }

    /// Host directory holding the artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths relative to [`ArtifactSet::dir`], sorted.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn manifests(&self) -> Option<&ManifestPaths> {
        self.manifests.as_ref()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Manifest chain
// ---------------------------------------------------------------------------

/// Output directory after the launcher was added and files hashed.
#[derive(Debug)]
pub struct HashedOutput {
    dir: String,
}

/// Application manifest written by mage.
#[derive(Debug)]
pub struct ApplicationManifest(String);

/// Deployment manifest written by mage.
#[derive(Debug)]
pub struct DeploymentManifest {
    application: String,
    path: String,
}

impl HashedOutput {
    pub fn dir(&self) -> &str {
        &self.dir
    }
}

impl ApplicationManifest {
    pub fn path(&self) -> &str {
        &self.0
    }
}

impl DeploymentManifest {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn into_paths(self) -> ManifestPaths {
        ManifestPaths {
            application: self.application,
            deployment: self.path,
        }
    }
}

/// The mage manifest sequence.
///
/// Each step consumes the previous step's output, so a deployment manifest
/// can only be requested with an application manifest that was verified to
/// exist.
pub struct ManifestChain<'a> {
    env: &'a BuildEnvironment,
    settings: &'a ManifestSettings,
    version: &'a Version,
}

impl<'a> ManifestChain<'a> {
    pub fn new(
        env: &'a BuildEnvironment,
        settings: &'a ManifestSettings,
        version: &'a Version,
    ) -> Self {
        ManifestChain {
            env,
            settings,
            version,
        }
    }

    /// Install the pinned mage tool, then run every step.
    pub async fn run(&self, output_dir: &str) -> Result<ManifestPaths> {
        self.install_tool().await?;
        let hashed = self.hash_output(output_dir).await?;
        let application = self.application_manifest(hashed).await?;
        let deployment = self.deployment_manifest(application).await?;
        Ok(deployment.into_paths())
    }

    pub async fn install_tool(&self) -> Result<()> {
        let argv = args(&[
            "dotnet",
            "tool",
            "install",
            "microsoft.dotnet.mage",
            "--global",
            "--version",
            self.settings.mage_version.as_str(),
        ]);
        run_step(self.env, "mage install", &argv).await
    }

    /// `-al`: add the launcher and hash the output directory.
    pub async fn hash_output(&self, output_dir: &str) -> Result<HashedOutput> {
        let step = "mage -al";
        let launcher = join(output_dir, &self.settings.launcher);
        if !self.env.path_exists(&launcher).await? {
            return Err(PipelineError::publish(
                step,
                format!("launcher target {} not found in publish output", launcher),
            ));
        }

        let argv = args(&[
            self.settings.mage_path.as_str(),
            "-al",
            self.settings.launcher.as_str(),
            "-TargetDirectory",
            output_dir,
        ]);
        run_step(self.env, step, &argv).await?;
        Ok(HashedOutput {
            dir: output_dir.to_string(),
        })
    }

    /// `-new Application` over the hashed output.
    pub async fn application_manifest(&self, hashed: HashedOutput) -> Result<ApplicationManifest> {
        let step = "mage -new Application";
        let manifest = join(&hashed.dir, &format!("{}.manifest", self.settings.product));

        let mut argv = args(&[
            self.settings.mage_path.as_str(),
            "-new",
            "Application",
            "-t",
            manifest.as_str(),
            "-FromDirectory",
            hashed.dir.as_str(),
            "-v",
            self.version.as_str(),
        ]);
        if !self.settings.icon.is_empty() {
            argv.push("-IconFile".to_string());
            argv.push(join(&hashed.dir, &self.settings.icon));
        }
        run_step(self.env, step, &argv).await?;
        self.verify(step, &manifest).await?;
        Ok(ApplicationManifest(manifest))
    }

    /// `-new Deployment` referencing the application manifest.
    pub async fn deployment_manifest(
        &self,
        application: ApplicationManifest,
    ) -> Result<DeploymentManifest> {
        let step = "mage -new Deployment";
        self.verify(step, application.path()).await?;

        let dir = parent(application.path());
        let manifest = join(dir, &format!("{}.application", self.settings.product));
        let argv = args(&[
            self.settings.mage_path.as_str(),
            "-new",
            "Deployment",
            "-Install",
            "true",
            "-Publisher",
            self.settings.publisher.as_str(),
            "-v",
            self.version.as_str(),
            "-AppManifest",
            application.path(),
            "-t",
            manifest.as_str(),
        ]);
        run_step(self.env, step, &argv).await?;
        self.verify(step, &manifest).await?;
        Ok(DeploymentManifest {
            application: application.0,
            path: manifest,
        })
    }

    async fn verify(&self, step: &str, path: &str) -> Result<()> {
        if self.env.path_exists(path).await? {
            Ok(())
        } else {
            Err(PipelineError::publish(step, format!("expected {} to exist", path)))
        }
    }
}

// ---------------------------------------------------------------------------
// PublishStage
// ---------------------------------------------------------------------------

/// Produces an [`ArtifactSet`] from a built environment.
pub struct PublishStage {
    config: PublishConfig,
    output_path: String,
}

impl PublishStage {
    pub fn new(config: &PipelineConfig) -> Self {
        PublishStage {
            config: config.publish.clone(),
            output_path: config.build_output_path.clone(),
        }
    }

    pub fn strategy(&self) -> &PublishStrategy {
        &self.config.strategy
    }

    /// Publish inside `env` and copy the result to `host_output`.
    ///
    /// `host_output` must not exist or be empty. If any step fails it is
    /// removed again, or emptied when it existed before the call.
    pub async fn run(
        &self,
        env: &BuildEnvironment,
        version: &Version,
        host_output: &Path,
    ) -> Result<ArtifactSet> {
        let existed = host_output.exists();
        if existed && std::fs::read_dir(host_output)?.next().is_some() {
            return Err(PipelineError::Config(format!(
                "publish output {} is not empty",
                host_output.display()
            )));
        }

        info!(
            strategy = self.config.strategy.name(),
            version = %version,
            output = %self.output_path,
            "Publishing"
        );

        match self.produce(env, version, host_output).await {
            Ok(artifacts) => {
                info!(files = artifacts.len(), dir = %artifacts.dir().display(), "Publish complete");
                Ok(artifacts)
            }
            Err(e) => {
                if let Err(cleanup) = discard_output(host_output, existed) {
                    warn!(
                        dir = %host_output.display(),
                        error = %cleanup,
                        "Failed to remove partial publish output"
                    );
                }
                Err(e)
            }
        }
    }

    async fn produce(
        &self,
        env: &BuildEnvironment,
        version: &Version,
        host_output: &Path,
    ) -> Result<ArtifactSet> {
        let mut profile_product = None;
        let manifests = match &self.config.strategy {
            PublishStrategy::Generic {
                os,
                arch,
                manifests,
            } => {
                run_step(env, "mkdir", &args(&["mkdir", "-p", self.output_path.as_str()])).await?;
                let argv = self.generic_command(os, arch.as_deref());
                run_step(env, "dotnet publish", &argv).await?;

                match manifests {
                    Some(settings) => Some(
                        ManifestChain::new(env, settings, version)
                            .run(&self.output_path)
                            .await?,
                    ),
                    None => None,
                }
            }
            PublishStrategy::ManifestProfile { profile, product } => {
                let argv = self.profile_command(profile, version);
                run_step(env, "dotnet msbuild", &argv).await?;

                let deployment = join(&self.output_path, &format!("{}.application", product));
                if !env.path_exists(&deployment).await? {
                    return Err(PipelineError::publish(
                        "dotnet msbuild",
                        format!("deployment manifest {} was not written", deployment),
                    ));
                }
                profile_product = Some((product.as_str(), deployment));
                None
            }
        };

        env.copy_out(&self.output_path, host_output)
            .await
            .map_err(|e| PipelineError::publish("copy out", e.to_string()))?;

        let mut artifacts = ArtifactSet::collect(host_output, manifests)?;
        if let Some((product, deployment)) = profile_product {
            let application = self.profile_application_manifest(&artifacts, product)?;
            artifacts.manifests = Some(ManifestPaths {
                application,
                deployment,
            });
        }
        if artifacts.is_empty() {
            return Err(PipelineError::publish(
                "collect",
                format!("{} produced no files", self.output_path),
            ));
        }
        Ok(artifacts)
    }

    /// `dotnet publish <project> --self-contained --os <os> [--arch <arch>] -o <output>`
    pub fn generic_command(&self, os: &str, arch: Option<&str>) -> Vec<String> {
        let mut argv = args(&[
            "dotnet",
            "publish",
            self.config.project.as_str(),
            "--self-contained",
            "--os",
            os,
        ]);
        if let Some(arch) = arch {
            argv.push("--arch".to_string());
            argv.push(arch.to_string());
        }
        argv.push("-o".to_string());
        argv.push(self.output_path.clone());
        argv
    }

    /// The profile writes its application manifest under a versioned
    /// `Application Files` folder, so it is located in the copied output.
    fn profile_application_manifest(
        &self,
        artifacts: &ArtifactSet,
        product: &str,
    ) -> Result<String> {
        artifacts
            .files()
            .iter()
            .find(|rel| {
                rel.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(product) && n.ends_with(".manifest"))
            })
            .map(|rel| {
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                join(&self.output_path, &rel.join("/"))
            })
            .ok_or_else(|| {
                PipelineError::publish(
                    "dotnet msbuild",
                    format!("no application manifest for {} was written", product),
                )
            })
    }

    /// `dotnet msbuild <project> -t:Publish -p:PublishProfile=<p> ...`
    pub fn profile_command(&self, profile: &str, version: &Version) -> Vec<String> {
        vec![
            "dotnet".to_string(),
            "msbuild".to_string(),
            self.config.project.clone(),
            "-t:Publish".to_string(),
            format!("-p:PublishProfile={}", profile),
            format!("-p:ApplicationVersion={}", version),
            format!("-p:PublishDir={}/", self.output_path.trim_end_matches('/')),
        ]
    }
}

async fn run_step(env: &BuildEnvironment, step: &str, argv: &[String]) -> Result<()> {
    info!(step = step, "Publish step");
    let output: ExecOutput = env.exec(argv).await?;
    if output.success() {
        return Ok(());
    }
    warn!(step = step, exit_code = output.exit_code, "Publish step failed");
    Err(PipelineError::publish(
        step,
        format!("exit code {}: {}", output.exit_code, output.combined()),
    ))
}

/// Undo a failed publish: remove `dir`, or only its contents if it was
/// there before.
fn discard_output(dir: &Path, existed: bool) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if !existed {
        return std::fs::remove_dir_all(dir);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}
