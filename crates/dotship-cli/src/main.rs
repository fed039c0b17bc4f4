//! dotship - release pipeline CLI
//!
//! Builds the desktop client in a clean container, publishes it with
//! ClickOnce manifests and creates a draft GitHub release.
//!
//! ## Commands
//!
//! - `build`: compile only and report the outcome
//! - `publish`: build and publish into a local directory
//! - `release`: build, publish and create the draft release for a tag
//! - `info`: show the effective configuration and tool availability

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use dotship_core::{PipelineConfig, ReleasePipeline, Version};
use dotship_env::DockerRuntime;
use dotship_hosting::{Credential, GitHubReleaseHost};

#[derive(Parser)]
#[command(name = "dotship")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, publish and release the HeroesProfile Uploader", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON configuration file (DOTSHIP_* variables still override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Container runtime CLI (docker, podman)
    #[arg(long, global = true, env = "DOTSHIP_CONTAINER_RUNTIME", default_value = "docker")]
    runtime: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the project in a fresh container and report the result
    Build {
        /// Project source directory
        #[arg(default_value = ".")]
        source: PathBuf,
    },

    /// Build and publish into a local directory, without releasing
    Publish {
        /// Project source directory
        #[arg(default_value = ".")]
        source: PathBuf,

        /// Application version (e.g. 2.0.0)
        #[arg(long)]
        version: String,

        /// Host directory receiving the published files (must be empty)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build, publish and create a draft release for a tag
    Release {
        /// Project source directory
        #[arg(default_value = ".")]
        source: PathBuf,

        /// Existing git tag, e.g. v2.0.0
        #[arg(short, long)]
        tag: String,

        /// Override the release target commitish
        #[arg(long)]
        target: Option<String>,

        /// Attach published files individually instead of one zip
        #[arg(long)]
        no_bundle: bool,

        /// GitHub API root (GitHub Enterprise)
        #[arg(long, env = "DOTSHIP_GITHUB_API")]
        api_base: Option<String>,
    },

    /// Show the effective configuration and tool availability
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dotship_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let runtime = DockerRuntime::with_binary(&cli.runtime);
    let cleanup = runtime.clone();

    tokio::select! {
        result = run(cli.command, config, runtime) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            match cleanup.remove_session().await {
                Ok(removed) => info!(containers = removed, "Removed containers"),
                Err(e) => warn!(error = %e, session = %cleanup.session(), "Failed to remove containers"),
            }
            bail!("Interrupted")
        }
    }
}

async fn run(command: Commands, mut config: PipelineConfig, runtime: DockerRuntime) -> Result<()> {
    match command {
        Commands::Build { source } => cmd_build(config, runtime, &source).await,
        Commands::Publish {
            source,
            version,
            output,
        } => cmd_publish(config, runtime, &source, &version, &output).await,
        Commands::Release {
            source,
            tag,
            target,
            no_bundle,
            api_base,
        } => {
            if let Some(target) = target {
                config.release.target = target;
            }
            if no_bundle {
                config.release.bundle = false;
            }
            cmd_release(config, runtime, &source, &tag, api_base.as_deref()).await
        }
        Commands::Info => cmd_info(&config, &runtime).await,
    }
}

/// File (if given) then `DOTSHIP_*` overrides.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => {
            let mut config = PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => PipelineConfig::from_env()?,
    };
    Ok(config)
}

fn pipeline(
    config: PipelineConfig,
    runtime: DockerRuntime,
    api_base: Option<&str>,
) -> Result<ReleasePipeline> {
    let mut host = GitHubReleaseHost::new(config.repo_slug()?)
        .context("Failed to create GitHub client")?;
    if let Some(api_base) = api_base {
        host = host.with_api_base(api_base);
    }
    ReleasePipeline::new(Arc::new(runtime), Arc::new(host), config)
        .context("Invalid pipeline configuration")
}

async fn cmd_build(config: PipelineConfig, runtime: DockerRuntime, source: &Path) -> Result<()> {
    let pipeline = pipeline(config, runtime, None)?;
    let tree = pipeline
        .snapshot(source)
        .with_context(|| format!("Failed to read sources at {}", source.display()))?;

    let report = pipeline.build(&tree).await.context("Build could not run")?;
    if !report.output.is_empty() {
        println!("{}", report.output);
    }
    println!();
    println!("Exit code:   {}", report.exit_code);
    println!("Duration:    {} ms", report.duration_ms);
    println!("Content ref: {}", report.content_ref);

    if !report.success() {
        bail!("Build failed with exit code {}", report.exit_code);
    }
    Ok(())
}

async fn cmd_publish(
    config: PipelineConfig,
    runtime: DockerRuntime,
    source: &Path,
    version: &str,
    output: &Path,
) -> Result<()> {
    let version = Version::parse(version)?;
    let pipeline = pipeline(config, runtime, None)?;
    let tree = pipeline
        .snapshot(source)
        .with_context(|| format!("Failed to read sources at {}", source.display()))?;

    let artifacts = pipeline.publish(&tree, &version, output).await?;

    println!("Published {} files to {}", artifacts.len(), artifacts.dir().display());
    for file in artifacts.files() {
        println!("  {}", file.display());
    }
    if let Some(manifests) = artifacts.manifests() {
        println!("Application manifest: {}", manifests.application);
        println!("Deployment manifest:  {}", manifests.deployment);
    }
    Ok(())
}

async fn cmd_release(
    config: PipelineConfig,
    runtime: DockerRuntime,
    source: &Path,
    tag: &str,
    api_base: Option<&str>,
) -> Result<()> {
    // Environment only, never argv.
    let Some(credential) = Credential::from_env("GITHUB_TOKEN") else {
        bail!("No GitHub token: set GITHUB_TOKEN");
    };

    let pipeline = pipeline(config, runtime, api_base)?;
    let tree = pipeline
        .snapshot(source)
        .with_context(|| format!("Failed to read sources at {}", source.display()))?;

    info!(tag = %tag, source = %source.display(), "Starting release");
    let report = pipeline.release(&tree, tag, credential).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_info(config: &PipelineConfig, runtime: &DockerRuntime) -> Result<()> {
    println!("dotship {}", env!("CARGO_PKG_VERSION"));
    println!();

    let available = runtime.is_available().await;
    println!(
        "Container runtime: {} ({})",
        runtime.binary(),
        if available { "available" } else { "not found" }
    );
    println!(
        "GITHUB_TOKEN:      {}",
        if Credential::from_env("GITHUB_TOKEN").is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    match config.validate() {
        Ok(()) => println!("Configuration:     valid"),
        Err(e) => println!("Configuration:     invalid ({})", e),
    }
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_command_parses() {
        let cli = Cli::try_parse_from([
            "dotship",
            "release",
            "./uploader",
            "--tag",
            "v2.0.0",
            "--target",
            "dotnet-upgrade",
            "--no-bundle",
        ])
        .unwrap();

        match cli.command {
            Commands::Release {
                source,
                tag,
                target,
                no_bundle,
                ..
            } => {
                assert_eq!(source, PathBuf::from("./uploader"));
                assert_eq!(tag, "v2.0.0");
                assert_eq!(target.as_deref(), Some("dotnet-upgrade"));
                assert!(no_bundle);
            }
            _ => panic!("expected release command"),
        }
    }

    #[test]
    fn test_token_is_not_accepted_on_the_command_line() {
        let result = Cli::try_parse_from([
            "dotship", "release", ".", "--tag", "v2.0.0", "--token", "ghp_x",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_publish_requires_version_and_output() {
        assert!(Cli::try_parse_from(["dotship", "publish", "."]).is_err());
        let cli = Cli::try_parse_from([
            "dotship", "publish", ".", "--version", "2.0.0", "--output", "dist",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Publish { .. }));
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["dotship", "build", "--verbose", "--json", "--runtime", "podman"])
                .unwrap();
        assert!(cli.verbose);
        assert!(cli.json);
        assert_eq!(cli.runtime, "podman");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dotship.json");
        std::fs::write(&path, r#"{ "release": { "target": "dotnet-upgrade" } }"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.release.target, "dotnet-upgrade");
    }
}
