//! Pipeline configuration.
//!
//! Every path, image and name the stages use lives here. [`PipelineConfig::default`]
//! reproduces the uploader's release setup; `from_env` and `from_file`
//! layer overrides on top of it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use dotship_env::ExcludeSet;
use dotship_hosting::RepoSlug;

use crate::error::{PipelineError, Result};

/// Top-level configuration for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pinned toolchain image every environment is created from.
    pub toolchain_image: String,

    /// Where the source tree is placed inside the environment.
    pub source_mount_path: String,

    /// Where publish output is written inside the environment.
    pub build_output_path: String,

    /// Globs (relative to the source root) never copied into an environment.
    pub exclude_globs: Vec<String>,

    /// `dotnet build -c` value.
    pub build_configuration: String,

    pub publish: PublishConfig,

    pub release: ReleaseConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            toolchain_image: "mcr.microsoft.com/dotnet/sdk:8.0".to_string(),
            source_mount_path: "/src".to_string(),
            build_output_path: "/publish".to_string(),
            exclude_globs: vec!["**/bin/**".to_string(), "**/obj/**".to_string()],
            build_configuration: "Release".to_string(),
            publish: PublishConfig::default(),
            release: ReleaseConfig::default(),
        }
    }
}

/// What gets published and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Project (directory or `.csproj`) relative to the source mount.
    pub project: String,

    pub strategy: PublishStrategy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        PublishConfig {
            project: "Heroesprofile.Uploader.Windows".to_string(),
            strategy: PublishStrategy::default(),
        }
    }
}

/// Publishing strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishStrategy {
    /// `dotnet publish --self-contained`, optionally followed by the mage
    /// manifest chain.
    Generic {
        os: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manifests: Option<ManifestSettings>,
    },

    /// `dotnet msbuild -t:Publish` with a publish profile that emits
    /// signed manifests itself.
    ManifestProfile {
        profile: String,
        /// Base name of the deployment manifest the profile writes.
        #[serde(default = "default_product")]
        product: String,
    },
}

fn default_product() -> String {
    "Heroesprofile.Uploader".to_string()
}

impl Default for PublishStrategy {
    fn default() -> Self {
        PublishStrategy::Generic {
            os: "win".to_string(),
            arch: None,
            manifests: Some(ManifestSettings::default()),
        }
    }
}

impl PublishStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            PublishStrategy::Generic { .. } => "generic",
            PublishStrategy::ManifestProfile { .. } => "manifest_profile",
        }
    }
}

/// Inputs to the mage manifest chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSettings {
    /// `microsoft.dotnet.mage` tool version installed before the chain.
    pub mage_version: String,

    /// Path of the installed `dotnet-mage` executable.
    pub mage_path: String,

    /// Executable the launcher is generated for.
    pub launcher: String,

    /// Base name of the application and deployment manifests.
    pub product: String,

    /// Icon path relative to the publish output.
    pub icon: String,

    pub publisher: String,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        ManifestSettings {
            mage_version: "8.0.0".to_string(),
            mage_path: "/root/.dotnet/tools/dotnet-mage".to_string(),
            launcher: "Heroesprofile.Uploader.exe".to_string(),
            product: default_product(),
            icon: "Resources/uploader_icon_dark.ico".to_string(),
            publisher: "Patrick Magee".to_string(),
        }
    }
}

/// Where and how the release is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// `owner/repo` on the hosting provider.
    pub repository: String,

    /// Commitish the tag is created from if it does not exist yet.
    pub target: String,

    /// Product name used in the archive file name.
    pub product: String,

    pub os: String,

    pub arch: String,

    /// Collapse the artifact set into one zip archive before attaching.
    pub bundle: bool,

    /// Optional release title; the hosting provider uses the tag when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        ReleaseConfig {
            repository: "HeroesReplay/HeroesProfile.Uploader".to_string(),
            target: "main".to_string(),
            product: "HeroesProfile.Uploader".to_string(),
            os: "windows".to_string(),
            arch: "amd64".to_string(),
            bundle: true,
            name: String::new(),
        }
    }
}

impl PipelineConfig {
    /// Defaults with `DOTSHIP_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Recognized keys: `DOTSHIP_IMAGE`, `DOTSHIP_MOUNT_PATH`,
    /// `DOTSHIP_OUTPUT_PATH`, `DOTSHIP_EXCLUDES` (comma separated),
    /// `DOTSHIP_CONFIGURATION`, `DOTSHIP_PROJECT`, `DOTSHIP_PUBLISH_PROFILE`,
    /// `DOTSHIP_REPOSITORY`, `DOTSHIP_TARGET`, `DOTSHIP_BUNDLE`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOTSHIP_IMAGE") {
            self.toolchain_image = v;
        }
        if let Some(v) = lookup("DOTSHIP_MOUNT_PATH") {
            self.source_mount_path = v;
        }
        if let Some(v) = lookup("DOTSHIP_OUTPUT_PATH") {
            self.build_output_path = v;
        }
        if let Some(v) = lookup("DOTSHIP_EXCLUDES") {
            self.exclude_globs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("DOTSHIP_CONFIGURATION") {
            self.build_configuration = v;
        }
        if let Some(v) = lookup("DOTSHIP_PROJECT") {
            self.publish.project = v;
        }
        if let Some(v) = lookup("DOTSHIP_PUBLISH_PROFILE") {
            self.publish.strategy = PublishStrategy::ManifestProfile {
                profile: v,
                product: default_product(),
            };
        }
        if let Some(v) = lookup("DOTSHIP_REPOSITORY") {
            self.release.repository = v;
        }
        if let Some(v) = lookup("DOTSHIP_TARGET") {
            self.release.target = v;
        }
        if let Some(v) = lookup("DOTSHIP_BUNDLE") {
            self.release.bundle = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(PipelineError::Config(format!(
                        "DOTSHIP_BUNDLE must be true or false, got '{}'",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    /// Reject configurations that cannot produce a release.
    pub fn validate(&self) -> Result<()> {
        if self.toolchain_image.trim().is_empty() {
            return Err(PipelineError::Config("toolchain_image is empty".into()));
        }
        for (field, value) in [
            ("source_mount_path", &self.source_mount_path),
            ("build_output_path", &self.build_output_path),
        ] {
            if !value.starts_with('/') {
                return Err(PipelineError::Config(format!(
                    "{} must be an absolute container path, got '{}'",
                    field, value
                )));
            }
        }
        if self.build_configuration.trim().is_empty() {
            return Err(PipelineError::Config("build_configuration is empty".into()));
        }
        if self.publish.project.trim().is_empty() {
            return Err(PipelineError::Config("publish.project is empty".into()));
        }
        self.exclude_set()?;

        match &self.publish.strategy {
            PublishStrategy::Generic { os, manifests, .. } => {
                if os.trim().is_empty() {
                    return Err(PipelineError::Config("publish.strategy.os is empty".into()));
                }
                if let Some(m) = manifests {
                    for (field, value) in [
                        ("mage_version", &m.mage_version),
                        ("mage_path", &m.mage_path),
                        ("launcher", &m.launcher),
                        ("product", &m.product),
                        ("publisher", &m.publisher),
                    ] {
                        if value.trim().is_empty() {
                            return Err(PipelineError::Config(format!(
                                "publish.strategy.manifests.{} is empty",
                                field
                            )));
                        }
                    }
                }
            }
            PublishStrategy::ManifestProfile { profile, product } => {
                if profile.trim().is_empty() {
                    return Err(PipelineError::Config(
                        "publish.strategy.profile is empty".into(),
                    ));
                }
                if product.trim().is_empty() {
                    return Err(PipelineError::Config(
                        "publish.strategy.product is empty".into(),
                    ));
                }
            }
        }

        self.repo_slug()?;
        if self.release.target.trim().is_empty() {
            return Err(PipelineError::Config("release.target is empty".into()));
        }
        if self.release.product.trim().is_empty() {
            return Err(PipelineError::Config("release.product is empty".into()));
        }
        Ok(())
    }

    /// Compiled exclusion globs.
    pub fn exclude_set(&self) -> Result<ExcludeSet> {
        Ok(ExcludeSet::new(&self.exclude_globs)?)
    }

    /// Parsed hosting repository.
    pub fn repo_slug(&self) -> Result<RepoSlug> {
        RepoSlug::parse(&self.release.repository)
            .map_err(|e| PipelineError::Config(format!("release.repository: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_uploader_release() {
        let config = PipelineConfig::default();
        assert_eq!(config.toolchain_image, "mcr.microsoft.com/dotnet/sdk:8.0");
        assert_eq!(config.source_mount_path, "/src");
        assert_eq!(config.build_output_path, "/publish");
        assert_eq!(config.exclude_globs, vec!["**/bin/**", "**/obj/**"]);
        assert_eq!(config.release.target, "main");
        assert!(config.release.bundle);
        match &config.publish.strategy {
            PublishStrategy::Generic {
                manifests: Some(m), ..
            } => {
                assert_eq!(m.publisher, "Patrick Magee");
                assert_eq!(m.product, "Heroesprofile.Uploader");
            }
            other => panic!("unexpected strategy: {other:?}"),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "build_configuration": "Debug",
                "release": { "target": "dotnet-upgrade" },
                "publish": { "strategy": { "kind": "manifest_profile", "profile": "ClickOnce" } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.build_configuration, "Debug");
        assert_eq!(config.release.target, "dotnet-upgrade");
        assert_eq!(config.release.repository, "HeroesReplay/HeroesProfile.Uploader");
        assert_eq!(
            config.publish.strategy,
            PublishStrategy::ManifestProfile {
                profile: "ClickOnce".to_string(),
                product: "Heroesprofile.Uploader".to_string(),
            }
        );
        assert_eq!(config.publish.project, "Heroesprofile.Uploader.Windows");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dotship.json");
        std::fs::write(&path, r#"{ "toolchain_image": "mcr.microsoft.com/dotnet/sdk:9.0" }"#)
            .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.toolchain_image, "mcr.microsoft.com/dotnet/sdk:9.0");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_apply_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DOTSHIP_IMAGE", "mcr.microsoft.com/dotnet/sdk:8.0-alpine"),
            ("DOTSHIP_EXCLUDES", "**/bin/**, **/obj/**, **/.vs/**"),
            ("DOTSHIP_TARGET", "release/2.x"),
            ("DOTSHIP_BUNDLE", "false"),
            ("DOTSHIP_PUBLISH_PROFILE", "ClickOnceProfile"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.toolchain_image, "mcr.microsoft.com/dotnet/sdk:8.0-alpine");
        assert_eq!(config.exclude_globs.len(), 3);
        assert_eq!(config.release.target, "release/2.x");
        assert!(!config.release.bundle);
        assert_eq!(config.publish.strategy.name(), "manifest_profile");
    }

    #[test]
    fn test_apply_env_rejects_bad_bundle_flag() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|k| (k == "DOTSHIP_BUNDLE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.toolchain_image = " ".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.source_mount_path = "src".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.exclude_globs = vec!["[".into()];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.release.repository = "not-a-slug".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.publish.strategy = PublishStrategy::ManifestProfile {
            profile: String::new(),
            product: default_product(),
        };
        assert!(config.validate().is_err());
    }
}
