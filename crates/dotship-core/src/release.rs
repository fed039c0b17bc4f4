//! Release stage: one draft release per invocation.
//!
//! The artifact set is bundled into a single zip (or attached file by file
//! when bundling is off), described once and submitted once. The tag is
//! used verbatim; the credential is consumed here and goes nowhere but the
//! host's authentication.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use dotship_hosting::{Credential, ReleaseDescriptor, ReleaseFlags, ReleaseHost, ReleaseOutcome};

use crate::archive::{archive_directory, archive_name};
use crate::config::{PipelineConfig, ReleaseConfig};
use crate::error::{PipelineError, Result};
use crate::publish::ArtifactSet;

/// Creates the remote release for an [`ArtifactSet`].
pub struct ReleaseStage {
    host: Arc<dyn ReleaseHost>,
    config: ReleaseConfig,
}

impl ReleaseStage {
    pub fn new(host: Arc<dyn ReleaseHost>, config: &PipelineConfig) -> Self {
        ReleaseStage {
            host,
            config: config.release.clone(),
        }
    }

    /// Descriptor for `tag` with the given attachments.
    ///
    /// Flags are always [`ReleaseFlags::pipeline`]: draft, latest, verified
    /// tag, generated notes.
    pub fn descriptor(&self, tag: &str, files: Vec<PathBuf>) -> ReleaseDescriptor {
        ReleaseDescriptor {
            tag: tag.to_string(),
            name: self.config.name.clone(),
            body: String::new(),
            target: self.config.target.clone(),
            files,
            flags: ReleaseFlags::pipeline(),
        }
    }

    /// Name of the bundle archive for `tag`.
    pub fn bundle_name(&self, tag: &str) -> String {
        archive_name(&self.config.product, tag, &self.config.os, &self.config.arch)
    }

    /// Bundle, describe and submit.
    pub async fn run(
        &self,
        artifacts: &ArtifactSet,
        tag: &str,
        credential: Credential,
    ) -> Result<ReleaseOutcome> {
        if artifacts.is_empty() {
            return Err(PipelineError::Config(format!(
                "artifact set at {} is empty",
                artifacts.dir().display()
            )));
        }

        // Holds the bundle until the submission finished.
        let staging = tempfile::Builder::new().prefix("dotship-release-").tempdir()?;

        let files = if self.config.bundle {
            let name = self.bundle_name(tag);
            let dir = artifacts.dir().to_path_buf();
            let dest = staging.path().to_path_buf();
            let archive = tokio::task::spawn_blocking(move || archive_directory(&name, &dir, &dest))
                .await
                .map_err(|e| PipelineError::Archive(e.to_string()))??;
            vec![archive]
        } else {
            artifacts
                .files()
                .iter()
                .map(|rel| artifacts.dir().join(rel))
                .collect()
        };

        let descriptor = self.descriptor(tag, files);
        info!(
            tag = %descriptor.tag,
            target = %descriptor.target,
            assets = ?descriptor.asset_names(),
            draft = descriptor.flags.draft,
            "Submitting release"
        );

        let outcome = self.host.create_release(&descriptor, &credential).await?;
        info!(release_id = outcome.release_id, url = %outcome.html_url, "Release created");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotship_hosting::fakes::RecordingReleaseHost;
    use dotship_hosting::HostingError;
    use std::io::Cursor;

    fn artifacts() -> (tempfile::TempDir, ArtifactSet) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("App.exe"), b"MZ").unwrap();
        std::fs::write(dir.path().join("App.application"), b"<assembly/>").unwrap();
        let set = ArtifactSet::collect(dir.path(), None).unwrap();
        (dir, set)
    }

    #[tokio::test]
    async fn test_bundles_into_single_archive() {
        let host = Arc::new(RecordingReleaseHost::new());
        let stage = ReleaseStage::new(host.clone(), &PipelineConfig::default());
        let (_dir, set) = artifacts();

        let outcome = stage
            .run(&set, "v2.0.0", Credential::new("token".into()))
            .await
            .unwrap();

        assert_eq!(outcome.assets, vec!["HeroesProfile.Uploader_v2.0.0_windows_amd64.zip"]);
        let submitted = host.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].descriptor.tag, "v2.0.0");
        assert_eq!(submitted[0].descriptor.target, "main");
        assert!(submitted[0].descriptor.flags.draft);
        assert!(submitted[0].descriptor.flags.verify_tag);

        let zip = zip::ZipArchive::new(Cursor::new(submitted[0].attachments[0].1.clone())).unwrap();
        assert_eq!(zip.len(), 2);
    }

    #[tokio::test]
    async fn test_unbundled_attaches_each_file() {
        let host = Arc::new(RecordingReleaseHost::new());
        let mut config = PipelineConfig::default();
        config.release.bundle = false;
        let stage = ReleaseStage::new(host.clone(), &config);
        let (_dir, set) = artifacts();

        let outcome = stage
            .run(&set, "v2.0.0", Credential::new("token".into()))
            .await
            .unwrap();
        assert_eq!(outcome.assets, vec!["App.application", "App.exe"]);
    }

    #[tokio::test]
    async fn test_rejection_maps_to_release_rejected() {
        let host = Arc::new(RecordingReleaseHost::rejecting(HostingError::TagNotFound {
            tag: "v9.9.9".into(),
        }));
        let stage = ReleaseStage::new(host.clone(), &PipelineConfig::default());
        let (_dir, set) = artifacts();

        let err = stage
            .run(&set, "v9.9.9", Credential::new("token".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReleaseRejected(ref m) if m.contains("v9.9.9")));
    }

    #[test]
    fn test_descriptor_flags_are_fixed() {
        let mut config = PipelineConfig::default();
        config.release.target = "dotnet-upgrade".into();
        let stage = ReleaseStage::new(Arc::new(RecordingReleaseHost::new()), &config);
        let descriptor = stage.descriptor("v1.0", vec![]);
        assert_eq!(descriptor.flags, ReleaseFlags::pipeline());
        assert_eq!(descriptor.target, "dotnet-upgrade");
        assert_eq!(descriptor.tag, "v1.0");
    }
}
