//! In-memory fake for the release host (testing only)
//!
//! `RecordingReleaseHost` records every submission together with the bytes
//! of each attachment at submission time, so tests can inspect archives
//! whose temporary directories are gone by the time assertions run.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::credential::Credential;
use crate::descriptor::{ReleaseDescriptor, ReleaseOutcome};
use crate::error::HostingError;
use crate::host::ReleaseHost;
use crate::Result;

/// One recorded `create_release` call.
#[derive(Debug, Clone)]
pub struct RecordedRelease {
    pub descriptor: ReleaseDescriptor,
    /// (file name, contents) per attachment, in descriptor order.
    pub attachments: Vec<(String, Vec<u8>)>,
    /// Whether a non-empty credential was supplied.
    pub authenticated: bool,
}

/// Release host that records submissions and optionally rejects them.
#[derive(Debug, Default)]
pub struct RecordingReleaseHost {
    reject_with: Option<HostingError>,
    submissions: Mutex<Vec<RecordedRelease>>,
}

impl RecordingReleaseHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host that refuses every submission with `error` (still recorded).
    pub fn rejecting(error: HostingError) -> Self {
        RecordingReleaseHost {
            reject_with: Some(error),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn submissions(&self) -> Vec<RecordedRelease> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl ReleaseHost for RecordingReleaseHost {
    async fn create_release(
        &self,
        descriptor: &ReleaseDescriptor,
        credential: &Credential,
    ) -> Result<ReleaseOutcome> {
        let mut attachments = Vec::with_capacity(descriptor.files.len());
        for file in &descriptor.files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            attachments.push((name, tokio::fs::read(file).await?));
        }

        let release_id = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(RecordedRelease {
                descriptor: descriptor.clone(),
                attachments,
                authenticated: !credential.is_empty(),
            });
            submissions.len() as u64
        };

        if let Some(err) = &self.reject_with {
            return Err(err.clone());
        }

        Ok(ReleaseOutcome {
            release_id,
            html_url: format!("https://example.invalid/releases/{}", descriptor.tag),
            assets: descriptor.asset_names(),
        })
    }
}
