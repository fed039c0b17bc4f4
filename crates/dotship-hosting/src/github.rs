//! GitHub release client
//!
//! Mirrors `gh release create --draft --latest --verify-tag --generate-notes`:
//! verify the tag, create the release, upload each attachment. If any
//! upload fails the release is deleted again so the call leaves nothing
//! behind.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::descriptor::{ReleaseDescriptor, ReleaseOutcome, RepoSlug};
use crate::error::HostingError;
use crate::host::ReleaseHost;
use crate::Result;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// JSON body of `POST /repos/{owner}/{repo}/releases`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct CreateReleaseRequest<'a> {
    pub tag_name: &'a str,
    pub target_commitish: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub body: &'a str,
    pub draft: bool,
    pub generate_release_notes: bool,
    pub make_latest: &'static str,
}

impl<'a> CreateReleaseRequest<'a> {
    pub(crate) fn from_descriptor(d: &'a ReleaseDescriptor) -> Self {
        CreateReleaseRequest {
            tag_name: &d.tag,
            target_commitish: &d.target,
            name: &d.name,
            body: &d.body,
            draft: d.flags.draft,
            generate_release_notes: d.flags.generate_notes,
            make_latest: if d.flags.latest { "true" } else { "false" },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedRelease {
    id: u64,
    html_url: String,
    upload_url: String,
}

/// Entry of `GET /repos/{owner}/{repo}/releases`
#[derive(Debug, Deserialize)]
struct ListedRelease {
    id: u64,
    tag_name: String,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: Option<String>,
    field: Option<String>,
}

/// Release host backed by the GitHub REST API.
pub struct GitHubReleaseHost {
    repo: RepoSlug,
    api_base: String,
    http_client: Client,
}

impl GitHubReleaseHost {
    /// Client for `repo` against api.github.com.
    pub fn new(repo: RepoSlug) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("dotship/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(GitHubReleaseHost {
            repo,
            api_base: DEFAULT_API_BASE.to_string(),
            http_client,
        })
    }

    /// Point at a GitHub Enterprise (or test) API root.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn repo(&self) -> &RepoSlug {
        &self.repo
    }

    pub(crate) fn tag_ref_url(&self, tag: &str) -> String {
        format!(
            "{}/repos/{}/{}/git/ref/tags/{}",
            self.api_base, self.repo.owner, self.repo.repo, tag
        )
    }

    pub(crate) fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            self.api_base, self.repo.owner, self.repo.repo
        )
    }

    fn authed(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        credential
            .use_secret(|token| request.bearer_auth(token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn verify_tag(&self, tag: &str, credential: &Credential) -> Result<()> {
        let response = self
            .authed(self.http_client.get(self.tag_ref_url(tag)), credential)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            debug!(tag = %tag, "Tag verified on remote");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => HostingError::TagNotFound {
                tag: tag.to_string(),
            },
            _ => classify_rejection(status, &body, tag),
        })
    }

    async fn upload_asset(
        &self,
        upload_url: &str,
        path: &std::path::Path,
        credential: &Credential,
    ) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| HostingError::Io(format!("not a file: {}", path.display())))?;
        let bytes = tokio::fs::read(path).await?;

        info!(asset = %name, bytes = bytes.len(), "Uploading release asset");
        let response = self
            .authed(self.http_client.post(upload_url), credential)
            .query(&[("name", name.as_str())])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_rejection(status, &body, &name));
        }
        Ok(name)
    }

    /// Parse the create response. If it cannot be read the release may
    /// still exist, so it is located and deleted before failing.
    async fn read_created(
        &self,
        response: reqwest::Response,
        tag: &str,
        credential: &Credential,
    ) -> Result<CreatedRelease> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let value: Option<serde_json::Value> = serde_json::from_str(&body).ok();
        if let Some(created) = value
            .clone()
            .and_then(|v| serde_json::from_value::<CreatedRelease>(v).ok())
        {
            return Ok(created);
        }

        let release_id = match value.as_ref().and_then(|v| v["id"].as_u64()) {
            Some(id) => Some(id),
            None => self.find_draft(tag, credential).await,
        };
        match release_id {
            Some(id) => {
                warn!(release_id = id, "Unreadable create response, rolling back release");
                self.delete_release(id, credential).await;
            }
            None => warn!(tag = %tag, "Unreadable create response and no draft found to roll back"),
        }
        Err(HostingError::Rejected {
            status: status.as_u16(),
            message: "unreadable create-release response".to_string(),
        })
    }

    /// Id of the only draft release for `tag`, if exactly one exists.
    async fn find_draft(&self, tag: &str, credential: &Credential) -> Option<u64> {
        let response = self
            .authed(self.http_client.get(self.releases_url()), credential)
            .query(&[("per_page", "100")])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let releases: Vec<ListedRelease> = response.json().await.ok()?;
        let mut drafts = releases
            .into_iter()
            .filter(|r| r.draft && r.tag_name == tag);
        match (drafts.next(), drafts.next()) {
            (Some(release), None) => Some(release.id),
            _ => None,
        }
    }

    async fn delete_release(&self, release_id: u64, credential: &Credential) {
        let url = format!("{}/{}", self.releases_url(), release_id);
        match self
            .authed(self.http_client.delete(url), credential)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => {
                info!(release_id, "Deleted partially created release");
            }
            Ok(r) => warn!(release_id, status = %r.status(), "Failed to delete partial release"),
            Err(e) => warn!(release_id, error = %e, "Failed to delete partial release"),
        }
    }
}

/// Drop the RFC 6570 suffix GitHub appends to `upload_url`.
pub(crate) fn strip_upload_template(upload_url: &str) -> &str {
    upload_url
        .split_once('{')
        .map(|(base, _)| base)
        .unwrap_or(upload_url)
}

/// Map an unsuccessful API response to a rejection reason.
pub(crate) fn classify_rejection(status: StatusCode, body: &str, tag: &str) -> HostingError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HostingError::Unauthorized(message),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let duplicate = parsed.as_ref().is_some_and(|b| {
                b.errors.iter().any(|e| {
                    e.code.as_deref() == Some("already_exists")
                        && e.field.as_deref().unwrap_or("tag_name") == "tag_name"
                })
            });
            if duplicate {
                HostingError::DuplicateRelease {
                    tag: tag.to_string(),
                }
            } else {
                HostingError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            }
        }
        _ => HostingError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ReleaseHost for GitHubReleaseHost {
    async fn create_release(
        &self,
        descriptor: &ReleaseDescriptor,
        credential: &Credential,
    ) -> Result<ReleaseOutcome> {
        if credential.is_empty() {
            return Err(HostingError::Unauthorized("empty token".to_string()));
        }

        if descriptor.flags.verify_tag {
            self.verify_tag(&descriptor.tag, credential).await?;
        }

        info!(
            repo = %self.repo,
            tag = %descriptor.tag,
            target = %descriptor.target,
            draft = descriptor.flags.draft,
            assets = descriptor.files.len(),
            "Creating release"
        );

        let response = self
            .authed(self.http_client.post(self.releases_url()), credential)
            .json(&CreateReleaseRequest::from_descriptor(descriptor))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_rejection(status, &body, &descriptor.tag));
        }
        let created = self
            .read_created(response, &descriptor.tag, credential)
            .await?;
        let upload_url = strip_upload_template(&created.upload_url).to_string();

        let mut assets = Vec::with_capacity(descriptor.files.len());
        for file in &descriptor.files {
            match self.upload_asset(&upload_url, file, credential).await {
                Ok(name) => assets.push(name),
                Err(e) => {
                    warn!(release_id = created.id, error = %e, "Asset upload failed, rolling back release");
                    self.delete_release(created.id, credential).await;
                    return Err(e);
                }
            }
        }

        info!(release_id = created.id, url = %created.html_url, "Release created");
        Ok(ReleaseOutcome {
            release_id: created.id,
            html_url: created.html_url,
            assets,
        })
    }
}
