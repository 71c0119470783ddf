//! GitLab provider.
//!
//! GitLab accepts a whole batch as one request to the commits API, but each
//! action must say whether it creates or updates, so every path is probed
//! with a HEAD request first. Paging follows the `x-next-page` header.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reposync_types::{ChangedFile, CommitAuthor, CommitId, ContentHash, RemoteCommit, RepoPath};
use reqwest::header::{HeaderMap, HeaderName};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::archive::extract_zip;
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ProviderError, ProviderResult};
use crate::http::{ApiClient, Auth};
use crate::provider::{
    ArchiveFile, CommitBatch, CommitResult, FileChange, RepositoryProvider, unchanged,
};
use crate::visibility::VisibilityCache;

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct GlProject {
    #[serde(default)]
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlTreeEntry {
    id: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GlBranch {
    name: String,
    commit: Option<GlCommitRef>,
}

#[derive(Debug, Deserialize)]
struct GlCommitRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GlCommit {
    id: String,
    message: String,
    author_name: String,
    author_email: String,
    authored_date: DateTime<Utc>,
    #[serde(default)]
    parent_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GlDiff {
    old_path: String,
    new_path: String,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

/// GitLab REST v4 client for one project branch.
pub struct GitLabProvider {
    config: ProviderConfig,
    api: ApiClient,
    visibility: VisibilityCache,
}

impl GitLabProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate()?;
        let api = ApiClient::new(
            config.api_base_url(),
            Auth::Header(HeaderName::from_static("private-token"), config.token.clone()),
            HeaderMap::new(),
            config.timeout(),
            config.archive_timeout(),
        )?;
        Ok(Self {
            config,
            api,
            visibility: VisibilityCache::default(),
        })
    }

    /// Projects are addressed by their URL-encoded full path.
    fn project(&self) -> String {
        format!("/projects/{}", urlencoding::encode(&self.config.repository))
    }

    fn branch_param(&self) -> String {
        urlencoding::encode(&self.config.branch).into_owned()
    }

    fn file_endpoint(&self, path: &RepoPath) -> String {
        format!(
            "{}/repository/files/{}",
            self.project(),
            urlencoding::encode(path.as_str())
        )
    }

    async fn file_exists(&self, path: &RepoPath) -> ProviderResult<bool> {
        let endpoint = format!("{}?ref={}", self.file_endpoint(path), self.branch_param());
        self.api.exists(&endpoint).await
    }

    /// Collects every page of a list endpoint.
    async fn paged<T: DeserializeOwned>(&self, endpoint: &str) -> ProviderResult<Vec<T>> {
        let sep = if endpoint.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = "1".to_string();
        loop {
            let url = format!("{endpoint}{sep}per_page={PER_PAGE}&page={page}");
            let response = self.api.get(&url).await?;
            let next = response
                .header("x-next-page")
                .unwrap_or_default()
                .trim()
                .to_string();
            let batch: Vec<T> = response.body.parse(&url)?;
            items.extend(batch);
            if next.is_empty() {
                break;
            }
            page = next;
        }
        Ok(items)
    }

    async fn head(&self) -> ProviderResult<Option<String>> {
        let endpoint = format!("{}/repository/branches/{}", self.project(), self.branch_param());
        match self.api.get_json::<GlBranch>(&endpoint).await {
            Ok(branch) => Ok(branch.commit.map(|c| c.id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RepositoryProvider for GitLabProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    fn branch(&self) -> &str {
        &self.config.branch
    }

    async fn initialize_repository(&self) -> ProviderResult<BTreeMap<RepoPath, ArchiveFile>> {
        let endpoint = format!(
            "{}/repository/archive.zip?sha={}",
            self.project(),
            self.branch_param()
        );
        let bytes = self.api.get_archive(&endpoint).await?;
        extract_zip(&bytes)
    }

    async fn get_remote_hashes(&self) -> ProviderResult<BTreeMap<RepoPath, ContentHash>> {
        if !self.api.exists(&self.project()).await? {
            return Err(ProviderError::NotFound(format!("project {}", self.config.repository)));
        }
        let branch = format!("{}/repository/branches/{}", self.project(), self.branch_param());
        if !self.api.exists(&branch).await? {
            return Err(ProviderError::NotFound(format!("branch {}", self.config.branch)));
        }

        let endpoint = format!(
            "{}/repository/tree?recursive=true&ref={}",
            self.project(),
            self.branch_param()
        );
        let entries: Vec<GlTreeEntry> = match self.paged(&endpoint).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Listing tree of {} failed: {}", self.config.branch, e);
                return Ok(BTreeMap::new());
            }
        };

        let mut hashes = BTreeMap::new();
        for entry in entries.into_iter().filter(|e| e.kind == "blob") {
            let Ok(path) = RepoPath::new(&entry.path) else {
                debug!("Ignoring unrepresentable path {}", entry.path);
                continue;
            };
            hashes.insert(path, ContentHash::parse(&entry.id)?);
        }
        Ok(hashes)
    }

    async fn get_file(&self, path: &RepoPath) -> ProviderResult<Option<Vec<u8>>> {
        let endpoint = format!("{}/raw?ref={}", self.file_endpoint(path), self.branch_param());
        self.api.get_bytes(&endpoint, None).await
    }

    async fn delete_file(
        &self,
        path: &RepoPath,
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<bool> {
        if !self.file_exists(path).await? {
            return Ok(false);
        }
        let endpoint = self.file_endpoint(path);
        let body = json!({
            "branch": self.config.branch,
            "commit_message": message,
            "author_name": author.name,
            "author_email": author.email,
        });
        self.api
            .send(Method::DELETE, &endpoint, |b| b.json(&body))
            .await?;
        info!("Deleted {} from GitLab", path);
        Ok(true)
    }

    async fn commit(&self, batch: &CommitBatch) -> ProviderResult<CommitResult> {
        let mut created = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();
        let mut actions = Vec::with_capacity(batch.changes.len());

        for change in &batch.changes {
            let path = change.path();
            let exists = self.file_exists(path).await?;
            match change {
                FileChange::Write { content, .. } => {
                    let action = if exists { "update" } else { "create" };
                    actions.push(json!({
                        "action": action,
                        "file_path": path.as_str(),
                        "content": STANDARD.encode(content),
                        "encoding": "base64",
                    }));
                    if exists {
                        updated.push(path.clone());
                    } else {
                        created.push(path.clone());
                    }
                }
                FileChange::Delete { .. } => {
                    if !exists {
                        debug!("Skipping delete of absent {}", path);
                        continue;
                    }
                    actions.push(json!({ "action": "delete", "file_path": path.as_str() }));
                    deleted.push(path.clone());
                }
            }
        }

        if actions.is_empty() {
            return unchanged(self.head().await?);
        }

        let endpoint = format!("{}/repository/commits", self.project());
        let body = json!({
            "branch": self.config.branch,
            "commit_message": batch.message,
            "author_name": batch.author.name,
            "author_email": batch.author.email,
            "actions": actions,
        });
        let commit: GlCommitRef = self
            .api
            .send(Method::POST, &endpoint, |b| b.json(&body))
            .await?
            .body
            .parse(&endpoint)?;

        info!(
            "Committed {} to GitLab {} ({} created, {} updated, {} deleted)",
            commit.id,
            self.config.branch,
            created.len(),
            updated.len(),
            deleted.len()
        );
        Ok(CommitResult {
            commit_id: CommitId::new(commit.id),
            created,
            updated,
            deleted,
        })
    }

    async fn get_latest_commit_hash(&self) -> ProviderResult<Option<CommitId>> {
        Ok(self.head().await?.map(CommitId::new))
    }

    async fn get_repository_commits(&self) -> ProviderResult<Vec<RemoteCommit>> {
        let endpoint = format!(
            "{}/repository/commits?ref_name={}",
            self.project(),
            self.branch_param()
        );
        let commits: Vec<GlCommit> = match self.paged(&endpoint).await {
            Ok(commits) => commits,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut commits: Vec<RemoteCommit> = commits
            .into_iter()
            .map(|c| RemoteCommit {
                id: CommitId::new(c.id),
                message: c.message,
                author: CommitAuthor::new(c.author_name, c.author_email),
                timestamp: c.authored_date,
                parents: c.parent_ids.into_iter().map(CommitId::new).collect(),
            })
            .collect();
        commits.reverse();
        debug!("Fetched {} GitLab commits", commits.len());
        Ok(commits)
    }

    async fn get_commit_files(&self, id: &CommitId) -> ProviderResult<Vec<ChangedFile>> {
        let endpoint = format!(
            "{}/repository/commits/{}/diff",
            self.project(),
            urlencoding::encode(id.as_str())
        );
        let diffs: Vec<GlDiff> = self.paged(&endpoint).await?;
        let mut files = Vec::new();
        for diff in diffs {
            if diff.renamed_file && diff.old_path != diff.new_path {
                files.push(ChangedFile::new(RepoPath::new(&diff.old_path)?, true));
            }
            files.push(ChangedFile::new(RepoPath::new(&diff.new_path)?, diff.deleted_file));
        }
        Ok(files)
    }

    async fn list_branches(&self) -> ProviderResult<Vec<String>> {
        if !self.config.allow_private_repos && !self.is_public_repo().await? {
            return Err(ProviderError::Visibility(self.config.repository.clone()));
        }
        let endpoint = format!("{}/repository/branches", self.project());
        let branches: Vec<GlBranch> = self.paged(&endpoint).await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn is_public_repo(&self) -> ProviderResult<bool> {
        if let Some(public) = self.visibility.get() {
            return Ok(public);
        }
        let project: GlProject = match self.api.get_json(&self.project()).await {
            Ok(project) => project,
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                return Err(ProviderError::NotFound(format!(
                    "project {}",
                    self.config.repository
                )));
            }
            Err(e) => return Err(e),
        };
        let public = project.visibility.as_deref() == Some("public");
        self.visibility.set(public);
        Ok(public)
    }

    fn invalidate_cache(&self) {}
}
