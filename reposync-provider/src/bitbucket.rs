//! Bitbucket Cloud provider.
//!
//! Bitbucket has no recursive tree listing with blob ids, so remote hashes
//! are computed from the branch archive and cached until the next push.
//! Commits are multipart form posts to `/src`, where each form field named
//! after a path carries its content and `files` fields list deletions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposync_types::{ChangedFile, CommitAuthor, CommitId, ContentHash, RemoteCommit, RepoPath};
use reqwest::header::HeaderMap;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::archive::extract_zip;
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ProviderError, ProviderResult};
use crate::http::{ApiClient, Auth, encode_path};
use crate::provider::{
    ArchiveFile, CommitBatch, CommitResult, FileChange, RepositoryProvider, unchanged,
};
use crate::visibility::VisibilityCache;

const PAGE_LEN: usize = 100;

#[derive(Debug, Deserialize)]
struct BbPage<T> {
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BbRepository {
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct BbBranch {
    name: String,
    target: Option<BbHash>,
}

#[derive(Debug, Deserialize)]
struct BbHash {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct BbCommit {
    hash: String,
    #[serde(default)]
    message: String,
    date: DateTime<Utc>,
    author: Option<BbAuthor>,
    #[serde(default)]
    parents: Vec<BbHash>,
}

#[derive(Debug, Deserialize)]
struct BbAuthor {
    raw: String,
}

#[derive(Debug, Deserialize)]
struct BbDiffStat {
    status: String,
    old: Option<BbPath>,
    new: Option<BbPath>,
}

#[derive(Debug, Deserialize)]
struct BbPath {
    path: String,
}

/// Bitbucket Cloud REST 2.0 client for one repository branch.
pub struct BitbucketProvider {
    config: ProviderConfig,
    api: ApiClient,
    visibility: VisibilityCache,
    tree_cache: Mutex<Option<BTreeMap<RepoPath, ContentHash>>>,
}

impl BitbucketProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate()?;
        let auth = match &config.username {
            Some(username) => Auth::Basic {
                username: username.clone(),
                password: config.token.clone(),
            },
            None => Auth::Bearer(config.token.clone()),
        };
        let api = ApiClient::new(
            config.api_base_url(),
            auth,
            HeaderMap::new(),
            config.timeout(),
            config.archive_timeout(),
        )?;
        Ok(Self {
            config,
            api,
            visibility: VisibilityCache::default(),
            tree_cache: Mutex::new(None),
        })
    }

    fn repo(&self) -> String {
        format!("/repositories/{}", self.config.repository)
    }

    fn branch_param(&self) -> String {
        urlencoding::encode(&self.config.branch).into_owned()
    }

    fn src_endpoint(&self, path: &RepoPath) -> String {
        format!(
            "{}/src/{}/{}",
            self.repo(),
            self.branch_param(),
            encode_path(path.as_str())
        )
    }

    /// Follows `next` links until exhausted.
    async fn paged<T: DeserializeOwned>(&self, endpoint: &str) -> ProviderResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(endpoint.to_string());
        while let Some(url) = next {
            let page: BbPage<T> = self.api.get_json(&url).await?;
            items.extend(page.values);
            next = page.next;
        }
        Ok(items)
    }

    async fn head(&self) -> ProviderResult<Option<String>> {
        let endpoint = format!("{}/refs/branches/{}", self.repo(), self.branch_param());
        match self.api.get_json::<BbBranch>(&endpoint).await {
            Ok(branch) => Ok(branch.target.map(|t| t.hash)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn cached_tree(&self) -> Option<BTreeMap<RepoPath, ContentHash>> {
        self.tree_cache.lock().ok().and_then(|cache| cache.clone())
    }

    async fn post_form(&self, form: Form) -> ProviderResult<Option<String>> {
        let endpoint = format!("{}/src", self.repo());
        let response = self
            .api
            .send(Method::POST, &endpoint, |b| b.multipart(form))
            .await?;
        // The new commit is only reported through the Location header.
        Ok(response
            .header("location")
            .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
            .filter(|hash| !hash.is_empty())
            .map(str::to_string))
    }

    fn base_form(&self, message: &str, author: &CommitAuthor) -> Form {
        Form::new()
            .text("message", message.to_string())
            .text("branch", self.config.branch.clone())
            .text("author", format!("{} <{}>", author.name, author.email))
    }
}

fn parse_author(raw: &str) -> CommitAuthor {
    match raw.rsplit_once('<') {
        Some((name, email)) => CommitAuthor::new(name.trim(), email.trim_end_matches('>').trim()),
        None => CommitAuthor::new(raw.trim(), ""),
    }
}

#[async_trait]
impl RepositoryProvider for BitbucketProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bitbucket
    }

    fn branch(&self) -> &str {
        &self.config.branch
    }

    async fn initialize_repository(&self) -> ProviderResult<BTreeMap<RepoPath, ArchiveFile>> {
        let endpoint = format!(
            "{}/{}/get/{}.zip",
            self.config.archive_base_url(),
            self.config.repository,
            self.branch_param()
        );
        let bytes = self.api.get_archive(&endpoint).await?;
        extract_zip(&bytes)
    }

    async fn get_remote_hashes(&self) -> ProviderResult<BTreeMap<RepoPath, ContentHash>> {
        if !self.api.exists(&self.repo()).await? {
            return Err(ProviderError::NotFound(format!("repository {}", self.config.repository)));
        }
        let branch = format!("{}/refs/branches/{}", self.repo(), self.branch_param());
        if !self.api.exists(&branch).await? {
            return Err(ProviderError::NotFound(format!("branch {}", self.config.branch)));
        }
        if let Some(cached) = self.cached_tree() {
            debug!("Using cached Bitbucket tree ({} files)", cached.len());
            return Ok(cached);
        }

        let files = match self.initialize_repository().await {
            Ok(files) => files,
            Err(e) => {
                warn!("Reading archive of {} failed: {}", self.config.branch, e);
                return Ok(BTreeMap::new());
            }
        };
        let hashes: BTreeMap<RepoPath, ContentHash> = files
            .into_iter()
            .map(|(path, file)| (path, file.hash))
            .collect();
        if let Ok(mut cache) = self.tree_cache.lock() {
            *cache = Some(hashes.clone());
        }
        Ok(hashes)
    }

    async fn get_file(&self, path: &RepoPath) -> ProviderResult<Option<Vec<u8>>> {
        self.api.get_bytes(&self.src_endpoint(path), None).await
    }

    async fn delete_file(
        &self,
        path: &RepoPath,
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<bool> {
        if !self.api.exists(&self.src_endpoint(path)).await? {
            return Ok(false);
        }
        let form = self
            .base_form(message, author)
            .text("files", path.as_str().to_string());
        self.post_form(form).await?;
        self.invalidate_cache();
        info!("Deleted {} from Bitbucket", path);
        Ok(true)
    }

    async fn commit(&self, batch: &CommitBatch) -> ProviderResult<CommitResult> {
        let mut form = self.base_form(&batch.message, &batch.author);
        let mut created = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();

        for change in &batch.changes {
            let path = change.path();
            let exists = self.api.exists(&self.src_endpoint(path)).await?;
            match change {
                FileChange::Write { content, .. } => {
                    let file_name = path.as_str().rsplit('/').next().unwrap_or(path.as_str());
                    let part = Part::bytes(content.clone()).file_name(file_name.to_string());
                    form = form.part(path.as_str().to_string(), part);
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
                    form = form.text("files", path.as_str().to_string());
                    deleted.push(path.clone());
                }
            }
        }

        if created.is_empty() && updated.is_empty() && deleted.is_empty() {
            return unchanged(self.head().await?);
        }

        let commit_id = match self.post_form(form).await? {
            Some(hash) => hash,
            None => self.head().await?.ok_or_else(|| ProviderError::Decode {
                endpoint: format!("{}/src", self.repo()),
                body: "commit created but branch has no head".to_string(),
            })?,
        };
        self.invalidate_cache();

        info!(
            "Committed {} to Bitbucket {} ({} created, {} updated, {} deleted)",
            commit_id,
            self.config.branch,
            created.len(),
            updated.len(),
            deleted.len()
        );
        Ok(CommitResult {
            commit_id: CommitId::new(commit_id),
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
            "{}/commits/{}?pagelen={PAGE_LEN}",
            self.repo(),
            self.branch_param()
        );
        let commits: Vec<BbCommit> = match self.paged(&endpoint).await {
            Ok(commits) => commits,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut commits: Vec<RemoteCommit> = commits
            .into_iter()
            .map(|c| RemoteCommit {
                id: CommitId::new(c.hash),
                message: c.message,
                author: c
                    .author
                    .map(|a| parse_author(&a.raw))
                    .unwrap_or_default(),
                timestamp: c.date,
                parents: c.parents.into_iter().map(|p| CommitId::new(p.hash)).collect(),
            })
            .collect();
        commits.reverse();
        debug!("Fetched {} Bitbucket commits", commits.len());
        Ok(commits)
    }

    async fn get_commit_files(&self, id: &CommitId) -> ProviderResult<Vec<ChangedFile>> {
        let endpoint = format!(
            "{}/diffstat/{}?pagelen={PAGE_LEN}",
            self.repo(),
            urlencoding::encode(id.as_str())
        );
        let stats: Vec<BbDiffStat> = self.paged(&endpoint).await?;
        let mut files = Vec::new();
        for stat in stats {
            match (stat.status.as_str(), stat.old, stat.new) {
                ("removed", Some(old), _) => {
                    files.push(ChangedFile::new(RepoPath::new(&old.path)?, true));
                }
                ("renamed", Some(old), Some(new)) => {
                    files.push(ChangedFile::new(RepoPath::new(&old.path)?, true));
                    files.push(ChangedFile::new(RepoPath::new(&new.path)?, false));
                }
                (_, _, Some(new)) => {
                    files.push(ChangedFile::new(RepoPath::new(&new.path)?, false));
                }
                (status, _, None) => debug!("Ignoring diffstat entry with status {}", status),
            }
        }
        Ok(files)
    }

    async fn list_branches(&self) -> ProviderResult<Vec<String>> {
        if !self.config.allow_private_repos && !self.is_public_repo().await? {
            return Err(ProviderError::Visibility(self.config.repository.clone()));
        }
        let endpoint = format!("{}/refs/branches?pagelen={PAGE_LEN}", self.repo());
        let branches: Vec<BbBranch> = self.paged(&endpoint).await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn is_public_repo(&self) -> ProviderResult<bool> {
        if let Some(public) = self.visibility.get() {
            return Ok(public);
        }
        let repo: BbRepository = self.api.get_json(&self.repo()).await?;
        let public = !repo.is_private;
        self.visibility.set(public);
        Ok(public)
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.tree_cache.lock() {
            *cache = None;
        }
    }
}
