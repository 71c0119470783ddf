//! GitHub provider.
//!
//! Reads use the REST contents and commits APIs. Multi-file commits go
//! through the Git database API: one blob per written file, one tree on top
//! of the head tree, one commit, then a fast-forward of the branch ref.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reposync_types::{ChangedFile, CommitAuthor, CommitId, ContentHash, RemoteCommit, RepoPath};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::archive::extract_zip;
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ProviderError, ProviderResult};
use crate::http::{ApiClient, Auth, encode_path};
use crate::provider::{
    ArchiveFile, CommitBatch, CommitResult, FileChange, RepositoryProvider, unchanged,
};
use crate::visibility::VisibilityCache;

const PER_PAGE: usize = 100;
const FILE_MODE: &str = "100644";

#[derive(Debug, Deserialize)]
struct GhRepo {
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct GhTree {
    sha: String,
    tree: Vec<GhTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GhTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhSha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    object: GhSha,
}

#[derive(Debug, Deserialize)]
struct GhGitCommit {
    tree: GhSha,
}

#[derive(Debug, Deserialize)]
struct GhCommit {
    sha: String,
    commit: GhCommitDetail,
    #[serde(default)]
    parents: Vec<GhSha>,
    #[serde(default)]
    files: Vec<GhCommitFile>,
}

#[derive(Debug, Deserialize)]
struct GhCommitDetail {
    message: String,
    author: Option<GhSignature>,
}

#[derive(Debug, Deserialize)]
struct GhSignature {
    name: String,
    email: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GhCommitFile {
    filename: String,
    status: String,
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhContentsWrite {
    commit: GhContentsCommit,
}

#[derive(Debug, Deserialize)]
struct GhContentsCommit {
    sha: String,
    tree: GhSha,
}

#[derive(Debug, Deserialize)]
struct GhBranch {
    name: String,
}

/// GitHub REST v3 client for one repository branch.
pub struct GitHubProvider {
    config: ProviderConfig,
    api: ApiClient,
    visibility: VisibilityCache,
}

impl GitHubProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate()?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            HeaderName::from_static("x-github-api-version"),
            HeaderValue::from_static("2022-11-28"),
        );
        let api = ApiClient::new(
            config.api_base_url(),
            Auth::Bearer(config.token.clone()),
            headers,
            config.timeout(),
            config.archive_timeout(),
        )?;
        Ok(Self {
            config,
            api,
            visibility: VisibilityCache::default(),
        })
    }

    fn repo(&self) -> String {
        format!("/repos/{}", self.config.repository)
    }

    fn branch_param(&self) -> String {
        urlencoding::encode(&self.config.branch).into_owned()
    }

    async fn head_sha(&self) -> ProviderResult<Option<String>> {
        let endpoint = format!("{}/git/ref/heads/{}", self.repo(), self.branch_param());
        match self.api.get_json::<GhRef>(&endpoint).await {
            Ok(r) => Ok(Some(r.object.sha)),
            Err(e) if is_empty_branch(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn tree_of(&self, tree_sha: &str) -> ProviderResult<GhTree> {
        let endpoint = format!("{}/git/trees/{}?recursive=1", self.repo(), tree_sha);
        self.api.get_json(&endpoint).await
    }

    async fn zipball(&self, reference: &str) -> ProviderResult<BTreeMap<RepoPath, ArchiveFile>> {
        let endpoint = format!("{}/zipball/{}", self.repo(), reference);
        let bytes = self.api.get_archive(&endpoint).await?;
        extract_zip(&bytes)
    }

    /// Complete listing of `reference` for trees too large for the trees API.
    async fn archive_hashes(&self, reference: &str) -> ProviderResult<BTreeMap<RepoPath, ContentHash>> {
        Ok(self
            .zipball(reference)
            .await?
            .into_iter()
            .map(|(path, file)| (path, file.hash))
            .collect())
    }

    /// Blob paths under `head`, with the tree sha to build on.
    async fn head_tree(&self, head: &str) -> ProviderResult<(String, BTreeSet<String>)> {
        let endpoint = format!("{}/git/commits/{}", self.repo(), head);
        let commit: GhGitCommit = self.api.get_json(&endpoint).await?;
        let tree = self.tree_of(&commit.tree.sha).await?;
        if tree.truncated {
            warn!("Tree of {} is truncated; listing it from the archive", head);
            let paths = self
                .archive_hashes(head)
                .await?
                .into_keys()
                .map(|p| p.as_str().to_string())
                .collect();
            return Ok((tree.sha, paths));
        }
        let paths = tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect();
        Ok((tree.sha, paths))
    }

    /// Creates the first commit of an empty repository through the contents
    /// API. The Git database API refuses writes until one exists.
    async fn seed_empty_repository(
        &self,
        path: &RepoPath,
        content: &[u8],
        batch: &CommitBatch,
    ) -> ProviderResult<GhContentsCommit> {
        let endpoint = format!("{}/contents/{}", self.repo(), encode_path(path.as_str()));
        let signature = json!({ "name": batch.author.name, "email": batch.author.email });
        let body = json!({
            "message": batch.message,
            "content": STANDARD.encode(content),
            "branch": self.config.branch,
            "author": signature,
            "committer": signature,
        });
        let written: GhContentsWrite = self
            .api
            .send(Method::PUT, &endpoint, |b| b.json(&body))
            .await?
            .body
            .parse(&endpoint)?;
        info!("Seeded empty repository with {} at {}", path, written.commit.sha);
        Ok(written.commit)
    }

    async fn create_blob(&self, content: &[u8]) -> ProviderResult<String> {
        let endpoint = format!("{}/git/blobs", self.repo());
        let body = json!({ "content": STANDARD.encode(content), "encoding": "base64" });
        let blob: GhSha = self
            .api
            .send(Method::POST, &endpoint, |b| b.json(&body))
            .await?
            .body
            .parse(&endpoint)?;
        Ok(blob.sha)
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> ProviderResult<T> {
        self.api
            .send(Method::POST, endpoint, |b| b.json(body))
            .await?
            .body
            .parse(endpoint)
    }

    /// Moves the branch to `sha`. A failure whose outcome is unknown is
    /// re-checked against the branch head before being reported.
    async fn update_ref(&self, sha: &str, create: bool) -> ProviderResult<()> {
        let result = if create {
            let endpoint = format!("{}/git/refs", self.repo());
            let body = json!({ "ref": format!("refs/heads/{}", self.config.branch), "sha": sha });
            self.api
                .send(Method::POST, &endpoint, |b| b.json(&body))
                .await
        } else {
            let endpoint = format!("{}/git/refs/heads/{}", self.repo(), self.branch_param());
            let body = json!({ "sha": sha, "force": false });
            self.api
                .send(Method::PATCH, &endpoint, |b| b.json(&body))
                .await
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Updating {} to {} failed: {}; re-checking head", self.config.branch, sha, e);
                match self.head_sha().await {
                    Ok(Some(head)) if head == sha => {
                        info!("Branch {} already points at {}", self.config.branch, sha);
                        Ok(())
                    }
                    _ => Err(e),
                }
            }
        }
    }
}

/// GitHub answers 409 for empty repositories and 404 for missing refs.
fn is_empty_branch(e: &ProviderError) -> bool {
    matches!(e.status(), Some(StatusCode::NOT_FOUND) | Some(StatusCode::CONFLICT))
}

#[async_trait]
impl RepositoryProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn branch(&self) -> &str {
        &self.config.branch
    }

    async fn initialize_repository(&self) -> ProviderResult<BTreeMap<RepoPath, ArchiveFile>> {
        self.zipball(&self.branch_param()).await
    }

    async fn get_remote_hashes(&self) -> ProviderResult<BTreeMap<RepoPath, ContentHash>> {
        let repo = self.repo();
        if !self.api.exists(&repo).await? {
            return Err(ProviderError::NotFound(format!("repository {}", self.config.repository)));
        }
        let branch = format!("{}/branches/{}", repo, self.branch_param());
        if !self.api.exists(&branch).await? {
            return Err(ProviderError::NotFound(format!("branch {}", self.config.branch)));
        }

        let endpoint = format!("{}/git/trees/{}?recursive=1", repo, self.branch_param());
        let tree: GhTree = match self.api.get_json(&endpoint).await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("Listing tree of {} failed: {}", self.config.branch, e);
                return Ok(BTreeMap::new());
            }
        };
        if tree.truncated {
            warn!("Tree of {} is truncated; listing it from the archive", self.config.branch);
            return self.archive_hashes(&self.branch_param()).await;
        }

        let mut hashes = BTreeMap::new();
        for entry in tree.tree.into_iter().filter(|e| e.kind == "blob") {
            let Ok(path) = RepoPath::new(&entry.path) else {
                debug!("Ignoring unrepresentable path {}", entry.path);
                continue;
            };
            hashes.insert(path, ContentHash::parse(&entry.sha)?);
        }
        Ok(hashes)
    }

    async fn get_file(&self, path: &RepoPath) -> ProviderResult<Option<Vec<u8>>> {
        let endpoint = format!(
            "{}/contents/{}?ref={}",
            self.repo(),
            encode_path(path.as_str()),
            self.branch_param()
        );
        self.api
            .get_bytes(&endpoint, Some("application/vnd.github.raw"))
            .await
    }

    async fn delete_file(
        &self,
        path: &RepoPath,
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<bool> {
        let endpoint = format!("{}/contents/{}", self.repo(), encode_path(path.as_str()));
        let lookup = format!("{}?ref={}", endpoint, self.branch_param());
        let existing: GhSha = match self.api.get_json(&lookup).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        let body = json!({
            "message": message,
            "sha": existing.sha,
            "branch": self.config.branch,
            "committer": { "name": author.name, "email": author.email },
        });
        self.api
            .send(Method::DELETE, &endpoint, |b| b.json(&body))
            .await?;
        info!("Deleted {} from GitHub", path);
        Ok(true)
    }

    async fn commit(&self, batch: &CommitBatch) -> ProviderResult<CommitResult> {
        let mut head = self.head_sha().await?;
        let creates_branch = head.is_none();
        let (mut base_tree, existing) = match &head {
            Some(head) => {
                let (tree, paths) = self.head_tree(head).await?;
                (Some(tree), paths)
            }
            None => (None, BTreeSet::new()),
        };

        let mut created = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();
        let mut seeded = None;
        let mut entries = Vec::with_capacity(batch.changes.len());
        for change in &batch.changes {
            match change {
                FileChange::Write { path, content } => {
                    let sha = match self.create_blob(content).await {
                        Ok(sha) => sha,
                        Err(e) if head.is_none() && e.status() == Some(StatusCode::CONFLICT) => {
                            let seed = self.seed_empty_repository(path, content, batch).await?;
                            head = Some(seed.sha.clone());
                            base_tree = Some(seed.tree.sha);
                            seeded = Some(seed.sha);
                            created.push(path.clone());
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    entries.push(json!({
                        "path": path.as_str(), "mode": FILE_MODE, "type": "blob", "sha": sha,
                    }));
                    if existing.contains(path.as_str()) {
                        updated.push(path.clone());
                    } else {
                        created.push(path.clone());
                    }
                }
                FileChange::Delete { path } => {
                    if !existing.contains(path.as_str()) {
                        debug!("Skipping delete of absent {}", path);
                        continue;
                    }
                    entries.push(json!({
                        "path": path.as_str(), "mode": FILE_MODE, "type": "blob", "sha": Value::Null,
                    }));
                    deleted.push(path.clone());
                }
            }
        }

        if entries.is_empty() {
            return match seeded {
                Some(sha) => Ok(CommitResult {
                    commit_id: CommitId::new(sha),
                    created,
                    updated,
                    deleted,
                }),
                None => unchanged(head),
            };
        }

        let mut tree_body = json!({ "tree": entries });
        if let Some(base) = &base_tree {
            tree_body["base_tree"] = json!(base);
        }
        let tree: GhSha = self
            .post_json(&format!("{}/git/trees", self.repo()), &tree_body)
            .await?;

        let commit_body = json!({
            "message": batch.message,
            "tree": tree.sha,
            "parents": head.iter().collect::<Vec<_>>(),
            "author": {
                "name": batch.author.name,
                "email": batch.author.email,
                "date": Utc::now().to_rfc3339(),
            },
        });
        let commit: GhSha = self
            .post_json(&format!("{}/git/commits", self.repo()), &commit_body)
            .await?;

        // A seeded repository already has the branch.
        self.update_ref(&commit.sha, creates_branch && seeded.is_none()).await?;
        info!(
            "Committed {} to GitHub {} ({} created, {} updated, {} deleted)",
            commit.sha,
            self.config.branch,
            created.len(),
            updated.len(),
            deleted.len()
        );
        Ok(CommitResult {
            commit_id: CommitId::new(commit.sha),
            created,
            updated,
            deleted,
        })
    }

    async fn get_latest_commit_hash(&self) -> ProviderResult<Option<CommitId>> {
        let endpoint = format!("{}/commits/{}", self.repo(), self.branch_param());
        match self.api.get_json::<GhSha>(&endpoint).await {
            Ok(commit) => Ok(Some(CommitId::new(commit.sha))),
            Err(e) if is_empty_branch(&e) || e.status() == Some(StatusCode::UNPROCESSABLE_ENTITY) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_repository_commits(&self) -> ProviderResult<Vec<RemoteCommit>> {
        let mut commits = Vec::new();
        for page in 1.. {
            let endpoint = format!(
                "{}/commits?sha={}&per_page={PER_PAGE}&page={page}",
                self.repo(),
                self.branch_param()
            );
            let batch: Vec<GhCommit> = match self.api.get_json(&endpoint).await {
                Ok(batch) => batch,
                Err(e) if is_empty_branch(&e) => break,
                Err(e) => return Err(e),
            };
            let count = batch.len();
            commits.extend(batch.into_iter().map(to_remote_commit));
            if count < PER_PAGE {
                break;
            }
        }
        // GitHub lists newest first.
        commits.reverse();
        debug!("Fetched {} GitHub commits", commits.len());
        Ok(commits)
    }

    /// Large commits list their files across pages linked by `Link` headers.
    async fn get_commit_files(&self, id: &CommitId) -> ProviderResult<Vec<ChangedFile>> {
        let mut endpoint = format!("{}/commits/{}", self.repo(), id);
        let mut files = Vec::new();
        loop {
            let response = self.api.get(&endpoint).await?;
            let next = response.header("link").and_then(next_link);
            let commit: GhCommit = response.body.parse(&endpoint)?;
            for file in commit.files {
                if file.status == "renamed" {
                    if let Some(previous) = &file.previous_filename {
                        files.push(ChangedFile::new(RepoPath::new(previous)?, true));
                    }
                }
                let deleted = file.status == "removed";
                files.push(ChangedFile::new(RepoPath::new(&file.filename)?, deleted));
            }
            match next {
                Some(url) => endpoint = url,
                None => break,
            }
        }
        debug!("Commit {} touched {} files", id, files.len());
        Ok(files)
    }

    async fn list_branches(&self) -> ProviderResult<Vec<String>> {
        if !self.config.allow_private_repos && !self.is_public_repo().await? {
            return Err(ProviderError::Visibility(self.config.repository.clone()));
        }
        let mut names = Vec::new();
        for page in 1.. {
            let endpoint = format!("{}/branches?per_page={PER_PAGE}&page={page}", self.repo());
            let batch: Vec<GhBranch> = self.api.get_json(&endpoint).await?;
            let count = batch.len();
            names.extend(batch.into_iter().map(|b| b.name));
            if count < PER_PAGE {
                break;
            }
        }
        Ok(names)
    }

    async fn is_public_repo(&self) -> ProviderResult<bool> {
        if let Some(public) = self.visibility.get() {
            return Ok(public);
        }
        let repo: GhRepo = self.api.get_json(&self.repo()).await?;
        let public = !repo.private;
        self.visibility.set(public);
        Ok(public)
    }

    fn invalidate_cache(&self) {}
}

/// Target of the `rel="next"` entry of a `Link` header.
fn next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

fn to_remote_commit(c: GhCommit) -> RemoteCommit {
    let (author, timestamp) = match c.commit.author {
        Some(sig) => (CommitAuthor::new(sig.name, sig.email), sig.date),
        None => (CommitAuthor::default(), DateTime::<Utc>::default()),
    };
    RemoteCommit {
        id: CommitId::new(c.sha),
        message: c.commit.message,
        author,
        timestamp,
        parents: c.parents.into_iter().map(|p| CommitId::new(p.sha)).collect(),
    }
}
