//! The provider abstraction.

use async_trait::async_trait;
use reposync_types::{
    ChangedFile, CommitAuthor, CommitId, ContentHash, EntityKey, RemoteCommit, RepoPath,
};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ProviderKind;
use crate::error::{ProviderError, ProviderResult};

/// A file from a repository archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub hash: ContentHash,
    pub content: Vec<u8>,
}

impl ArchiveFile {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            hash: ContentHash::of(&content),
            content,
        }
    }
}

/// One change in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Write { path: RepoPath, content: Vec<u8> },
    Delete { path: RepoPath },
}

impl FileChange {
    pub fn path(&self) -> &RepoPath {
        match self {
            FileChange::Write { path, .. } | FileChange::Delete { path } => path,
        }
    }
}

/// A batch of writes and deletes published as a single remote commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub message: String,
    pub author: CommitAuthor,
    pub changes: Vec<FileChange>,
}

impl CommitBatch {
    pub fn new(message: impl Into<String>, author: CommitAuthor) -> Self {
        Self {
            message: message.into(),
            author,
            changes: Vec::new(),
        }
    }

    pub fn write(mut self, path: RepoPath, content: Vec<u8>) -> Self {
        self.changes.push(FileChange::Write { path, content });
        self
    }

    pub fn delete(mut self, path: RepoPath) -> Self {
        self.changes.push(FileChange::Delete { path });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Outcome of a published commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub commit_id: CommitId,
    pub created: Vec<RepoPath>,
    pub updated: Vec<RepoPath>,
    pub deleted: Vec<RepoPath>,
}

impl CommitResult {
    pub fn new(commit_id: CommitId) -> Self {
        Self {
            commit_id,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Paths touched by the commit, in any role.
    pub fn touched(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// A batch that changes nothing resolves to the current head.
pub(crate) fn unchanged(head: Option<String>) -> ProviderResult<CommitResult> {
    match head {
        Some(head) => {
            debug!("Commit batch had no effective changes; head stays {}", head);
            Ok(CommitResult::new(CommitId::new(head)))
        }
        None => Err(ProviderError::EmptyCommit),
    }
}

/// A Git hosting provider bound to one repository branch.
///
/// Implementations hide the differences between hosting APIs: how trees
/// are listed, how multi-file commits are published, how history is paged.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// The configured branch.
    fn branch(&self) -> &str;

    /// Downloads the branch as an archive and returns every file in it.
    async fn initialize_repository(&self) -> ProviderResult<BTreeMap<RepoPath, ArchiveFile>>;

    /// Content hashes of every file on the branch.
    ///
    /// Fails with `NotFound` if the repository or branch is missing. Returns
    /// an empty map if listing the tree itself fails.
    async fn get_remote_hashes(&self) -> ProviderResult<BTreeMap<RepoPath, ContentHash>>;

    /// Raw content of one file. `None` if it does not exist.
    async fn get_file(&self, path: &RepoPath) -> ProviderResult<Option<Vec<u8>>>;

    async fn get_remote_post_by_name(&self, key: &EntityKey) -> ProviderResult<Option<Vec<u8>>> {
        self.get_file(&key.path()).await
    }

    /// Deletes one file in its own commit. Returns false if it did not exist.
    async fn delete_file(
        &self,
        path: &RepoPath,
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<bool>;

    async fn delete_remote_post_by_name(
        &self,
        key: &EntityKey,
        message: &str,
        author: &CommitAuthor,
    ) -> ProviderResult<bool> {
        self.delete_file(&key.path(), message, author).await
    }

    /// Publishes all changes in `batch` as exactly one commit.
    async fn commit(&self, batch: &CommitBatch) -> ProviderResult<CommitResult>;

    /// Head commit of the branch. `None` for an empty or missing branch.
    async fn get_latest_commit_hash(&self) -> ProviderResult<Option<CommitId>>;

    /// Full history of the branch, oldest first.
    async fn get_repository_commits(&self) -> ProviderResult<Vec<RemoteCommit>>;

    /// Files changed by one commit.
    async fn get_commit_files(&self, id: &CommitId) -> ProviderResult<Vec<ChangedFile>>;

    async fn list_branches(&self) -> ProviderResult<Vec<String>>;

    /// Whether the repository is public. Cached for a day.
    async fn is_public_repo(&self) -> ProviderResult<bool>;

    /// Drops cached remote state. Called after a successful push.
    fn invalidate_cache(&self);
}
