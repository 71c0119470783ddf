//! Commit identifiers, local commit log entries and normalized remote commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::{ContentHash, RepoPath};

/// Identifier of a commit.
///
/// Locally created commits get a random token; once pushed, the id is
/// rewritten to the provider's commit hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Generates a fresh local commit id.
    #[must_use]
    pub fn new_local() -> Self {
        Self(format!("local-{}", Uuid::new_v4().simple()))
    }

    /// Wraps a provider-assigned commit hash.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns true if this id was generated locally and never pushed.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Author recorded on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl CommitAuthor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self::new("reposync", "reposync@localhost")
    }
}

/// One entry of the local commit log.
///
/// `changes` maps each touched path to its new content hash; `None` records a
/// deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLogEntry {
    pub id: CommitId,
    pub timestamp: DateTime<Utc>,
    pub author: CommitAuthor,
    pub message: String,
    pub changes: BTreeMap<RepoPath, Option<ContentHash>>,
}

impl CommitLogEntry {
    /// Creates a new local entry with a fresh id.
    pub fn new_local(
        author: CommitAuthor,
        message: impl Into<String>,
        changes: BTreeMap<RepoPath, Option<ContentHash>>,
    ) -> Self {
        Self {
            id: CommitId::new_local(),
            timestamp: Utc::now(),
            author,
            message: message.into(),
            changes,
        }
    }

    /// Mirrors a remote commit into the log with the changes it carried.
    pub fn from_remote(
        commit: &RemoteCommit,
        changes: BTreeMap<RepoPath, Option<ContentHash>>,
    ) -> Self {
        Self {
            id: commit.id.clone(),
            timestamp: commit.timestamp,
            author: commit.author.clone(),
            message: commit.message.clone(),
            changes,
        }
    }

    /// Paths deleted by this entry.
    pub fn deletions(&self) -> impl Iterator<Item = &RepoPath> {
        self.changes
            .iter()
            .filter(|(_, hash)| hash.is_none())
            .map(|(path, _)| path)
    }

    /// Paths added or modified by this entry.
    pub fn writes(&self) -> impl Iterator<Item = (&RepoPath, &ContentHash)> {
        self.changes
            .iter()
            .filter_map(|(path, hash)| hash.as_ref().map(|h| (path, h)))
    }
}

/// A commit as reported by a hosting provider, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommit {
    pub id: CommitId,
    pub message: String,
    pub author: CommitAuthor,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub parents: Vec<CommitId>,
}

/// A file touched by a remote commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: RepoPath,
    pub deleted: bool,
}

impl ChangedFile {
    pub fn new(path: RepoPath, deleted: bool) -> Self {
        Self { path, deleted }
    }
}
