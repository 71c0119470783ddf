//! Core type definitions for reposync.
//!
//! This crate defines the provider-agnostic types shared by every part of the
//! sync engine:
//! - Content hashes (Git blob object ids)
//! - Repository paths and the entity key ↔ path mapping
//! - Local commit log entries and normalized remote commits
//! - Per-file and per-repository sync status classifications
//!
//! Nothing here performs I/O. Storage, provider clients and the orchestrator
//! all build on these types.

mod commit;
mod hash;
mod path;
mod status;

pub use commit::{ChangedFile, CommitAuthor, CommitId, CommitLogEntry, RemoteCommit};
pub use hash::ContentHash;
pub use path::{EntityKey, RepoPath, escape_name, table_type, unescape_name};
pub use status::{FileStatus, RepoStatus};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when constructing or parsing core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid repository path: {0}")]
    InvalidPath(String),

    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    #[error("invalid content hash: {0}")]
    InvalidHash(String),
}
