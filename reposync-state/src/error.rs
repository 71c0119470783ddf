//! Error types for the state store.

use std::time::Duration;
use thiserror::Error;

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store lease could not be acquired in time.
    #[error("state store lock not acquired within {waited:?}")]
    LockTimeout { waited: Duration },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A commit must change at least one path.
    #[error("commit has no changes")]
    EmptyCommit,

    /// No commit log entry has this id.
    #[error("unknown commit: {0}")]
    UnknownCommit(String),

    /// Stored data failed validation on the way out.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("state store connection poisoned")]
    Poisoned,
}

impl From<reposync_types::Error> for StateError {
    fn from(err: reposync_types::Error) -> Self {
        StateError::InvalidData(err.to_string())
    }
}
