//! Error types for the sync layer.

use reposync_model::CodecError;
use reposync_provider::ProviderError;
use reposync_state::StateError;
use reposync_types::CommitId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Talking to the hosting provider failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Reading or writing local state failed.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The CMS collaborator or the codec failed outside a single entity.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid sync settings.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Local and remote histories both advanced. The caller decides whether
    /// to push over the remote or re-initialize from it.
    #[error("local ({local}) and remote ({remote}) histories have diverged")]
    Diverged { local: CommitId, remote: CommitId },

    /// The provider's head is missing from its own commit list.
    #[error("remote head {remote} is not in the remote history")]
    InconsistentHistory { remote: CommitId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
