//! Error types for provider clients.

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur talking to a Git hosting provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure or timeout before a response arrived.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-2xx/3xx status.
    #[error("{method} {endpoint} failed with HTTP {status}: {body}")]
    Http {
        status: StatusCode,
        method: Method,
        endpoint: String,
        body: String,
    },

    /// A response that had to be structured was not.
    #[error("unexpected response from {endpoint}: {body}")]
    Decode { endpoint: String, body: String },

    /// Repository, branch or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The configured provider kind is not known.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Missing or malformed settings (token, repository, branch).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Private repository used without entitlement.
    #[error("repository visibility not permitted: {0}")]
    Visibility(String),

    /// The repository archive could not be read.
    #[error("archive error: {0}")]
    Archive(String),

    /// Nothing in the batch would change the branch, and it has no head yet.
    #[error("commit has no effective changes")]
    EmptyCommit,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed path or hash in a provider response.
    #[error("invalid data: {0}")]
    InvalidData(#[from] reposync_types::Error),
}

impl ProviderError {
    /// Returns the HTTP status if this is an HTTP error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            ProviderError::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// Returns true for 404s and explicit not-found errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_)) || self.status() == Some(StatusCode::NOT_FOUND)
    }
}
