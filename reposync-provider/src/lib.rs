//! Git hosting provider clients for reposync.
//!
//! [`RepositoryProvider`] is the one interface the sync engine talks to;
//! [`GitHubProvider`], [`GitLabProvider`] and [`BitbucketProvider`] map it
//! onto each service's REST API. Use [`create_provider`] to build the right
//! client from a [`ProviderConfig`].

pub mod archive;
pub mod bitbucket;
pub mod config;
pub mod error;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod provider;
mod visibility;

pub use archive::extract_zip;
pub use bitbucket::BitbucketProvider;
pub use config::{ProviderConfig, ProviderKind};
pub use error::{ProviderError, ProviderResult};
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use http::{ApiBody, ApiResponse};
pub use provider::{ArchiveFile, CommitBatch, CommitResult, FileChange, RepositoryProvider};
pub use visibility::VISIBILITY_TTL;

use std::sync::Arc;
use tracing::info;

/// Builds the client for `config.kind`.
pub fn create_provider(config: ProviderConfig) -> ProviderResult<Arc<dyn RepositoryProvider>> {
    info!(
        "Creating {} provider for {}@{}",
        config.kind, config.repository, config.branch
    );
    let provider: Arc<dyn RepositoryProvider> = match config.kind {
        ProviderKind::GitHub => Arc::new(GitHubProvider::new(config)?),
        ProviderKind::GitLab => Arc::new(GitLabProvider::new(config)?),
        ProviderKind::Bitbucket => Arc::new(BitbucketProvider::new(config)?),
    };
    Ok(provider)
}

/// Lists branches with unsaved settings, to validate them before use.
///
/// `api_base_url` overrides the hosted endpoint (self-managed GitLab, tests).
pub async fn fetch_branches(
    kind: ProviderKind,
    api_base_url: Option<&str>,
    token: &str,
    repository: &str,
) -> ProviderResult<Vec<String>> {
    // Any non-empty branch passes validation; listing does not use it.
    let mut config = ProviderConfig::new(kind, repository, token, "main");
    config.api_base_url = api_base_url.map(str::to_string);
    create_provider(config)?.list_branches().await
}
