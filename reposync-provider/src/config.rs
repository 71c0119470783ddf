//! Provider configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

/// Supported Git hosting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
    Bitbucket,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::Bitbucket => "bitbucket",
        }
    }

    /// Public REST endpoint of the hosted service.
    pub fn default_api_base_url(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "https://api.github.com",
            ProviderKind::GitLab => "https://gitlab.com/api/v4",
            ProviderKind::Bitbucket => "https://api.bitbucket.org/2.0",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> ProviderResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            "bitbucket" => Ok(ProviderKind::Bitbucket),
            other => Err(ProviderError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Connection settings for one repository branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// REST base URL. Defaults to the hosted service for `kind`.
    pub api_base_url: Option<String>,
    /// `owner/name` (GitHub), `group/project` (GitLab) or `workspace/slug` (Bitbucket).
    pub repository: String,
    /// Personal access token or app password.
    pub token: String,
    /// Account name for Bitbucket app passwords. Bearer auth when absent.
    pub username: Option<String>,
    pub branch: String,
    /// When false, private repositories are rejected.
    pub allow_private_repos: bool,
    /// Web host serving Bitbucket archives (e.g. `https://bitbucket.org`).
    pub archive_base_url: Option<String>,
    /// Timeout for ordinary API calls, in seconds.
    pub timeout_secs: u64,
    /// Timeout for archive downloads, in seconds.
    pub archive_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::GitHub,
            api_base_url: None,
            repository: String::new(),
            token: String::new(),
            username: None,
            branch: "main".to_string(),
            allow_private_repos: true,
            archive_base_url: None,
            timeout_secs: 30,
            archive_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn new(
        kind: ProviderKind,
        repository: impl Into<String>,
        token: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            repository: repository.into(),
            token: token.into(),
            branch: branch.into(),
            ..Self::default()
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_archive_base_url(mut self, url: impl Into<String>) -> Self {
        self.archive_base_url = Some(url.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Effective REST base URL, without a trailing slash.
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .as_deref()
            .unwrap_or(self.kind.default_api_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Effective Bitbucket archive host, without a trailing slash.
    pub fn archive_base_url(&self) -> String {
        self.archive_base_url
            .as_deref()
            .unwrap_or("https://bitbucket.org")
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }

    /// Checks that the settings can address a repository at all.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.token.trim().is_empty() {
            return Err(ProviderError::Configuration("token is required".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(ProviderError::Configuration("branch is required".into()));
        }
        let repo = self.repository.trim();
        if repo.is_empty() {
            return Err(ProviderError::Configuration("repository is required".into()));
        }
        let needs_owner = matches!(self.kind, ProviderKind::GitHub | ProviderKind::Bitbucket);
        if needs_owner {
            let parts: Vec<&str> = repo.split('/').collect();
            if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
                return Err(ProviderError::Configuration(format!(
                    "repository must be owner/name for {}, got {repo:?}",
                    self.kind
                )));
            }
        }
        if self.timeout_secs == 0 || self.archive_timeout_secs == 0 {
            return Err(ProviderError::Configuration("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}
