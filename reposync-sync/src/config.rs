//! Sync configuration.

use reposync_model::TableSpec;
use reposync_provider::ProviderConfig;
use reposync_types::{CommitAuthor, EntityKey, RepoPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};

/// Everything needed to sync one CMS with one repository branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub provider: ProviderConfig,
    /// Entity types synced as documents (e.g. `post`, `page`).
    pub entity_types: Vec<String>,
    /// Relational tables synced row by row.
    pub tables: Vec<TableSpec>,
    /// Author recorded on locally created commits.
    pub author: CommitAuthor,
    /// SQLite database holding the local snapshot and commit log.
    pub state_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            entity_types: Vec::new(),
            tables: Vec::new(),
            author: CommitAuthor::default(),
            state_path: PathBuf::from("reposync.db"),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> SyncResult<()> {
        self.provider
            .validate()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;

        if self.entity_types.is_empty() && self.tables.is_empty() {
            return Err(SyncError::Configuration(
                "at least one entity type or table must be synced".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for entity_type in self.synced_types() {
            EntityKey::new(entity_type.as_str(), "sample")
                .map_err(|e| SyncError::Configuration(e.to_string()))?;
            if !seen.insert(entity_type.clone()) {
                return Err(SyncError::Configuration(format!(
                    "entity type {entity_type:?} configured twice"
                )));
            }
        }

        for table in &self.tables {
            if table.key_columns.is_empty() {
                return Err(SyncError::Configuration(format!(
                    "table {} has no key columns",
                    table.entity_type()
                )));
            }
        }

        if self.author.name.trim().is_empty() || self.author.email.trim().is_empty() {
            return Err(SyncError::Configuration("commit author is incomplete".into()));
        }
        Ok(())
    }

    /// Entity types and table row types, in configuration order.
    pub fn synced_types(&self) -> Vec<String> {
        self.entity_types
            .iter()
            .cloned()
            .chain(self.tables.iter().map(TableSpec::entity_type))
            .collect()
    }

    /// Whether `path` lies under one of the synced type directories.
    pub fn is_synced_path(&self, path: &RepoPath) -> bool {
        self.synced_types().iter().any(|t| path.is_under_type(t))
    }
}
