//! Tree comparison between the CMS and a repository snapshot.

use reposync_model::{Entity, EntityCodec, EntitySource, RepoFile, TableSpec};
use reposync_types::{ContentHash, FileStatus, RepoPath};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::SyncResult;

/// An entity left out of an operation, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntity {
    /// `type:name` of the entity, or the path when no key could be derived.
    pub entity: String,
    pub reason: String,
}

impl SkippedEntity {
    pub fn new(entity: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }
}

/// Classifies every path present on either side.
pub fn diff_tree(
    local: &BTreeMap<RepoPath, ContentHash>,
    remote: &BTreeMap<RepoPath, ContentHash>,
) -> BTreeMap<RepoPath, FileStatus> {
    let mut diff = BTreeMap::new();
    for (path, local_hash) in local {
        let status = match remote.get(path) {
            Some(remote_hash) if remote_hash == local_hash => FileStatus::Identical,
            Some(_) => FileStatus::Different,
            None => FileStatus::NotRemote,
        };
        diff.insert(path.clone(), status);
    }
    for path in remote.keys() {
        if !local.contains_key(path) {
            diff.insert(path.clone(), FileStatus::NotLocal);
        }
    }
    diff
}

const DUPLICATE_KEY: &str = "natural key is shared with another row";

/// The CMS rendered as repository files.
#[derive(Debug, Clone, Default)]
pub struct LocalTree {
    pub files: BTreeMap<RepoPath, RepoFile>,
    /// Entities that could not be exported. Their paths are absent from
    /// `files` but must not be treated as deleted.
    pub skipped: Vec<SkippedEntity>,
    skipped_paths: Vec<RepoPath>,
}

impl LocalTree {
    pub fn hashes(&self) -> BTreeMap<RepoPath, ContentHash> {
        self.files
            .iter()
            .map(|(path, file)| (path.clone(), file.hash.clone()))
            .collect()
    }

    /// Paths of entities that failed to export.
    pub fn skipped_paths(&self) -> &[RepoPath] {
        &self.skipped_paths
    }

    /// Records `entity` as skipped. `path` is where its file would live.
    fn skip(&mut self, entity: &Entity, path: RepoPath, reason: impl ToString) {
        let reason = reason.to_string();
        warn!("Skipping {}: {}", entity.key, reason);
        self.skipped.push(SkippedEntity::new(entity.key.to_string(), reason));
        self.skipped_paths.push(path);
    }
}

/// Exports every configured entity type and table through `codec`.
///
/// Listing failures abort; a single entity that fails to export is skipped
/// and reported.
pub fn build_local_tree(
    source: &dyn EntitySource,
    codec: &EntityCodec,
    entity_types: &[String],
    tables: &[TableSpec],
) -> SyncResult<LocalTree> {
    let mut tree = LocalTree::default();

    for entity_type in entity_types {
        for entity in source.list_entities(entity_type)? {
            match codec.export_entity(&entity) {
                Ok(file) => {
                    tree.files.insert(file.path.clone(), file);
                }
                Err(e) => tree.skip(&entity, entity.key.path(), e),
            }
        }
    }

    for table in tables {
        // Host entity behind each exported row path.
        let mut owners: BTreeMap<RepoPath, Entity> = BTreeMap::new();
        let mut collided: BTreeSet<RepoPath> = BTreeSet::new();
        for entity in source.list_entities(&table.entity_type())? {
            let Some(row) = table.row_of(&entity) else {
                tree.skip(&entity, entity.key.path(), "table entity carries no row");
                continue;
            };
            // Rows are re-keyed by their natural key whatever the host named them.
            let keyed = match table.row_entity(row.clone()) {
                Ok(keyed) => keyed,
                Err(e) => {
                    tree.skip(&entity, entity.key.path(), e);
                    continue;
                }
            };
            let path = keyed.key.path();

            // Rows sharing a natural key would overwrite each other; keep neither.
            if collided.contains(&path) {
                tree.skip(&entity, path, DUPLICATE_KEY);
                continue;
            }
            if let Some(first) = owners.remove(&path) {
                tree.files.remove(&path);
                collided.insert(path.clone());
                tree.skip(&first, path.clone(), DUPLICATE_KEY);
                tree.skip(&entity, path, DUPLICATE_KEY);
                continue;
            }

            match codec.export_entity(&keyed) {
                Ok(file) => {
                    owners.insert(path, entity);
                    tree.files.insert(file.path.clone(), file);
                }
                Err(e) => tree.skip(&entity, path, e),
            }
        }
    }

    debug!(
        "Built local tree: {} files, {} skipped",
        tree.files.len(),
        tree.skipped.len()
    );
    Ok(tree)
}

/// Keeps only the entries under one of `entity_types`.
pub fn restrict_to_types<V: Clone>(
    tree: &BTreeMap<RepoPath, V>,
    entity_types: &[String],
) -> BTreeMap<RepoPath, V> {
    tree.iter()
        .filter(|(path, _)| entity_types.iter().any(|t| path.is_under_type(t)))
        .map(|(path, value)| (path.clone(), value.clone()))
        .collect()
}

/// Which side a plan brings up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Make the remote match the CMS.
    Push,
    /// Make the CMS match the remote.
    Pull,
}

/// One step of a sync plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "path", rename_all = "snake_case")]
pub enum SyncAction {
    Upload(RepoPath),
    DeleteRemote(RepoPath),
    Import(RepoPath),
    DeleteLocal(RepoPath),
}

impl SyncAction {
    pub fn path(&self) -> &RepoPath {
        match self {
            SyncAction::Upload(p)
            | SyncAction::DeleteRemote(p)
            | SyncAction::Import(p)
            | SyncAction::DeleteLocal(p) => p,
        }
    }
}

/// Turns a diff into the actions that reconcile it in `direction`.
pub fn plan_actions(
    diff: &BTreeMap<RepoPath, FileStatus>,
    direction: SyncDirection,
) -> Vec<SyncAction> {
    diff.iter()
        .filter_map(|(path, status)| {
            let path = path.clone();
            match (direction, status) {
                (_, FileStatus::Identical) => None,
                (SyncDirection::Push, FileStatus::NotRemote | FileStatus::Different) => {
                    Some(SyncAction::Upload(path))
                }
                (SyncDirection::Push, FileStatus::NotLocal) => Some(SyncAction::DeleteRemote(path)),
                (SyncDirection::Pull, FileStatus::NotLocal | FileStatus::Different) => {
                    Some(SyncAction::Import(path))
                }
                (SyncDirection::Pull, FileStatus::NotRemote) => Some(SyncAction::DeleteLocal(path)),
            }
        })
        .collect()
}
