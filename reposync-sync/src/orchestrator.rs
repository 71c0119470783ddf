//! Push/pull orchestration.
//!
//! The orchestrator owns no state of its own: the [`StateStore`] holds the
//! snapshot and commit log, the provider holds the remote, the
//! [`EntitySource`] holds the CMS. Every operation reads fresh from all three.

use reposync_model::{EntityCodec, EntitySource};
use reposync_provider::{CommitBatch, RepositoryProvider, create_provider};
use reposync_state::StateStore;
use reposync_types::{
    CommitId, CommitLogEntry, ContentHash, EntityKey, FileStatus, RemoteCommit, RepoPath,
    RepoStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{LocalTree, SkippedEntity, build_local_tree, diff_tree, restrict_to_types};
use crate::status::sync_status;

/// Result of [`SyncOrchestrator::stage_local_changes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// Commit recording the saved files, if anything was saved.
    pub commit: Option<CommitId>,
    pub saved: Vec<RepoPath>,
    pub deleted: Vec<RepoPath>,
    pub skipped: Vec<SkippedEntity>,
}

impl StageReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.deleted.is_empty()
    }
}

/// Result of [`SyncOrchestrator::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// Remote ids of the commits published, in order.
    pub commits: Vec<CommitId>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Local entries that turned out to change nothing remotely.
    pub discarded: usize,
}

/// Result of [`SyncOrchestrator::pull`] and [`SyncOrchestrator::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    /// True when the snapshot was rebuilt from an archive.
    pub initialized: bool,
    /// Number of remote commits applied.
    pub commits: usize,
    pub written: Vec<RepoPath>,
    pub deleted: Vec<RepoPath>,
    /// The remote head the local pointer now names.
    pub head: Option<CommitId>,
}

impl PullReport {
    /// Paths whose content changed, for [`SyncOrchestrator::materialize`].
    pub fn changed_paths(&self) -> Vec<RepoPath> {
        self.written.iter().chain(&self.deleted).cloned().collect()
    }
}

/// Result of [`SyncOrchestrator::materialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub imported: Vec<EntityKey>,
    pub removed: Vec<EntityKey>,
    pub skipped: Vec<SkippedEntity>,
}

/// Drives sync between one CMS and one repository branch.
pub struct SyncOrchestrator {
    config: SyncConfig,
    provider: Arc<dyn RepositoryProvider>,
    state: Arc<StateStore>,
    source: Arc<dyn EntitySource>,
    codec: EntityCodec,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        provider: Arc<dyn RepositoryProvider>,
        state: Arc<StateStore>,
        source: Arc<dyn EntitySource>,
        codec: EntityCodec,
    ) -> Self {
        Self {
            config,
            provider,
            state,
            source,
            codec,
        }
    }

    /// Validates `config`, opens its state database and builds its provider.
    pub fn from_config(
        config: SyncConfig,
        source: Arc<dyn EntitySource>,
        codec: EntityCodec,
    ) -> SyncResult<Self> {
        config.validate()?;
        let provider = create_provider(config.provider.clone())?;
        let state = StateStore::open(&config.state_path)?.with_author(config.author.clone());
        Ok(Self::new(config, provider, Arc::new(state), source, codec))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn provider(&self) -> &dyn RepositoryProvider {
        self.provider.as_ref()
    }

    fn synced_types(&self) -> Vec<String> {
        self.config.synced_types()
    }

    fn local_tree(&self) -> SyncResult<LocalTree> {
        build_local_tree(
            self.source.as_ref(),
            &self.codec,
            &self.config.entity_types,
            &self.config.tables,
        )
    }

    /// Fetches the remote history only when it can change the answer.
    async fn remote_history(
        &self,
        local: Option<&CommitId>,
        remote: Option<&CommitId>,
    ) -> SyncResult<Vec<RemoteCommit>> {
        match (local, remote) {
            (Some(l), Some(r)) if l != r => Ok(self.provider.get_repository_commits().await?),
            _ => Ok(Vec::new()),
        }
    }

    // ── Status ───────────────────────────────────────────────────

    /// Relationship between the local commit log and the remote branch.
    pub async fn status(&self) -> SyncResult<RepoStatus> {
        let local = self.state.get_latest_commit_hash()?;
        let remote = self.provider.get_latest_commit_hash().await?;
        let history = self.remote_history(local.as_ref(), remote.as_ref()).await?;
        let log = self.state.get_commit_log()?;
        let status = sync_status(local.as_ref(), remote.as_ref(), &log, &history);
        debug!("Repository status: {}", status);
        Ok(status)
    }

    /// Per-file comparison of the CMS against the live remote tree.
    pub async fn diff_remote(&self) -> SyncResult<BTreeMap<RepoPath, FileStatus>> {
        let local = self.local_tree()?;
        let remote = self.provider.get_remote_hashes().await?;
        let remote = restrict_to_types(&remote, &self.synced_types());
        Ok(diff_tree(&local.hashes(), &remote))
    }

    /// Per-file comparison of the CMS against the local snapshot.
    pub fn diff_snapshot(&self) -> SyncResult<BTreeMap<RepoPath, FileStatus>> {
        let local = self.local_tree()?;
        let snapshot = restrict_to_types(&self.state.file_hashes()?, &self.synced_types());
        Ok(diff_tree(&local.hashes(), &snapshot))
    }

    // ── Staging ──────────────────────────────────────────────────

    /// Records CMS edits in the state store.
    ///
    /// Changed and new files are saved and logged together in one commit,
    /// atomically; each removed file gets its own deletion entry.
    pub fn stage_local_changes(&self, message: &str) -> SyncResult<StageReport> {
        let tree = self.local_tree()?;
        let snapshot = restrict_to_types(&self.state.file_hashes()?, &self.synced_types());
        let diff = diff_tree(&tree.hashes(), &snapshot);

        let mut report = StageReport {
            skipped: tree.skipped.clone(),
            ..Default::default()
        };
        let mut staged = BTreeMap::new();
        for (path, status) in &diff {
            match status {
                FileStatus::Identical => {}
                FileStatus::NotRemote | FileStatus::Different => {
                    if let Some(file) = tree.files.get(path) {
                        staged.insert(path.clone(), file.content.clone());
                    }
                }
                FileStatus::NotLocal => {
                    if tree.skipped_paths().contains(path) {
                        debug!("Keeping {} whose entity failed to export", path);
                        continue;
                    }
                    if self.state.delete_file(path)? {
                        report.deleted.push(path.clone());
                    }
                }
            }
        }

        // Files and their log entry commit together.
        if !staged.is_empty() {
            report.commit = Some(self.state.stage_files(message, &staged)?);
            report.saved = staged.into_keys().collect();
        }
        info!(
            "Staged {} saves and {} deletions ({} skipped)",
            report.saved.len(),
            report.deleted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Publishes local commits the remote has not seen, one remote commit
    /// per log entry, oldest first.
    ///
    /// Stops at the first failure; already published entries keep their
    /// remote ids, so running again resumes where it stopped.
    pub async fn push(&self) -> SyncResult<PushReport> {
        let local = self.state.get_latest_commit_hash()?;
        let remote = self.provider.get_latest_commit_hash().await?;
        let history = self.remote_history(local.as_ref(), remote.as_ref()).await?;
        let log = self.state.get_commit_log()?;

        match sync_status(local.as_ref(), remote.as_ref(), &log, &history) {
            RepoStatus::NeedPush | RepoStatus::RemoteEmpty => {}
            RepoStatus::Synced | RepoStatus::LocalEmpty => {
                debug!("Nothing to push");
                return Ok(PushReport::default());
            }
            RepoStatus::NeedPull => {
                info!("Remote is ahead; pull before pushing");
                return Ok(PushReport::default());
            }
            RepoStatus::Conflict => return Err(diverged(local, remote)),
            RepoStatus::Error => return Err(inconsistent(remote)),
        }

        let pending = pending_entries(&log, remote.as_ref(), local.as_ref());
        info!("Pushing {} commits to {}", pending.len(), self.provider.branch());

        let mut report = PushReport::default();
        let mut head = remote;
        for entry in pending {
            let batch = self.batch_for(entry)?;
            let result = self.provider.commit(&batch).await?;

            if result.touched() == 0 {
                // Nothing changed remotely, so there is no remote id to adopt.
                self.state.discard_commit(&entry.id, &result.commit_id)?;
                report.discarded += 1;
            } else {
                self.state.update_commit_id(&entry.id, &result.commit_id)?;
                let written: Vec<RepoPath> = entry.writes().map(|(p, _)| p.clone()).collect();
                self.state.mark_synced(&written)?;
                report.created += result.created.len();
                report.updated += result.updated.len();
                report.deleted += result.deleted.len();
                report.commits.push(result.commit_id.clone());
            }
            head = Some(result.commit_id);
        }

        if let Some(head) = &head {
            if self.state.get_latest_commit_hash()?.as_ref() != Some(head) {
                self.state.save_latest_commit_hash(head)?;
            }
        }
        self.provider.invalidate_cache();
        info!(
            "Pushed {} commits ({} created, {} updated, {} deleted)",
            report.commits.len(),
            report.created,
            report.updated,
            report.deleted
        );
        Ok(report)
    }

    /// Turns a log entry into a commit batch using current stored content.
    fn batch_for(&self, entry: &CommitLogEntry) -> SyncResult<CommitBatch> {
        let mut batch = CommitBatch::new(entry.message.clone(), entry.author.clone());
        for (path, hash) in &entry.changes {
            match hash {
                Some(_) => match self.state.get_file(path)? {
                    Some(content) => batch = batch.write(path.clone(), content),
                    // Removed after this entry was logged.
                    None => batch = batch.delete(path.clone()),
                },
                None => batch = batch.delete(path.clone()),
            }
        }
        Ok(batch)
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Brings the state store up to the remote head.
    ///
    /// Without a local pointer this is [`initialize`](Self::initialize).
    /// Otherwise the commits after the local head are replayed: their files
    /// are fetched and applied in one transaction, later commits winning.
    /// The CMS is not touched; see [`materialize`](Self::materialize).
    pub async fn pull(&self) -> SyncResult<PullReport> {
        let local = self.state.get_latest_commit_hash()?;
        if local.is_none() {
            return self.initialize().await;
        }
        let remote = self.provider.get_latest_commit_hash().await?;
        let history = self.remote_history(local.as_ref(), remote.as_ref()).await?;
        let log = self.state.get_commit_log()?;

        match sync_status(local.as_ref(), remote.as_ref(), &log, &history) {
            RepoStatus::NeedPull => {}
            RepoStatus::Conflict => return Err(diverged(local, remote)),
            RepoStatus::Error => return Err(inconsistent(remote)),
            status => {
                debug!("Nothing to pull ({})", status);
                return Ok(PullReport {
                    head: local,
                    ..Default::default()
                });
            }
        }
        let (Some(local), Some(remote)) = (local, remote) else {
            return Ok(PullReport::default());
        };

        let start = history
            .iter()
            .position(|c| c.id == local)
            .map_or(0, |i| i + 1);
        let new_commits = &history[start..];
        info!("Pulling {} commits from {}", new_commits.len(), self.provider.branch());

        // Later commits overwrite earlier ones.
        let mut touched: BTreeMap<RepoPath, bool> = BTreeMap::new();
        let mut per_commit = Vec::with_capacity(new_commits.len());
        for commit in new_commits {
            let files = self.provider.get_commit_files(&commit.id).await?;
            for file in &files {
                touched.insert(file.path.clone(), file.deleted);
            }
            per_commit.push((commit, files));
        }

        let mut changes: BTreeMap<RepoPath, Option<Vec<u8>>> = BTreeMap::new();
        for (path, deleted) in &touched {
            let content = if *deleted {
                None
            } else {
                self.provider.get_file(path).await?
            };
            changes.insert(path.clone(), content);
        }

        let hashes: BTreeMap<&RepoPath, Option<ContentHash>> = changes
            .iter()
            .map(|(path, content)| (path, content.as_deref().map(ContentHash::of)))
            .collect();
        let entries: Vec<CommitLogEntry> = per_commit
            .into_iter()
            .map(|(commit, files)| {
                let commit_changes = files
                    .into_iter()
                    .map(|f| {
                        let hash = hashes.get(&f.path).cloned().flatten();
                        (f.path, hash)
                    })
                    .collect();
                CommitLogEntry::from_remote(commit, commit_changes)
            })
            .collect();

        self.state.apply_remote_changes(&changes, &entries, &remote)?;

        let mut report = PullReport {
            commits: entries.len(),
            head: Some(remote),
            ..Default::default()
        };
        for (path, content) in changes {
            match content {
                Some(_) => report.written.push(path),
                None => report.deleted.push(path),
            }
        }
        info!(
            "Pulled {} commits ({} written, {} deleted)",
            report.commits,
            report.written.len(),
            report.deleted.len()
        );
        Ok(report)
    }

    /// Rebuilds the snapshot and log from the remote branch, discarding
    /// local state. Also the way to resolve a conflict in favor of the remote.
    pub async fn initialize(&self) -> SyncResult<PullReport> {
        let Some(remote) = self.provider.get_latest_commit_hash().await? else {
            info!("Remote branch {} is empty; nothing to initialize", self.provider.branch());
            return Ok(PullReport {
                initialized: true,
                ..Default::default()
            });
        };

        let archive = self.provider.initialize_repository().await?;
        let history = self.provider.get_repository_commits().await?;

        let files: BTreeMap<RepoPath, Vec<u8>> = archive
            .into_iter()
            .map(|(path, file)| (path, file.content))
            .collect();
        let entries: Vec<CommitLogEntry> = history
            .iter()
            .map(|c| CommitLogEntry::from_remote(c, BTreeMap::new()))
            .collect();

        self.state.replace_snapshot(&files)?;
        self.state.import_commits(&entries, true)?;
        self.state.save_latest_commit_hash(&remote)?;

        info!(
            "Initialized from {} at {} ({} files, {} commits)",
            self.provider.branch(),
            remote,
            files.len(),
            entries.len()
        );
        Ok(PullReport {
            initialized: true,
            commits: entries.len(),
            written: files.into_keys().collect(),
            deleted: Vec::new(),
            head: Some(remote),
        })
    }

    // ── Materialize ──────────────────────────────────────────────

    /// Imports stored files into the CMS. Paths with no stored file delete
    /// their entity. Paths outside the synced types are ignored.
    pub fn materialize(&self, paths: &[RepoPath]) -> SyncResult<MaterializeReport> {
        let mut report = MaterializeReport::default();
        for path in paths {
            if !self.config.is_synced_path(path) {
                debug!("Not materializing {}", path);
                continue;
            }

            match self.state.get_file(path)? {
                Some(content) => {
                    let entity = match self.codec.import_file(path, &content) {
                        Ok(entity) => entity,
                        Err(e) => {
                            warn!("Skipping {}: {}", path, e);
                            report.skipped.push(SkippedEntity::new(path.to_string(), e));
                            continue;
                        }
                    };
                    let key = entity.key.clone();
                    match self.source.import_entity(entity) {
                        Ok(()) => report.imported.push(key),
                        Err(e) => {
                            warn!("Skipping {}: {}", key, e);
                            report.skipped.push(SkippedEntity::new(key.to_string(), e));
                        }
                    }
                }
                None => {
                    let key = match EntityKey::from_path(path) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!("Skipping {}: {}", path, e);
                            report.skipped.push(SkippedEntity::new(path.to_string(), e));
                            continue;
                        }
                    };
                    match self.source.delete_entity(&key.entity_type, &key.name) {
                        Ok(true) => report.removed.push(key),
                        Ok(false) => debug!("{} was already absent", key),
                        Err(e) => {
                            warn!("Skipping {}: {}", key, e);
                            report.skipped.push(SkippedEntity::new(key.to_string(), e));
                        }
                    }
                }
            }
        }
        info!(
            "Materialized {} entities, removed {} ({} skipped)",
            report.imported.len(),
            report.removed.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Log entries after `remote` (exclusive) through `local` (inclusive).
/// Everything up to `local` when the remote has no head.
fn pending_entries<'a>(
    log: &'a [CommitLogEntry],
    remote: Option<&CommitId>,
    local: Option<&CommitId>,
) -> &'a [CommitLogEntry] {
    let start = remote
        .and_then(|r| log.iter().position(|e| &e.id == r))
        .map_or(0, |i| i + 1);
    let end = local
        .and_then(|l| log.iter().position(|e| &e.id == l))
        .map_or(log.len(), |i| i + 1);
    if start >= end { &[] } else { &log[start..end] }
}

fn diverged(local: Option<CommitId>, remote: Option<CommitId>) -> SyncError {
    let unknown = || CommitId::new("none");
    SyncError::Diverged {
        local: local.unwrap_or_else(unknown),
        remote: remote.unwrap_or_else(unknown),
    }
}

fn inconsistent(remote: Option<CommitId>) -> SyncError {
    SyncError::InconsistentHistory {
        remote: remote.unwrap_or_else(|| CommitId::new("none")),
    }
}
