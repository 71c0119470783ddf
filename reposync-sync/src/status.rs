//! Commit-history status classification.

use reposync_types::{CommitId, CommitLogEntry, RemoteCommit, RepoStatus};
use tracing::error;

/// Classifies how the local history relates to the remote one.
///
/// `local` and `remote` are the latest commit on each side. The histories
/// are only consulted when both exist and differ.
pub fn sync_status(
    local: Option<&CommitId>,
    remote: Option<&CommitId>,
    local_log: &[CommitLogEntry],
    remote_commits: &[RemoteCommit],
) -> RepoStatus {
    let Some(local) = local else {
        return RepoStatus::LocalEmpty;
    };
    let Some(remote) = remote else {
        return RepoStatus::RemoteEmpty;
    };
    if local == remote {
        return RepoStatus::Synced;
    }

    if !remote_commits.iter().any(|c| &c.id == remote) {
        error!(
            "Remote head {} is missing from the {} commits the provider listed",
            remote,
            remote_commits.len()
        );
        return RepoStatus::Error;
    }

    let local_known_remotely = remote_commits.iter().any(|c| &c.id == local);
    let remote_known_locally = local_log.iter().any(|e| &e.id == remote);
    match (local_known_remotely, remote_known_locally) {
        (true, true) => RepoStatus::Conflict,
        (true, false) => RepoStatus::NeedPull,
        (false, true) => RepoStatus::NeedPush,
        (false, false) => RepoStatus::Conflict,
    }
}
