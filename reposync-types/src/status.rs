//! Sync status classifications.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relationship between the local and remote copy of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Both sides present with equal hashes.
    Identical,
    /// Present remotely only.
    NotLocal,
    /// Present locally only.
    NotRemote,
    /// Present on both sides with different hashes.
    Different,
}

impl FileStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identical => "identical",
            Self::NotLocal => "notlocal",
            Self::NotRemote => "notremote",
            Self::Different => "different",
        }
    }

    /// Returns true unless the two sides already agree.
    #[must_use]
    pub const fn needs_sync(&self) -> bool {
        !matches!(self, Self::Identical)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship between the local and remote commit histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    /// No local history yet; only a pull (initialization) makes sense.
    LocalEmpty,
    /// Remote branch has no commits; only a push makes sense.
    RemoteEmpty,
    Synced,
    NeedPush,
    NeedPull,
    /// Both histories advanced independently, or are unrelated.
    Conflict,
    /// The provider reported an inconsistent history.
    Error,
}

impl RepoStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LocalEmpty => "localempty",
            Self::RemoteEmpty => "remoteempty",
            Self::Synced => "synced",
            Self::NeedPush => "needpush",
            Self::NeedPull => "needpull",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
