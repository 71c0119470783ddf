//! Durable local state for reposync.
//!
//! The [`StateStore`] mirrors the last known remote tree and records local
//! changes that have not been pushed yet. It persists four logical
//! structures in one SQLite database:
//!
//! - `files`: path → {hash, updated_at, status}
//! - `blobs`: file content keyed by a path-derived key
//! - `commit_log`: ordered, append-only [`CommitLogEntry`] records
//! - `settings`: the latest-commit-hash pointer
//!
//! Every mutation runs inside a lease held in the `locks` table, so several
//! processes sharing one database file serialize their read-modify-write
//! sequences. Reads never take the lease.
//!
//! [`CommitLogEntry`]: reposync_types::CommitLogEntry

mod error;
mod lock;
mod store;

pub use error::{StateError, StateResult};
pub use lock::{LockConfig, StateLock};
pub use store::{FileMeta, FileSyncState, StateStore};
