use chrono::{DateTime, Utc};
use reposync_types::{CommitAuthor, CommitId, CommitLogEntry, ContentHash, RepoPath};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::lock::{LockConfig, StateLock};

const LATEST_COMMIT_KEY: &str = "latest_commit_hash";

/// Whether a tracked file matches what the remote last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSyncState {
    /// Content equals the remote as last observed.
    Synced,
    /// Saved locally and not pushed yet.
    Pending,
}

impl FileSyncState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
        }
    }

    fn parse(s: &str) -> StateResult<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            other => Err(StateError::InvalidData(format!("unknown file status {other:?}"))),
        }
    }
}

/// Snapshot metadata for one tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub hash: ContentHash,
    pub updated_at: DateTime<Utc>,
    pub status: FileSyncState,
}

/// Persistent sync state backed by SQLite.
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
    lock_config: LockConfig,
    author: CommitAuthor,
}

impl StateStore {
    /// Opens (or creates) a state store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StateResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            lock_config: LockConfig::default(),
            author: CommitAuthor::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Overrides lease timing.
    pub fn with_lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Sets the author recorded on locally created commits.
    pub fn with_author(mut self, author: CommitAuthor) -> Self {
        self.author = author;
        self
    }

    pub fn author(&self) -> &CommitAuthor {
        &self.author
    }

    fn init_schema(&self) -> StateResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                content BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS commit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                author_name TEXT NOT NULL,
                author_email TEXT NOT NULL,
                message TEXT NOT NULL,
                changes TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locks (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> StateResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::Poisoned)
    }

    /// Acquires the store lease explicitly, for callers that need to hold it
    /// across several reads.
    pub fn lock(&self) -> StateResult<StateLock> {
        StateLock::acquire(self.conn.clone(), &self.lock_config)
    }

    /// Runs `f` in one transaction while holding the lease.
    fn with_lock<T>(&self, f: impl FnOnce(&Connection) -> StateResult<T>) -> StateResult<T> {
        let _lease = self.lock()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ── Files ────────────────────────────────────────────────────

    /// Stores `content` at `path` as a pending local change and returns its hash.
    pub fn save_file(&self, path: &RepoPath, content: &[u8]) -> StateResult<ContentHash> {
        let hash = self.with_lock(|conn| write_file(conn, path, content, FileSyncState::Pending))?;
        debug!("Saved {} ({})", path, hash);
        Ok(hash)
    }

    /// Returns the stored content of `path`.
    pub fn get_file(&self, path: &RepoPath) -> StateResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let content = conn
            .query_row(
                "SELECT content FROM blobs WHERE key = ?1",
                params![blob_key(path)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    /// Removes `path` and records the deletion in the commit log.
    ///
    /// Returns false (and records nothing) if the path was not tracked.
    pub fn delete_file(&self, path: &RepoPath) -> StateResult<bool> {
        let author = self.author.clone();
        let deleted = self.with_lock(|conn| {
            if !remove_file(conn, path)? {
                return Ok(false);
            }
            let mut changes = BTreeMap::new();
            changes.insert(path.clone(), None);
            let entry = CommitLogEntry::new_local(author, format!("Delete {path}"), changes);
            append_entry(conn, &entry)?;
            set_setting(conn, LATEST_COMMIT_KEY, entry.id.as_str())?;
            Ok(true)
        })?;
        if deleted {
            info!("Deleted {}", path);
        }
        Ok(deleted)
    }

    /// Lists every tracked path with its metadata.
    pub fn list_files(&self) -> StateResult<BTreeMap<RepoPath, FileMeta>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT path, hash, updated_at, status FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut files = BTreeMap::new();
        for row in rows {
            let (path, hash, updated_at, status) = row?;
            files.insert(
                RepoPath::new(path)?,
                FileMeta {
                    hash: ContentHash::parse(&hash)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    status: FileSyncState::parse(&status)?,
                },
            );
        }
        Ok(files)
    }

    /// Path → hash view of [`list_files`](Self::list_files).
    pub fn file_hashes(&self) -> StateResult<BTreeMap<RepoPath, ContentHash>> {
        Ok(self
            .list_files()?
            .into_iter()
            .map(|(path, meta)| (path, meta.hash))
            .collect())
    }

    /// Marks paths as matching the remote after a successful push.
    pub fn mark_synced(&self, paths: &[RepoPath]) -> StateResult<()> {
        self.with_lock(|conn| {
            for path in paths {
                conn.execute(
                    "UPDATE files SET status = ?1 WHERE path = ?2",
                    params![FileSyncState::Synced.as_str(), path.as_str()],
                )?;
            }
            Ok(())
        })
    }

    /// Replaces the whole snapshot with `files`, all marked synced.
    ///
    /// Used on repository initialization; the commit log is left untouched.
    pub fn replace_snapshot(&self, files: &BTreeMap<RepoPath, Vec<u8>>) -> StateResult<()> {
        self.with_lock(|conn| {
            conn.execute("DELETE FROM files", [])?;
            conn.execute("DELETE FROM blobs", [])?;
            for (path, content) in files {
                write_file(conn, path, content, FileSyncState::Synced)?;
            }
            Ok(())
        })?;
        info!("Replaced state snapshot with {} files", files.len());
        Ok(())
    }

    /// Applies pulled changes in one transaction: writes (`Some`) and
    /// removals (`None`) land as synced, `commits` are appended to the log and
    /// the latest pointer becomes `latest`.
    pub fn apply_remote_changes(
        &self,
        changes: &BTreeMap<RepoPath, Option<Vec<u8>>>,
        commits: &[CommitLogEntry],
        latest: &CommitId,
    ) -> StateResult<()> {
        self.with_lock(|conn| {
            for (path, content) in changes {
                match content {
                    Some(content) => {
                        write_file(conn, path, content, FileSyncState::Synced)?;
                    }
                    None => {
                        remove_file(conn, path)?;
                    }
                }
            }
            for entry in commits {
                insert_entry_if_absent(conn, entry)?;
            }
            set_setting(conn, LATEST_COMMIT_KEY, latest.as_str())
        })?;
        info!(
            "Applied {} remote file changes from {} commits",
            changes.len(),
            commits.len()
        );
        Ok(())
    }

    // ── Commit log ───────────────────────────────────────────────

    /// Returns the commit log in insertion order.
    pub fn get_commit_log(&self) -> StateResult<Vec<CommitLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, author_name, author_email, message, changes
             FROM commit_log ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, timestamp, name, email, message, changes) = row?;
            entries.push(CommitLogEntry {
                id: CommitId::new(id),
                timestamp: parse_timestamp(&timestamp)?,
                author: CommitAuthor { name, email },
                message,
                changes: serde_json::from_str(&changes)?,
            });
        }
        Ok(entries)
    }

    /// Appends a local commit and moves the latest pointer to it.
    pub fn create_commit(
        &self,
        message: &str,
        changes: BTreeMap<RepoPath, Option<ContentHash>>,
    ) -> StateResult<CommitId> {
        if changes.is_empty() {
            return Err(StateError::EmptyCommit);
        }
        let entry = CommitLogEntry::new_local(self.author.clone(), message, changes);
        self.with_lock(|conn| {
            append_entry(conn, &entry)?;
            set_setting(conn, LATEST_COMMIT_KEY, entry.id.as_str())
        })?;
        info!("Created local commit {} ({} changes)", entry.id, entry.changes.len());
        Ok(entry.id)
    }

    /// Saves `files` as pending and logs them as one local commit, in a
    /// single transaction. Either every file and the log entry land, or
    /// nothing does.
    pub fn stage_files(
        &self,
        message: &str,
        files: &BTreeMap<RepoPath, Vec<u8>>,
    ) -> StateResult<CommitId> {
        if files.is_empty() {
            return Err(StateError::EmptyCommit);
        }
        let author = self.author.clone();
        let id = self.with_lock(|conn| {
            let mut changes = BTreeMap::new();
            for (path, content) in files {
                let hash = write_file(conn, path, content, FileSyncState::Pending)?;
                changes.insert(path.clone(), Some(hash));
            }
            let entry = CommitLogEntry::new_local(author, message, changes);
            append_entry(conn, &entry)?;
            set_setting(conn, LATEST_COMMIT_KEY, entry.id.as_str())?;
            Ok(entry.id)
        })?;
        info!("Staged {} files as local commit {}", files.len(), id);
        Ok(id)
    }

    /// Appends commits that originated remotely. With `overwrite` the existing
    /// log is discarded first. Entries whose id is already logged are skipped.
    pub fn import_commits(&self, commits: &[CommitLogEntry], overwrite: bool) -> StateResult<()> {
        self.with_lock(|conn| {
            if overwrite {
                conn.execute("DELETE FROM commit_log", [])?;
            }
            for entry in commits {
                insert_entry_if_absent(conn, entry)?;
            }
            Ok(())
        })?;
        debug!("Imported {} commits (overwrite: {})", commits.len(), overwrite);
        Ok(())
    }

    /// Rewrites a local commit id to the id the provider assigned.
    pub fn update_commit_id(&self, old: &CommitId, new: &CommitId) -> StateResult<()> {
        self.with_lock(|conn| {
            let last: Option<String> = conn
                .query_row(
                    "SELECT id FROM commit_log ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let changed = conn.execute(
                "UPDATE commit_log SET id = ?1 WHERE id = ?2",
                params![new.as_str(), old.as_str()],
            )?;
            if changed == 0 {
                return Err(StateError::UnknownCommit(old.to_string()));
            }

            let pointer = get_setting(conn, LATEST_COMMIT_KEY)?;
            if last.as_deref() == Some(old.as_str()) || pointer.as_deref() == Some(old.as_str()) {
                set_setting(conn, LATEST_COMMIT_KEY, new.as_str())?;
            }
            Ok(())
        })?;
        debug!("Commit {} is now {}", old, new);
        Ok(())
    }

    /// Drops a local commit that turned out to change nothing remotely.
    /// A latest pointer naming it moves to `replacement`.
    pub fn discard_commit(&self, id: &CommitId, replacement: &CommitId) -> StateResult<()> {
        self.with_lock(|conn| {
            let removed = conn.execute("DELETE FROM commit_log WHERE id = ?1", params![id.as_str()])?;
            if removed == 0 {
                return Err(StateError::UnknownCommit(id.to_string()));
            }
            if get_setting(conn, LATEST_COMMIT_KEY)?.as_deref() == Some(id.as_str()) {
                set_setting(conn, LATEST_COMMIT_KEY, replacement.as_str())?;
            }
            Ok(())
        })?;
        debug!("Discarded no-op commit {}", id);
        Ok(())
    }

    pub fn get_latest_commit_hash(&self) -> StateResult<Option<CommitId>> {
        let conn = self.conn()?;
        Ok(get_setting(&conn, LATEST_COMMIT_KEY)?.map(CommitId::new))
    }

    pub fn save_latest_commit_hash(&self, id: &CommitId) -> StateResult<()> {
        self.with_lock(|conn| set_setting(conn, LATEST_COMMIT_KEY, id.as_str()))
    }
}

// ── Row helpers (caller holds the lease) ─────────────────────────

/// Key of a path's row in the blob table.
fn blob_key(path: &RepoPath) -> String {
    hex::encode(Sha256::digest(path.as_str().as_bytes()))
}

fn write_file(
    conn: &Connection,
    path: &RepoPath,
    content: &[u8],
    status: FileSyncState,
) -> StateResult<ContentHash> {
    let hash = ContentHash::of(content);
    conn.execute(
        "INSERT OR REPLACE INTO files (path, hash, updated_at, status) VALUES (?1, ?2, ?3, ?4)",
        params![
            path.as_str(),
            hash.as_str(),
            Utc::now().to_rfc3339(),
            status.as_str()
        ],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO blobs (key, path, content) VALUES (?1, ?2, ?3)",
        params![blob_key(path), path.as_str(), content],
    )?;
    Ok(hash)
}

fn remove_file(conn: &Connection, path: &RepoPath) -> StateResult<bool> {
    let removed = conn.execute("DELETE FROM files WHERE path = ?1", params![path.as_str()])?;
    conn.execute("DELETE FROM blobs WHERE key = ?1", params![blob_key(path)])?;
    Ok(removed > 0)
}

fn append_entry(conn: &Connection, entry: &CommitLogEntry) -> StateResult<()> {
    conn.execute(
        "INSERT INTO commit_log (id, timestamp, author_name, author_email, message, changes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id.as_str(),
            entry.timestamp.to_rfc3339(),
            entry.author.name,
            entry.author.email,
            entry.message,
            serde_json::to_string(&entry.changes)?,
        ],
    )?;
    Ok(())
}

fn insert_entry_if_absent(conn: &Connection, entry: &CommitLogEntry) -> StateResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM commit_log WHERE id = ?1)",
        params![entry.id.as_str()],
        |row| row.get(0),
    )?;
    if !exists {
        append_entry(conn, entry)?;
    }
    Ok(())
}

fn get_setting(conn: &Connection, key: &str) -> StateResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn set_setting(conn: &Connection, key: &str, value: &str) -> StateResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn parse_timestamp(s: &str) -> StateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateError::InvalidData(format!("bad timestamp {s:?}: {e}")))
}
