use pretty_assertions::assert_eq;
use reposync_state::{FileSyncState, StateError, StateStore};
use reposync_types::{CommitAuthor, CommitId, CommitLogEntry, ContentHash, RepoPath};
use std::collections::BTreeMap;

fn path(s: &str) -> RepoPath {
    RepoPath::new(s).unwrap()
}

fn store() -> StateStore {
    StateStore::open_in_memory().unwrap()
}

fn remote_entry(id: &str, file: &str) -> CommitLogEntry {
    let mut changes = BTreeMap::new();
    changes.insert(path(file), Some(ContentHash::of(id.as_bytes())));
    CommitLogEntry {
        id: CommitId::new(id),
        timestamp: chrono::Utc::now(),
        author: CommitAuthor::new("Remote", "remote@example.com"),
        message: format!("remote {id}"),
        changes,
    }
}

// ── Files ────────────────────────────────────────────────────────

#[test]
fn save_then_get_returns_content() {
    let store = store();
    let p = path("_page/about");

    let hash = store.save_file(&p, b"{\"title\":\"About\"}\n").unwrap();
    assert_eq!(hash, ContentHash::of(b"{\"title\":\"About\"}\n"));
    assert_eq!(store.get_file(&p).unwrap().unwrap(), b"{\"title\":\"About\"}\n");

    let files = store.list_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[&p].hash, hash);
    assert_eq!(files[&p].status, FileSyncState::Pending);
}

#[test]
fn get_missing_file_is_none() {
    assert!(store().get_file(&path("_page/nope")).unwrap().is_none());
}

#[test]
fn save_overwrites_previous_content() {
    let store = store();
    let p = path("_page/a");
    store.save_file(&p, b"v1").unwrap();
    let h2 = store.save_file(&p, b"v2").unwrap();

    assert_eq!(store.get_file(&p).unwrap().unwrap(), b"v2");
    assert_eq!(store.file_hashes().unwrap()[&p], h2);
}

#[test]
fn binary_content_is_preserved() {
    let store = store();
    let p = path("_attachment/logo.png");
    let bytes: Vec<u8> = (0..=255).collect();
    store.save_file(&p, &bytes).unwrap();
    assert_eq!(store.get_file(&p).unwrap().unwrap(), bytes);
}

#[test]
fn delete_existing_file_logs_one_deletion() {
    let store = store();
    let p = path("_page/old");
    store.save_file(&p, b"x").unwrap();

    assert!(store.delete_file(&p).unwrap());
    assert!(store.get_file(&p).unwrap().is_none());
    assert!(!store.list_files().unwrap().contains_key(&p));

    let log = store.get_commit_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].changes.len(), 1);
    assert_eq!(log[0].changes[&p], None);
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(log[0].id.clone()));
}

#[test]
fn delete_missing_file_records_nothing() {
    let store = store();
    assert!(!store.delete_file(&path("_page/ghost")).unwrap());
    assert!(store.get_commit_log().unwrap().is_empty());
}

#[test]
fn mark_synced_updates_status() {
    let store = store();
    let p = path("_page/a");
    store.save_file(&p, b"x").unwrap();
    store.mark_synced(&[p.clone()]).unwrap();
    assert_eq!(store.list_files().unwrap()[&p].status, FileSyncState::Synced);
}

#[test]
fn replace_snapshot_is_wholesale() {
    let store = store();
    store.save_file(&path("_page/stale"), b"old").unwrap();

    let mut files = BTreeMap::new();
    files.insert(path("_page/a"), b"A".to_vec());
    files.insert(path("_post/b"), b"B".to_vec());
    store.replace_snapshot(&files).unwrap();

    let listed = store.list_files().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.values().all(|m| m.status == FileSyncState::Synced));
    assert!(store.get_file(&path("_page/stale")).unwrap().is_none());
    assert!(store.get_commit_log().unwrap().is_empty());
}

// ── Commit log ───────────────────────────────────────────────────

#[test]
fn create_commit_appends_and_moves_pointer() {
    let store = store().with_author(CommitAuthor::new("Editor", "editor@example.com"));
    let mut changes = BTreeMap::new();
    changes.insert(path("_page/a"), Some(ContentHash::of(b"a")));

    let id = store.create_commit("Update page a", changes.clone()).unwrap();
    assert!(id.is_local());

    let log = store.get_commit_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, id);
    assert_eq!(log[0].message, "Update page a");
    assert_eq!(log[0].author.name, "Editor");
    assert_eq!(log[0].changes, changes);
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(id));
}

#[test]
fn create_commit_rejects_empty_changes() {
    let err = store().create_commit("nothing", BTreeMap::new()).unwrap_err();
    assert!(matches!(err, StateError::EmptyCommit));
}

#[test]
fn commit_log_preserves_insertion_order() {
    let store = store();
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut changes = BTreeMap::new();
        changes.insert(path(&format!("_page/p{i}")), Some(ContentHash::of(&[i])));
        ids.push(store.create_commit(&format!("c{i}"), changes).unwrap());
    }
    let logged: Vec<_> = store.get_commit_log().unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(logged, ids);
}

#[test]
fn import_commits_appends_and_skips_known_ids() {
    let store = store();
    store
        .import_commits(&[remote_entry("c1", "_page/a"), remote_entry("c2", "_page/b")], false)
        .unwrap();
    store
        .import_commits(&[remote_entry("c2", "_page/b"), remote_entry("c3", "_page/c")], false)
        .unwrap();

    let ids: Vec<_> = store
        .get_commit_log()
        .unwrap()
        .into_iter()
        .map(|e| e.id.to_string())
        .collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
}

#[test]
fn import_commits_overwrite_replaces_log() {
    let store = store();
    let mut changes = BTreeMap::new();
    changes.insert(path("_page/local"), Some(ContentHash::of(b"l")));
    store.create_commit("local", changes).unwrap();

    store.import_commits(&[remote_entry("r1", "_page/a")], true).unwrap();

    let log = store.get_commit_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id.as_str(), "r1");
}

#[test]
fn update_commit_id_rewrites_last_entry_and_pointer() {
    let store = store();
    let mut changes = BTreeMap::new();
    changes.insert(path("_page/a"), Some(ContentHash::of(b"a")));
    let local = store.create_commit("edit", changes).unwrap();

    let remote = CommitId::new("4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    store.update_commit_id(&local, &remote).unwrap();

    let log = store.get_commit_log().unwrap();
    assert_eq!(log[0].id, remote);
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(remote));
}

#[test]
fn update_commit_id_of_earlier_entry_keeps_pointer() {
    let store = store();
    let mut first = BTreeMap::new();
    first.insert(path("_page/a"), Some(ContentHash::of(b"a")));
    let c1 = store.create_commit("one", first).unwrap();
    let mut second = BTreeMap::new();
    second.insert(path("_page/b"), Some(ContentHash::of(b"b")));
    let c2 = store.create_commit("two", second).unwrap();

    store.update_commit_id(&c1, &CommitId::new("remote-1")).unwrap();
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(c2));
}

#[test]
fn update_unknown_commit_fails() {
    let err = store()
        .update_commit_id(&CommitId::new("missing"), &CommitId::new("x"))
        .unwrap_err();
    assert!(matches!(err, StateError::UnknownCommit(_)));
}

#[test]
fn discard_commit_removes_entry_and_repoints() {
    let store = store();
    store.import_commits(&[remote_entry("abc", "_post/a")], false).unwrap();
    store.save_latest_commit_hash(&CommitId::new("abc")).unwrap();
    let mut changes = BTreeMap::new();
    changes.insert(path("_post/gone"), None);
    let local = store.create_commit("noop", changes).unwrap();

    store.discard_commit(&local, &CommitId::new("abc")).unwrap();

    let ids: Vec<String> = store
        .get_commit_log()
        .unwrap()
        .into_iter()
        .map(|e| e.id.to_string())
        .collect();
    assert_eq!(ids, vec!["abc".to_string()]);
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(CommitId::new("abc")));
}

#[test]
fn discard_unknown_commit_fails() {
    let store = store();
    let err = store
        .discard_commit(&CommitId::new("nope"), &CommitId::new("abc"))
        .unwrap_err();
    assert!(matches!(err, StateError::UnknownCommit(_)));
}

#[test]
fn latest_pointer_roundtrip() {
    let store = store();
    assert!(store.get_latest_commit_hash().unwrap().is_none());
    store.save_latest_commit_hash(&CommitId::new("abc")).unwrap();
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(CommitId::new("abc")));
}

#[test]
fn stage_files_logs_every_saved_file_in_one_entry() {
    let store = store();
    let mut files = BTreeMap::new();
    files.insert(path("_post/a"), b"A".to_vec());
    files.insert(path("_post/b"), b"B".to_vec());

    let id = store.stage_files("Publish", &files).unwrap();

    let log = store.get_commit_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, id);
    assert_eq!(log[0].changes[&path("_post/a")], Some(ContentHash::of(b"A")));
    assert_eq!(log[0].changes[&path("_post/b")], Some(ContentHash::of(b"B")));
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(id));
    assert!(store.list_files().unwrap().values().all(|m| m.status == FileSyncState::Pending));
}

#[test]
fn stage_files_rolls_back_when_logging_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");
    let store = StateStore::open(&db).unwrap();
    let other = rusqlite::Connection::open(&db).unwrap();
    other
        .execute_batch(
            "CREATE TRIGGER reject_log BEFORE INSERT ON commit_log
             BEGIN SELECT RAISE(ABORT, 'log is read-only'); END;",
        )
        .unwrap();

    let mut files = BTreeMap::new();
    files.insert(path("_post/hello"), b"hello".to_vec());
    let err = store.stage_files("Publish", &files).unwrap_err();
    assert!(matches!(err, StateError::Database(_)));
    assert!(store.list_files().unwrap().is_empty());
    assert!(store.get_file(&path("_post/hello")).unwrap().is_none());
    assert!(store.get_latest_commit_hash().unwrap().is_none());

    other.execute_batch("DROP TRIGGER reject_log;").unwrap();
    let id = store.stage_files("Publish", &files).unwrap();
    assert_eq!(store.get_commit_log().unwrap().len(), 1);
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(id));
}

// ── Remote application ───────────────────────────────────────────

#[test]
fn apply_remote_changes_is_one_unit() {
    let store = store();
    store.save_file(&path("_page/removed"), b"bye").unwrap();

    let mut changes = BTreeMap::new();
    changes.insert(path("_page/new"), Some(b"hello".to_vec()));
    changes.insert(path("_page/removed"), None);
    let commits = vec![remote_entry("r1", "_page/new")];

    store
        .apply_remote_changes(&changes, &commits, &CommitId::new("r1"))
        .unwrap();

    let files = store.list_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[&path("_page/new")].status, FileSyncState::Synced);
    assert_eq!(store.get_commit_log().unwrap().len(), 1);
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(CommitId::new("r1")));
}

// ── Persistence ──────────────────────────────────────────────────

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");
    let p = path("_page/a");

    {
        let store = StateStore::open(&db).unwrap();
        store.save_file(&p, b"persisted").unwrap();
        store.save_latest_commit_hash(&CommitId::new("c9")).unwrap();
    }

    let store = StateStore::open(&db).unwrap();
    assert_eq!(store.get_file(&p).unwrap().unwrap(), b"persisted");
    assert_eq!(store.get_latest_commit_hash().unwrap(), Some(CommitId::new("c9")));
}
