use reposync_state::{LockConfig, StateError, StateStore};
use reposync_types::RepoPath;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_lock() -> LockConfig {
    LockConfig {
        timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        lease: Duration::from_secs(30),
    }
}

#[test]
fn default_lock_config() {
    let cfg = LockConfig::default();
    assert_eq!(cfg.timeout, Duration::from_secs(5));
    assert_eq!(cfg.poll_interval, Duration::from_millis(100));
}

#[test]
fn held_lease_times_out_writers() {
    let store = StateStore::open_in_memory().unwrap().with_lock_config(fast_lock());
    let _held = store.lock().unwrap();

    let started = Instant::now();
    let err = store
        .save_file(&RepoPath::new("_page/a").unwrap(), b"x")
        .unwrap_err();
    assert!(matches!(err, StateError::LockTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[test]
fn lease_is_released_on_drop() {
    let store = StateStore::open_in_memory().unwrap().with_lock_config(fast_lock());
    {
        let _held = store.lock().unwrap();
    }
    store
        .save_file(&RepoPath::new("_page/a").unwrap(), b"x")
        .unwrap();
}

#[test]
fn lease_is_released_after_failed_operation() {
    let store = StateStore::open_in_memory().unwrap().with_lock_config(fast_lock());
    assert!(store.create_commit("empty", Default::default()).is_err());
    assert!(
        store
            .update_commit_id(&"nope".into(), &"x".into())
            .is_err()
    );
    // Both failures must have released the lease.
    let _lease = store.lock().unwrap();
}

#[test]
fn expired_lease_can_be_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("lease.db");
    let short = StateStore::open(&db).unwrap().with_lock_config(LockConfig {
        lease: Duration::from_millis(50),
        ..fast_lock()
    });
    let long = StateStore::open(&db).unwrap().with_lock_config(fast_lock());

    let stale = short.lock().unwrap();
    thread::sleep(Duration::from_millis(80));

    let fresh = long.lock().unwrap();
    assert_ne!(stale.owner(), fresh.owner());

    // Dropping the stale guard must not release the new holder's lease.
    drop(stale);
    let err = short
        .save_file(&RepoPath::new("_page/a").unwrap(), b"x")
        .unwrap_err();
    assert!(matches!(err, StateError::LockTimeout { .. }));
}

#[test]
fn concurrent_writers_in_one_process_never_lose_updates() {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let path = RepoPath::new(format!("_page/t{t}-{i}")).unwrap();
                    store.save_file(&path, format!("{t}:{i}").as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.list_files().unwrap().len(), 40);
}

#[test]
fn concurrent_writers_across_connections_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("shared.db");
    StateStore::open(&db).unwrap();

    let handles: Vec<_> = (0..2)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                let store = StateStore::open(&db).unwrap();
                for i in 0..10 {
                    let path = RepoPath::new(format!("_page/w{t}-{i}")).unwrap();
                    store.save_file(&path, b"x").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let store = StateStore::open(&db).unwrap();
    assert_eq!(store.list_files().unwrap().len(), 20);
}
