//! Cross-process lease guarding state mutation.
//!
//! The lease is a row in the `locks` table. Acquiring it is a single upsert
//! that only succeeds when no row exists or the existing lease has expired,
//! so it works across processes sharing the database file. A crashed holder
//! cannot wedge the store for longer than the lease duration.

use rusqlite::{Connection, params};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StateError, StateResult};

const LOCK_NAME: &str = "state";

/// Timing of lease acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// How long to wait for the lease before failing.
    pub timeout: Duration,
    /// Delay between acquisition attempts.
    pub poll_interval: Duration,
    /// How long a lease stays valid if its holder never releases it.
    pub lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            lease: Duration::from_secs(30),
        }
    }
}

/// A held lease. Released when dropped.
pub struct StateLock {
    conn: Arc<Mutex<Connection>>,
    owner: String,
}

impl StateLock {
    /// Blocks until the lease is acquired or `config.timeout` elapses.
    pub(crate) fn acquire(conn: Arc<Mutex<Connection>>, config: &LockConfig) -> StateResult<Self> {
        let owner = Uuid::new_v4().simple().to_string();
        let started = Instant::now();

        loop {
            if Self::try_acquire(&conn, &owner, config.lease)? {
                debug!("Acquired state lease {}", owner);
                return Ok(Self { conn, owner });
            }

            let waited = started.elapsed();
            if waited >= config.timeout {
                warn!("Timed out waiting for state lease after {:?}", waited);
                return Err(StateError::LockTimeout { waited });
            }
            thread::sleep(config.poll_interval.min(config.timeout - waited));
        }
    }

    fn try_acquire(conn: &Mutex<Connection>, owner: &str, lease: Duration) -> StateResult<bool> {
        let now = now_millis();
        let expires_at = now + lease.as_millis() as i64;
        let conn = conn.lock().map_err(|_| StateError::Poisoned)?;
        let changed = conn.execute(
            "INSERT INTO locks (name, owner, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
             WHERE locks.expires_at <= ?4",
            params![LOCK_NAME, owner, expires_at, now],
        )?;
        Ok(changed == 1)
    }

    /// The unique token identifying this lease.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let result = match self.conn.lock() {
            Ok(conn) => conn
                .execute(
                    "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
                    params![LOCK_NAME, self.owner],
                )
                .map_err(StateError::from),
            Err(_) => Err(StateError::Poisoned),
        };
        match result {
            Ok(_) => debug!("Released state lease {}", self.owner),
            Err(e) => warn!("Failed to release state lease {}: {}", self.owner, e),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
