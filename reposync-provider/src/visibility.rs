use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a visibility answer is trusted.
pub const VISIBILITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Remembers whether a repository is public.
#[derive(Debug)]
pub(crate) struct VisibilityCache {
    ttl: Duration,
    entry: Mutex<Option<(bool, Instant)>>,
}

impl VisibilityCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> Option<bool> {
        let entry = self.entry.lock().ok()?;
        match *entry {
            Some((public, at)) if at.elapsed() < self.ttl => Some(public),
            _ => None,
        }
    }

    pub(crate) fn set(&self, public: bool) {
        if let Ok(mut entry) = self.entry.lock() {
            *entry = Some((public, Instant::now()));
        }
    }
}

impl Default for VisibilityCache {
    fn default() -> Self {
        Self::new(VISIBILITY_TTL)
    }
}
