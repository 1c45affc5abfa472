//! Memoized session bootstraps.
//!
//! An entry lives for `ttl` after its last access, so repeatedly showing the
//! composer for the same repository does not re-read it. Reloading or opening
//! with different arguments must call `invalidate`.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry<V> {
    key: PathBuf,
    value: V,
    last_access: Instant,
}

pub struct BootstrapCache<V> {
    ttl: Duration,
    entry: Mutex<Option<Entry<V>>>,
}

impl<V: Clone> BootstrapCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn get(&self, key: &Path) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: &Path, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Drop whatever is cached
    pub fn invalidate(&self) {
        if self.entry.lock().take().is_some() {
            debug!("bootstrap cache invalidated");
        }
    }

    fn get_at(&self, key: &Path, now: Instant) -> Option<V> {
        let mut slot = self.entry.lock();
        let entry = slot.as_mut()?;
        if entry.key != key {
            debug!(repo = %key.display(), "bootstrap cache miss (other repository)");
            return None;
        }
        if now.saturating_duration_since(entry.last_access) > self.ttl {
            debug!(repo = %key.display(), "bootstrap cache expired");
            *slot = None;
            return None;
        }
        entry.last_access = now;
        debug!(repo = %key.display(), "bootstrap cache hit");
        Some(entry.value.clone())
    }

    fn insert_at(&self, key: &Path, value: V, now: Instant) {
        *self.entry.lock() = Some(Entry {
            key: key.to_path_buf(),
            value,
            last_access: now,
        });
    }
}
