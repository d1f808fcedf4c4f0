use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key;

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` records a confirmed missing key
    value: Option<String>,
    fetched_at: Instant,
}

/// Read-through cache of raw values, private to one client.
///
/// Entries expire after the fetch cooldown. Push events invalidate
/// immediately; every invalidation bumps an epoch so a fetch that raced
/// with it does not resurrect the stale value.
#[derive(Debug)]
pub(crate) struct ValueCache {
    entries: DashMap<String, CacheEntry>,
    epoch: AtomicU64,
    cooldown: RwLock<Duration>,
}

impl ValueCache {
    pub(crate) fn new(cooldown: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
            cooldown: RwLock::new(cooldown),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        !self.cooldown.read().is_zero()
    }

    pub(crate) fn set_cooldown(
        &self,
        cooldown: Duration,
    ) {
        *self.cooldown.write() = cooldown;
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Fresh entry for `key`, if any. `Some(None)` is a cached miss.
    pub(crate) fn lookup(
        &self,
        key: &str,
    ) -> Option<Option<String>> {
        let cooldown = *self.cooldown.read();
        if cooldown.is_zero() {
            return None;
        }
        let entry = self.entries.get(key)?;
        if entry.fetched_at.elapsed() < cooldown {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Stores a fetched value unless an invalidation happened since `epoch`.
    pub(crate) fn insert(
        &self,
        key: &str,
        value: Option<String>,
        epoch: u64,
    ) -> bool {
        if !self.is_enabled() || self.epoch() != epoch {
            return false;
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
        // an invalidation may have slipped in between the check and the insert
        if self.epoch() != epoch {
            self.entries.remove(key);
            return false;
        }
        true
    }

    /// Drops `key` only.
    pub(crate) fn invalidate(
        &self,
        key: &str,
    ) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.remove(key);
    }

    /// Drops every entry on the path through `key`, ancestors included.
    /// The empty key flushes everything.
    pub(crate) fn invalidate_subtree(
        &self,
        key: &str,
    ) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if key.is_empty() {
            self.entries.clear();
        } else {
            self.entries.retain(|cached, _| !key::is_related(cached, key));
        }
    }

    pub(crate) fn flush(&self) {
        self.invalidate_subtree("");
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
