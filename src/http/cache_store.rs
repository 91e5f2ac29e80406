//! Usage: Short-lived in-memory cache for completed read responses.
//!
//! Entries are never mutated in place; a newer write for the same key replaces
//! the whole entry. Expiry is lazy (checked on `get`), with `prune_expired` for
//! an optional background sweep.

use crate::http::cache_key::CacheKey;
use crate::shared::mutex_ext::MutexExt;
use crate::shared::time::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CachedEntry<V> {
    pub key: CacheKey,
    pub payload: V,
    pub stored_at_unix_ms: u64,
}

pub struct CacheStore<V> {
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, CachedEntry<V>>>,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedEntry<V>> {
        let now = self.clock.now_unix_millis();
        let mut entries = self.entries.lock_or_recover();
        match entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, payload: V) {
        let stored_at_unix_ms = self.clock.now_unix_millis();
        let entry = CachedEntry {
            key: key.clone(),
            payload,
            stored_at_unix_ms,
        };
        self.entries.lock_or_recover().insert(key, entry);
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock_or_recover().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock_or_recover().clear();
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_unix_millis();
        let mut entries = self.entries.lock_or_recover();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before.saturating_sub(entries.len())
    }

    /// Count of stored entries, expired ones included until they are evicted.
    pub fn len(&self) -> usize {
        self.entries.lock_or_recover().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CachedEntry<V>, now_unix_ms: u64) -> bool {
        now_unix_ms.saturating_sub(entry.stored_at_unix_ms) > self.ttl_ms
    }
}
