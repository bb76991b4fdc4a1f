use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::task::Record;

/// A name under which a dataset is published in the worker cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum CacheEntry {
    /// A writer holds the slot; readers see a miss until it publishes.
    Reserved,
    Published(Arc<Vec<Record>>),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
}

/// An in-memory dataset cache shared by every job running on one
/// worker. Entries are immutable once published.
#[derive(Clone, Default)]
pub struct SharedCache {
    state: Arc<Mutex<CacheState>>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the write side of a key. Returns `None` when the key is
    /// already reserved or published, so at most one job ever writes a
    /// given key.
    pub fn writer(&self, key: CacheKey) -> Option<CacheSlot> {
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return None;
        }
        state.entries.insert(key.clone(), CacheEntry::Reserved);
        Some(CacheSlot {
            cache: self.clone(),
            key: Some(key),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Record>>> {
        let state = self.lock();
        match state.entries.get(key) {
            Some(CacheEntry::Published(records)) => Some(Arc::clone(records)),
            Some(CacheEntry::Reserved) | None => None,
        }
    }

    /// Drops every entry. Used when the worker is reset between runs.
    pub fn reset(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, key: &CacheKey, records: Vec<Record>) {
        debug!("publishing {} cached records under {key}", records.len());
        self.lock()
            .entries
            .insert(key.clone(), CacheEntry::Published(Arc::new(records)));
    }

    fn release(&self, key: &CacheKey) {
        let mut state = self.lock();
        if let Some(CacheEntry::Reserved) = state.entries.get(key) {
            state.entries.remove(key);
        }
    }
}

/// An exclusive write token for one cache key. Publishing consumes the
/// token; dropping it without publishing releases the reservation so a
/// later job can claim the key.
pub struct CacheSlot {
    cache: SharedCache,
    key: Option<CacheKey>,
}

impl CacheSlot {
    pub fn publish(mut self, records: Vec<Record>) {
        if let Some(key) = self.key.take() {
            self.cache.publish(&key, records);
        }
    }
}

impl Drop for CacheSlot {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.release(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_read_back() {
        let cache = SharedCache::new();
        let key = CacheKey::new("dataset");
        let slot = cache.writer(key.clone()).unwrap();
        assert!(cache.get(&key).is_none());
        slot.publish(vec![vec![1.0, 2.0]]);
        assert_eq!(*cache.get(&key).unwrap(), vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn test_single_writer_per_key() {
        let cache = SharedCache::new();
        let key = CacheKey::new("dataset");
        let slot = cache.writer(key.clone()).unwrap();
        assert!(cache.writer(key.clone()).is_none());
        slot.publish(vec![]);
        // Published keys stay claimed.
        assert!(cache.writer(key).is_none());
    }

    #[test]
    fn test_dropped_slot_releases_the_reservation() {
        let cache = SharedCache::new();
        let key = CacheKey::new("dataset");
        drop(cache.writer(key.clone()).unwrap());
        assert!(cache.writer(key).is_some());
    }

    #[test]
    fn test_reset_clears_everything() {
        let cache = SharedCache::new();
        let key = CacheKey::new("dataset");
        cache
            .writer(key.clone())
            .unwrap()
            .publish(vec![vec![1.0]]);
        cache.reset();
        assert!(cache.get(&key).is_none());
        assert!(cache.writer(key).is_some());
    }
}
