//! LRU caches with batch-scoped staging.
//!
//! During a batch, inserts and removals land in a staging map that shadows
//! the committed LRU: in-batch reads see them immediately, `commit`
//! promotes them, and `rollback` discards them without touching the
//! committed entries.

use std::hash::Hash as StdHash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use hashbrown::HashMap;
use lru::LruCache;

pub struct StagedLru<K, V> {
    committed: LruCache<K, Arc<V>>,
    staged: HashMap<K, Option<Arc<V>>>,
    staging: bool,
}

impl<K: StdHash + Eq + Clone, V> std::fmt::Debug for StagedLru<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedLru")
            .field("committed_len", &self.committed.len())
            .field("staged_len", &self.staged.len())
            .field("staging", &self.staging)
            .finish()
    }
}

impl<K: StdHash + Eq + Clone, V> StagedLru<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            committed: LruCache::new(capacity),
            staged: HashMap::new(),
            staging: false,
        }
    }

    /// Begin staging; must be balanced by `commit` or `rollback`.
    pub fn start(&mut self) {
        debug_assert!(!self.staging, "cache already staging");
        self.staged.clear();
        self.staging = true;
    }

    /// Insert, visible to in-batch reads immediately.
    pub fn push(&mut self, key: K, value: Arc<V>) {
        if self.staging {
            self.staged.insert(key, Some(value));
        } else {
            self.committed.put(key, value);
        }
    }

    /// Remove, visible to in-batch reads immediately.
    pub fn unpush(&mut self, key: K) {
        if self.staging {
            self.staged.insert(key, None);
        } else {
            self.committed.pop(&key);
        }
    }

    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        if self.staging {
            if let Some(staged) = self.staged.get(key) {
                return staged.clone();
            }
        }
        self.committed.get(key).cloned()
    }

    /// Read without promoting recency, for probes that should not disturb
    /// eviction order.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        if self.staging {
            if let Some(staged) = self.staged.get(key) {
                return staged.clone();
            }
        }
        self.committed.peek(key).cloned()
    }

    /// Promote staged entries into the committed LRU.
    pub fn commit(&mut self) {
        for (key, value) in self.staged.drain() {
            match value {
                Some(value) => {
                    self.committed.put(key, value);
                }
                None => {
                    self.committed.pop(&key);
                }
            }
        }
        self.staging = false;
    }

    /// Discard staged entries, restoring the pre-batch view.
    pub fn rollback(&mut self) {
        self.staged.clear();
        self.staging = false;
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_entries_visible_then_promoted() {
        let mut cache: StagedLru<u32, &'static str> = StagedLru::new(8);
        cache.push(1, Arc::new("one"));

        cache.start();
        cache.push(2, Arc::new("two"));
        cache.unpush(1);
        assert!(cache.get(&1).is_none());
        assert_eq!(*cache.get(&2).unwrap(), "two");

        cache.commit();
        assert!(cache.get(&1).is_none());
        assert_eq!(*cache.get(&2).unwrap(), "two");
    }

    #[test]
    fn rollback_restores_pre_batch_view() {
        let mut cache: StagedLru<u32, &'static str> = StagedLru::new(8);
        cache.push(1, Arc::new("one"));

        cache.start();
        cache.unpush(1);
        cache.push(3, Arc::new("three"));
        assert!(cache.get(&1).is_none());

        cache.rollback();
        assert_eq!(*cache.get(&1).unwrap(), "one");
        assert!(cache.get(&3).is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache: StagedLru<u32, u32> = StagedLru::new(2);
        cache.push(1, Arc::new(1));
        cache.push(2, Arc::new(2));
        cache.get(&1);
        cache.push(3, Arc::new(3));
        assert!(cache.get(&2).is_none());
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&3).is_some());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut cache: StagedLru<u32, u32> = StagedLru::new(0);
        cache.push(1, Arc::new(1));
        assert!(cache.get(&1).is_some());
    }
}
