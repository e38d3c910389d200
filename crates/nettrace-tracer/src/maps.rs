//! Bounded shared maps.
//!
//! All state shared between hook invocations lives in these stores. Hooks
//! run truly concurrently on arbitrary cores with no mutual exclusion
//! available across them, so the store exposes only single-call atomic
//! operations: lookup, upsert, insert-if-absent, delete, and an in-place
//! merge (the moral equivalent of looking an entry up and mutating it
//! through the returned pointer, which the underlying map serializes per
//! key). There is no multi-key transaction and no read-modify-write spanning
//! two calls.
//!
//! Capacity is fixed at construction; when full, the least-recently-used
//! entry is evicted. Eviction is the only reclamation of stale state and an
//! accepted source of best-effort data loss.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// A bounded, LRU-evicting key-value store with atomic single-key
/// operations. Each operation is one short critical section internally,
/// standing in for the per-bucket serialization of the real shared maps.
pub struct FlowMap<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq + Copy, V: Copy> FlowMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).copied()
    }

    /// Unconditional upsert. Returns `true` when an unrelated entry was
    /// evicted to make room.
    pub fn insert(&self, key: K, value: V) -> bool {
        match self.inner.lock().push(key, value) {
            Some((old_key, _)) => old_key != key,
            None => false,
        }
    }

    /// Atomic insert that succeeds only when no entry exists for `key`;
    /// first writer wins. Returns whether the value was stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains(&key) {
            return false;
        }
        inner.push(key, value);
        true
    }

    /// Delete and return the entry, if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    /// Insert `init` when absent, then mutate the stored value in place.
    /// The whole operation is a single atomic step with respect to other
    /// map calls for the same key. Returns `true` when creating the entry
    /// evicted an unrelated one.
    pub fn merge(&self, key: K, init: V, f: impl FnOnce(&mut V)) -> bool {
        let mut inner = self.inner.lock();
        let was_present = inner.contains(&key);
        let len_before = inner.len();
        f(inner.get_or_insert_mut(key, || init));
        !was_present && inner.len() == len_before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
