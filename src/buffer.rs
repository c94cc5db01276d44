//! Bounded write-buffer sitting in front of the tree.
//!
//! Holds recently touched key/value pairs with a FIFO eviction order; dirty
//! (unflushed) entries are never evicted. Mirrors the shape of a typical
//! bounded cache: a guarded map, an ordering queue, a dirty set, and a small
//! atomics-based metrics block for observability.

use crate::errors::{KvError, KvResult};
use crate::key::{Key, Value};
use log::warn;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct BufferMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    pub evictions: AtomicU64,
}

struct Inner {
    entries: std::collections::HashMap<Key, Value>,
    order: VecDeque<Key>,
    dirty: HashSet<Key>,
}

pub struct Buffer {
    capacity: usize,
    inner: RwLock<Inner>,
    pub metrics: BufferMetrics,
}

impl Buffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner {
                entries: std::collections::HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                dirty: HashSet::new(),
            }),
            metrics: BufferMetrics::default(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Value> {
        let inner = self.inner.read();
        let found = inner.entries.get(key).cloned();
        if found.is_some() {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Insert or overwrite `key`, evicting a clean entry first if at capacity.
    ///
    /// # Errors
    /// Returns [`KvError::BufferFull`] if the buffer is full and every
    /// resident entry is dirty.
    pub fn put(&self, key: Key, value: Value, dirty: bool) -> KvResult<()> {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.entries.len() >= self.capacity {
            Self::evict_one_locked(&mut inner, &self.metrics)?;
        }
        inner.entries.insert(key.clone(), value);
        inner.order.push_back(key.clone());
        if dirty {
            inner.dirty.insert(key);
        }
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn evict_one_locked(inner: &mut Inner, metrics: &BufferMetrics) -> KvResult<()> {
        let victim = inner.order.iter().find(|k| !inner.dirty.contains(*k)).cloned();
        match victim {
            Some(key) => {
                inner.order.retain(|k| k != &key);
                inner.entries.remove(&key);
                metrics.evictions.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => {
                warn!("buffer full: {} entries resident, all dirty, nothing to evict", inner.entries.len());
                Err(KvError::BufferFull)
            }
        }
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.inner.read().dirty.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the currently dirty pairs, in unspecified order.
    #[must_use]
    pub fn dirty_pairs(&self) -> Vec<(Key, Value)> {
        let inner = self.inner.read();
        inner.dirty.iter().filter_map(|k| inner.entries.get(k).map(|v| (k.clone(), v.clone()))).collect()
    }

    pub fn clear_dirty(&self) {
        self.inner.write().dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::key_from_str;

    #[test]
    fn put_then_get_roundtrips() {
        let buf = Buffer::new(4);
        buf.put(key_from_str("a"), key_from_str("1"), true).unwrap();
        assert_eq!(buf.get(&key_from_str("a")), Some(key_from_str("1")));
    }

    #[test]
    fn clean_entries_evicted_before_dirty() {
        let buf = Buffer::new(2);
        buf.put(key_from_str("a"), key_from_str("1"), false).unwrap();
        buf.put(key_from_str("b"), key_from_str("2"), true).unwrap();
        buf.put(key_from_str("c"), key_from_str("3"), true).unwrap();
        assert!(!buf.contains(&key_from_str("a")));
        assert!(buf.contains(&key_from_str("b")));
        assert!(buf.contains(&key_from_str("c")));
    }

    #[test]
    fn buffer_full_when_all_dirty() {
        let buf = Buffer::new(1);
        buf.put(key_from_str("a"), key_from_str("1"), true).unwrap();
        let err = buf.put(key_from_str("b"), key_from_str("2"), true).unwrap_err();
        assert!(matches!(err, KvError::BufferFull));
    }
}
