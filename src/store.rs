//! The embedder-facing façade composing buffer, tree, and snapshot manager.

use crate::btree::BTree;
use crate::buffer::Buffer;
use crate::config::StoreConfig;
use crate::errors::{KvError, KvResult};
use crate::key::{Key, Value};
use crate::snapshot::SnapshotManager;
use log::{debug, warn};
use parking_lot::Mutex;

pub struct Store {
    config: StoreConfig,
    buffer: Buffer,
    tree: BTree,
    snapshots: SnapshotManager,
    in_tx: Mutex<bool>,
}

impl Store {
    /// Open (creating if absent) a store described by `config`.
    ///
    /// # Errors
    /// Returns an error if the underlying files cannot be opened.
    pub fn open(mut config: StoreConfig) -> KvResult<Self> {
        config.page_file_path = crate::fsutil::normalize_store_path(config.page_file_path.to_str());
        let tree = BTree::open(&config.page_file_path, &config.value_heap_path())?;
        let buffer = Buffer::new(config.buffer_capacity);
        let snapshots = SnapshotManager::new(&config);
        Ok(Self { config, buffer, tree, snapshots, in_tx: Mutex::new(false) })
    }

    /// Open (creating if absent) a store at `path`, with default settings.
    ///
    /// # Errors
    /// Returns an error if the underlying files cannot be opened.
    pub fn open_at<P: AsRef<std::path::Path>>(path: P) -> KvResult<Self> {
        Self::open(StoreConfig::at_path(path))
    }

    fn check_non_empty(bytes: &[u16], what: &'static str) -> KvResult<()> {
        if bytes.is_empty() { Err(KvError::NullArgument(what)) } else { Ok(()) }
    }

    /// Write (insert or overwrite) `key` with `value`.
    ///
    /// # Errors
    /// Returns an error if `key`/`value` is empty, the buffer is exhausted,
    /// or a flush fails.
    pub fn write(&self, key: Key, value: Value) -> KvResult<()> {
        Self::check_non_empty(&key, "key")?;
        Self::check_non_empty(&value, "value")?;
        if self.buffer.dirty_count() >= self.config.flush_threshold() {
            self.flush()?;
        }
        self.buffer.put(key, value, true)
    }

    /// Read the value stored for `key`, if any.
    ///
    /// # Errors
    /// Returns an error on I/O failure or corrupted tree content.
    pub fn read(&self, key: &Key) -> KvResult<Option<Value>> {
        Self::check_non_empty(key, "key")?;
        if let Some(v) = self.buffer.get(key) {
            return Ok(Some(v));
        }
        match self.tree.get(key)? {
            Some(value) => {
                self.buffer.put(key.clone(), value.clone(), false)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Inclusive range query over `[lo, hi]`. Flushes first so the tree
    /// reflects every prior write; does not observe writes issued after it
    /// returns.
    ///
    /// # Errors
    /// Returns an error on I/O failure or corrupted tree content.
    pub fn read_range(&self, lo: &Key, hi: &Key) -> KvResult<Vec<(Key, Value)>> {
        Self::check_non_empty(lo, "lo")?;
        Self::check_non_empty(hi, "hi")?;
        self.flush()?;
        self.tree.get_range(lo, hi)?.collect()
    }

    /// Drain dirty buffer entries into the tree.
    ///
    /// # Errors
    /// Returns an error if a tree write fails.
    pub fn flush(&self) -> KvResult<()> {
        for (key, value) in self.buffer.dirty_pairs() {
            self.tree.put(&key, &value)?;
        }
        self.buffer.clear_dirty();
        Ok(())
    }

    /// Begin a transaction: take (or roll back to) a checkpoint.
    ///
    /// # Errors
    /// Returns an error if the checkpoint/rollback file operations fail.
    pub fn begin_tx(&self) -> KvResult<()> {
        self.snapshots.begin_tx()?;
        self.tree.reload()?;
        *self.in_tx.lock() = true;
        debug!("transaction started");
        Ok(())
    }

    /// Commit the current transaction, making prior writes durable.
    ///
    /// A commit with no prior `begin_tx` is a non-fatal precondition
    /// violation: logged and treated as a no-op.
    ///
    /// # Errors
    /// Returns an error if flushing or removing the checkpoint fails.
    pub fn commit(&self) -> KvResult<()> {
        let mut in_tx = self.in_tx.lock();
        if !*in_tx {
            warn!("commit() called without a matching begin_tx()");
            return Ok(());
        }
        self.flush()?;
        self.snapshots.commit()?;
        *in_tx = false;
        debug!("transaction committed");
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.tree.size()
    }

    #[must_use]
    pub fn file_size(&self) -> u32 {
        self.tree.size()
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.config.buffer_capacity
    }

    #[must_use]
    pub fn num_buffer_entries(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{key_from_str, value_from_str};

    fn open_tmp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("store")).unwrap();
        (dir, store)
    }

    #[test]
    fn basic_write_read() {
        let (_dir, store) = open_tmp();
        store.write(key_from_str("bdc"), value_from_str("111")).unwrap();
        store.write(key_from_str("aaa"), value_from_str("112")).unwrap();
        store.write(key_from_str("baa"), value_from_str("113")).unwrap();
        store.write(key_from_str("aac"), value_from_str("114")).unwrap();
        store.write(key_from_str("aaa"), value_from_str("115")).unwrap();
        store.write(key_from_str("aba"), value_from_str("116")).unwrap();

        assert_eq!(store.read(&key_from_str("aaa")).unwrap(), Some(value_from_str("115")));
        assert_eq!(store.read(&key_from_str("baa")).unwrap(), Some(value_from_str("113")));
        assert_eq!(store.num_buffer_entries(), 5);

        store.flush().unwrap();
        assert_eq!(store.file_size(), 5);
    }

    #[test]
    fn missing_key_reads_absent() {
        let (_dir, store) = open_tmp();
        store.write(key_from_str("bdc"), value_from_str("111")).unwrap();
        assert_eq!(store.read(&key_from_str("bba")).unwrap(), None);
    }

    #[test]
    fn range_query_applies_overwrites() {
        let (_dir, store) = open_tmp();
        for (k, v) in [("bdc", "111"), ("aaa", "112"), ("baa", "113"), ("aac", "114"), ("aaa", "115"), ("aba", "116")]
        {
            store.write(key_from_str(k), value_from_str(v)).unwrap();
        }
        let range = store.read_range(&key_from_str("aaa"), &key_from_str("aba")).unwrap();
        assert_eq!(
            range,
            vec![
                (key_from_str("aaa"), value_from_str("115")),
                (key_from_str("aac"), value_from_str("114")),
                (key_from_str("aba"), value_from_str("116")),
            ]
        );

        let full = store.read_range(&key_from_str("aa"), &key_from_str("bed")).unwrap();
        assert_eq!(full.len(), 6);
        for pair in full.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[test]
    fn transaction_commits_durably() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let store = Store::open_at(&path).unwrap();
            store.begin_tx().unwrap();
            for i in 0..20u32 {
                let s = i.to_string();
                store.write(key_from_str(&s), value_from_str(&s)).unwrap();
            }
            store.commit().unwrap();
        }
        let store = Store::open_at(&path).unwrap();
        assert_eq!(store.size(), 20);
        for i in 0..20u32 {
            let s = i.to_string();
            assert_eq!(store.read(&key_from_str(&s)).unwrap(), Some(value_from_str(&s)));
        }
    }

    #[test]
    fn uncommitted_transaction_rolls_back_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let store = Store::open_at(&path).unwrap();
            store.begin_tx().unwrap();
            for i in 0..20u32 {
                let s = i.to_string();
                store.write(key_from_str(&s), value_from_str(&s)).unwrap();
            }
            // Flushing inside a transaction does not commit it: the
            // checkpoint is still in place, so this is still rolled back.
            store.flush().unwrap();
            // No commit: simulates a crash.
        }
        // Reopening and beginning a fresh transaction rolls back to the
        // pre-transaction checkpoint.
        let store = Store::open_at(&path).unwrap();
        store.begin_tx().unwrap();
        assert_eq!(store.size(), 0);
    }
}
