//! The on-disk B-tree itself: descent, point lookup, range iteration, and
//! insert-with-split. Branching factor is fixed at
//! [`super::node::BRANCHING_FACTOR`].

use super::node::{Entry, Node, NIL, pack_offset, unpack_offset};
use super::page_file::PageFile;
use super::value_heap::ValueHeap;
use crate::errors::KvResult;
use crate::key::{Key, Value, codec};
use log::debug;
use std::path::Path;

pub struct BTree {
    pages: PageFile,
    values: ValueHeap,
}

/// What happened to a child after a recursive `put`, reported back to the parent.
enum PutOutcome {
    /// No structural change the parent needs to account for.
    Updated,
    /// The child's minimum key changed; the parent's separator for it (at
    /// the given index) must be rewritten. Only ever reported when the
    /// modified child is at index 0 of its parent, since only then can the
    /// change ripple further up.
    MinKeyChanged(Key),
    /// The child split; a new right sibling now exists. `left_min_changed`
    /// is set when the *original* child's own minimum key also changed
    /// (possible only when the new key was inserted at position 0, which
    /// always stays in the left half of any split) so the parent can fix up
    /// both the existing separator and the new one in a single pass.
    Split { left_min_changed: Option<Key>, sibling_page_no: u32, sibling_min_key: Key },
}

impl BTree {
    /// Open (creating if absent) a B-tree backed by a page file at
    /// `page_path` and a value heap at `value_path`.
    ///
    /// # Errors
    /// Returns an error if either underlying file cannot be opened.
    pub fn open(page_path: &Path, value_path: &Path) -> KvResult<Self> {
        Ok(Self { pages: PageFile::open(page_path)?, values: ValueHeap::open(value_path)? })
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.pages.header().entry_count
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pages.header().height
    }

    /// Refresh in-memory header/eov state from disk. Needed after a
    /// snapshot rollback replaced the underlying files out from under us.
    ///
    /// # Errors
    /// Returns an error if either header cannot be re-read.
    pub fn reload(&self) -> KvResult<()> {
        self.pages.reload_header()?;
        self.values.reload_eov()?;
        Ok(())
    }

    fn load_node(&self, page_no: u32) -> KvResult<Node> {
        Node::decode(&self.pages.read_page(page_no)?)
    }

    fn save_node(&self, node: &Node) -> KvResult<()> {
        self.pages.write_page(node.page_no, &node.encode())
    }

    /// Index of the child to descend into at an internal node, given the
    /// search key. Largest `j` with `key(j) <= key`.
    fn descend_index(node: &Node, key: &Key) -> usize {
        let m = node.entries.len();
        for j in 0..m {
            let is_last = j + 1 == m;
            if is_last || codec::less(key, node.entries[j + 1].key()) {
                return j;
            }
        }
        0
    }

    /// Point lookup.
    ///
    /// # Errors
    /// Returns an error on I/O failure or corrupted page content.
    pub fn get(&self, key: &Key) -> KvResult<Option<Value>> {
        let mut page_no = self.pages.header().root_page_no;
        loop {
            let node = self.load_node(page_no)?;
            if node.is_leaf() {
                for e in &node.entries {
                    if let Entry::External { key: k, value_offset, .. } = e
                        && codec::equal(k, key)
                    {
                        return Ok(Some(self.values.read(*value_offset)?));
                    }
                }
                return Ok(None);
            }
            if node.entries.is_empty() {
                return Ok(None);
            }
            let j = Self::descend_index(&node, key);
            page_no = match &node.entries[j] {
                Entry::Internal { child_page_no, .. } => *child_page_no,
                Entry::External { .. } => unreachable!("internal node holding external entry"),
            };
        }
    }

    /// Insert or overwrite `key` with `value`.
    ///
    /// # Errors
    /// Returns an error on I/O failure or corrupted page content.
    pub fn put(&self, key: &Key, value: &Value) -> KvResult<()> {
        let value_offset = self.values.append(value)?;
        let root_no = self.pages.header().root_page_no;
        match self.put_recursive(root_no, key, value_offset)? {
            PutOutcome::Updated | PutOutcome::MinKeyChanged(_) => {}
            PutOutcome::Split { sibling_page_no, sibling_min_key, .. } => {
                let old_root = self.load_node(root_no)?;
                let left_key = old_root.min_key().cloned().unwrap_or_default();
                let new_root_no = self.pages.allocate_page()?;
                let mut new_root = Node::new_leaf(new_root_no);
                new_root.entries.push(Entry::Internal { key: left_key, child_page_no: root_no, self_offset: 0 });
                new_root.entries.push(Entry::Internal {
                    key: sibling_min_key,
                    child_page_no: sibling_page_no,
                    self_offset: 0,
                });
                new_root.assign_self_offsets();
                self.save_node(&new_root)?;
                self.pages.set_root(new_root_no);
                self.pages.set_height(self.pages.header().height + 1);
            }
        }
        self.pages.sync()?;
        Ok(())
    }

    fn put_recursive(&self, page_no: u32, key: &Key, value_offset: u64) -> KvResult<PutOutcome> {
        let mut node = self.load_node(page_no)?;
        if node.is_leaf() {
            return self.put_leaf(&mut node, key, value_offset);
        }

        let j = Self::descend_index(&node, key);
        let child_page_no = match &node.entries[j] {
            Entry::Internal { child_page_no, .. } => *child_page_no,
            Entry::External { .. } => unreachable!(),
        };
        let outcome = self.put_recursive(child_page_no, key, value_offset)?;
        match outcome {
            PutOutcome::Updated => Ok(PutOutcome::Updated),
            PutOutcome::MinKeyChanged(new_min) => {
                node.entries[j] = Entry::Internal { key: new_min.clone(), child_page_no, self_offset: 0 };
                node.assign_self_offsets();
                self.save_node(&node)?;
                if j == 0 { Ok(PutOutcome::MinKeyChanged(new_min)) } else { Ok(PutOutcome::Updated) }
            }
            PutOutcome::Split { left_min_changed, sibling_page_no, sibling_min_key } => {
                if let Some(new_min) = &left_min_changed {
                    node.entries[j] = Entry::Internal { key: new_min.clone(), child_page_no, self_offset: 0 };
                }
                node.entries.insert(
                    j + 1,
                    Entry::Internal { key: sibling_min_key, child_page_no: sibling_page_no, self_offset: 0 },
                );
                node.assign_self_offsets();
                let propagate_min = if j == 0 { left_min_changed } else { None };
                if node.is_full() {
                    let (sibling_page_no, sibling_min_key) = self.split_internal(&mut node)?;
                    self.save_node(&node)?;
                    Ok(PutOutcome::Split { left_min_changed: propagate_min, sibling_page_no, sibling_min_key })
                } else {
                    self.save_node(&node)?;
                    Ok(match propagate_min {
                        Some(k) => PutOutcome::MinKeyChanged(k),
                        None => PutOutcome::Updated,
                    })
                }
            }
        }
    }

    fn put_leaf(&self, node: &mut Node, key: &Key, value_offset: u64) -> KvResult<PutOutcome> {
        if let Some(existing) =
            node.entries.iter_mut().find(|e| matches!(e, Entry::External { key: k, .. } if codec::equal(k, key)))
        {
            if let Entry::External { value_offset: v, .. } = existing {
                *v = value_offset;
            }
            self.save_node(node)?;
            return Ok(PutOutcome::Updated);
        }

        let old_first_prev = match node.entries.first() {
            Some(Entry::External { prev_offset, .. }) => *prev_offset,
            _ => NIL,
        };
        let old_last_next = match node.entries.last() {
            Some(Entry::External { next_offset, .. }) => *next_offset,
            _ => NIL,
        };
        let old_len = node.entries.len();

        let pos = node.entries.iter().position(|e| codec::more(e.key(), key)).unwrap_or(old_len);
        node.entries.insert(
            pos,
            Entry::External { key: key.clone(), value_offset, prev_offset: NIL, next_offset: NIL, self_offset: 0 },
        );

        // Rebuild this node's internal chain links; the node is rewritten as
        // a whole page on every touch anyway, so there is nothing to gain
        // from patching individual entries in place.
        let page_no = node.page_no;
        let new_len = node.entries.len();
        for i in 0..new_len {
            if let Entry::External { prev_offset, next_offset, .. } = &mut node.entries[i] {
                *prev_offset = if i == 0 { old_first_prev } else { pack_offset(page_no, (i - 1) as u32) };
                *next_offset = if i + 1 == new_len { old_last_next } else { pack_offset(page_no, (i + 1) as u32) };
            }
        }
        node.assign_self_offsets();

        // The old first entry moved one slot to the right: its external
        // predecessor's `next` pointer must follow it.
        if pos == 0 && old_first_prev != NIL {
            self.patch_predecessor_next(old_first_prev, pack_offset(page_no, 1))?;
        }
        // The old last entry moved one slot to the right unless the new key
        // was appended after it: its external successor's `prev` pointer
        // must follow it.
        if pos < old_len && old_last_next != NIL {
            self.patch_successor_prev(old_last_next, pack_offset(page_no, (old_len) as u32))?;
        }

        self.pages.set_entry_count(self.pages.header().entry_count + 1);

        // `pos == 0` always lands the new key in the left half of any
        // subsequent split (split always keeps the front indices at
        // `node.page_no`), so it is safe to read the new min off the node
        // now, before we know whether a split happens.
        let min_changed = if pos == 0 { node.min_key().cloned() } else { None };

        if node.is_full() {
            let (sibling_page_no, sibling_min_key) = self.split_leaf(node)?;
            self.save_node(node)?;
            Ok(PutOutcome::Split { left_min_changed: min_changed, sibling_page_no, sibling_min_key })
        } else {
            self.save_node(node)?;
            Ok(match min_changed {
                Some(k) => PutOutcome::MinKeyChanged(k),
                None => PutOutcome::Updated,
            })
        }
    }

    /// Split a full leaf node in place: upper half moves to a new page,
    /// lower half stays at `node.page_no`. Returns the new sibling's page
    /// number and minimum key.
    fn split_leaf(&self, node: &mut Node) -> KvResult<(u32, Key)> {
        let m = node.entries.len();
        let split = m / 2;
        let moved = node.entries.split_off(split);
        node.assign_self_offsets();

        let new_page_no = self.pages.allocate_page()?;
        let mut sibling = Node { page_no: new_page_no, entries: moved };
        sibling.assign_self_offsets();

        let sibling_last_next = match sibling.entries.last() {
            Some(Entry::External { next_offset, .. }) => *next_offset,
            _ => NIL,
        };

        if let Some(Entry::External { next_offset, .. }) = node.entries.last_mut() {
            *next_offset = pack_offset(new_page_no, 0);
        }
        if let Some(Entry::External { prev_offset, .. }) = sibling.entries.first_mut() {
            *prev_offset = pack_offset(node.page_no, node.entries.len().saturating_sub(1) as u32);
        }

        if sibling_last_next != NIL {
            let new_self = pack_offset(new_page_no, (sibling.entries.len() - 1) as u32);
            self.patch_successor_prev(sibling_last_next, new_self)?;
        }

        let sibling_min = sibling.min_key().cloned().unwrap_or_default();
        self.save_node(&sibling)?;
        debug!("split leaf page {} into new sibling page {new_page_no}", node.page_no);
        Ok((new_page_no, sibling_min))
    }

    fn split_internal(&self, node: &mut Node) -> KvResult<(u32, Key)> {
        let m = node.entries.len();
        let split = m / 2;
        let moved = node.entries.split_off(split);
        node.assign_self_offsets();

        let new_page_no = self.pages.allocate_page()?;
        let mut sibling = Node { page_no: new_page_no, entries: moved };
        sibling.assign_self_offsets();
        let sibling_min = sibling.min_key().cloned().unwrap_or_default();
        self.save_node(&sibling)?;
        debug!("split internal page {} into new sibling page {new_page_no}", node.page_no);
        Ok((new_page_no, sibling_min))
    }

    /// Patch the entry referenced by `predecessor_ref`'s `next` pointer to `new_next`.
    fn patch_predecessor_next(&self, predecessor_ref: u64, new_next: u64) -> KvResult<()> {
        let (pg, idx) = unpack_offset(predecessor_ref);
        let mut node = self.load_node(pg)?;
        if let Some(Entry::External { next_offset, .. }) = node.entries.get_mut(idx as usize) {
            *next_offset = new_next;
        }
        self.save_node(&node)
    }

    /// Patch the entry referenced by `successor_ref`'s `prev` pointer to `new_prev`.
    fn patch_successor_prev(&self, successor_ref: u64, new_prev: u64) -> KvResult<()> {
        let (pg, idx) = unpack_offset(successor_ref);
        let mut node = self.load_node(pg)?;
        if let Some(Entry::External { prev_offset, .. }) = node.entries.get_mut(idx as usize) {
            *prev_offset = new_prev;
        }
        self.save_node(&node)
    }

    /// Lazily stream every stored pair with key in `[lo, hi]`.
    ///
    /// # Errors
    /// Returns an error if descent or chain traversal hits corrupted content.
    pub fn get_range<'a>(&'a self, lo: &Key, hi: &'a Key) -> KvResult<RangeIter<'a>> {
        if codec::more(lo, hi) {
            return Ok(RangeIter { tree: self, cursor: None, hi: hi.clone(), done: true });
        }
        let mut page_no = self.pages.header().root_page_no;
        let cursor = loop {
            let node = self.load_node(page_no)?;
            if node.is_leaf() {
                let found = node.entries.iter().position(|e| codec::geq(e.key(), lo));
                match found {
                    Some(idx) => break Some((page_no, idx as u32)),
                    None => {
                        let next = match node.entries.last() {
                            Some(Entry::External { next_offset, .. }) => *next_offset,
                            _ => NIL,
                        };
                        break if next == NIL { None } else { Some(unpack_offset(next)) };
                    }
                }
            }
            if node.entries.is_empty() {
                break None;
            }
            let j = Self::descend_index(&node, lo);
            page_no = match &node.entries[j] {
                Entry::Internal { child_page_no, .. } => *child_page_no,
                Entry::External { .. } => unreachable!(),
            };
        };
        Ok(RangeIter { tree: self, cursor, hi: hi.clone(), done: false })
    }
}

pub struct RangeIter<'a> {
    tree: &'a BTree,
    cursor: Option<(u32, u32)>,
    hi: Key,
    done: bool,
}

impl Iterator for RangeIter<'_> {
    type Item = KvResult<(Key, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (page_no, idx) = self.cursor?;
        let node = match self.tree.load_node(page_no) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let entry = match node.entries.get(idx as usize) {
            Some(Entry::External { key, value_offset, next_offset, .. }) => {
                if codec::more(key, &self.hi) {
                    self.done = true;
                    return None;
                }
                let value = match self.tree.values.read(*value_offset) {
                    Ok(v) => v,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                };
                self.cursor = if *next_offset == NIL { None } else { Some(unpack_offset(*next_offset)) };
                (key.clone(), value)
            }
            _ => {
                self.done = true;
                return None;
            }
        };
        if self.cursor.is_none() {
            self.done = true;
        }
        Some(Ok(entry))
    }
}
