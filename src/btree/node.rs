//! Node/entry wire format and in-memory representation.
//!
//! A node occupies exactly one page. Internal nodes hold routing entries
//! (key + child page number); leaves hold external entries (key + value
//! offset + the doubly-linked leaf-chain pointers). Both entry kinds share a
//! common size-prefixed envelope so a reader can skip an entry without fully
//! parsing it.

use crate::errors::{KvError, KvResult};
use crate::key::Key;
use crate::utils::num::usize_to_u32_saturating;

pub const BRANCHING_FACTOR: usize = 4;
/// Sentinel for "no such page/offset".
pub const NIL: u64 = u64::MAX;

/// An entry's `self_offset` (and the `prev_offset`/`next_offset` pointers
/// that reference it) is a packed `(page_no, index_within_node)` pair rather
/// than a raw byte offset: the high 32 bits are the page number, the low 32
/// bits are the entry's position in that page's entry list as of the last
/// write. This is still an absolute, page-file-wide identity for the entry —
/// it just lets leaf-chain traversal jump straight to `(page, index)` without
/// re-deriving a byte position from it.
#[must_use]
pub fn pack_offset(page_no: u32, index: u32) -> u64 {
    (u64::from(page_no) << 32) | u64::from(index)
}

#[must_use]
pub fn unpack_offset(offset: u64) -> (u32, u32) {
    ((offset >> 32) as u32, offset as u32)
}

#[derive(Debug, Clone)]
pub enum Entry {
    Internal { key: Key, child_page_no: u32, self_offset: u64 },
    External { key: Key, value_offset: u64, prev_offset: u64, next_offset: u64, self_offset: u64 },
}

impl Entry {
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Internal { key, .. } | Self::External { key, .. } => key,
        }
    }

    #[must_use]
    pub fn self_offset(&self) -> u64 {
        match self {
            Self::Internal { self_offset, .. } | Self::External { self_offset, .. } => *self_offset,
        }
    }

    pub fn set_self_offset(&mut self, offset: u64) {
        match self {
            Self::Internal { self_offset, .. } | Self::External { self_offset, .. } => *self_offset = offset,
        }
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }

    /// Encode the entry body (everything from `self_offset` onward, i.e. not
    /// including the 4-byte length prefix that precedes it in the page).
    fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Internal { key, self_offset, .. } => {
                buf.extend_from_slice(&self_offset.to_be_bytes());
                buf.push(0u8);
                encode_key(key, &mut buf);
            }
            Self::External { key, value_offset, prev_offset, next_offset, self_offset } => {
                buf.extend_from_slice(&self_offset.to_be_bytes());
                buf.push(1u8);
                encode_key(key, &mut buf);
                buf.extend_from_slice(&value_offset.to_be_bytes());
                buf.extend_from_slice(&prev_offset.to_be_bytes());
                buf.extend_from_slice(&next_offset.to_be_bytes());
            }
        }
        buf
    }

    /// Encode the full entry record: `size:u32 | body`. `size` is
    /// `body.len()` (everything from `self_offset` onward).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&usize_to_u32_saturating(body.len()).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decode an entry record starting at `bytes[0]`. Returns the entry and
    /// the number of bytes consumed (the full record, length prefix included).
    ///
    /// # Errors
    /// Returns an error if the record is truncated or has an invalid key/flag.
    pub fn decode(bytes: &[u8]) -> KvResult<(Self, usize)> {
        if bytes.len() < 4 {
            return Err(KvError::Corruption("truncated entry size prefix".into()));
        }
        let size = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let total = 4 + size;
        if bytes.len() < total {
            return Err(KvError::Corruption("truncated entry body".into()));
        }
        let body = &bytes[4..total];
        if body.len() < 9 {
            return Err(KvError::Corruption("entry body too short".into()));
        }
        let self_offset = u64::from_be_bytes(body[0..8].try_into().unwrap());
        let is_external = body[8];
        let mut cursor = 9;
        let (key, consumed) = decode_key(&body[cursor..])?;
        cursor += consumed;
        let entry = match is_external {
            0 => Self::Internal { key, child_page_no: 0, self_offset },
            1 => {
                if body.len() < cursor + 24 {
                    return Err(KvError::Corruption("truncated external entry trailer".into()));
                }
                let value_offset = u64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());
                let prev_offset = u64::from_be_bytes(body[cursor + 8..cursor + 16].try_into().unwrap());
                let next_offset = u64::from_be_bytes(body[cursor + 16..cursor + 24].try_into().unwrap());
                Self::External { key, value_offset, prev_offset, next_offset, self_offset }
            }
            other => return Err(KvError::Corruption(format!("invalid is_external flag {other}"))),
        };
        Ok((entry, total))
    }
}

fn encode_key(key: &Key, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&usize_to_u32_saturating(key.len()).to_be_bytes());
    for unit in key {
        buf.extend_from_slice(&unit.to_be_bytes());
    }
}

fn decode_key(bytes: &[u8]) -> KvResult<(Key, usize)> {
    if bytes.len() < 4 {
        return Err(KvError::Corruption("truncated key length".into()));
    }
    let key_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let needed = 4 + key_len * 2;
    if bytes.len() < needed {
        return Err(KvError::Corruption("truncated key units".into()));
    }
    let mut key = Vec::with_capacity(key_len);
    let mut cursor = 4;
    for _ in 0..key_len {
        key.push(u16::from_be_bytes(bytes[cursor..cursor + 2].try_into().unwrap()));
        cursor += 2;
    }
    Ok((key, needed))
}

/// One page's worth of entries. `page_no` is this node's own page.
#[derive(Debug, Clone)]
pub struct Node {
    pub page_no: u32,
    pub entries: Vec<Entry>,
}

impl Node {
    #[must_use]
    pub fn new_leaf(page_no: u32) -> Self {
        Self { page_no, entries: Vec::new() }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.entries.first().is_none_or(Entry::is_external)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= BRANCHING_FACTOR || self.serialized_size() > super::page_file::PAGE_SIZE
    }

    /// Size this node would occupy on disk right now: `page_no(4) + m(4)` plus
    /// `child_page_no(4) + entry_size(4) + entry_bytes` per entry.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        let mut total = 8;
        for e in &self.entries {
            total += 8 + e.encode().len();
        }
        total
    }

    fn child_page_no(entry: &Entry) -> u32 {
        match entry {
            Entry::Internal { child_page_no, .. } => *child_page_no,
            Entry::External { .. } => 0,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.extend_from_slice(&self.page_no.to_be_bytes());
        buf.extend_from_slice(&usize_to_u32_saturating(self.entries.len()).to_be_bytes());
        for e in &self.entries {
            buf.extend_from_slice(&Self::child_page_no(e).to_be_bytes());
            let body = e.encode();
            buf.extend_from_slice(&usize_to_u32_saturating(body.len()).to_be_bytes());
            buf.extend_from_slice(&body);
        }
        buf
    }

    /// Decode a node from a full page's bytes.
    ///
    /// # Errors
    /// Returns an error if the page content is malformed.
    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        if bytes.len() < 8 {
            return Err(KvError::Corruption("truncated node header".into()));
        }
        let page_no = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let m = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
        if m > BRANCHING_FACTOR {
            return Err(KvError::Corruption(format!("node fan-out {m} exceeds branching factor")));
        }
        let mut cursor = 8;
        let mut entries = Vec::with_capacity(m);
        for _ in 0..m {
            if bytes.len() < cursor + 8 {
                return Err(KvError::Corruption("truncated entry header".into()));
            }
            let child_page_no = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
            let entry_size = u32::from_be_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
            let entry_start = cursor + 8;
            if bytes.len() < entry_start + entry_size {
                return Err(KvError::Corruption("truncated entry bytes".into()));
            }
            let (mut entry, consumed) = Entry::decode(&bytes[entry_start..entry_start + entry_size])?;
            if consumed != entry_size {
                return Err(KvError::Corruption("entry size mismatch".into()));
            }
            if let Entry::Internal { child_page_no: c, .. } = &mut entry {
                *c = child_page_no;
            }
            entries.push(entry);
            cursor = entry_start + entry_size;
        }
        Ok(Self { page_no, entries })
    }

    /// Minimum key covered by this node (first entry's key; nodes are kept sorted).
    #[must_use]
    pub fn min_key(&self) -> Option<&Key> {
        self.entries.first().map(Entry::key)
    }

    /// Recompute every entry's `self_offset` from `(page_no, index)`. Must be
    /// called after any structural change to `entries` and before the node
    /// is persisted, so prev/next pointers recorded elsewhere stay valid.
    pub fn assign_self_offsets(&mut self) {
        let page_no = self.page_no;
        for (i, e) in self.entries.iter_mut().enumerate() {
            e.set_self_offset(pack_offset(page_no, i as u32));
        }
    }
}
