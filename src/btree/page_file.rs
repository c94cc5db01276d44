//! Fixed-size page storage for B-tree nodes.
//!
//! Layout: a 16-byte header (`root_page_no`, `page_count`, `entry_count`,
//! `height`, each a big-endian `u32`) followed by `page_count` pages of
//! exactly [`PAGE_SIZE`] bytes each, starting at byte 16.

use crate::errors::{KvError, KvResult};
use log::error;
use parking_lot::RwLock;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;
const HEADER_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy)]
pub struct PageFileHeader {
    pub root_page_no: u32,
    pub page_count: u32,
    pub entry_count: u32,
    pub height: u32,
}

impl PageFileHeader {
    fn encode(self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.root_page_no.to_be_bytes());
        buf[4..8].copy_from_slice(&self.page_count.to_be_bytes());
        buf[8..12].copy_from_slice(&self.entry_count.to_be_bytes());
        buf[12..16].copy_from_slice(&self.height.to_be_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            root_page_no: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            page_count: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            entry_count: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            height: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

/// A page-addressed file: one header plus a contiguous array of fixed pages.
pub struct PageFile {
    file: RwLock<File>,
    header: RwLock<PageFileHeader>,
}

impl PageFile {
    /// Open (creating if absent) a page file at `path`. A freshly created
    /// file starts with an empty root leaf at page 0.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened/created or is corrupt.
    pub fn open(path: &Path) -> KvResult<Self> {
        let is_new = !path.exists();
        if is_new {
            drop(crate::fsutil::create_secure(path)?);
        }
        let mut file = crate::fsutil::open_rw_no_trunc(path)?;
        let header = if is_new {
            let h = PageFileHeader { root_page_no: 0, page_count: 1, entry_count: 0, height: 1 };
            file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to initialize page file {path:?}: {e}"))?;
            file.write_all(&h.encode()).inspect_err(|e| error!("failed to write page file header {path:?}: {e}"))?;
            file.write_all(&[0u8; PAGE_SIZE]).inspect_err(|e| error!("failed to write root page {path:?}: {e}"))?;
            file.sync_data().inspect_err(|e| error!("failed to sync new page file {path:?}: {e}"))?;
            h
        } else {
            let mut buf = [0u8; HEADER_SIZE as usize];
            file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to seek page file {path:?}: {e}"))?;
            file.read_exact(&mut buf).inspect_err(|e| error!("failed to read page file header {path:?}: {e}"))?;
            PageFileHeader::decode(&buf)
        };
        Ok(Self { file: RwLock::new(file), header: RwLock::new(header) })
    }

    #[must_use]
    pub fn header(&self) -> PageFileHeader {
        *self.header.read()
    }

    /// Re-read the header from disk, discarding the cached copy. Needed
    /// after an out-of-band file replacement (snapshot rollback) so the
    /// in-memory view matches what is actually on disk.
    ///
    /// # Errors
    /// Returns an error if the header cannot be read.
    pub fn reload_header(&self) -> KvResult<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to seek while reloading page file header: {e}"))?;
        file.read_exact(&mut buf).inspect_err(|e| error!("failed to reload page file header: {e}"))?;
        drop(file);
        *self.header.write() = PageFileHeader::decode(&buf);
        Ok(())
    }

    pub fn set_root(&self, root_page_no: u32) {
        self.header.write().root_page_no = root_page_no;
    }

    pub fn set_height(&self, height: u32) {
        self.header.write().height = height;
    }

    pub fn set_entry_count(&self, entry_count: u32) {
        self.header.write().entry_count = entry_count;
    }

    /// Allocate a new zeroed page, returning its page number.
    ///
    /// # Errors
    /// Returns an error if the file cannot be extended.
    pub fn allocate_page(&self) -> KvResult<u32> {
        let mut header = self.header.write();
        let page_no = header.page_count;
        header.page_count += 1;
        drop(header);
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_offset(page_no)))
            .inspect_err(|e| error!("failed to seek while allocating page {page_no}: {e}"))?;
        file.write_all(&[0u8; PAGE_SIZE]).inspect_err(|e| error!("failed to allocate page {page_no}: {e}"))?;
        Ok(page_no)
    }

    /// Read page `page_no` in full.
    ///
    /// # Errors
    /// Returns an error if the page is out of range or unreadable.
    pub fn read_page(&self, page_no: u32) -> KvResult<Vec<u8>> {
        if page_no >= self.header.read().page_count {
            return Err(KvError::Corruption(format!("page {page_no} out of range")));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_offset(page_no)))
            .inspect_err(|e| error!("failed to seek to page {page_no}: {e}"))?;
        file.read_exact(&mut buf).inspect_err(|e| error!("failed to read page {page_no}: {e}"))?;
        Ok(buf)
    }

    /// Write `bytes` (padded/truncated to [`PAGE_SIZE`]) at `page_no`.
    ///
    /// # Errors
    /// Returns an error if `bytes` is larger than [`PAGE_SIZE`] or the write fails.
    pub fn write_page(&self, page_no: u32, bytes: &[u8]) -> KvResult<()> {
        if bytes.len() > PAGE_SIZE {
            return Err(KvError::Corruption(format!(
                "serialized node of {} bytes exceeds page size {PAGE_SIZE}",
                bytes.len()
            )));
        }
        let mut page = [0u8; PAGE_SIZE];
        page[..bytes.len()].copy_from_slice(bytes);
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_offset(page_no)))
            .inspect_err(|e| error!("failed to seek to page {page_no}: {e}"))?;
        file.write_all(&page).inspect_err(|e| error!("failed to write page {page_no}: {e}"))?;
        Ok(())
    }

    /// Write raw bytes at an absolute file offset (used to patch a single
    /// entry's `self_offset`-addressed bytes in place, without rewriting the
    /// whole page).
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> KvResult<()> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset)).inspect_err(|e| error!("failed to seek to offset {offset}: {e}"))?;
        file.write_all(bytes).inspect_err(|e| error!("failed to write at offset {offset}: {e}"))?;
        Ok(())
    }

    /// Read raw bytes at an absolute file offset.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    pub fn read_at(&self, offset: u64, len: usize) -> KvResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset)).inspect_err(|e| error!("failed to seek to offset {offset}: {e}"))?;
        file.read_exact(&mut buf).inspect_err(|e| error!("failed to read at offset {offset}: {e}"))?;
        Ok(buf)
    }

    /// Flush the header to disk and `fsync` the file.
    ///
    /// # Errors
    /// Returns an error if the write or sync fails.
    pub fn sync(&self) -> KvResult<()> {
        let header = *self.header.read();
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to seek while syncing page file header: {e}"))?;
        file.write_all(&header.encode()).inspect_err(|e| error!("failed to write page file header: {e}"))?;
        file.sync_data().inspect_err(|e| error!("failed to sync page file: {e}"))?;
        Ok(())
    }
}

#[must_use]
pub fn page_offset(page_no: u32) -> u64 {
    HEADER_SIZE + u64::from(page_no) * PAGE_SIZE as u64
}

/// Absolute byte offset of a field at `field_offset` within page `page_no`.
#[must_use]
pub fn field_offset(page_no: u32, field_offset: u64) -> u64 {
    page_offset(page_no) + field_offset
}
