//! Append-only value storage, separate from the page file so that large
//! values never force a node split on their own.
//!
//! Layout: an 8-byte header (`eov`, big-endian `u64`, the offset of the next
//! free byte) followed by `{ length: u32, units: length * 2 bytes }` records.

use crate::errors::KvResult;
use crate::key::Value;
use log::error;
use parking_lot::RwLock;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_SIZE: u64 = 8;

pub struct ValueHeap {
    file: RwLock<File>,
    eov: RwLock<u64>,
}

impl ValueHeap {
    /// Open (creating if absent) a value heap at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened/created.
    pub fn open(path: &Path) -> KvResult<Self> {
        let is_new = !path.exists();
        if is_new {
            drop(crate::fsutil::create_secure(path)?);
        }
        let mut file = crate::fsutil::open_rw_no_trunc(path)?;
        let eov = if is_new {
            file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to initialize value heap {path:?}: {e}"))?;
            file.write_all(&HEADER_SIZE.to_be_bytes())
                .inspect_err(|e| error!("failed to write value heap header {path:?}: {e}"))?;
            file.sync_data().inspect_err(|e| error!("failed to sync new value heap {path:?}: {e}"))?;
            HEADER_SIZE
        } else {
            let mut buf = [0u8; 8];
            file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to seek value heap {path:?}: {e}"))?;
            file.read_exact(&mut buf).inspect_err(|e| error!("failed to read value heap header {path:?}: {e}"))?;
            u64::from_be_bytes(buf)
        };
        Ok(Self { file: RwLock::new(file), eov: RwLock::new(eov) })
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        *self.eov.read()
    }

    /// Re-read `eov` from disk, discarding the cached copy. Needed after an
    /// out-of-band file replacement (snapshot rollback).
    ///
    /// # Errors
    /// Returns an error if the header cannot be read.
    pub fn reload_eov(&self) -> KvResult<()> {
        let mut buf = [0u8; 8];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to seek while reloading value heap eov: {e}"))?;
        file.read_exact(&mut buf).inspect_err(|e| error!("failed to reload value heap eov: {e}"))?;
        drop(file);
        *self.eov.write() = u64::from_be_bytes(buf);
        Ok(())
    }

    /// Append `value`, returning the offset identifying it.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn append(&self, value: &Value) -> KvResult<u64> {
        let mut eov = self.eov.write();
        let offset = *eov;
        let len = crate::utils::num::usize_to_u32(value.len())
            .ok_or_else(|| crate::errors::KvError::Corruption("value too long".into()))?;
        let mut buf = Vec::with_capacity(4 + value.len() * 2);
        buf.extend_from_slice(&len.to_be_bytes());
        for unit in value {
            buf.extend_from_slice(&unit.to_be_bytes());
        }
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset)).inspect_err(|e| error!("failed to seek to append offset {offset}: {e}"))?;
        file.write_all(&buf).inspect_err(|e| error!("failed to append value at offset {offset}: {e}"))?;
        *eov = offset + buf.len() as u64;
        file.seek(SeekFrom::Start(0)).inspect_err(|e| error!("failed to seek while updating value heap eov: {e}"))?;
        file.write_all(&eov.to_be_bytes()).inspect_err(|e| error!("failed to update value heap eov: {e}"))?;
        Ok(offset)
    }

    /// Read the value stored at `offset`.
    ///
    /// # Errors
    /// Returns an error if the offset is out of range or the record is malformed.
    pub fn read(&self, offset: u64) -> KvResult<Value> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset)).inspect_err(|e| error!("failed to seek to value at offset {offset}: {e}"))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).inspect_err(|e| error!("failed to read value length at offset {offset}: {e}"))?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut units = Vec::with_capacity(len);
        let mut unit_buf = [0u8; 2];
        for _ in 0..len {
            file.read_exact(&mut unit_buf).inspect_err(|e| error!("failed to read value body at offset {offset}: {e}"))?;
            units.push(u16::from_be_bytes(unit_buf));
        }
        Ok(units)
    }

    /// `fsync` the underlying file.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> KvResult<()> {
        self.file.write().sync_data().inspect_err(|e| error!("failed to sync value heap: {e}"))?;
        Ok(())
    }
}
