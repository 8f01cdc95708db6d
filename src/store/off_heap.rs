//! # Off-Heap Page Backing
//!
//! [`OffHeapStore`] keeps page data in directly owned buffers indexed by a
//! sorted address map, so the page store can run entirely in memory with the
//! same `BlockStore` seam as a disk file.
//!
//! ## Addressing
//!
//! Every write at a fresh position allocates one buffer of exactly the
//! written length and stores it under that position. Reads locate the entry
//! with the greatest start address `<= pos` and serve a view into it.
//! Buffers are whole-entry units:
//!
//! - overwriting an entry in place requires the exact position and length,
//! - a write landing strictly inside an existing entry is rejected
//!   (`ERROR_READING_FAILED`: partial overwrite is not supported),
//! - `free` removes whole entries only, returning the range to the
//!   free-space set,
//! - `truncate` removes whole entries at or above the cut and rejects cuts
//!   through the middle of a buffer.
//!
//! ## Counters
//!
//! `read_count` / `read_bytes` / `write_count` / `write_bytes` are atomic so
//! concurrent readers can be observed without taking the map lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use roaring::RoaringBitmap;

use eyre::Result;

use crate::config::CACHE_BLOCK_SIZE;
use crate::error::{DbError, ErrorCode};

use super::BlockStore;

/// In-memory block storage over a sorted page-address map.
#[derive(Debug, Default)]
pub struct OffHeapStore {
    memory: BTreeMap<u64, Box<[u8]>>,
    file_size: u64,
    free_space: RoaringBitmap,
    read_count: AtomicU64,
    read_bytes: AtomicU64,
    write_count: AtomicU64,
    write_bytes: AtomicU64,
}

impl OffHeapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn write_bytes(&self) -> u64 {
        self.write_bytes.load(Ordering::Relaxed)
    }

    fn floor_entry(&self, pos: u64) -> Option<(u64, &[u8])> {
        self.memory
            .range(..=pos)
            .next_back()
            .map(|(k, v)| (*k, v.as_ref()))
    }

    /// Zero-copy view of `len` bytes starting at `pos`.
    pub fn slice(&self, pos: u64, len: usize) -> Result<&[u8]> {
        let (start, buf) = self.floor_entry(pos).ok_or_else(|| {
            DbError::get(
                ErrorCode::ErrorReadingFailed,
                format!("could not read from position {pos}"),
            )
        })?;
        let offset = (pos - start) as usize;
        if offset + len > buf.len() {
            return Err(DbError::get(
                ErrorCode::ErrorReadingFailed,
                format!("could not read {len} bytes from position {pos}"),
            ));
        }
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(len as u64, Ordering::Relaxed);
        Ok(&buf[offset..offset + len])
    }

    /// Writes `src` at `pos`: in-place when an entry of exactly this position
    /// and length exists, as a fresh entry when the range is unoccupied.
    pub fn write_fully(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        self.file_size = self.file_size.max(pos + src.len() as u64);
        if let Some((start, prev_len)) = self.floor_entry(pos).map(|(s, b)| (s, b.len())) {
            if start == pos {
                if prev_len != src.len() {
                    return Err(DbError::get(
                        ErrorCode::ErrorReadingFailed,
                        format!(
                            "could not write to position {pos}; partial overwrite is not supported"
                        ),
                    ));
                }
                self.write_count.fetch_add(1, Ordering::Relaxed);
                self.write_bytes.fetch_add(src.len() as u64, Ordering::Relaxed);
                if let Some(buf) = self.memory.get_mut(&pos) {
                    buf.copy_from_slice(src);
                }
                return Ok(());
            }
            if start + prev_len as u64 > pos {
                return Err(DbError::get(
                    ErrorCode::ErrorReadingFailed,
                    format!(
                        "could not write to position {pos}; partial overwrite is not supported"
                    ),
                ));
            }
        }
        self.write_new_entry(pos, src);
        Ok(())
    }

    fn write_new_entry(&mut self, pos: u64, src: &[u8]) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(src.len() as u64, Ordering::Relaxed);
        self.memory.insert(pos, src.to_vec().into_boxed_slice());
    }

    /// Returns the range to the free-space set and removes the entry.
    /// A mismatched length is a partial free and is rejected.
    pub fn free(&mut self, pos: u64, len: usize) -> Result<()> {
        let first = pos / CACHE_BLOCK_SIZE as u64;
        let blocks = len.div_ceil(CACHE_BLOCK_SIZE) as u64;
        self.free_space
            .insert_range(first as u32..(first + blocks) as u32);
        match self.memory.remove(&pos) {
            // nothing was written at this position (just allocated)
            None => Ok(()),
            Some(buf) if buf.len() == len => Ok(()),
            Some(_) => Err(DbError::get(
                ErrorCode::ErrorReadingFailed,
                format!("partial remove is not supported at position {pos}"),
            )),
        }
    }

    /// Removes every entry at or above `size`; rejects truncation through the
    /// middle of an entry.
    pub fn truncate_to(&mut self, size: u64) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        if size == 0 {
            self.file_size = 0;
            self.memory.clear();
            return Ok(());
        }
        self.file_size = size;
        if let Some((start, buf)) = self.floor_entry(size.saturating_sub(1)) {
            if start < size && start + buf.len() as u64 > size {
                return Err(DbError::get(
                    ErrorCode::ErrorReadingFailed,
                    format!("could not truncate to {size}; partial truncate is not supported"),
                ));
            }
        }
        let doomed: Vec<u64> = self.memory.range(size..).map(|(k, _)| *k).collect();
        for pos in doomed {
            self.memory.remove(&pos);
        }
        Ok(())
    }
}

impl BlockStore for OffHeapStore {
    fn read_fully_at(&mut self, pos: u64, dst: &mut [u8]) -> Result<()> {
        let view = self.slice(pos, dst.len())?;
        dst.copy_from_slice(view);
        Ok(())
    }

    fn write_fully_at(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        self.write_fully(pos, src)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.truncate_to(size)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn length(&self) -> u64 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_code;

    #[test]
    fn write_then_read_round_trip() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[1, 2, 3, 4]).unwrap();

        assert_eq!(store.slice(0, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(store.slice(1, 2).unwrap(), &[2, 3]);
        assert_eq!(store.file_size(), 4);
    }

    #[test]
    fn read_before_any_write_fails() {
        let store = OffHeapStore::new();

        let err = store.slice(100, 4).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ErrorReadingFailed));
    }

    #[test]
    fn exact_overwrite_in_place() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[0u8; 8]).unwrap();

        store.write_fully(0, &[9u8; 8]).unwrap();

        assert_eq!(store.slice(0, 8).unwrap(), &[9u8; 8]);
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn partial_overwrite_is_rejected_and_original_intact() {
        let mut store = OffHeapStore::new();
        let original: Vec<u8> = (0..100).collect();
        store.write_fully(0, &original).unwrap();

        let err = store.write_fully(25, &[0xFF; 50]).unwrap_err();

        assert_eq!(error_code(&err), Some(ErrorCode::ErrorReadingFailed));
        assert_eq!(store.slice(0, 100).unwrap(), original.as_slice());
    }

    #[test]
    fn mismatched_length_overwrite_at_same_pos_is_rejected() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[0u8; 100]).unwrap();

        let err = store.write_fully(0, &[0u8; 50]).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ErrorReadingFailed));
    }

    #[test]
    fn free_removes_whole_entry_only() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[1u8; 64]).unwrap();

        let err = store.free(0, 32).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ErrorReadingFailed));

        store.write_fully(4096, &[2u8; 64]).unwrap();
        store.free(4096, 64).unwrap();
        assert!(store.slice(4096, 64).is_err());
    }

    #[test]
    fn free_of_never_written_range_is_ok() {
        let mut store = OffHeapStore::new();
        store.free(8192, 4096).unwrap();
    }

    #[test]
    fn truncate_removes_tail_entries() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[1u8; 64]).unwrap();
        store.write_fully(4096, &[2u8; 64]).unwrap();

        store.truncate_to(4096).unwrap();

        assert_eq!(store.file_size(), 4096);
        assert_eq!(store.slice(0, 64).unwrap(), &[1u8; 64]);
        assert!(store.slice(4096, 64).is_err());
    }

    #[test]
    fn truncate_through_an_entry_is_rejected() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[1u8; 64]).unwrap();

        let err = store.truncate_to(32).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::ErrorReadingFailed));
    }

    #[test]
    fn truncate_to_zero_clears_everything() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[1u8; 64]).unwrap();
        store.write_fully(4096, &[2u8; 64]).unwrap();

        store.truncate_to(0).unwrap();

        assert_eq!(store.file_size(), 0);
        assert!(store.slice(0, 1).is_err());
    }

    #[test]
    fn counters_track_traffic() {
        let mut store = OffHeapStore::new();
        store.write_fully(0, &[0u8; 16]).unwrap();
        store.slice(0, 16).unwrap();
        store.slice(0, 8).unwrap();

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.write_bytes(), 16);
        assert_eq!(store.read_count(), 2);
        assert_eq!(store.read_bytes(), 24);
    }
}
