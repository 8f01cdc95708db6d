//! # Block Read Cache
//!
//! [`CachedFile`] layers a read cache of aligned 4 KiB blocks over a
//! [`FileStore`]. Reads are served from cached blocks where possible; writes
//! and truncation invalidate the affected blocks *before* touching the
//! underlying channel, so a reader that misses the cache always observes the
//! post-write file contents.
//!
//! ## Read Path
//!
//! For `read(dst, pos)`:
//!
//! 1. `aligned = pos - (pos % BLOCK)`, `off = pos - aligned`.
//! 2. A cached block at `aligned` serves `min(dst.len(), BLOCK - off)` bytes.
//! 3. Otherwise up to one full block is read from the channel starting at
//!    `aligned`, looping until the block is filled or EOF. Only full blocks
//!    are inserted into the cache; short reads near EOF are served but never
//!    cached.
//!
//! ## Write Path
//!
//! `write(src, pos)` removes every cached block whose aligned range
//! intersects `[pos, pos + src.len())`, then delegates. `truncate` clears the
//! cache entirely. Eviction strictly precedes the channel write.
//!
//! ## Concurrency
//!
//! Every method that inspects or mutates cache state locks the single
//! per-channel mutex, and the lock is held across the copy out of a cached
//! block. This serializes readers against invalidating writers at the cost
//! of cross-reader parallelism on one file.

use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::Mutex;

use super::{BlockStore, FileStore, TieredCache};
use crate::config::{CACHE_BLOCK_SIZE, CACHE_MAX_MEMORY, CACHE_SECOND_LEVEL_ENTRIES};

struct Inner {
    base: FileStore,
    cache: TieredCache<Arc<Vec<u8>>>,
}

/// A file channel with an aligned-block read cache.
pub struct CachedFile {
    inner: Mutex<Inner>,
}

fn cache_pos(pos: u64) -> u64 {
    pos - pos % CACHE_BLOCK_SIZE as u64
}

impl CachedFile {
    pub fn new(base: FileStore) -> Self {
        Self::with_capacity(base, CACHE_MAX_MEMORY)
    }

    pub fn with_capacity(base: FileStore, max_memory: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                base,
                cache: TieredCache::new(max_memory, CACHE_SECOND_LEVEL_ENTRIES),
            }),
        }
    }

    /// Reads up to one cache block's worth of bytes at `pos`. Returns the
    /// number of bytes copied, `0` at end of file.
    pub fn read(&self, dst: &mut [u8], pos: u64) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let aligned = cache_pos(pos);
        let off = (pos - aligned) as usize;
        let mut len = (CACHE_BLOCK_SIZE - off).min(dst.len());

        if let Some(block) = inner.cache.get(aligned, CACHE_BLOCK_SIZE) {
            dst[..len].copy_from_slice(&block[off..off + len]);
            return Ok(len);
        }

        let mut block = vec![0u8; CACHE_BLOCK_SIZE];
        let file_len = inner.base.length();
        let available = file_len.saturating_sub(aligned).min(CACHE_BLOCK_SIZE as u64) as usize;
        if available > 0 {
            inner
                .base
                .read_fully_at(aligned, &mut block[..available])?;
        }
        if available == CACHE_BLOCK_SIZE {
            inner
                .cache
                .put(aligned, Arc::new(block.clone()), CACHE_BLOCK_SIZE);
        } else {
            // short block at end of file: serve it, never cache it
            len = len.min(available.saturating_sub(off));
        }
        if len == 0 {
            return Ok(0);
        }
        dst[..len].copy_from_slice(&block[off..off + len]);
        Ok(len)
    }

    /// Evicts every cached block intersecting the write range, then writes
    /// through to the channel.
    pub fn write(&self, src: &[u8], pos: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut p = cache_pos(pos);
        let end = pos + src.len() as u64;
        while p < end {
            inner.cache.remove(p);
            p += CACHE_BLOCK_SIZE as u64;
        }
        inner.base.write_fully_at(pos, src)
    }

    pub fn truncate_to(&self, size: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        BlockStore::truncate(&mut inner.base, size)
    }

    pub fn sync_all(&self) -> Result<()> {
        self.inner.lock().base.sync()
    }

    pub fn file_length(&self) -> u64 {
        self.inner.lock().base.length()
    }

    /// Memory-pressure signal from the host: drops the secondary cache tier.
    pub fn release_secondary(&self) {
        self.inner.lock().cache.release_secondary();
    }

    /// Number of resident cached entries across both tiers (test hook).
    pub fn cached_blocks(&self) -> usize {
        self.inner.lock().cache.len()
    }
}

impl BlockStore for CachedFile {
    fn read_fully_at(&mut self, pos: u64, dst: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < dst.len() {
            let n = self.read(&mut dst[done..], pos + done as u64)?;
            ensure!(
                n > 0,
                "unexpected end of file at {} (wanted {} bytes)",
                pos + done as u64,
                dst.len()
            );
            done += n;
        }
        Ok(())
    }

    fn write_fully_at(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        self.write(src, pos)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.truncate_to(size)
    }

    fn sync(&mut self) -> Result<()> {
        self.sync_all()
    }

    fn length(&self) -> u64 {
        self.file_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FILE_HEADER_SIZE;
    use tempfile::tempdir;

    fn test_file(bytes: usize) -> (tempfile::TempDir, CachedFile) {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("c.t.db"), "rw").unwrap();
        let payload: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
        store
            .write_fully_at(FILE_HEADER_SIZE as u64, &payload)
            .unwrap();
        (dir, CachedFile::new(store))
    }

    #[test]
    fn read_through_populates_cache() {
        let (_dir, file) = test_file(3 * CACHE_BLOCK_SIZE);

        let mut buf = [0u8; 64];
        let n = file.read(&mut buf, CACHE_BLOCK_SIZE as u64).unwrap();

        assert_eq!(n, 64);
        assert_eq!(file.cached_blocks(), 1);

        // second read of the same block must hit the cache
        let n = file.read(&mut buf, CACHE_BLOCK_SIZE as u64 + 100).unwrap();
        assert_eq!(n, 64);
        assert_eq!(file.cached_blocks(), 1);
    }

    #[test]
    fn read_never_crosses_a_block_boundary() {
        let (_dir, file) = test_file(3 * CACHE_BLOCK_SIZE);

        let mut buf = [0u8; 256];
        let n = file
            .read(&mut buf, CACHE_BLOCK_SIZE as u64 - 10)
            .unwrap();

        assert_eq!(n, 10);
    }

    #[test]
    fn write_evicts_then_reads_fresh_bytes() {
        let (_dir, file) = test_file(2 * CACHE_BLOCK_SIZE);

        let mut before = [0u8; 4];
        file.read(&mut before, 0).unwrap();
        assert_eq!(file.cached_blocks(), 1);

        file.write(&[0xAA, 0xBB, 0xCC, 0xDD], 0).unwrap();

        let mut after = [0u8; 4];
        file.read(&mut after, 0).unwrap();
        assert_eq!(after, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn short_tail_block_is_not_cached() {
        let (_dir, file) = test_file(100);

        let mut buf = [0u8; 32];
        let n = file.read(&mut buf, FILE_HEADER_SIZE as u64 + 90).unwrap();

        assert_eq!(n, 10);
        assert_eq!(file.cached_blocks(), 0);
    }

    #[test]
    fn read_past_end_reports_eof() {
        let (_dir, file) = test_file(64);

        let mut buf = [0u8; 8];
        let n = file.read(&mut buf, 10 * CACHE_BLOCK_SIZE as u64).unwrap();

        assert_eq!(n, 0);
    }

    #[test]
    fn truncate_clears_the_cache() {
        let (_dir, file) = test_file(2 * CACHE_BLOCK_SIZE);

        let mut buf = [0u8; 16];
        file.read(&mut buf, 0).unwrap();
        assert!(file.cached_blocks() > 0);

        file.truncate_to(FILE_HEADER_SIZE as u64).unwrap();

        assert_eq!(file.cached_blocks(), 0);
        assert_eq!(file.file_length(), FILE_HEADER_SIZE as u64);
    }

    #[test]
    fn read_fully_spans_blocks() {
        let (_dir, mut_file) = test_file(3 * CACHE_BLOCK_SIZE);
        let mut file = mut_file;

        let mut buf = vec![0u8; CACHE_BLOCK_SIZE + 512];
        file.read_fully_at(100, &mut buf).unwrap();

        let mut expected = vec![0u8; CACHE_BLOCK_SIZE + 512];
        for (i, b) in expected.iter_mut().enumerate() {
            let file_pos = 100 + i;
            *b = ((file_pos - FILE_HEADER_SIZE) % 251) as u8;
        }
        assert_eq!(buf, expected);
    }
}
