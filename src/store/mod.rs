//! # Store Module
//!
//! This module provides the storage layer for Tessera: a paged persistent
//! store with a read-caching file layer, plus the serialization and stream
//! plumbing built on top of it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ PageStore (C3)                                │
//! │  page allocator · root registry · type        │
//! │  dispatch · dirty tracking · change counter   │
//! ├───────────────────────────────────────────────┤
//! │ CachedFile (C2)                               │
//! │  4 KiB aligned LIRS read cache,               │
//! │  evict-then-write invalidation                │
//! ├──────────────────────┬────────────────────────┤
//! │ FileStore (C1)       │ OffHeapStore (C10)     │
//! │  positioned file I/O │ sorted map over        │
//! │  + checksummed header│ directly owned buffers │
//! └──────────────────────┴────────────────────────┘
//! ```
//!
//! Block streams (`streams`, C4) sit beside the page store: the file-backed
//! reader/writer pair works directly on a `FileStore`, while the page-chain
//! pair walks stream trunk/data pages through the `PageStore`.
//!
//! ## The `BlockStore` seam
//!
//! Everything above the raw backing talks to the [`BlockStore`] trait, so the
//! page store reads pages the same way whether the backing is a disk file, a
//! cached disk file, or the off-heap region.
//!
//! ## Thread Safety
//!
//! `FileStore` and `OffHeapStore` take `&mut self` for all mutating calls and
//! rely on the single-writer discipline of the enclosing database.
//! `CachedFile` serializes every method that inspects or mutates cache state
//! behind per-channel locks, so concurrent readers are safe.

mod cached_file;
pub mod compress;
mod data;
mod file_store;
mod lirs;
mod off_heap;
mod page;
mod page_store;
mod streams;

pub use cached_file::CachedFile;
pub use compress::CompressTool;
pub use data::{Data, LENGTH_INT};
pub use file_store::{FileStore, STORE_MAGIC};
pub use lirs::{LirsCache, TieredCache};
pub use off_heap::OffHeapStore;
pub use page::{PageHeader, PageType, UNKNOWN_ROW_COUNT};
pub use page_store::{PageStore, UndoSink, META_PAGE_ID};
pub use streams::{FileBlockReader, FileBlockWriter, PageInputStream, PageOutputStream};

use eyre::Result;

/// Random-access block storage: the common seam under the page store.
///
/// `read_fully_at` blocks until the exact length is read or fails; short
/// reads are an error at this level.
pub trait BlockStore {
    fn read_fully_at(&mut self, pos: u64, dst: &mut [u8]) -> Result<()>;
    fn write_fully_at(&mut self, pos: u64, src: &[u8]) -> Result<()>;
    fn truncate(&mut self, size: u64) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
    fn length(&self) -> u64;
}

impl<T: BlockStore + ?Sized> BlockStore for Box<T> {
    fn read_fully_at(&mut self, pos: u64, dst: &mut [u8]) -> Result<()> {
        (**self).read_fully_at(pos, dst)
    }

    fn write_fully_at(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        (**self).write_fully_at(pos, src)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        (**self).truncate(size)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn length(&self) -> u64 {
        (**self).length()
    }
}
