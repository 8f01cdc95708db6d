//! # Page Store
//!
//! [`PageStore`] owns the paged representation of one database: the page
//! allocator, the per-index root-page registry, typed page access, dirty
//! tracking, and the store-wide change counter.
//!
//! ## Page Layout
//!
//! ```text
//! page 0   file header page (magic, version, checksum: written by C1)
//! page 1   meta page: root registry + allocator state
//! page 2+  data, stream, and overflow pages
//! ```
//!
//! ## Slot State Machine
//!
//! ```text
//! FREE ──allocate──> ALLOCATED ──page_mut──> DIRTY
//!   ▲                    │  ▲                  │
//!   └──────free──────────┘  └──────flush───────┘  (DIRTY → CLEAN)
//! ```
//!
//! `page_mut` marks a page dirty and captures its pre-image once per flush
//! cycle (`log_undo`); `flush` writes every dirty page through the cached
//! file and clears the pre-images; `free` returns a page to the allocator and
//! drops its buffer.
//!
//! ## Meta Page
//!
//! The meta page persists the root-page registry and the allocation bitmap:
//!
//! ```text
//! header | u32 root_count | (u32 index_id, u32 root_page)*
//!        | u32 bitmap_len | roaring bitmap bytes
//! ```
//!
//! ## Change Counter
//!
//! Every mutating call increments the change counter, which higher layers use
//! for optimistic read validation. The counter is atomic so readers can poll
//! it without the store lock.
//!
//! ## Concurrency
//!
//! All mutating methods take `&mut self`; the enclosing database wraps the
//! store in a `parking_lot::RwLock`, giving one logical writer and concurrent
//! readers through the block cache underneath.

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{ensure, Result};
use hashbrown::HashMap;
use roaring::RoaringBitmap;
use tracing::debug;

use super::{BlockStore, PageHeader, PageType};
use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::error::{DbError, ErrorCode};
use crate::types::Row;

/// Page id of the meta page.
pub const META_PAGE_ID: u32 = 1;

const FIRST_DATA_PAGE: u32 = 2;

/// Receiver for logical row undo records; implemented by the session so the
/// store can log row changes without depending on the engine layer.
pub trait UndoSink {
    fn log_row(&mut self, table_id: u32, row: &Row, insert: bool) -> Result<()>;
    fn log_truncate(&mut self, table_id: u32) -> Result<()>;
    /// Registers a large value for cleanup if the transaction rolls back.
    fn remove_at_commit_stop(&mut self, index_id: u32, value: crate::types::Value);
}

/// Paged store over any block backing.
pub struct PageStore<S: BlockStore> {
    file: S,
    buffers: HashMap<u32, Box<[u8]>>,
    dirty: RoaringBitmap,
    allocated: RoaringBitmap,
    undo_images: HashMap<u32, Box<[u8]>>,
    root_pages: HashMap<u32, u32>,
    change_count: AtomicU64,
    page_count: u32,
}

impl<S: BlockStore> PageStore<S> {
    /// Initializes a fresh store over `file`.
    pub fn create(file: S) -> Result<Self> {
        let mut allocated = RoaringBitmap::new();
        allocated.insert(0);
        allocated.insert(META_PAGE_ID);
        let mut store = Self {
            file,
            buffers: HashMap::new(),
            dirty: RoaringBitmap::new(),
            allocated,
            undo_images: HashMap::new(),
            root_pages: HashMap::new(),
            change_count: AtomicU64::new(0),
            page_count: FIRST_DATA_PAGE,
        };
        store.init_meta_page()?;
        store.flush()?;
        Ok(store)
    }

    /// Opens an existing store, reading the registry and allocator state from
    /// the meta page.
    pub fn open(file: S) -> Result<Self> {
        let page_count = (file.length() / PAGE_SIZE as u64).max(FIRST_DATA_PAGE as u64) as u32;
        let mut store = Self {
            file,
            buffers: HashMap::new(),
            dirty: RoaringBitmap::new(),
            allocated: RoaringBitmap::new(),
            undo_images: HashMap::new(),
            root_pages: HashMap::new(),
            change_count: AtomicU64::new(0),
            page_count,
        };
        store.read_meta_page()?;
        debug!(
            pages = store.page_count,
            roots = store.root_pages.len(),
            "page store opened"
        );
        Ok(store)
    }

    fn init_meta_page(&mut self) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        PageHeader::new(PageType::Meta).write_to(&mut buf[..])?;
        self.buffers.insert(META_PAGE_ID, buf);
        self.dirty.insert(META_PAGE_ID);
        Ok(())
    }

    fn read_meta_page(&mut self) -> Result<()> {
        let buf = self.load_page(META_PAGE_ID)?;
        let header = PageHeader::from_bytes(&buf)?;
        let page_type = header.page_type(META_PAGE_ID)?;
        if page_type != PageType::Meta {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {META_PAGE_ID} is {page_type:?}, expected Meta"),
            ));
        }
        let mut pos = PAGE_HEADER_SIZE;
        let root_count = read_u32(&buf, &mut pos)?;
        for _ in 0..root_count {
            let index_id = read_u32(&buf, &mut pos)?;
            let root_page = read_u32(&buf, &mut pos)?;
            self.root_pages.insert(index_id, root_page);
        }
        let bitmap_len = read_u32(&buf, &mut pos)? as usize;
        if pos + bitmap_len > PAGE_SIZE {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("meta page allocator state overflows the page ({bitmap_len} bytes)"),
            ));
        }
        self.allocated = RoaringBitmap::deserialize_from(&buf[pos..pos + bitmap_len])
            .map_err(|e| DbError::get(ErrorCode::FileCorrupted, format!("meta allocator: {e}")))?;
        self.buffers.insert(META_PAGE_ID, buf);
        Ok(())
    }

    fn write_meta_page(&mut self) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        PageHeader::new(PageType::Meta).write_to(&mut buf[..])?;
        let mut pos = PAGE_HEADER_SIZE;
        write_u32(&mut buf, &mut pos, self.root_pages.len() as u32);
        let mut roots: Vec<(u32, u32)> = self.root_pages.iter().map(|(k, v)| (*k, *v)).collect();
        roots.sort_unstable();
        for (index_id, root_page) in roots {
            write_u32(&mut buf, &mut pos, index_id);
            write_u32(&mut buf, &mut pos, root_page);
        }
        let mut bitmap = Vec::new();
        self.allocated.serialize_into(&mut bitmap)?;
        ensure!(
            pos + 4 + bitmap.len() <= PAGE_SIZE,
            "allocator state too large for the meta page"
        );
        write_u32(&mut buf, &mut pos, bitmap.len() as u32);
        buf[pos..pos + bitmap.len()].copy_from_slice(&bitmap);
        self.buffers.insert(META_PAGE_ID, buf);
        self.dirty.insert(META_PAGE_ID);
        Ok(())
    }

    fn load_page(&mut self, page_id: u32) -> Result<Box<[u8]>> {
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        let pos = page_id as u64 * PAGE_SIZE as u64;
        if pos + (PAGE_SIZE as u64) <= self.file.length() {
            self.file.read_fully_at(pos, &mut buf)?;
        }
        Ok(buf)
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn is_allocated(&self, page_id: u32) -> bool {
        self.allocated.contains(page_id)
    }

    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::Acquire)
    }

    /// Happens-after point for every mutating store call.
    pub fn increment_change_count(&self) {
        self.change_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Allocates the lowest free page id, reusing freed pages first.
    pub fn allocate_page(&mut self) -> u32 {
        let mut id = FIRST_DATA_PAGE;
        while self.allocated.contains(id) {
            id += 1;
        }
        self.allocated.insert(id);
        if id >= self.page_count {
            self.page_count = id + 1;
        }
        self.increment_change_count();
        id
    }

    /// Returns a page to the allocator and invalidates its buffer.
    pub fn free_page(&mut self, page_id: u32) {
        self.allocated.remove(page_id);
        self.buffers.remove(&page_id);
        self.dirty.remove(page_id);
        self.undo_images.remove(&page_id);
        self.increment_change_count();
    }

    pub fn page(&mut self, page_id: u32) -> Result<&[u8]> {
        if !self.buffers.contains_key(&page_id) {
            let buf = self.load_page(page_id)?;
            self.buffers.insert(page_id, buf);
        }
        Ok(&self.buffers[&page_id][..])
    }

    /// Mutable page access: captures the pre-image on first touch and marks
    /// the page dirty.
    pub fn page_mut(&mut self, page_id: u32) -> Result<&mut [u8]> {
        if !self.buffers.contains_key(&page_id) {
            let buf = self.load_page(page_id)?;
            self.buffers.insert(page_id, buf);
        }
        if !self.dirty.contains(page_id) {
            self.dirty.insert(page_id);
            let image = self.buffers[&page_id].clone();
            self.undo_images.entry(page_id).or_insert(image);
        }
        self.increment_change_count();
        Ok(self.buffers.get_mut(&page_id).unwrap()) // INVARIANT: inserted above
    }

    /// Role of the page at `page_id`.
    pub fn page_type(&mut self, page_id: u32) -> Result<PageType> {
        let buf = self.page(page_id)?;
        PageHeader::from_bytes(buf)?.page_type(page_id)
    }

    /// Reads a page and verifies its role; a mismatch is `FILE_CORRUPTED_1`
    /// with page-id context.
    pub fn expect_page(&mut self, page_id: u32, expected: PageType) -> Result<&[u8]> {
        let actual = self.page_type(page_id)?;
        if actual != expected {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {actual:?}, expected {expected:?}"),
            ));
        }
        self.page(page_id)
    }

    /// Marks a page dirty without handing out the buffer.
    pub fn update(&mut self, page_id: u32) -> Result<()> {
        self.page_mut(page_id)?;
        Ok(())
    }

    /// Records an explicit pre-image for a page, used by callers that create
    /// pages which may never be committed.
    pub fn log_undo(&mut self, page_id: u32, prev_image: Option<&[u8]>) {
        if !self.undo_images.contains_key(&page_id) {
            let image = match prev_image {
                Some(bytes) => bytes.to_vec().into_boxed_slice(),
                None => vec![0u8; PAGE_SIZE].into_boxed_slice(),
            };
            self.undo_images.insert(page_id, image);
        }
    }

    /// Pre-image captured for a page in the current flush cycle, if any.
    pub fn undo_image(&self, page_id: u32) -> Option<&[u8]> {
        self.undo_images.get(&page_id).map(|b| &b[..])
    }

    /// Appends a logical row change to the session undo log.
    pub fn log_add_or_remove_row(
        &mut self,
        sink: &mut dyn UndoSink,
        table_id: u32,
        row: &Row,
        insert: bool,
    ) -> Result<()> {
        self.increment_change_count();
        sink.log_row(table_id, row, insert)
    }

    /// Signals a table truncation to the session.
    pub fn log_truncate(&mut self, sink: &mut dyn UndoSink, table_id: u32) -> Result<()> {
        self.increment_change_count();
        sink.log_truncate(table_id)
    }

    // root-page registry

    pub fn root_page(&self, index_id: u32) -> Option<u32> {
        self.root_pages.get(&index_id).copied()
    }

    pub fn set_root_page(&mut self, index_id: u32, page_id: u32) {
        self.root_pages.insert(index_id, page_id);
        self.increment_change_count();
    }

    pub fn remove_root_page(&mut self, index_id: u32) {
        self.root_pages.remove(&index_id);
        self.increment_change_count();
    }

    /// Writes every dirty page through the (caching) file layer and syncs.
    /// Pre-images are dropped: the flushed state is the new baseline.
    pub fn flush(&mut self) -> Result<()> {
        self.write_meta_page()?;
        let dirty: Vec<u32> = self.dirty.iter().collect();
        for page_id in dirty {
            if let Some(buf) = self.buffers.get(&page_id) {
                self.file
                    .write_fully_at(page_id as u64 * PAGE_SIZE as u64, buf)?;
            }
        }
        let flushed = self.dirty.len();
        self.dirty.clear();
        self.undo_images.clear();
        self.file.sync()?;
        debug!(pages = flushed, "page store flushed");
        Ok(())
    }

    /// Truncates the backing below `page_count` pages. Allocating past the
    /// truncation point afterwards is the caller's bug and surfaces as a
    /// fatal corruption error on the next read.
    pub fn truncate(&mut self, page_count: u32) -> Result<()> {
        let keep: Vec<u32> = self.allocated.iter().filter(|&p| p >= page_count).collect();
        for page_id in keep {
            self.free_page(page_id);
        }
        self.page_count = page_count.max(FIRST_DATA_PAGE);
        self.file.truncate(page_count as u64 * PAGE_SIZE as u64)?;
        self.increment_change_count();
        Ok(())
    }
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    ensure!(*pos + 4 <= buf.len(), "meta page read out of bounds");
    let v = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()); // INVARIANT: bounds checked above
    *pos += 4;
    Ok(v)
}

fn write_u32(buf: &mut [u8], pos: &mut usize, v: u32) {
    buf[*pos..*pos + 4].copy_from_slice(&v.to_le_bytes());
    *pos += 4;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CachedFile, FileStore, OffHeapStore};
    use tempfile::tempdir;

    fn memory_store() -> PageStore<OffHeapStore> {
        PageStore::create(OffHeapStore::new()).unwrap()
    }

    #[test]
    fn allocate_reuses_freed_pages() {
        let mut store = memory_store();

        let a = store.allocate_page();
        let b = store.allocate_page();
        assert_eq!((a, b), (2, 3));

        store.free_page(a);
        let c = store.allocate_page();
        assert_eq!(c, a, "freed page should be reused first");
    }

    #[test]
    fn page_mut_marks_dirty_and_captures_pre_image() {
        let mut store = memory_store();
        let id = store.allocate_page();

        {
            let page = store.page_mut(id).unwrap();
            PageHeader::new(PageType::DataLeaf).write_to(page).unwrap();
            page[100] = 0xAB;
        }

        let image = store.undo_image(id).expect("pre-image captured");
        assert_eq!(image[100], 0, "pre-image is the before state");
        assert_eq!(store.page(id).unwrap()[100], 0xAB);
    }

    #[test]
    fn expect_page_rejects_wrong_type() {
        let mut store = memory_store();
        let id = store.allocate_page();
        {
            let page = store.page_mut(id).unwrap();
            PageHeader::new(PageType::StreamData).write_to(page).unwrap();
        }

        let err = store.expect_page(id, PageType::DataLeaf).unwrap_err();

        assert_eq!(
            crate::error::error_code(&err),
            Some(ErrorCode::FileCorrupted)
        );
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn change_count_increases_on_every_mutation() {
        let mut store = memory_store();
        let before = store.change_count();

        let id = store.allocate_page();
        store.page_mut(id).unwrap();
        store.free_page(id);

        assert!(store.change_count() >= before + 3);
    }

    #[test]
    fn root_registry_survives_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.t.db");

        {
            let file = CachedFile::new(FileStore::open(&path, "rw").unwrap());
            let mut store = PageStore::create(file).unwrap();
            let root = store.allocate_page();
            {
                let page = store.page_mut(root).unwrap();
                PageHeader::new(PageType::DataLeaf).write_to(page).unwrap();
            }
            store.set_root_page(7, root);
            store.flush().unwrap();
        }

        let file = CachedFile::new(FileStore::open(&path, "rw").unwrap());
        let store = PageStore::open(file).unwrap();
        assert_eq!(store.root_page(7), Some(2));
        assert!(store.is_allocated(2));
    }

    #[test]
    fn flush_persists_page_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.t.db");

        {
            let file = CachedFile::new(FileStore::open(&path, "rw").unwrap());
            let mut store = PageStore::create(file).unwrap();
            let id = store.allocate_page();
            {
                let page = store.page_mut(id).unwrap();
                PageHeader::new(PageType::DataLeaf).write_to(page).unwrap();
                page[PAGE_HEADER_SIZE] = 0x5A;
            }
            store.flush().unwrap();
        }

        let file = CachedFile::new(FileStore::open(&path, "rw").unwrap());
        let mut store = PageStore::open(file).unwrap();
        assert_eq!(store.page(2).unwrap()[PAGE_HEADER_SIZE], 0x5A);
    }

    #[test]
    fn truncate_frees_tail_pages() {
        let mut store = memory_store();
        let a = store.allocate_page();
        let b = store.allocate_page();
        store.update(a).unwrap();
        store.update(b).unwrap();

        store.truncate(3).unwrap();

        assert!(store.is_allocated(a));
        assert!(!store.is_allocated(b));
        assert_eq!(store.page_count(), 3);
    }
}
