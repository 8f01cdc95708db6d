//! # Data Leaf and Overflow Pages
//!
//! Byte-level representation of B-tree leaf pages and the overflow chains
//! that carry oversized row payloads.
//!
//! ## Leaf Layout
//!
//! ```text
//! +----------------------+
//! | PageHeader (16)      |  entry_count, parent, next leaf, row-count hint
//! +----------------------+
//! | entries, ascending   |  per entry:
//! |                      |    i64 key | u16 inline_len | u32 overflow_page
//! |                      |    | bytes[inline_len]
//! +----------------------+
//! | free space           |
//! +----------------------+
//! ```
//!
//! Pages are decoded into an owned [`LeafPage`] for mutation and re-encoded
//! wholesale; splits redistribute the decoded entries. This trades a memcpy
//! per mutation for not having to track intra-page fragmentation.
//!
//! ## Overflow Chains
//!
//! A payload longer than [`LEAF_MAX_INLINE`] keeps its head inline and moves
//! the tail into a chain of overflow pages:
//!
//! ```text
//! header(next = next overflow or 0) | u16 used | bytes[used]
//! ```

use eyre::{ensure, Result};

use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE, PAGE_USABLE_SIZE};
use crate::error::{DbError, ErrorCode};
use crate::store::{BlockStore, PageHeader, PageStore, PageType, UNKNOWN_ROW_COUNT};

/// Longest payload stored inline in a leaf; longer rows overflow.
pub const LEAF_MAX_INLINE: usize = PAGE_USABLE_SIZE / 4;

const ENTRY_FIXED: usize = 8 + 2 + 4;
const OVERFLOW_PAYLOAD_START: usize = PAGE_HEADER_SIZE + 2;
const OVERFLOW_CAPACITY: usize = PAGE_SIZE - OVERFLOW_PAYLOAD_START;

/// One leaf entry: key, inline payload head, optional overflow chain.
#[derive(Debug, Clone)]
pub struct LeafEntry {
    pub key: i64,
    pub inline: Vec<u8>,
    pub overflow: u32,
}

impl LeafEntry {
    fn size(&self) -> usize {
        ENTRY_FIXED + self.inline.len()
    }
}

/// Decoded leaf page.
#[derive(Debug, Clone)]
pub struct LeafPage {
    pub parent: u32,
    pub next: u32,
    pub row_count_hint: u32,
    pub entries: Vec<LeafEntry>,
}

impl LeafPage {
    pub fn empty(parent: u32) -> Self {
        Self {
            parent,
            next: 0,
            row_count_hint: UNKNOWN_ROW_COUNT,
            entries: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Binary search by key: `Ok(i)` found, `Err(i)` insertion point.
    pub fn find_key(&self, key: i64) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by_key(&key, |e| e.key)
    }

    fn used(&self) -> usize {
        PAGE_HEADER_SIZE + self.entries.iter().map(LeafEntry::size).sum::<usize>()
    }

    /// Whether an additional entry of `size` payload bytes still fits.
    pub fn fits(&self, inline_len: usize) -> bool {
        self.used() + ENTRY_FIXED + inline_len <= PAGE_SIZE
    }

    pub fn read(data: &[u8], page_id: u32) -> Result<Self> {
        let header = PageHeader::from_bytes(data)?;
        let page_type = header.page_type(page_id)?;
        if page_type != PageType::DataLeaf {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {page_type:?}, expected DataLeaf"),
            ));
        }
        let count = header.entry_count() as usize;
        let mut entries = Vec::with_capacity(count);
        let mut pos = PAGE_HEADER_SIZE;
        for _ in 0..count {
            if pos + ENTRY_FIXED > PAGE_SIZE {
                return Err(DbError::get(
                    ErrorCode::FileCorrupted,
                    format!("leaf page {page_id} entry table overflows the page"),
                ));
            }
            let key = i64::from_le_bytes(data[pos..pos + 8].try_into().unwrap()); // INVARIANT: bounds checked above
            let inline_len =
                u16::from_le_bytes(data[pos + 8..pos + 10].try_into().unwrap()) as usize;
            let overflow = u32::from_le_bytes(data[pos + 10..pos + 14].try_into().unwrap());
            pos += ENTRY_FIXED;
            if pos + inline_len > PAGE_SIZE {
                return Err(DbError::get(
                    ErrorCode::FileCorrupted,
                    format!("leaf page {page_id} payload overflows the page"),
                ));
            }
            entries.push(LeafEntry {
                key,
                inline: data[pos..pos + inline_len].to_vec(),
                overflow,
            });
            pos += inline_len;
        }
        Ok(Self {
            parent: header.parent(),
            next: header.next(),
            row_count_hint: header.row_count_hint(),
            entries,
        })
    }

    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            self.used() <= PAGE_SIZE,
            "leaf page overflow: {} entries, {} bytes",
            self.entries.len(),
            self.used()
        );
        data.fill(0);
        let mut header = PageHeader::new(PageType::DataLeaf);
        header.set_entry_count(self.entries.len() as u16);
        header.set_parent(self.parent);
        header.set_next(self.next);
        header.set_row_count_hint(self.row_count_hint);
        header.write_to(data)?;
        let mut pos = PAGE_HEADER_SIZE;
        for entry in &self.entries {
            data[pos..pos + 8].copy_from_slice(&entry.key.to_le_bytes());
            data[pos + 8..pos + 10].copy_from_slice(&(entry.inline.len() as u16).to_le_bytes());
            data[pos + 10..pos + 14].copy_from_slice(&entry.overflow.to_le_bytes());
            pos += ENTRY_FIXED;
            data[pos..pos + entry.inline.len()].copy_from_slice(&entry.inline);
            pos += entry.inline.len();
        }
        Ok(())
    }
}

/// Stores the tail of an oversized payload as an overflow chain, returning
/// the first overflow page id.
pub fn write_overflow_chain<S: BlockStore>(
    store: &mut PageStore<S>,
    tail: &[u8],
) -> Result<u32> {
    let chunks: Vec<&[u8]> = tail.chunks(OVERFLOW_CAPACITY).collect();
    let ids: Vec<u32> = chunks.iter().map(|_| store.allocate_page()).collect();
    for (i, (id, chunk)) in ids.iter().zip(&chunks).enumerate() {
        let page = store.page_mut(*id)?;
        let mut header = PageHeader::new(PageType::DataOverflow);
        header.set_next(ids.get(i + 1).copied().unwrap_or(0));
        header.write_to(page)?;
        page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2]
            .copy_from_slice(&(chunk.len() as u16).to_le_bytes());
        page[OVERFLOW_PAYLOAD_START..OVERFLOW_PAYLOAD_START + chunk.len()].copy_from_slice(chunk);
    }
    Ok(ids[0])
}

/// Appends the overflow chain starting at `first` to `out`.
pub fn read_overflow_chain<S: BlockStore>(
    store: &mut PageStore<S>,
    first: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let mut id = first;
    while id != 0 {
        let page = store.expect_page(id, PageType::DataOverflow)?;
        let header = PageHeader::from_bytes(page)?;
        let used = u16::from_le_bytes(
            page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].try_into().unwrap(), // INVARIANT: page is PAGE_SIZE bytes
        ) as usize;
        out.extend_from_slice(&page[OVERFLOW_PAYLOAD_START..OVERFLOW_PAYLOAD_START + used]);
        id = header.next();
    }
    Ok(())
}

/// Frees every page of an overflow chain.
pub fn free_overflow_chain<S: BlockStore>(store: &mut PageStore<S>, first: u32) -> Result<()> {
    let mut id = first;
    while id != 0 {
        let page = store.expect_page(id, PageType::DataOverflow)?;
        let next = PageHeader::from_bytes(page)?.next();
        store.free_page(id);
        id = next;
    }
    Ok(())
}
