//! # Page Types and Header Layout
//!
//! Every 4 KiB page begins with a 16-byte header carrying the page's role,
//! its parent (for tree pages), and a role-dependent auxiliary field.
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       1     page_type    Role of the page (leaf, node, trunk, ...)
//! 1       1     flags        Page flags
//! 2       2     entry_count  Number of entries in this page
//! 4       4     parent       Parent page id (tree pages; 0 = root)
//! 8       4     next         Next page (leaf chain / overflow / trunk)
//! 12      4     aux          Row-count hint (data pages) or
//!                            log key (stream pages)
//! ```
//!
//! ## Page Roles
//!
//! Every allocated page has exactly one role at any instant:
//!
//! - **DataLeaf** (0x01): B-tree leaf with keys and row payloads
//! - **DataNode** (0x02): B-tree interior node with pivots and children
//! - **DataOverflow** (0x03): continuation of an oversized row payload
//! - **StreamTrunk** (0x04): stream chain trunk listing data page ids
//! - **StreamData** (0x05): stream chain payload page
//! - **Meta** (0x06): root-page registry and allocator state
//!
//! Asking the store for a page and getting a different role back is a
//! corruption error, reported with the page id.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` uses `zerocopy` for safe transmutation from raw page bytes,
//! so headers are read in place without copying.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::PAGE_HEADER_SIZE;
use crate::error::{DbError, ErrorCode};

/// Stored row-count hint meaning "not currently known".
pub const UNKNOWN_ROW_COUNT: u32 = u32::MAX;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Free = 0x00,
    DataLeaf = 0x01,
    DataNode = 0x02,
    DataOverflow = 0x03,
    StreamTrunk = 0x04,
    StreamData = 0x05,
    Meta = 0x06,
}

impl PageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(PageType::Free),
            0x01 => Some(PageType::DataLeaf),
            0x02 => Some(PageType::DataNode),
            0x03 => Some(PageType::DataOverflow),
            0x04 => Some(PageType::StreamTrunk),
            0x05 => Some(PageType::StreamData),
            0x06 => Some(PageType::Meta),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    entry_count: U16,
    parent: U32,
    next: U32,
    aux: U32,
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            entry_count: U16::new(0),
            parent: U32::new(0),
            next: U32::new(0),
            aux: U32::new(UNKNOWN_ROW_COUNT),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        data[..PAGE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    /// Decodes the page role; an unknown tag is a corruption error carrying
    /// the page id.
    pub fn page_type(&self, page_id: u32) -> Result<PageType> {
        PageType::from_byte(self.page_type).ok_or_else(|| {
            DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {} has invalid type 0x{:02x}", page_id, self.page_type),
            )
        })
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    pub fn entry_count(&self) -> u16 {
        self.entry_count.get()
    }

    pub fn set_entry_count(&mut self, count: u16) {
        self.entry_count = U16::new(count);
    }

    pub fn parent(&self) -> u32 {
        self.parent.get()
    }

    pub fn set_parent(&mut self, parent: u32) {
        self.parent = U32::new(parent);
    }

    pub fn next(&self) -> u32 {
        self.next.get()
    }

    pub fn set_next(&mut self, next: u32) {
        self.next = U32::new(next);
    }

    // the aux field is a row-count hint on data pages and the log key on
    // stream pages

    pub fn row_count_hint(&self) -> u32 {
        self.aux.get()
    }

    pub fn set_row_count_hint(&mut self, count: u32) {
        self.aux = U32::new(count);
    }

    pub fn log_key(&self) -> u32 {
        self.aux.get()
    }

    pub fn set_log_key(&mut self, key: u32) {
        self.aux = U32::new(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_16_bytes() {
        assert_eq!(std::mem::size_of::<PageHeader>(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn new_header_has_unknown_row_count() {
        let header = PageHeader::new(PageType::DataLeaf);

        assert_eq!(header.page_type(7).unwrap(), PageType::DataLeaf);
        assert_eq!(header.entry_count(), 0);
        assert_eq!(header.row_count_hint(), UNKNOWN_ROW_COUNT);
    }

    #[test]
    fn invalid_type_reports_corruption_with_page_id() {
        let mut data = [0u8; PAGE_HEADER_SIZE];
        data[0] = 0xEE;

        let header = PageHeader::from_bytes(&data).unwrap();
        let err = header.page_type(42).unwrap_err();

        assert_eq!(
            crate::error::error_code(&err),
            Some(ErrorCode::FileCorrupted)
        );
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn mutation_through_from_bytes_mut_lands_in_buffer() {
        let mut data = [0u8; PAGE_HEADER_SIZE];
        {
            let header = PageHeader::from_bytes_mut(&mut data).unwrap();
            header.set_page_type(PageType::StreamTrunk);
            header.set_entry_count(3);
            header.set_parent(9);
            header.set_next(10);
            header.set_log_key(77);
        }

        let header = PageHeader::from_bytes(&data).unwrap();
        assert_eq!(header.page_type(0).unwrap(), PageType::StreamTrunk);
        assert_eq!(header.entry_count(), 3);
        assert_eq!(header.parent(), 9);
        assert_eq!(header.next(), 10);
        assert_eq!(header.log_key(), 77);
    }

    #[test]
    fn aux_field_aliases_row_count_and_log_key() {
        let mut header = PageHeader::new(PageType::DataLeaf);

        header.set_row_count_hint(123);
        assert_eq!(header.log_key(), 123);
    }
}
