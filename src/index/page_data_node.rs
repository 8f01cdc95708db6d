//! # Data Node Pages
//!
//! Byte-level representation of B-tree interior nodes.
//!
//! ## Layout
//!
//! ```text
//! +----------------------+
//! | PageHeader (16)      |  entry_count = key count, parent, row-count hint
//! +----------------------+
//! | u32 child[0]         |
//! | i64 key[0]  u32 child[1]
//! | i64 key[1]  u32 child[2]
//! | ...                  |
//! +----------------------+
//! ```
//!
//! Child `i` covers keys `<= key[i]`; the last child covers everything
//! greater than the last key. Nodes are decoded into an owned [`NodePage`]
//! for mutation and re-encoded wholesale, the same discipline as leaves.

use eyre::{ensure, Result};

use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::error::{DbError, ErrorCode};
use crate::store::{PageHeader, PageType, UNKNOWN_ROW_COUNT};

/// Maximum number of keys an interior node can hold.
pub const NODE_MAX_KEYS: usize = (PAGE_SIZE - PAGE_HEADER_SIZE - 4) / 12;

/// Decoded interior node: `children.len() == keys.len() + 1`.
#[derive(Debug, Clone)]
pub struct NodePage {
    pub parent: u32,
    pub row_count_hint: u32,
    pub keys: Vec<i64>,
    pub children: Vec<u32>,
}

impl NodePage {
    pub fn new(parent: u32, left: u32, pivot: i64, right: u32) -> Self {
        Self {
            parent,
            row_count_hint: UNKNOWN_ROW_COUNT,
            keys: vec![pivot],
            children: vec![left, right],
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= NODE_MAX_KEYS
    }

    /// Index of the child that covers `key`.
    pub fn find_child_index(&self, key: i64) -> usize {
        match self.keys.binary_search(&key) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    pub fn child_for(&self, key: i64) -> u32 {
        self.children[self.find_child_index(key)]
    }

    /// Inserts `pivot` at position `idx` with `new_child` to its right.
    pub fn insert_entry(&mut self, idx: usize, pivot: i64, new_child: u32) {
        self.keys.insert(idx, pivot);
        self.children.insert(idx + 1, new_child);
    }

    /// Removes the child at `idx` together with its separator.
    pub fn remove_child(&mut self, idx: usize) {
        self.children.remove(idx);
        if idx < self.keys.len() {
            self.keys.remove(idx);
        } else {
            self.keys.pop();
        }
    }

    pub fn read(data: &[u8], page_id: u32) -> Result<Self> {
        let header = PageHeader::from_bytes(data)?;
        let page_type = header.page_type(page_id)?;
        if page_type != PageType::DataNode {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {page_type:?}, expected DataNode"),
            ));
        }
        let count = header.entry_count() as usize;
        if count > NODE_MAX_KEYS {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("node page {page_id} claims {count} keys"),
            ));
        }
        let mut pos = PAGE_HEADER_SIZE;
        let mut children = Vec::with_capacity(count + 1);
        let mut keys = Vec::with_capacity(count);
        children.push(u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap())); // INVARIANT: count bounded above
        pos += 4;
        for _ in 0..count {
            keys.push(i64::from_le_bytes(data[pos..pos + 8].try_into().unwrap()));
            pos += 8;
            children.push(u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }
        Ok(Self {
            parent: header.parent(),
            row_count_hint: header.row_count_hint(),
            keys,
            children,
        })
    }

    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            self.children.len() == self.keys.len() + 1,
            "node invariant broken: {} children for {} keys",
            self.children.len(),
            self.keys.len()
        );
        ensure!(self.keys.len() <= NODE_MAX_KEYS, "node page overflow");
        data.fill(0);
        let mut header = PageHeader::new(PageType::DataNode);
        header.set_entry_count(self.keys.len() as u16);
        header.set_parent(self.parent);
        header.set_row_count_hint(self.row_count_hint);
        header.write_to(data)?;
        let mut pos = PAGE_HEADER_SIZE;
        data[pos..pos + 4].copy_from_slice(&self.children[0].to_le_bytes());
        pos += 4;
        for (key, child) in self.keys.iter().zip(self.children.iter().skip(1)) {
            data[pos..pos + 8].copy_from_slice(&key.to_le_bytes());
            pos += 8;
            data[pos..pos + 4].copy_from_slice(&child.to_le_bytes());
            pos += 4;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_round_trip() {
        let mut node = NodePage::new(1, 10, 100, 11);
        node.insert_entry(1, 200, 12);

        let mut page = vec![0u8; PAGE_SIZE];
        node.write(&mut page).unwrap();
        let back = NodePage::read(&page, 5).unwrap();

        assert_eq!(back.parent, 1);
        assert_eq!(back.keys, vec![100, 200]);
        assert_eq!(back.children, vec![10, 11, 12]);
    }

    #[test]
    fn child_routing_is_inclusive_on_the_left() {
        let node = NodePage::new(0, 10, 100, 11);

        assert_eq!(node.child_for(99), 10);
        assert_eq!(node.child_for(100), 10);
        assert_eq!(node.child_for(101), 11);
    }

    #[test]
    fn remove_child_keeps_invariant() {
        let mut node = NodePage::new(0, 10, 100, 11);
        node.insert_entry(1, 200, 12);

        node.remove_child(1);
        assert_eq!(node.keys, vec![100]);
        assert_eq!(node.children, vec![10, 12]);

        node.remove_child(1);
        assert_eq!(node.keys, Vec::<i64>::new());
        assert_eq!(node.children, vec![10]);
    }

    #[test]
    fn read_rejects_wrong_type() {
        let mut page = vec![0u8; PAGE_SIZE];
        PageHeader::new(PageType::DataLeaf).write_to(&mut page).unwrap();

        let err = NodePage::read(&page, 4).unwrap_err();
        assert_eq!(
            crate::error::error_code(&err),
            Some(ErrorCode::FileCorrupted)
        );
    }

    #[test]
    fn max_keys_fits_in_a_page() {
        assert!(PAGE_HEADER_SIZE + 4 + NODE_MAX_KEYS * 12 <= PAGE_SIZE);
    }
}
