//! # Data B-Tree Index
//!
//! The data index gives key-ordered access to the rows of one table, stored
//! as a paged B-tree keyed by the 64-bit row key. Each regular persistent
//! table has one such index even if no primary key is declared.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Key assignment: the main-index column's value when one exists,
//!    otherwise ++last_key (with duplicate-retry enabled)
//! 2. add_try: ask the root to insert
//!    - a full page reports a split point instead of mutating
//!    - interior nodes split their children in place and retry the descent
//!    - when the ROOT reports a split point, its content moves to a fresh
//!      page, that page is split, and the root becomes a node over the two
//!      halves with pivot = (split == 0 ? row.key : key[split-1])
//! 3. On duplicate key: primary-key inserts fail with DUPLICATE_KEY_1;
//!    generated keys are perturbed (first by a small random jump, then by
//!    +1, +2, ...) and retried
//! ```
//!
//! The root page id never changes; splits move content, not the root.
//!
//! ## Row Count Caching
//!
//! The root page header carries a stored row-count hint. Every mutation
//! invalidates it; `write_row_count` persists the live counter on close, so
//! reopening a cleanly closed index skips the counting traversal.
//!
//! ## Memory Accounting
//!
//! `memory_per_page` is an exponentially smoothed estimate of decoded page
//! size: a running mean for the first `MEMORY_FACTOR` samples, then
//! `±1 + (x - avg) / MEMORY_FACTOR` per sample.

use eyre::Result;
use tracing::{debug, trace};

use super::page_data_leaf::{
    free_overflow_chain, read_overflow_chain, write_overflow_chain, LeafEntry, LeafPage,
    LEAF_MAX_INLINE,
};
use super::page_data_node::NodePage;
use super::{Cursor, Index};
use crate::config::{COST_ROW_OFFSET, MEMORY_FACTOR, PAGE_HEADER_SIZE};
use crate::error::{error_code, DbError, ErrorCode};
use crate::store::{BlockStore, Data, PageHeader, PageStore, PageType, UndoSink, UNKNOWN_ROW_COUNT};
use crate::types::{Row, Value};

enum AddOutcome {
    Inserted,
    Split(usize),
}

/// Key-ordered paged index over a table's rows.
#[derive(Debug)]
pub struct PageDataIndex {
    id: u32,
    name: String,
    table_id: u32,
    root_page_id: u32,
    main_index_column: i32,
    last_key: i64,
    row_count: u64,
    memory_per_page: i64,
    memory_count: i64,
}

impl PageDataIndex {
    /// Creates a fresh index with an empty leaf root and registers its root
    /// page.
    pub fn create<S: BlockStore>(
        store: &mut PageStore<S>,
        id: u32,
        table_id: u32,
        table_name: &str,
    ) -> Result<Self> {
        let root_page_id = store.allocate_page();
        LeafPage::empty(0).write(store.page_mut(root_page_id)?)?;
        store.set_root_page(id, root_page_id);
        debug!(index = id, root = root_page_id, "data index created");
        Ok(Self {
            id,
            name: format!("{table_name}_DATA"),
            table_id,
            root_page_id,
            main_index_column: -1,
            last_key: 0,
            row_count: 0,
            memory_per_page: 0,
            memory_count: 0,
        })
    }

    /// Opens an existing index from the root-page registry.
    pub fn open<S: BlockStore>(
        store: &mut PageStore<S>,
        id: u32,
        table_id: u32,
        table_name: &str,
    ) -> Result<Self> {
        let root_page_id = store.root_page(id).ok_or_else(|| {
            DbError::get(
                ErrorCode::FileCorrupted,
                format!("no root page registered for index {id}"),
            )
        })?;
        let mut index = Self {
            id,
            name: format!("{table_name}_DATA"),
            table_id,
            root_page_id,
            main_index_column: -1,
            last_key: 0,
            row_count: 0,
            memory_per_page: 0,
            memory_count: 0,
        };
        let hint = PageHeader::from_bytes(store.page(root_page_id)?)?.row_count_hint();
        index.row_count = if hint == UNKNOWN_ROW_COUNT {
            index.count_rows(store, root_page_id)?
        } else {
            hint as u64
        };
        index.last_key = index.max_key(store, root_page_id)?;
        debug!(index = id, rows = index.row_count, "data index opened");
        Ok(index)
    }

    pub fn set_main_index_column(&mut self, column: i32) {
        self.main_index_column = column;
    }

    pub fn main_index_column(&self) -> i32 {
        self.main_index_column
    }

    pub fn root_page_id(&self) -> u32 {
        self.root_page_id
    }

    pub fn last_key(&self) -> i64 {
        self.last_key
    }

    pub fn memory_per_page(&self) -> i64 {
        self.memory_per_page
    }

    fn duplicate_key() -> eyre::Report {
        DbError::get(ErrorCode::DuplicateKey, "")
    }

    /// Inserts a row, assigning its key per the main-column / generated-key
    /// rules and retrying generated keys on collision.
    pub fn add<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        sink: &mut dyn UndoSink,
        mut row: Row,
    ) -> Result<i64> {
        let mut retry = false;
        if self.main_index_column >= 0 {
            row.set_key(row.value(self.main_index_column).as_long()?);
        } else if row.key() == 0 {
            self.last_key += 1;
            row.set_key(self.last_key);
            retry = true;
        }
        for i in 0..row.column_count() {
            // oversized binary values are registered for cleanup should the
            // transaction roll back
            if let Value::Bytes(b) = &row.values()[i] {
                if b.len() > LEAF_MAX_INLINE {
                    sink.remove_at_commit_stop(self.id, row.values()[i].clone());
                }
            }
        }
        trace!(index = %self.name, key = row.key(), "add");
        let mut add: i64 = 0;
        loop {
            let result = self.add_try(store, sink, &row);
            store.increment_change_count();
            match result {
                Ok(()) => break,
                Err(e) if error_code(&e) == Some(ErrorCode::DuplicateKey) => {
                    if !retry {
                        return Err(DbError::get(
                            ErrorCode::DuplicateKey,
                            format!("{} key {}", self.name, row.key()),
                        ));
                    }
                    if add == 0 {
                        // first re-try jumps by a small random amount to
                        // avoid collisions after a restart
                        let jump = (rand::random::<f64>() * 10_000.0).round() as i64;
                        row.set_key(row.key() + jump);
                    } else {
                        row.set_key(row.key() + add);
                    }
                    add += 1;
                }
                Err(e) => return Err(e),
            }
        }
        self.last_key = self.last_key.max(row.key());
        Ok(row.key())
    }

    fn add_try<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        sink: &mut dyn UndoSink,
        row: &Row,
    ) -> Result<()> {
        let payload = serialize_values(row.values());
        loop {
            match self.page_add_row_try(store, self.root_page_id, row.key(), &payload)? {
                AddOutcome::Inserted => break,
                AddOutcome::Split(split_point) => {
                    trace!(index = %self.name, split_point, "root split");
                    self.split_root(store, split_point, row.key())?;
                }
            }
        }
        self.invalidate_row_count(store)?;
        self.row_count += 1;
        store.log_add_or_remove_row(sink, self.table_id, row, true)?;
        Ok(())
    }

    fn page_add_row_try<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        page_id: u32,
        key: i64,
        payload: &[u8],
    ) -> Result<AddOutcome> {
        match store.page_type(page_id)? {
            PageType::DataLeaf => {
                let mut leaf = LeafPage::read(store.page(page_id)?, page_id)?;
                let idx = match leaf.find_key(key) {
                    Ok(_) => return Err(Self::duplicate_key()),
                    Err(idx) => idx,
                };
                let inline_len = payload.len().min(LEAF_MAX_INLINE);
                if !leaf.fits(inline_len) {
                    return Ok(AddOutcome::Split(leaf.entry_count() / 2));
                }
                let overflow = if payload.len() > inline_len {
                    write_overflow_chain(store, &payload[inline_len..])?
                } else {
                    0
                };
                leaf.entries.insert(
                    idx,
                    LeafEntry {
                        key,
                        inline: payload[..inline_len].to_vec(),
                        overflow,
                    },
                );
                leaf.write(store.page_mut(page_id)?)?;
                let estimate = PAGE_HEADER_SIZE as i64
                    + leaf
                        .entries
                        .iter()
                        .map(|e| e.inline.len() as i64 + 14)
                        .sum::<i64>();
                self.memory_change(estimate);
                Ok(AddOutcome::Inserted)
            }
            PageType::DataNode => loop {
                let mut node = NodePage::read(store.page(page_id)?, page_id)?;
                let idx = node.find_child_index(key);
                let child = node.children[idx];
                match self.page_add_row_try(store, child, key, payload)? {
                    AddOutcome::Inserted => return Ok(AddOutcome::Inserted),
                    AddOutcome::Split(child_split) => {
                        if node.is_full() {
                            return Ok(AddOutcome::Split(node.key_count() / 2));
                        }
                        let (new_child, pivot) =
                            self.split_page(store, child, child_split, key)?;
                        node.insert_entry(idx, pivot, new_child);
                        node.write(store.page_mut(page_id)?)?;
                        self.set_parent(store, new_child, page_id)?;
                    }
                }
            },
            other => Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {other:?} inside data index {}", self.name),
            )),
        }
    }

    /// Splits `page_id` at `split_point`, returning the new right page and
    /// the promoted pivot. `row_key` stands in as the pivot for a zero split
    /// point.
    fn split_page<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        page_id: u32,
        split_point: usize,
        row_key: i64,
    ) -> Result<(u32, i64)> {
        match store.page_type(page_id)? {
            PageType::DataLeaf => {
                let mut leaf = LeafPage::read(store.page(page_id)?, page_id)?;
                let new_id = store.allocate_page();
                let right_entries = leaf.entries.split_off(split_point);
                let pivot = if split_point == 0 {
                    row_key
                } else {
                    leaf.entries[split_point - 1].key
                };
                let right = LeafPage {
                    parent: leaf.parent,
                    next: leaf.next,
                    row_count_hint: UNKNOWN_ROW_COUNT,
                    entries: right_entries,
                };
                leaf.next = new_id;
                leaf.row_count_hint = UNKNOWN_ROW_COUNT;
                leaf.write(store.page_mut(page_id)?)?;
                right.write(store.page_mut(new_id)?)?;
                Ok((new_id, pivot))
            }
            PageType::DataNode => {
                let mut node = NodePage::read(store.page(page_id)?, page_id)?;
                let sp = split_point.max(1);
                let pivot = node.keys[sp - 1];
                let right = NodePage {
                    parent: node.parent,
                    row_count_hint: UNKNOWN_ROW_COUNT,
                    keys: node.keys.split_off(sp),
                    children: node.children.split_off(sp),
                };
                node.keys.pop(); // the pivot moves up, not right
                node.row_count_hint = UNKNOWN_ROW_COUNT;
                let new_id = store.allocate_page();
                node.write(store.page_mut(page_id)?)?;
                right.write(store.page_mut(new_id)?)?;
                for child in right.children.clone() {
                    self.set_parent(store, child, new_id)?;
                }
                Ok((new_id, pivot))
            }
            other => Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("cannot split page {page_id} of type {other:?}"),
            )),
        }
    }

    /// The root reported a split point: move its content aside, split the
    /// moved page, and rebuild the root as a node over the two halves.
    fn split_root<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        split_point: usize,
        row_key: i64,
    ) -> Result<()> {
        let root_id = self.root_page_id;
        let left_id = store.allocate_page();
        let image = store.page(root_id)?.to_vec();
        store.page_mut(left_id)?.copy_from_slice(&image);
        self.remap_children(store, left_id)?;
        self.set_parent(store, left_id, root_id)?;

        let (right_id, pivot) = self.split_page(store, left_id, split_point, row_key)?;
        self.set_parent(store, right_id, root_id)?;

        let new_root = NodePage::new(0, left_id, pivot, right_id);
        new_root.write(store.page_mut(root_id)?)?;
        Ok(())
    }

    fn set_parent<S: BlockStore>(
        &self,
        store: &mut PageStore<S>,
        page_id: u32,
        parent: u32,
    ) -> Result<()> {
        let page = store.page_mut(page_id)?;
        let header = PageHeader::from_bytes_mut(page)?;
        header.set_parent(parent);
        Ok(())
    }

    /// After moving a node's content to a new page id, its children still
    /// name the old id as parent; rebuild the back-edges.
    fn remap_children<S: BlockStore>(
        &self,
        store: &mut PageStore<S>,
        page_id: u32,
    ) -> Result<()> {
        if store.page_type(page_id)? == PageType::DataNode {
            let node = NodePage::read(store.page(page_id)?, page_id)?;
            for child in node.children {
                self.set_parent(store, child, page_id)?;
            }
        }
        Ok(())
    }

    /// Reads the page and opportunistically validates its parent back-edge.
    fn check_parent<S: BlockStore>(
        &self,
        store: &mut PageStore<S>,
        page_id: u32,
        expected_parent: u32,
    ) -> Result<()> {
        let header = PageHeader::from_bytes(store.page(page_id)?)?;
        if header.parent() != expected_parent {
            return Err(DbError::internal(format!(
                "page {page_id} parent {} expected {expected_parent}",
                header.parent()
            )));
        }
        Ok(())
    }

    /// Removes the row with `row`'s key. The last remaining row resets the
    /// index to a fresh empty leaf.
    pub fn remove<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        sink: &mut dyn UndoSink,
        row: &Row,
    ) -> Result<()> {
        trace!(index = %self.name, key = row.key(), "remove");
        if self.row_count == 1 {
            self.remove_all_rows(store)?;
        } else {
            let result = self.page_remove(store, self.root_page_id, row.key());
            store.increment_change_count();
            result?;
            self.invalidate_row_count(store)?;
            self.row_count -= 1;
        }
        store.log_add_or_remove_row(sink, self.table_id, row, false)?;
        Ok(())
    }

    fn page_remove<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        page_id: u32,
        key: i64,
    ) -> Result<bool> {
        match store.page_type(page_id)? {
            PageType::DataLeaf => {
                let mut leaf = LeafPage::read(store.page(page_id)?, page_id)?;
                let idx = leaf.find_key(key).map_err(|_| {
                    DbError::get(
                        ErrorCode::RowNotFoundWhenDeleting,
                        format!("{} key {key}", self.name),
                    )
                })?;
                let entry = leaf.entries.remove(idx);
                if entry.overflow != 0 {
                    free_overflow_chain(store, entry.overflow)?;
                }
                leaf.write(store.page_mut(page_id)?)?;
                Ok(leaf.entries.is_empty())
            }
            PageType::DataNode => {
                let mut node = NodePage::read(store.page(page_id)?, page_id)?;
                let idx = node.find_child_index(key);
                let child = node.children[idx];
                self.check_parent(store, child, page_id)?;
                let child_empty = self.page_remove(store, child, key)?;
                if !child_empty {
                    return Ok(false);
                }
                store.free_page(child);
                node.remove_child(idx);
                if node.children.len() == 1 {
                    // a node with a single child collapses into that child
                    let only = node.children[0];
                    let image = store.page(only)?.to_vec();
                    store.page_mut(page_id)?.copy_from_slice(&image);
                    self.remap_children(store, page_id)?;
                    self.set_parent(store, page_id, node.parent)?;
                    store.free_page(only);
                } else {
                    node.write(store.page_mut(page_id)?)?;
                }
                Ok(false)
            }
            other => Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {other:?} inside data index {}", self.name),
            )),
        }
    }

    /// Key-range lookup; `None` bounds mean open ends.
    pub fn find<'a, S: BlockStore>(
        &self,
        store: &'a mut PageStore<S>,
        first: Option<i64>,
        last: Option<i64>,
    ) -> Result<PageDataCursor<'a, S>> {
        let from = first.unwrap_or(i64::MIN);
        let to = last.unwrap_or(i64::MAX);
        let mut page_id = self.root_page_id;
        loop {
            match store.page_type(page_id)? {
                PageType::DataLeaf => break,
                PageType::DataNode => {
                    let node = NodePage::read(store.page(page_id)?, page_id)?;
                    page_id = node.child_for(from);
                }
                other => {
                    return Err(DbError::get(
                        ErrorCode::FileCorrupted,
                        format!("page {page_id} is {other:?} inside data index {}", self.name),
                    ))
                }
            }
        }
        Ok(PageDataCursor {
            store,
            leaf_id: page_id,
            leaf: None,
            idx: 0,
            from,
            to,
        })
    }

    /// Point lookup by key.
    pub fn get_row<S: BlockStore>(
        &self,
        store: &mut PageStore<S>,
        key: i64,
    ) -> Result<Option<Row>> {
        let mut cursor = self.find(store, Some(key), Some(key))?;
        cursor.next()
    }

    /// Drops every row and resets the root to a fresh empty leaf.
    pub fn truncate<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        sink: &mut dyn UndoSink,
    ) -> Result<()> {
        debug!(index = %self.name, "truncate");
        store.log_truncate(sink, self.table_id)?;
        self.remove_all_rows(store)
    }

    /// Drops the index entirely: every page including the root is freed and
    /// the root registration is removed.
    pub fn remove_index<S: BlockStore>(&mut self, store: &mut PageStore<S>) -> Result<()> {
        debug!(index = %self.name, "remove");
        self.free_recursive(store, self.root_page_id, false)?;
        store.remove_root_page(self.id);
        self.row_count = 0;
        self.last_key = 0;
        Ok(())
    }

    fn remove_all_rows<S: BlockStore>(&mut self, store: &mut PageStore<S>) -> Result<()> {
        let result = (|| {
            self.free_recursive(store, self.root_page_id, true)?;
            LeafPage::empty(0).write(store.page_mut(self.root_page_id)?)?;
            self.row_count = 0;
            self.last_key = 0;
            Ok(())
        })();
        store.increment_change_count();
        result
    }

    fn free_recursive<S: BlockStore>(
        &self,
        store: &mut PageStore<S>,
        page_id: u32,
        is_root: bool,
    ) -> Result<()> {
        match store.page_type(page_id)? {
            PageType::DataLeaf => {
                let leaf = LeafPage::read(store.page(page_id)?, page_id)?;
                for entry in &leaf.entries {
                    if entry.overflow != 0 {
                        free_overflow_chain(store, entry.overflow)?;
                    }
                }
            }
            PageType::DataNode => {
                let node = NodePage::read(store.page(page_id)?, page_id)?;
                for child in node.children {
                    self.free_recursive(store, child, false)?;
                }
            }
            _ => {}
        }
        if !is_root {
            store.free_page(page_id);
        }
        Ok(())
    }

    fn count_rows<S: BlockStore>(&self, store: &mut PageStore<S>, page_id: u32) -> Result<u64> {
        match store.page_type(page_id)? {
            PageType::DataLeaf => {
                Ok(PageHeader::from_bytes(store.page(page_id)?)?.entry_count() as u64)
            }
            PageType::DataNode => {
                let node = NodePage::read(store.page(page_id)?, page_id)?;
                let mut total = 0;
                for child in node.children {
                    total += self.count_rows(store, child)?;
                }
                Ok(total)
            }
            other => Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {other:?} inside data index {}", self.name),
            )),
        }
    }

    fn max_key<S: BlockStore>(&self, store: &mut PageStore<S>, page_id: u32) -> Result<i64> {
        match store.page_type(page_id)? {
            PageType::DataLeaf => {
                let leaf = LeafPage::read(store.page(page_id)?, page_id)?;
                Ok(leaf.entries.last().map_or(0, |e| e.key))
            }
            PageType::DataNode => {
                let node = NodePage::read(store.page(page_id)?, page_id)?;
                self.max_key(store, *node.children.last().expect("node has children"))
            }
            other => Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("page {page_id} is {other:?} inside data index {}", self.name),
            )),
        }
    }

    fn invalidate_row_count<S: BlockStore>(&self, store: &mut PageStore<S>) -> Result<()> {
        let page = store.page_mut(self.root_page_id)?;
        PageHeader::from_bytes_mut(page)?.set_row_count_hint(UNKNOWN_ROW_COUNT);
        Ok(())
    }

    /// Persists the live row count in the root header (called on close).
    pub fn write_row_count<S: BlockStore>(&self, store: &mut PageStore<S>) -> Result<()> {
        let count = self.row_count.min((UNKNOWN_ROW_COUNT - 1) as u64) as u32;
        let page = store.page_mut(self.root_page_id)?;
        PageHeader::from_bytes_mut(page)?.set_row_count_hint(count);
        store.increment_change_count();
        Ok(())
    }

    /// Adopts a new page-memory sample into the smoothed estimate.
    pub fn memory_change(&mut self, x: i64) {
        if self.memory_count < MEMORY_FACTOR {
            self.memory_count += 1;
            self.memory_per_page += (x - self.memory_per_page) / self.memory_count;
        } else {
            self.memory_per_page +=
                (if x > self.memory_per_page { 1 } else { -1 }) + (x - self.memory_per_page) / MEMORY_FACTOR;
        }
    }
}

impl Index for PageDataIndex {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }

    fn get_cost(&self, _masks: &[u32]) -> f64 {
        // the +200 lets covering indexes over the same data win ties
        10.0 * (self.row_count as f64 + COST_ROW_OFFSET) + 200.0
    }
}

/// Cursor yielding rows in key order within `[from, to]`.
pub struct PageDataCursor<'a, S: BlockStore> {
    store: &'a mut PageStore<S>,
    leaf_id: u32,
    leaf: Option<LeafPage>,
    idx: usize,
    from: i64,
    to: i64,
}

impl<S: BlockStore> PageDataCursor<'_, S> {
    fn load_leaf(&mut self) -> Result<()> {
        let leaf = LeafPage::read(self.store.page(self.leaf_id)?, self.leaf_id)?;
        self.idx = match leaf.find_key(self.from) {
            Ok(i) | Err(i) => i,
        };
        self.leaf = Some(leaf);
        Ok(())
    }
}

impl<S: BlockStore> Cursor for PageDataCursor<'_, S> {
    fn next(&mut self) -> Result<Option<Row>> {
        if self.leaf_id == 0 {
            return Ok(None);
        }
        if self.leaf.is_none() {
            self.load_leaf()?;
        }
        loop {
            let leaf = self.leaf.as_ref().expect("leaf loaded above");
            if self.idx >= leaf.entries.len() {
                let next = leaf.next;
                if next == 0 {
                    return Ok(None);
                }
                self.leaf_id = next;
                let leaf = LeafPage::read(self.store.page(next)?, next)?;
                self.leaf = Some(leaf);
                self.idx = 0;
                continue;
            }
            let entry = leaf.entries[self.idx].clone();
            self.idx += 1;
            if entry.key > self.to {
                return Ok(None);
            }
            let mut payload = entry.inline;
            if entry.overflow != 0 {
                read_overflow_chain(self.store, entry.overflow, &mut payload)?;
            }
            let values = deserialize_values(&payload)?;
            return Ok(Some(Row::new(values, entry.key)));
        }
    }
}

fn serialize_values(values: &[Value]) -> Vec<u8> {
    let mut data = Data::create(64);
    data.write_i32(values.len() as i32);
    for v in values {
        data.write_value(v);
    }
    data.bytes()[..data.len()].to_vec()
}

fn deserialize_values(payload: &[u8]) -> Result<Vec<Value>> {
    let mut data = Data::create(payload.len());
    data.bytes_mut()[..payload.len()].copy_from_slice(payload);
    let count = data.read_i32()?;
    let mut values = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        values.push(data.read_value()?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OffHeapStore;

    struct NullSink;

    impl UndoSink for NullSink {
        fn log_row(&mut self, _table_id: u32, _row: &Row, _insert: bool) -> Result<()> {
            Ok(())
        }

        fn log_truncate(&mut self, _table_id: u32) -> Result<()> {
            Ok(())
        }

        fn remove_at_commit_stop(&mut self, _index_id: u32, _value: Value) {}
    }

    fn setup() -> (PageStore<OffHeapStore>, PageDataIndex) {
        let mut store = PageStore::create(OffHeapStore::new()).unwrap();
        let index = PageDataIndex::create(&mut store, 1, 1, "t").unwrap();
        (store, index)
    }

    fn value_row(key: i64, payload_len: usize) -> Row {
        Row::new(
            vec![Value::Long(key), Value::Bytes(vec![0xAB; payload_len])],
            key,
        )
    }

    fn collect_keys(
        index: &PageDataIndex,
        store: &mut PageStore<OffHeapStore>,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Vec<i64> {
        let mut cursor = index.find(store, from, to).unwrap();
        let mut keys = Vec::new();
        while let Some(row) = cursor.next().unwrap() {
            keys.push(row.key());
        }
        keys
    }

    #[test]
    fn sequential_insert_splits_and_stays_ordered() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        for key in 1..=100 {
            index.add(&mut store, &mut sink, value_row(key, 200)).unwrap();
        }

        assert_eq!(index.row_count(), 100);
        // a 200-byte payload * 100 rows cannot fit one 4K leaf
        assert_eq!(
            store.page_type(index.root_page_id()).unwrap(),
            PageType::DataNode,
            "expected at least one split"
        );
        let keys = collect_keys(&index, &mut store, Some(30), Some(40));
        assert_eq!(keys, (30..=40).collect::<Vec<i64>>());
    }

    #[test]
    fn reverse_insert_keeps_order() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        for key in (1..=300).rev() {
            index.add(&mut store, &mut sink, value_row(key, 64)).unwrap();
        }

        let keys = collect_keys(&index, &mut store, None, None);
        assert_eq!(keys, (1..=300).collect::<Vec<i64>>());
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;
        index.set_main_index_column(0);

        index.add(&mut store, &mut sink, value_row(7, 10)).unwrap();
        let err = index
            .add(&mut store, &mut sink, value_row(7, 10))
            .unwrap_err();

        assert_eq!(error_code(&err), Some(ErrorCode::DuplicateKey));
    }

    #[test]
    fn generated_keys_are_assigned_and_monotonic() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        let k1 = index
            .add(&mut store, &mut sink, Row::new(vec![Value::Int(1)], 0))
            .unwrap();
        let k2 = index
            .add(&mut store, &mut sink, Row::new(vec![Value::Int(2)], 0))
            .unwrap();

        assert!(k2 > k1);
        assert_eq!(index.last_key(), k2);
    }

    #[test]
    fn generated_key_collision_retries_with_perturbation() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        // occupy a key, then wind the generator back as if the index had
        // been reopened with a stale counter
        index
            .add(&mut store, &mut sink, Row::new(vec![Value::Int(0)], 5))
            .unwrap();
        index.last_key = 4;

        let key = index
            .add(&mut store, &mut sink, Row::new(vec![Value::Int(1)], 0))
            .unwrap();

        assert_ne!(key, 5);
        assert_eq!(index.row_count(), 2);
        assert_eq!(index.last_key(), key.max(5));
    }

    #[test]
    fn remove_deletes_and_reports_missing() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        for key in 1..=50 {
            index.add(&mut store, &mut sink, value_row(key, 100)).unwrap();
        }
        index
            .remove(&mut store, &mut sink, &value_row(25, 100))
            .unwrap();

        assert_eq!(index.row_count(), 49);
        assert!(index.get_row(&mut store, 25).unwrap().is_none());

        let err = index
            .remove(&mut store, &mut sink, &value_row(25, 100))
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::RowNotFoundWhenDeleting));
    }

    #[test]
    fn removing_last_row_resets_to_empty_leaf() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        index.add(&mut store, &mut sink, value_row(1, 10)).unwrap();
        index
            .remove(&mut store, &mut sink, &value_row(1, 10))
            .unwrap();

        assert_eq!(index.row_count(), 0);
        assert_eq!(index.last_key(), 0);
        assert_eq!(
            store.page_type(index.root_page_id()).unwrap(),
            PageType::DataLeaf
        );
    }

    #[test]
    fn oversized_rows_round_trip_through_overflow() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;
        let big = vec![0x5Au8; 3 * LEAF_MAX_INLINE];

        index
            .add(
                &mut store,
                &mut sink,
                Row::new(vec![Value::Bytes(big.clone())], 9),
            )
            .unwrap();

        let row = index.get_row(&mut store, 9).unwrap().unwrap();
        assert_eq!(row.values()[0], Value::Bytes(big));
    }

    #[test]
    fn row_count_hint_survives_clean_close() {
        let mut store = PageStore::create(OffHeapStore::new()).unwrap();
        let mut sink = NullSink;
        {
            let mut index = PageDataIndex::create(&mut store, 1, 1, "t").unwrap();
            for key in 1..=120 {
                index.add(&mut store, &mut sink, value_row(key, 50)).unwrap();
            }
            index.write_row_count(&mut store).unwrap();
        }

        let index = PageDataIndex::open(&mut store, 1, 1, "t").unwrap();
        assert_eq!(index.row_count(), 120);
        assert_eq!(index.last_key(), 120);
    }

    #[test]
    fn full_scan_after_mixed_workload_is_sorted() {
        let (mut store, mut index) = setup();
        let mut sink = NullSink;

        for key in 1..=200 {
            index.add(&mut store, &mut sink, value_row(key, 80)).unwrap();
        }
        for key in (2..=200).step_by(3) {
            index
                .remove(&mut store, &mut sink, &value_row(key, 80))
                .unwrap();
        }

        let keys = collect_keys(&index, &mut store, None, None);
        let expected: Vec<i64> = (1..=200).filter(|k| (k - 2) % 3 != 0).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn memory_estimate_smooths() {
        let (_store, mut index) = setup();

        for _ in 0..MEMORY_FACTOR {
            index.memory_change(100);
        }
        assert_eq!(index.memory_per_page(), 100);

        index.memory_change(200);
        let after = index.memory_per_page();
        assert!(after > 100 && after < 200, "smoothing, not jumping: {after}");
    }

    #[test]
    fn cost_is_scaled_scan_cost() {
        let (_store, index) = setup();
        assert_eq!(index.get_cost(&[]), 10.0 * COST_ROW_OFFSET + 200.0);
    }
}
