//! # Scan Index with Tombstone Freelist
//!
//! The scan index is not really an index in the strict sense: it cannot be
//! used for direct lookup by column value, only to iterate over all rows of a
//! table. It is purely in-memory and backs temporary tables and the fallback
//! access path of regular tables.
//!
//! ## Slot Reuse
//!
//! Rows live in a dense slot sequence; a row's key is its slot position.
//! Removal does not compact the sequence. Instead the slot becomes a
//! tombstone whose stored key is the position of the *next* free slot,
//! forming a LIFO freelist threaded through the slot array:
//!
//! ```text
//! slots:  [R0] [R1] [F→4] [R3] [F→-1] [R5]
//!                 ▲
//! first_free = 2 ─┘        (remove order: 4 then 2)
//! ```
//!
//! `add` pops the freelist head when one exists, otherwise appends. Removing
//! the last remaining row clears the whole index.
//!
//! ## Cost
//!
//! `row_count + COST_ROW_OFFSET`: always dominated by any usable index, so
//! the optimizer picks a table scan only when nothing better exists.

use eyre::Result;
use tracing::trace;

use super::{Cursor, Index};
use crate::config::COST_ROW_OFFSET;
use crate::error::{DbError, ErrorCode};
use crate::types::{Row, SlotRow};

/// Append-only row array with a removed-row freelist chain.
#[derive(Debug)]
pub struct ScanIndex {
    id: u32,
    name: String,
    rows: Vec<SlotRow>,
    first_free: i64,
    row_count: u64,
}

impl ScanIndex {
    pub fn new(id: u32, table_name: &str) -> Self {
        Self {
            id,
            name: format!("{table_name}_DATA"),
            rows: Vec::new(),
            first_free: -1,
            row_count: 0,
        }
    }

    /// Inserts a row, reusing the most recently freed slot when one exists.
    /// The row's key becomes its slot position.
    pub fn add(&mut self, mut row: Row) -> i64 {
        let key = if self.first_free == -1 {
            let key = self.rows.len() as i64;
            row.set_key(key);
            self.rows.push(SlotRow::Live(row));
            key
        } else {
            let key = self.first_free;
            match self.rows[key as usize] {
                SlotRow::Free { next_free } => self.first_free = next_free,
                SlotRow::Live(_) => unreachable!("freelist head points at a live row"),
            }
            row.set_key(key);
            self.rows[key as usize] = SlotRow::Live(row);
            key
        };
        self.row_count += 1;
        key
    }

    /// Replaces the row's slot with a tombstone pointing at the previous
    /// freelist head. Removing the last row clears the index entirely.
    pub fn remove(&mut self, row: &Row) -> Result<()> {
        if self.row_count == 1 {
            self.rows = Vec::new();
            self.first_free = -1;
        } else {
            let key = row.key();
            if key < 0 || self.rows.len() as i64 <= key {
                return Err(DbError::get(
                    ErrorCode::RowNotFoundWhenDeleting,
                    format!("{}: {}", self.rows.len(), key),
                ));
            }
            self.rows[key as usize] = SlotRow::Free {
                next_free: self.first_free,
            };
            self.first_free = key;
        }
        self.row_count -= 1;
        Ok(())
    }

    pub fn get_row(&self, key: i64) -> Result<&Row> {
        self.rows
            .get(key as usize)
            .and_then(SlotRow::as_live)
            .ok_or_else(|| {
                DbError::get(
                    ErrorCode::RowNotFoundWhenDeleting,
                    format!("{}: {}", self.rows.len(), key),
                )
            })
    }

    /// The next live row after `row`, skipping tombstones. `None` starts the
    /// scan from the beginning.
    pub fn get_next_row(&self, row: Option<&Row>) -> Option<&Row> {
        let mut key = row.map_or(-1, Row::key);
        loop {
            key += 1;
            if key >= self.rows.len() as i64 {
                return None;
            }
            if let Some(live) = self.rows[key as usize].as_live() {
                return Some(live);
            }
        }
    }

    pub fn truncate(&mut self) {
        trace!(index = %self.name, "truncate");
        self.rows = Vec::new();
        self.first_free = -1;
        self.row_count = 0;
    }

    pub fn find(&self) -> ScanCursor<'_> {
        ScanCursor {
            index: self,
            row_key: None,
        }
    }

    /// Slot count including tombstones (test hook).
    pub fn slot_count(&self) -> usize {
        self.rows.len()
    }

    pub fn first_free(&self) -> i64 {
        self.first_free
    }
}

impl Index for ScanIndex {
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
        self.row_count as f64 + COST_ROW_OFFSET
    }
}

/// Cursor over all live rows in slot order.
pub struct ScanCursor<'a> {
    index: &'a ScanIndex,
    row_key: Option<i64>,
}

impl Cursor for ScanCursor<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        let prev = self.row_key.map(|key| {
            // reconstruct a probe row so the scan can resume mid-sequence
            // even if the previous slot became a tombstone meanwhile
            Row::new(Vec::new(), key)
        });
        let next = self.index.get_next_row(prev.as_ref());
        self.row_key = next.map(Row::key);
        Ok(next.cloned())
    }
}
