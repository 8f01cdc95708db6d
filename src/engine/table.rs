//! # Tables
//!
//! A [`Table`] binds a set of typed columns to its access paths: the primary
//! row store (the paged data B-tree for persistent tables, the in-memory
//! scan index otherwise) plus any number of secondary hash indexes.
//!
//! Ownership is rooted at the database: tables are addressed by id, indexes
//! live inside their table, and nothing here holds a back-reference upward.
//!
//! ## Row Mutation Protocol
//!
//! `add_row` / `remove_row` keep every index in step and emit exactly one
//! undo record per row change through the store's undo sink. Removing a row
//! that is already gone reports `ROW_NOT_FOUND_WHEN_DELETING_1`; the session
//! decides (by lock mode) whether that is fatal.

use eyre::Result;

use crate::index::{Cursor, Index, NonUniqueHashIndex, PageDataIndex, ScanIndex};
use crate::store::{BlockStore, PageStore, UndoSink};
use crate::types::{Row, SqlType, Value};

/// A typed column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

/// Primary row storage of a table.
#[derive(Debug)]
pub enum PrimaryIndex {
    /// In-memory slot array (temporary tables, fallback).
    Scan(ScanIndex),
    /// Paged B-tree (persistent tables).
    Data(PageDataIndex),
}

/// A table with its columns and access paths.
#[derive(Debug)]
pub struct Table {
    id: u32,
    name: String,
    columns: Vec<Column>,
    primary: PrimaryIndex,
    hash_indexes: Vec<NonUniqueHashIndex>,
}

impl Table {
    /// Creates a temporary (in-memory) table.
    pub fn temporary(id: u32, name: impl Into<String>, columns: Vec<Column>) -> Self {
        let name = name.into();
        let scan = ScanIndex::new(id, &name);
        Self {
            id,
            name,
            columns,
            primary: PrimaryIndex::Scan(scan),
            hash_indexes: Vec::new(),
        }
    }

    /// Creates a persistent table whose rows live in the page store.
    pub fn persistent<S: BlockStore>(
        store: &mut PageStore<S>,
        id: u32,
        name: impl Into<String>,
        columns: Vec<Column>,
    ) -> Result<Self> {
        let name = name.into();
        let data = PageDataIndex::create(store, id, id, &name)?;
        Ok(Self {
            id,
            name,
            columns,
            primary: PrimaryIndex::Data(data),
            hash_indexes: Vec::new(),
        })
    }

    /// Reopens a persistent table from the store's root registry.
    pub fn open<S: BlockStore>(
        store: &mut PageStore<S>,
        id: u32,
        name: impl Into<String>,
        columns: Vec<Column>,
    ) -> Result<Self> {
        let name = name.into();
        let data = PageDataIndex::open(store, id, id, &name)?;
        Ok(Self {
            id,
            name,
            columns,
            primary: PrimaryIndex::Data(data),
            hash_indexes: Vec::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary(&self) -> &PrimaryIndex {
        &self.primary
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Declares a column whose value IS the row key (primary-key fast path).
    pub fn set_main_index_column(&mut self, column: i32) {
        if let PrimaryIndex::Data(data) = &mut self.primary {
            data.set_main_index_column(column);
        }
    }

    /// Adds a secondary hash index over `column`.
    pub fn add_hash_index(&mut self, index_id: u32, column: usize) {
        let name = format!("{}_{}_HASH", self.name, self.columns[column].name);
        let sql_type = self.columns[column].sql_type;
        self.hash_indexes
            .push(NonUniqueHashIndex::new(index_id, name, column, sql_type));
    }

    pub fn row_count(&self) -> u64 {
        match &self.primary {
            PrimaryIndex::Scan(scan) => scan.row_count(),
            PrimaryIndex::Data(data) => data.row_count(),
        }
    }

    /// Every access path of this table, for the optimizer's cost search.
    pub fn indexes(&self) -> Vec<&dyn Index> {
        let mut out: Vec<&dyn Index> = Vec::with_capacity(1 + self.hash_indexes.len());
        match &self.primary {
            PrimaryIndex::Scan(scan) => out.push(scan),
            PrimaryIndex::Data(data) => out.push(data),
        }
        for h in &self.hash_indexes {
            out.push(h);
        }
        out
    }

    /// Inserts a row into every index and logs one INSERT undo record.
    /// Returns the assigned row key.
    pub fn add_row<S: BlockStore>(
        &mut self,
        store: Option<&mut PageStore<S>>,
        sink: &mut dyn UndoSink,
        mut row: Row,
    ) -> Result<i64> {
        let key = match &mut self.primary {
            PrimaryIndex::Data(data) => {
                let store = store
                    .ok_or_else(|| crate::error::DbError::internal("persistent table without a store"))?;
                data.add(store, sink, row.clone())?
            }
            PrimaryIndex::Scan(scan) => {
                let key = scan.add(row.clone());
                row.set_key(key);
                sink.log_row(self.id, &row, true)?;
                key
            }
        };
        row.set_key(key);
        for hash in &mut self.hash_indexes {
            hash.add(&row);
        }
        Ok(key)
    }

    /// Removes a row from every index and logs one DELETE undo record.
    pub fn remove_row<S: BlockStore>(
        &mut self,
        store: Option<&mut PageStore<S>>,
        sink: &mut dyn UndoSink,
        row: &Row,
    ) -> Result<()> {
        match &mut self.primary {
            PrimaryIndex::Data(data) => {
                let store = store
                    .ok_or_else(|| crate::error::DbError::internal("persistent table without a store"))?;
                data.remove(store, sink, row)?;
            }
            PrimaryIndex::Scan(scan) => {
                scan.remove(row)?;
                sink.log_row(self.id, row, false)?;
            }
        }
        for hash in &mut self.hash_indexes {
            hash.remove(row);
        }
        Ok(())
    }

    /// Point lookup by row key.
    pub fn get_row<S: BlockStore>(
        &self,
        store: Option<&mut PageStore<S>>,
        key: i64,
    ) -> Result<Option<Row>> {
        match &self.primary {
            PrimaryIndex::Data(data) => {
                let store = store
                    .ok_or_else(|| crate::error::DbError::internal("persistent table without a store"))?;
                data.get_row(store, key)
            }
            PrimaryIndex::Scan(scan) => Ok(scan.get_row(key).ok().cloned()),
        }
    }

    /// All rows in key order.
    pub fn all_rows<S: BlockStore>(
        &self,
        store: Option<&mut PageStore<S>>,
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        match &self.primary {
            PrimaryIndex::Data(data) => {
                let store = store
                    .ok_or_else(|| crate::error::DbError::internal("persistent table without a store"))?;
                let mut cursor = data.find(store, None, None)?;
                while let Some(row) = cursor.next()? {
                    rows.push(row);
                }
            }
            PrimaryIndex::Scan(scan) => {
                let mut cursor = scan.find();
                while let Some(row) = cursor.next()? {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// Probes a hash index by equality; returns matching rows.
    pub fn find_by_hash<S: BlockStore>(
        &self,
        mut store: Option<&mut PageStore<S>>,
        index_id: u32,
        value: &Value,
    ) -> Result<Vec<Row>> {
        let Some(hash) = self.hash_indexes.iter().find(|h| h.id() == index_id) else {
            return Ok(Vec::new());
        };
        let keys = hash.find(Some(value), Some(value))?;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let store = store.as_mut().map(|s| &mut **s);
            if let Some(row) = self.get_row(store, key)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Drops every row. The undo sink is notified so the session can commit
    /// its pending work (truncated data is gone on rollback).
    pub fn truncate<S: BlockStore>(
        &mut self,
        store: Option<&mut PageStore<S>>,
        sink: &mut dyn UndoSink,
    ) -> Result<()> {
        match &mut self.primary {
            PrimaryIndex::Data(data) => {
                let store = store
                    .ok_or_else(|| crate::error::DbError::internal("persistent table without a store"))?;
                data.truncate(store, sink)?;
            }
            PrimaryIndex::Scan(scan) => {
                sink.log_truncate(self.id)?;
                scan.truncate();
            }
        }
        for hash in &mut self.hash_indexes {
            hash.truncate();
        }
        Ok(())
    }

    /// Releases the table's storage when it is dropped from the schema.
    pub fn drop_storage<S: BlockStore>(&mut self, store: Option<&mut PageStore<S>>) -> Result<()> {
        if let PrimaryIndex::Data(data) = &mut self.primary {
            let store = store
                .ok_or_else(|| crate::error::DbError::internal("persistent table without a store"))?;
            data.remove_index(store)?;
        }
        for hash in &mut self.hash_indexes {
            hash.truncate();
        }
        Ok(())
    }

    /// Persists the cached row count on clean close.
    pub fn close<S: BlockStore>(&self, store: Option<&mut PageStore<S>>) -> Result<()> {
        if let (PrimaryIndex::Data(data), Some(store)) = (&self.primary, store) {
            data.write_row_count(store)?;
        }
        Ok(())
    }
}
