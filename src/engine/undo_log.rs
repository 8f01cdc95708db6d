//! # Undo Log
//!
//! Each session keeps an undo log so rollback can restore the pre-transaction
//! state. Records arrive in operation order and are applied in reverse.
//!
//! ## Memory → File Spill
//!
//! Records are held in memory until the in-memory count exceeds the session's
//! `max_memory_undo`. For a persistent, non-multi-version database the whole
//! in-memory batch then spills to an auto-deleting temp file: records are
//! serialized back to back, flushed whenever the buffer passes
//! `UNDO_BLOCK_SIZE` (and at batch end), and the pre-write file offset of
//! every flushed chunk is pushed onto `stored_entries_pos`.
//!
//! ## Reverse-Read Protocol
//!
//! `get_last` with an empty in-memory list pops the last chunk offset, reads
//! `[pos, file_len)` back, decodes the records it contains (records
//! self-delimit via their leading block count), truncates the file to `pos`,
//! and seeks there: so the file shrinks as the log unwinds. If the record
//! about to be returned was stored individually, up to `max_memory_undo / 2`
//! stored predecessors are re-hydrated with it and earlier in-memory records
//! are marked position-invalid, since their cached offsets are now stale.
//!
//! ## Record Layout
//!
//! Aligned to `FILE_BLOCK_SIZE`; the block count makes records walkable
//! without external metadata:
//!
//! ```text
//! i32 block_count | i32 operation | i32 table_id | i64 row_key
//! | i32 column_count | Value[column_count] | zero-pad
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::table::Table;
use crate::config::{FILE_BLOCK_SIZE, PAGE_SIZE, UNDO_BLOCK_SIZE};
use crate::error::DbError;
use crate::store::{Data, FileStore};
use crate::types::Row;

/// Row operation recorded for undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOp {
    Insert = 0,
    Delete = 1,
}

impl UndoOp {
    fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(UndoOp::Insert),
            1 => Ok(UndoOp::Delete),
            other => Err(DbError::internal(format!("undo operation {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InMemory,
    InMemoryInvalid,
    Stored,
}

/// One entry of the undo log.
#[derive(Debug, Clone)]
pub struct UndoLogRecord {
    operation: UndoOp,
    table_id: u32,
    row: Option<Row>,
    state: State,
    /// Offset in `FILE_BLOCK_SIZE` units, meaningful only when stored.
    file_pos: u64,
}

impl UndoLogRecord {
    pub fn new(operation: UndoOp, table_id: u32, row: Row) -> Self {
        Self {
            operation,
            table_id,
            row: Some(row),
            state: State::InMemory,
            file_pos: 0,
        }
    }

    pub fn operation(&self) -> UndoOp {
        self.operation
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    /// When an insert-undo is re-applied the record becomes live again.
    pub fn revive(&mut self) {
        if self.state == State::InMemoryInvalid {
            self.state = State::InMemory;
        }
    }

    fn is_stored(&self) -> bool {
        self.state == State::Stored
    }

    fn invalidate_pos(&mut self) {
        if self.state == State::InMemory {
            self.state = State::InMemoryInvalid;
        }
    }

    /// Serializes this record at the buffer cursor, patching the leading
    /// block count once the length is known.
    fn append(&self, buff: &mut Data) -> Result<()> {
        let p = buff.len();
        let row = self
            .row
            .as_ref()
            .ok_or_else(|| DbError::internal("undo record without a row"))?;
        buff.write_i32(0);
        buff.write_i32(self.operation as i32);
        buff.write_i32(self.table_id as i32);
        buff.write_i64(row.key());
        buff.write_i32(row.column_count() as i32);
        for v in row.values() {
            buff.check_capacity(Data::value_len(v));
            buff.write_value(v);
        }
        buff.fill_aligned();
        buff.set_i32_at(p, ((buff.len() - p) / FILE_BLOCK_SIZE) as i32);
        Ok(())
    }

    /// Writes this record alone at the file pointer and drops the in-memory
    /// row.
    fn save(&mut self, buff: &mut Data, file: &mut FileStore) -> Result<()> {
        buff.reset();
        self.append(buff)?;
        self.file_pos = file.file_pointer() / FILE_BLOCK_SIZE as u64;
        file.write(&buff.bytes()[..buff.len()])?;
        self.row = None;
        self.state = State::Stored;
        Ok(())
    }

    /// Decodes one record at the buffer cursor and leaves the cursor on the
    /// next record boundary.
    fn load_from_buffer(buff: &mut Data) -> Result<Self> {
        let pos = buff.len();
        let len = buff.read_i32()? as usize * FILE_BLOCK_SIZE;
        let mut rec = Self {
            operation: UndoOp::Insert,
            table_id: 0,
            row: None,
            state: State::InMemoryInvalid,
            file_pos: 0,
        };
        rec.load_body(buff)?;
        buff.set_pos(pos + len);
        Ok(rec)
    }

    fn load_body(&mut self, buff: &mut Data) -> Result<()> {
        self.operation = UndoOp::from_i32(buff.read_i32()?)?;
        self.table_id = buff.read_i32()? as u32;
        let key = buff.read_i64()?;
        let column_count = buff.read_i32()?;
        let mut values = Vec::with_capacity(column_count.max(0) as usize);
        for _ in 0..column_count {
            values.push(buff.read_value()?);
        }
        self.row = Some(Row::new(values, key));
        self.state = State::InMemoryInvalid;
        Ok(())
    }

    /// Re-reads an individually stored record from its file position. A
    /// changed operation code means the round trip hit the wrong bytes.
    fn load(&mut self, buff: &mut Data, file: &mut FileStore) -> Result<()> {
        file.seek(self.file_pos * FILE_BLOCK_SIZE as u64)?;
        buff.reset();
        buff.check_capacity(FILE_BLOCK_SIZE);
        file.read_fully(&mut buff.bytes_mut()[..FILE_BLOCK_SIZE])?;
        let len = buff.read_i32()? as usize * FILE_BLOCK_SIZE;
        buff.check_capacity(len.saturating_sub(FILE_BLOCK_SIZE));
        if len > FILE_BLOCK_SIZE {
            file.read_fully(&mut buff.bytes_mut()[FILE_BLOCK_SIZE..len])?;
        }
        let old_op = self.operation;
        self.load_body(buff)?;
        if self.operation != old_op {
            return Err(DbError::internal(format!(
                "undo round trip operation={:?} expected={:?}",
                self.operation, old_op
            )));
        }
        Ok(())
    }
}

/// Per-session ordered undo record list with memory → file spill.
pub struct UndoLog {
    records: Vec<UndoLogRecord>,
    stored_entries_pos: Vec<u64>,
    file: Option<FileStore>,
    row_buff: Data,
    memory_undo: usize,
    stored_entries: usize,
    max_memory_undo: usize,
    spill_enabled: bool,
    temp_dir: PathBuf,
    tables: HashMap<u32, Arc<RwLock<Table>>>,
}

impl UndoLog {
    /// `spill_enabled` reflects the database: persistent and not running on
    /// the multi-version store.
    pub fn new(max_memory_undo: usize, spill_enabled: bool, temp_dir: PathBuf) -> Self {
        Self {
            records: Vec::new(),
            stored_entries_pos: Vec::new(),
            file: None,
            row_buff: Data::create(PAGE_SIZE),
            memory_undo: 0,
            stored_entries: 0,
            max_memory_undo,
            spill_enabled,
            temp_dir,
            tables: HashMap::new(),
        }
    }

    /// Number of active records, in memory and spilled.
    pub fn size(&self) -> usize {
        self.stored_entries + self.records.len()
    }

    pub fn max_memory_undo(&self) -> usize {
        self.max_memory_undo
    }

    pub fn has_spill_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn spill_file_length(&self) -> u64 {
        self.file.as_ref().map_or(0, FileStore::length)
    }

    /// Clears the log after commit; the spill file is deleted.
    pub fn clear(&mut self) {
        self.records.clear();
        self.stored_entries = 0;
        self.stored_entries_pos.clear();
        self.memory_undo = 0;
        if let Some(file) = self.file.take() {
            file.close_and_delete_silently();
        }
    }

    /// Registers the table behind an id. The entry is overwritten on every
    /// append because the old object may have been dropped and re-created.
    pub fn register_table(&mut self, table: &Arc<RwLock<Table>>) -> u32 {
        let id = table.read().id();
        self.tables.insert(id, Arc::clone(table));
        id
    }

    pub fn table(&self, id: u32) -> Option<Arc<RwLock<Table>>> {
        self.tables.get(&id).cloned()
    }

    /// Appends an entry, spilling the in-memory batch when it outgrows the
    /// memory budget.
    pub fn add(&mut self, entry: UndoLogRecord) -> Result<()> {
        self.records.push(entry);
        self.memory_undo += 1;
        if self.memory_undo > self.max_memory_undo && self.spill_enabled {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(FileStore::open_temp(&self.temp_dir)?);
        }
        let file = self.file.as_mut().expect("spill file created above");
        let mut buff = Data::create(PAGE_SIZE);
        let count = self.records.len();
        for (i, record) in self.records.iter().enumerate() {
            buff.check_capacity(PAGE_SIZE);
            record.append(&mut buff)?;
            if i == count - 1 || buff.len() > UNDO_BLOCK_SIZE {
                self.stored_entries_pos.push(file.file_pointer());
                file.write(&buff.bytes()[..buff.len()])?;
                buff.reset();
            }
        }
        self.stored_entries += count;
        self.memory_undo = 0;
        self.records.clear();
        debug!(spilled = count, file_len = file.length(), "undo spill");
        Ok(())
    }

    /// Returns (a copy of) the last record, reloading it from the spill file
    /// when the in-memory list has drained.
    pub fn get_last(&mut self) -> Result<Option<UndoLogRecord>> {
        if self.records.is_empty() && self.stored_entries > 0 {
            let pos = self
                .stored_entries_pos
                .pop()
                .ok_or_else(|| DbError::internal("stored undo entries without positions"))?;
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| DbError::internal("stored undo entries without a file"))?;
            let end = file.length();
            let buffer_len = (end - pos) as usize;
            let mut buff = Data::create(buffer_len);
            file.seek(pos)?;
            file.read_fully(&mut buff.bytes_mut()[..buffer_len])?;
            while buff.len() < buffer_len {
                let record = UndoLogRecord::load_from_buffer(&mut buff)?;
                self.records.push(record);
                self.memory_undo += 1;
            }
            self.stored_entries -= self.records.len();
            file.set_length(pos)?;
            file.seek(pos)?;
            trace!(
                reloaded = self.records.len(),
                file_len = pos,
                "undo chunk re-read"
            );
        }
        let Some(i) = self.records.len().checked_sub(1) else {
            return Ok(None);
        };
        if self.records[i].is_stored() {
            // re-hydrate a window of stored predecessors in one pass
            let start = i.saturating_sub(self.max_memory_undo / 2);
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| DbError::internal("stored undo record without a file"))?;
            let mut first_pos = None;
            for record in &mut self.records[start..=i] {
                if record.is_stored() {
                    record.load(&mut self.row_buff, file)?;
                    self.memory_undo += 1;
                    if first_pos.is_none() {
                        first_pos = Some(record.file_pos);
                    }
                }
            }
            for record in &mut self.records[..i] {
                record.invalidate_pos();
            }
            if let Some(pos) = first_pos {
                self.seek(pos)?;
            }
        }
        Ok(Some(self.records[i].clone()))
    }

    /// Removes the last record from the list of operations.
    pub fn remove_last(&mut self) {
        if let Some(record) = self.records.pop() {
            if !record.is_stored() {
                self.memory_undo = self.memory_undo.saturating_sub(1);
            }
        }
    }

    /// Stores the last record individually, freeing its in-memory row (used
    /// under acute memory pressure).
    pub fn store_last(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(FileStore::open_temp(&self.temp_dir)?);
        }
        let file = self.file.as_mut().expect("spill file created above");
        if let Some(record) = self.records.last_mut() {
            if !record.is_stored() {
                record.save(&mut self.row_buff, file)?;
                self.memory_undo = self.memory_undo.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Positions the spill file at a block offset.
    fn seek(&mut self, file_pos: u64) -> Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| DbError::internal("seek without undo file"))?
            .seek(file_pos * FILE_BLOCK_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::tempdir;

    fn record(table_id: u32, key: i64) -> UndoLogRecord {
        UndoLogRecord::new(
            UndoOp::Insert,
            table_id,
            Row::new(vec![Value::Long(key), Value::Text(format!("row {key}"))], key),
        )
    }

    fn log(max: usize, dir: &std::path::Path) -> UndoLog {
        UndoLog::new(max, true, dir.to_path_buf())
    }

    #[test]
    fn records_come_back_in_lifo_order_without_spill() {
        let dir = tempdir().unwrap();
        let mut log = log(100, dir.path());
        for key in 1..=5 {
            log.add(record(1, key)).unwrap();
        }

        for key in (1..=5).rev() {
            let last = log.get_last().unwrap().unwrap();
            assert_eq!(last.row().unwrap().key(), key);
            log.remove_last();
        }
        assert_eq!(log.size(), 0);
        assert!(!log.has_spill_file());
    }

    #[test]
    fn spill_and_reverse_read_shrinks_the_file() {
        let dir = tempdir().unwrap();
        let mut log = log(2, dir.path());
        for key in 1..=10 {
            log.add(record(1, key)).unwrap();
        }
        assert!(log.has_spill_file());
        assert_eq!(log.size(), 10);

        let mut seen = Vec::new();
        let mut lengths = Vec::new();
        while let Some(last) = log.get_last().unwrap() {
            seen.push(last.row().unwrap().key());
            log.remove_last();
            lengths.push(log.spill_file_length());
        }

        assert_eq!(seen, (1..=10).rev().collect::<Vec<i64>>());
        // the file must have shrunk while unwinding
        assert!(lengths.windows(2).all(|w| w[1] <= w[0]));
        assert!(*lengths.last().unwrap() < lengths[0] || lengths[0] == 0);
    }

    #[test]
    fn spill_threshold_of_one_round_trips_every_record() {
        let dir = tempdir().unwrap();
        let mut log = log(1, dir.path());
        for key in 1..=7 {
            log.add(record(3, key)).unwrap();
        }

        let mut keys = Vec::new();
        while let Some(last) = log.get_last().unwrap() {
            assert_eq!(last.table_id(), 3);
            assert_eq!(last.operation(), UndoOp::Insert);
            keys.push(last.row().unwrap().key());
            log.remove_last();
        }
        assert_eq!(keys, (1..=7).rev().collect::<Vec<i64>>());
    }

    #[test]
    fn clear_deletes_the_spill_file() {
        let dir = tempdir().unwrap();
        let mut log = log(1, dir.path());
        for key in 1..=5 {
            log.add(record(1, key)).unwrap();
        }
        assert!(log.has_spill_file());

        log.clear();

        assert_eq!(log.size(), 0);
        assert!(!log.has_spill_file());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty(), "temp file not deleted");
    }

    #[test]
    fn stored_record_rehydrates_a_window_of_predecessors() {
        let dir = tempdir().unwrap();
        let mut log = log(10, dir.path());
        for key in 1..=4 {
            log.add(record(1, key)).unwrap();
        }
        // store the trailing records individually
        log.store_last().unwrap();

        let last = log.get_last().unwrap().unwrap();
        assert_eq!(last.row().unwrap().key(), 4);
        assert_eq!(last.operation(), UndoOp::Insert);
    }

    #[test]
    fn disabled_spill_keeps_everything_in_memory() {
        let dir = tempdir().unwrap();
        let mut log = UndoLog::new(1, false, dir.path().to_path_buf());
        for key in 1..=20 {
            log.add(record(1, key)).unwrap();
        }

        assert!(!log.has_spill_file());
        assert_eq!(log.size(), 20);
    }

    #[test]
    fn value_payloads_survive_the_spill_round_trip() {
        let dir = tempdir().unwrap();
        let mut log = log(1, dir.path());
        let row = Row::new(
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Int(-3),
                Value::Double(2.25),
                Value::Bytes(vec![9, 8, 7]),
            ],
            42,
        );
        log.add(UndoLogRecord::new(UndoOp::Delete, 2, row.clone()))
            .unwrap();
        log.add(record(1, 43)).unwrap();

        log.get_last().unwrap();
        log.remove_last();
        let back = log.get_last().unwrap().unwrap();

        assert_eq!(back.operation(), UndoOp::Delete);
        assert_eq!(back.row().unwrap().values(), row.values());
        assert_eq!(back.row().unwrap().key(), 42);
    }
}
