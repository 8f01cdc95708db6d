//! # Sessions
//!
//! A [`Session`] owns one undo log and the per-transaction cleanup state.
//! The session is the single writer for its database: the engine serializes
//! mutating work per session, and the undo log is deliberately not
//! thread-safe.
//!
//! ## Rollback
//!
//! Rollback pops `get_last` / apply / `remove_last` until the log is empty;
//! records are applied in reverse-arrival order. Undo logging is disabled
//! while applying so compensation operations do not log themselves. Under
//! lock mode OFF, a row that is already gone (insert-undo) or already back
//! (delete-undo) is ignored: concurrent sessions are expected to race in
//! that mode.
//!
//! ## Commit
//!
//! Commit clears the undo log (deleting any spill file), forgets the pending
//! large-value cleanups, and flushes the page store.

use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use super::database::Database;
use super::undo_log::{UndoLog, UndoLogRecord, UndoOp};
use crate::config::LOCK_MODE_OFF;
use crate::error::{error_code, DbError, ErrorCode};
use crate::store::UndoSink;
use crate::types::{Row, Value};

/// A database session: undo state plus connection identity.
pub struct Session {
    id: u32,
    user: String,
    database: Arc<Database>,
    undo_log: UndoLog,
    undo_enabled: bool,
    auto_commit: bool,
    /// Large values to drop if the transaction stops before commit.
    at_commit_stop: Vec<(u32, Value)>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("undo_enabled", &self.undo_enabled)
            .field("auto_commit", &self.auto_commit)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(id: u32, user: String, database: Arc<Database>, undo_log: UndoLog) -> Self {
        Self {
            id,
            user,
            database,
            undo_log,
            undo_enabled: true,
            auto_commit: false,
            at_commit_stop: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }

    pub fn undo_log_mut(&mut self) -> &mut UndoLog {
        &mut self.undo_log
    }

    pub fn pending_lob_cleanups(&self) -> &[(u32, Value)] {
        &self.at_commit_stop
    }

    /// Commits the transaction: undo state is discarded and the store is
    /// flushed.
    pub fn commit(&mut self) -> Result<()> {
        debug!(session = self.id, undo = self.undo_log.size(), "commit");
        self.undo_log.clear();
        self.at_commit_stop.clear();
        self.database.flush()
    }

    /// Rolls the transaction back by applying the undo log in reverse.
    pub fn rollback(&mut self) -> Result<()> {
        debug!(session = self.id, undo = self.undo_log.size(), "rollback");
        let database = Arc::clone(&self.database);
        self.undo_enabled = false;
        let result = (|| -> Result<()> {
            loop {
                let Some(mut record) = self.undo_log.get_last()? else {
                    break;
                };
                self.apply_undo(&database, &mut record)?;
                self.undo_log.remove_last();
            }
            Ok(())
        })();
        self.undo_enabled = true;
        self.undo_log.clear();
        self.at_commit_stop.clear();
        result
    }

    fn apply_undo(&mut self, database: &Database, record: &mut UndoLogRecord) -> Result<()> {
        let table = self
            .undo_log
            .table(record.table_id())
            .or_else(|| database.table(record.table_id()))
            .ok_or_else(|| {
                DbError::internal(format!("undo for unknown table {}", record.table_id()))
            })?;
        let row = record
            .row()
            .cloned()
            .ok_or_else(|| DbError::internal("undo record without a row"))?;
        let lenient = database.lock_mode() == LOCK_MODE_OFF;
        match record.operation() {
            UndoOp::Insert => {
                record.revive();
                let result = database.table_remove_row(&table, self, &row);
                match result {
                    Err(e) if lenient
                        && error_code(&e) == Some(ErrorCode::RowNotFoundWhenDeleting) =>
                    {
                        // it might have been deleted by another session
                        Ok(())
                    }
                    other => other,
                }
            }
            UndoOp::Delete => {
                let result = database.table_add_row(&table, self, row).map(|_| ());
                match result {
                    Err(e) if lenient && error_code(&e) == Some(ErrorCode::DuplicateKey) => {
                        // it might have been re-inserted by another session
                        Ok(())
                    }
                    other => other,
                }
            }
        }
    }
}

impl UndoSink for Session {
    fn log_row(&mut self, table_id: u32, row: &Row, insert: bool) -> Result<()> {
        if !self.undo_enabled {
            return Ok(());
        }
        let op = if insert { UndoOp::Insert } else { UndoOp::Delete };
        self.undo_log
            .add(UndoLogRecord::new(op, table_id, row.clone()))
    }

    fn log_truncate(&mut self, table_id: u32) -> Result<()> {
        // truncated data is gone on rollback; pending undo cannot be applied
        debug!(session = self.id, table = table_id, "truncate clears undo");
        self.undo_log.clear();
        self.at_commit_stop.clear();
        Ok(())
    }

    fn remove_at_commit_stop(&mut self, index_id: u32, value: Value) {
        self.at_commit_stop.push((index_id, value));
    }
}
