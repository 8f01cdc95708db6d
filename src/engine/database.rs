//! # Database
//!
//! [`Database`] roots the ownership graph: it owns the page store and every
//! table. Sessions, tables, and indexes refer to each other through ids
//! resolved here, never through back-references, so there are no ownership
//! cycles to manage.
//!
//! ## Storage Selection
//!
//! A persistent database opens `<name>.t.db` (or `<name>.mv.db` when the
//! multi-version flag is set) through the block read cache; an in-memory
//! database backs the same page store with the off-heap region. The page
//! store sits behind a `parking_lot::RwLock`: one logical writer, readers
//! through the cache.
//!
//! ## Lock File
//!
//! Persistent databases guard against double-open with a `.lock.db` marker
//! created exclusively; hitting an existing marker reports
//! `DATABASE_ALREADY_OPEN_1`. The marker is removed on clean close.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::session::Session;
use super::table::{Column, Table};
use super::undo_log::UndoLog;
use crate::config::{
    DEFAULT_MAX_MEMORY_UNDO, LOCK_MODE_READ_COMMITTED, SUFFIX_MV_FILE, SUFFIX_PAGE_FILE,
};
use crate::error::{DbError, ErrorCode};
use crate::store::{BlockStore, CachedFile, FileStore, OffHeapStore, PageStore};
use crate::types::Row;

/// The page store behind a type-erased block backing, so file-backed and
/// in-memory databases share one store type.
pub type DynStore = PageStore<Box<dyn BlockStore + Send>>;

/// Database-level settings, fixed at open time.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub name: String,
    pub persistent: bool,
    pub mv_store: bool,
    pub base_dir: PathBuf,
    pub cipher: Option<String>,
    pub cluster: Option<String>,
    pub lock_mode: i32,
    pub max_memory_undo: usize,
}

impl DbSettings {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistent: false,
            mv_store: false,
            base_dir: PathBuf::from("."),
            cipher: None,
            cluster: None,
            lock_mode: LOCK_MODE_READ_COMMITTED,
            max_memory_undo: DEFAULT_MAX_MEMORY_UNDO,
        }
    }

    /// Data file suffix, selected by the multi-version flag.
    pub fn file_suffix(&self) -> &'static str {
        if self.mv_store {
            SUFFIX_MV_FILE
        } else {
            SUFFIX_PAGE_FILE
        }
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}{}", self.name, self.file_suffix()))
    }

    fn lock_file_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.lock.db", self.name))
    }
}

/// One open database: store, tables, users, lifecycle state.
pub struct Database {
    settings: DbSettings,
    store: Option<RwLock<DynStore>>,
    tables: RwLock<HashMap<u32, Arc<RwLock<Table>>>>,
    table_names: RwLock<HashMap<String, u32>>,
    users: RwLock<HashMap<String, Vec<u8>>>,
    next_object_id: AtomicU32,
    next_session_id: AtomicU32,
    closing: AtomicBool,
    temp_dir: tempfile::TempDir,
}

impl Database {
    /// Opens (creating if necessary) the database described by `settings`.
    pub fn open(settings: DbSettings) -> Result<Arc<Self>> {
        if let Some(cipher) = &settings.cipher {
            // the cipher name is handed to the file-encryption provider;
            // only registered provider names are accepted here
            if !matches!(cipher.to_ascii_uppercase().as_str(), "AES" | "XTEA" | "FOG") {
                return Err(DbError::get(ErrorCode::UnsupportedSetting, cipher.clone()));
            }
        }
        let store = if settings.persistent {
            let lock_path = settings.lock_file_path();
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(DbError::get(
                        ErrorCode::DatabaseAlreadyOpen,
                        settings.name.clone(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
            let path = settings.data_file_path();
            let existed = path.exists();
            let file = FileStore::open(&path, "rw")?;
            let cached: Box<dyn BlockStore + Send> = Box::new(CachedFile::new(file));
            let store = if existed {
                PageStore::open(cached)?
            } else {
                PageStore::create(cached)?
            };
            Some(RwLock::new(store))
        } else {
            let backing: Box<dyn BlockStore + Send> = Box::new(OffHeapStore::new());
            Some(RwLock::new(PageStore::create(backing)?))
        };
        info!(name = %settings.name, persistent = settings.persistent, "database opened");
        Ok(Arc::new(Self {
            settings,
            store,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            next_object_id: AtomicU32::new(1),
            next_session_id: AtomicU32::new(1),
            closing: AtomicBool::new(false),
            temp_dir: tempfile::tempdir()?,
        }))
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &DbSettings {
        &self.settings
    }

    pub fn lock_mode(&self) -> i32 {
        self.settings.lock_mode
    }

    pub fn cluster_stamp(&self) -> Option<&str> {
        self.settings.cluster.as_deref()
    }

    /// Name of the file-encryption provider, when one is configured.
    pub fn cipher(&self) -> Option<&str> {
        self.settings.cipher.as_deref()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn set_closing(&self, closing: bool) {
        self.closing.store(closing, Ordering::Release);
    }

    pub fn store(&self) -> Option<&RwLock<DynStore>> {
        self.store.as_ref()
    }

    /// Store change counter, the optimistic-read validation point.
    pub fn change_count(&self) -> u64 {
        self.store
            .as_ref()
            .map_or(0, |lock| lock.read().change_count())
    }

    pub fn allocate_object_id(&self) -> u32 {
        self.next_object_id.fetch_add(1, Ordering::AcqRel)
    }

    // users

    /// Registers the first (admin) user at creation time. Password hashes
    /// are opaque bytes computed by the client.
    pub fn set_master_user(&self, user: impl Into<String>, password_hash: Vec<u8>) {
        self.users.write().insert(user.into(), password_hash);
    }

    pub fn has_users(&self) -> bool {
        !self.users.read().is_empty()
    }

    /// Compares credentials; unknown user and bad password are deliberately
    /// indistinguishable.
    pub fn validate_user(&self, user: &str, password_hash: &[u8]) -> bool {
        self.users
            .read()
            .get(user)
            .is_some_and(|stored| stored.as_slice() == password_hash)
    }

    // sessions

    pub fn create_session(self: &Arc<Self>, user: impl Into<String>) -> Session {
        let id = self.next_session_id.fetch_add(1, Ordering::AcqRel);
        let spill_enabled = self.settings.persistent && !self.settings.mv_store;
        let undo_log = UndoLog::new(
            self.settings.max_memory_undo,
            spill_enabled,
            self.temp_dir.path().to_path_buf(),
        );
        Session::new(id, user.into(), Arc::clone(self), undo_log)
    }

    // tables

    /// Creates a table backed by the page store (or the scan index for an
    /// in-memory database).
    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<Arc<RwLock<Table>>> {
        let id = self.allocate_object_id();
        let table = match &self.store {
            Some(lock) => {
                let mut store = lock.write();
                Table::persistent(&mut *store, id, name, columns)?
            }
            None => Table::temporary(id, name, columns),
        };
        let table = Arc::new(RwLock::new(table));
        self.tables.write().insert(id, Arc::clone(&table));
        self.table_names.write().insert(name.to_string(), id);
        debug!(table = name, id, "table created");
        Ok(table)
    }

    /// Creates a temporary (in-memory) table regardless of persistence.
    pub fn create_temporary_table(
        &self,
        name: &str,
        columns: Vec<Column>,
    ) -> Result<Arc<RwLock<Table>>> {
        let id = self.allocate_object_id();
        let table = Arc::new(RwLock::new(Table::temporary(id, name, columns)));
        self.tables.write().insert(id, Arc::clone(&table));
        self.table_names.write().insert(name.to_string(), id);
        Ok(table)
    }

    pub fn table(&self, id: u32) -> Option<Arc<RwLock<Table>>> {
        self.tables.read().get(&id).cloned()
    }

    /// Drops a table: its pages return to the allocator and its root
    /// registration is removed.
    pub fn drop_table(&self, table_id: u32) -> Result<()> {
        let Some(table) = self.tables.write().remove(&table_id) else {
            return Ok(());
        };
        let mut guard = table.write();
        self.table_names.write().remove(guard.name());
        match &self.store {
            Some(lock) => {
                let mut store = lock.write();
                guard.drop_storage(Some(&mut *store))?;
            }
            None => guard.drop_storage::<Box<dyn BlockStore + Send>>(None)?,
        }
        debug!(table = table_id, "table dropped");
        Ok(())
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<RwLock<Table>>> {
        let id = *self.table_names.read().get(name)?;
        self.table(id)
    }

    // row operations, locking table then store

    /// Inserts a row, registering the table with the session's undo log so
    /// rollback can resolve it later.
    pub fn add_row(&self, session: &mut Session, table_id: u32, row: Row) -> Result<i64> {
        let table = self
            .table(table_id)
            .ok_or_else(|| DbError::internal(format!("no table {table_id}")))?;
        session.undo_log_mut().register_table(&table);
        self.table_add_row(&table, session, row)
    }

    pub fn remove_row(&self, session: &mut Session, table_id: u32, row: &Row) -> Result<()> {
        let table = self
            .table(table_id)
            .ok_or_else(|| DbError::internal(format!("no table {table_id}")))?;
        session.undo_log_mut().register_table(&table);
        self.table_remove_row(&table, session, row)
    }

    pub fn table_add_row(
        &self,
        table: &Arc<RwLock<Table>>,
        session: &mut Session,
        row: Row,
    ) -> Result<i64> {
        let mut table = table.write();
        match &self.store {
            Some(lock) => {
                let mut store = lock.write();
                table.add_row(Some(&mut *store), session, row)
            }
            None => table.add_row::<Box<dyn BlockStore + Send>>(None, session, row),
        }
    }

    pub fn table_remove_row(
        &self,
        table: &Arc<RwLock<Table>>,
        session: &mut Session,
        row: &Row,
    ) -> Result<()> {
        let mut table = table.write();
        match &self.store {
            Some(lock) => {
                let mut store = lock.write();
                table.remove_row(Some(&mut *store), session, row)
            }
            None => table.remove_row::<Box<dyn BlockStore + Send>>(None, session, row),
        }
    }

    pub fn truncate_table(&self, session: &mut Session, table_id: u32) -> Result<()> {
        let table = self
            .table(table_id)
            .ok_or_else(|| DbError::internal(format!("no table {table_id}")))?;
        let mut table = table.write();
        match &self.store {
            Some(lock) => {
                let mut store = lock.write();
                table.truncate(Some(&mut *store), session)
            }
            None => table.truncate::<Box<dyn BlockStore + Send>>(None, session),
        }
    }

    /// All rows of a table in key order.
    pub fn all_rows(&self, table_id: u32) -> Result<Vec<Row>> {
        let table = self
            .table(table_id)
            .ok_or_else(|| DbError::internal(format!("no table {table_id}")))?;
        let table = table.read();
        match &self.store {
            Some(lock) => {
                let mut store = lock.write();
                table.all_rows(Some(&mut *store))
            }
            None => table.all_rows::<Box<dyn BlockStore + Send>>(None),
        }
    }

    /// Flushes dirty pages through the cache to the backing.
    pub fn flush(&self) -> Result<()> {
        if let Some(lock) = &self.store {
            lock.write().flush()?;
        }
        Ok(())
    }

    /// Closes the database: row counts are persisted, the store is flushed,
    /// and the lock file is removed.
    pub fn close(&self) -> Result<()> {
        self.set_closing(true);
        if let Some(lock) = &self.store {
            let mut store = lock.write();
            for table in self.tables.read().values() {
                table.read().close(Some(&mut *store))?;
            }
            store.flush()?;
        }
        if self.settings.persistent {
            let _ = std::fs::remove_file(self.settings.lock_file_path());
        }
        info!(name = %self.settings.name, "database closed");
        Ok(())
    }
}
