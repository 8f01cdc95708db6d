//! # Tessera - Embedded Relational Storage & Execution Core
//!
//! Tessera is the storage and execution core of an embedded relational
//! database: a paged persistent store with a read-caching file layer, a
//! B-tree row index with an auxiliary hash index, a spilling per-session
//! undo log, and a cost-based join-order optimizer.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tessera::engine::{ConnectionInfo, Engine};
//!
//! let engine = Engine::new();
//! let mut session = engine.open_session(
//!     ConnectionInfo::new("app", "admin", b"secret-hash".to_vec()),
//! )?;
//!
//! let db = session.database().clone();
//! let table = db.create_table("users", columns)?;
//! db.add_row(&mut session, table.read().id(), row)?;
//! session.commit()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Engine (registry, open protocol)   │
//! ├─────────────────────────────────────┤
//! │  Database │ Session │ UndoLog       │
//! ├─────────────────────────────────────┤
//! │  Optimizer (join-order search)      │
//! ├─────────────────────────────────────┤
//! │  Indexes: scan │ B-tree │ hash      │
//! ├─────────────────────────────────────┤
//! │  PageStore (alloc, roots, dirty)    │
//! ├─────────────────────────────────────┤
//! │  CachedFile (LIRS block cache)      │
//! ├─────────────────────────────────────┤
//! │  FileStore │ OffHeapStore           │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! One logical writer per database under session serialization; the block
//! cache and page store permit concurrent readers. The undo log is
//! single-owner per session and deliberately not thread-safe.
//!
//! ## Module Overview
//!
//! - [`store`]: paged file, block read cache, page store, block streams,
//!   off-heap backing
//! - [`index`]: scan index with tombstone freelist, data B-tree, hash index
//! - [`engine`]: database registry, sessions, undo log
//! - [`optimizer`]: cost-driven join-order search
//! - [`types`]: values and rows
//! - [`error`]: enumerated database error codes

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod optimizer;
pub mod store;
pub mod types;

pub use engine::{ConnectionInfo, Database, Engine, Session};
pub use error::{error_code, DbError, ErrorCode};
pub use types::{Row, SqlType, Value};
