//! # Engine Module
//!
//! The session/transaction envelope around the storage core: the database
//! registry with its open/credential protocol, the database object rooting
//! all ownership, tables, sessions, and the per-session undo log.
//!
//! ```text
//! Engine ──owns──> Database ──owns──> PageStore, Table{indexes}
//!                     ▲
//! Session ──Arc───────┘   (tables and indexes are reached by id;
//!   └─owns─> UndoLog       nothing points back at sessions)
//! ```

pub mod database;
pub mod registry;
pub mod session;
pub mod table;
pub mod undo_log;

pub use database::{Database, DbSettings, DynStore};
pub use registry::{Authenticator, ConnectionInfo, Engine};
pub use session::Session;
pub use table::{Column, PrimaryIndex, Table};
pub use undo_log::{UndoLog, UndoLogRecord, UndoOp};
