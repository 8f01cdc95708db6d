//! Typed values and rows.

mod row;
mod value;

pub use row::{Row, SlotRow, MEMORY_UNCOMPUTED, ROWID_INDEX};
pub use value::{SqlType, Value};
