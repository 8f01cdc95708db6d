//! # Tessera Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (16 bytes, fixed)
//!       │
//!       ├─> PAGE_USABLE_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!       │
//!       └─> CACHE_BLOCK_SIZE (equal to PAGE_SIZE so one cache line
//!           holds exactly one page image)
//!
//! FILE_BLOCK_SIZE (16 bytes)
//!       │
//!       ├─> FILE_HEADER_SIZE (3 blocks, start of every store file)
//!       │
//!       ├─> stream records are zero-padded to this multiple
//!       │
//!       └─> undo records are zero-padded to this multiple and
//!           self-delimit via a leading block count
//!
//! CACHE_MAX_MEMORY (1 MiB)
//!       │
//!       └─> 256 resident blocks at CACHE_BLOCK_SIZE granularity
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `PAGE_SIZE` is a power of two (alignment arithmetic uses masks)
//! 2. `CACHE_BLOCK_SIZE` is a power of two
//! 3. `PAGE_SIZE % FILE_BLOCK_SIZE == 0` (pages are block-aligned)
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{PAGE_SIZE, FILE_BLOCK_SIZE};
//! ```

// ============================================================================
// PAGE LAYOUT CONSTANTS
// These define the fundamental page structure used throughout the store
// ============================================================================

/// Size of each database page in bytes (4KB).
/// This is the fundamental unit of I/O and caching and is immutable for the
/// lifetime of a store.
pub const PAGE_SIZE: usize = 4096;

/// Size of the page header in bytes.
/// Every page begins with this header containing type, parent, and metadata.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Usable space in a regular page after the header.
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

const _: () = assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");

// ============================================================================
// FILE LAYOUT CONSTANTS
// ============================================================================

/// Granularity of all record alignment within store files.
/// Stream and undo records are zero-padded to a multiple of this size.
pub const FILE_BLOCK_SIZE: usize = 16;

/// Size of the file header at the start of every store file (3 blocks).
/// Contains magic bytes, format version, page size, and a CRC-64 checksum.
pub const FILE_HEADER_SIZE: usize = 3 * FILE_BLOCK_SIZE;

const _: () = assert!(
    PAGE_SIZE % FILE_BLOCK_SIZE == 0,
    "pages must be an exact multiple of the file block size"
);

// ============================================================================
// BLOCK READ CACHE CONFIGURATION
// ============================================================================

/// Size of one cached file block (4KB). Reads through the cached file wrapper
/// are served in aligned blocks of this size.
pub const CACHE_BLOCK_SIZE: usize = 4096;

/// Total memory budget of the block read cache (1 MiB = 256 blocks).
pub const CACHE_MAX_MEMORY: usize = 1024 * 1024;

/// Number of entries the secondary cache tier retains after primary eviction.
pub const CACHE_SECOND_LEVEL_ENTRIES: usize = 64;

const _: () = assert!(
    CACHE_BLOCK_SIZE.is_power_of_two(),
    "CACHE_BLOCK_SIZE must be a power of two for mask alignment"
);

// ============================================================================
// UNDO LOG CONFIGURATION
// ============================================================================

/// In-memory undo records above this count spill to a temporary file
/// (persistent, non-multi-version databases only).
pub const DEFAULT_MAX_MEMORY_UNDO: usize = 50_000;

/// Spill batches are flushed to the temp file once the serialization buffer
/// exceeds this many bytes.
pub const UNDO_BLOCK_SIZE: usize = 1 << 16;

// ============================================================================
// OPTIMIZER CONFIGURATION
// ============================================================================

/// Baseline cost added to every row-count driven cost estimate, so that even
/// an empty table scan is never free.
pub const COST_ROW_OFFSET: f64 = 1000.0;

/// Up to this many filters the optimizer enumerates every join order.
pub const MAX_BRUTE_FORCE_FILTERS: usize = 7;

/// Work budget for the partial brute-force phase when there are more filters
/// than `MAX_BRUTE_FORCE_FILTERS`.
pub const MAX_BRUTE_FORCE: usize = 2000;

/// Iteration budget for the genetic join-order search.
pub const MAX_GENETIC: usize = 500;

// ============================================================================
// INDEX MEMORY ACCOUNTING
// ============================================================================

/// Number of samples after which the per-page memory estimate switches from a
/// running mean to exponential smoothing.
pub const MEMORY_FACTOR: i64 = 16;

// ============================================================================
// CREDENTIAL THROTTLE
// ============================================================================

/// Initial delay after a failed authentication, in milliseconds.
pub const DELAY_WRONG_PASSWORD_MIN: u64 = 250;

/// Upper bound for the doubling authentication delay, in milliseconds.
pub const DELAY_WRONG_PASSWORD_MAX: u64 = 4000;

// ============================================================================
// DATABASE LIFECYCLE
// ============================================================================

/// How long an opening session waits for a closing database before giving up.
pub const MAX_CLOSING_WAIT_MS: u64 = 60_000;

/// Lock mode in which concurrent row-level conflicts during undo are expected
/// and silently ignored.
pub const LOCK_MODE_OFF: i32 = 0;

/// Default table lock mode (read committed).
pub const LOCK_MODE_READ_COMMITTED: i32 = 3;

// ============================================================================
// FILE SUFFIXES
// ============================================================================

/// Suffix of the page-store data file.
pub const SUFFIX_PAGE_FILE: &str = ".t.db";

/// Suffix of the multi-version store data file.
pub const SUFFIX_MV_FILE: &str = ".mv.db";
