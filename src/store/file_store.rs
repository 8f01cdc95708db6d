//! # Paged File Abstraction
//!
//! [`FileStore`] wraps a random-access file with the operations the rest of
//! the store needs: positioned reads that block until the exact length
//! arrives, page-aligned allocation, truncation, and an explicit file
//! pointer for the sequential protocols (undo spill, block streams) that
//! read and write relative to the current position.
//!
//! ## File Header
//!
//! Every store file begins with a fixed 48-byte header:
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  -----------------------------------
//! 0       16    magic      b"Tessera Store\x00\x00\x00"
//! 16      4     version    format version (currently 1)
//! 20      4     page_size  store-wide page size
//! 24      16    reserved   zero
//! 40      8     checksum   CRC-64/ECMA over bytes [0, 40)
//! ```
//!
//! A bad magic, version, or checksum on open reports `FILE_CORRUPTED_1` with
//! the file name; the caller decides whether that is fatal.
//!
//! ## Temporary files
//!
//! `open_temp` creates an auto-deleting file (used by the undo-log spill).
//! The file is removed when the store is dropped, or explicitly via
//! [`FileStore::close_and_delete_silently`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use tempfile::TempPath;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::BlockStore;
use crate::config::{FILE_HEADER_SIZE, PAGE_SIZE};
use crate::error::{DbError, ErrorCode};

pub const STORE_MAGIC: &[u8; 16] = b"Tessera Store\x00\x00\x00";
pub const CURRENT_VERSION: u32 = 1;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    reserved: [u8; 16],
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    fn new() -> Self {
        let mut header = Self {
            magic: *STORE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            reserved: [0u8; 16],
            checksum: U64::new(0),
        };
        header.checksum = U64::new(CRC64.checksum(&header.as_bytes()[..40]));
        header
    }

    fn validate(bytes: &[u8], name: &str) -> Result<()> {
        let header = FileHeader::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| DbError::get(ErrorCode::FileCorrupted, format!("{name}: {e:?}")))?;
        if &header.magic != STORE_MAGIC
            || header.version.get() != CURRENT_VERSION
            || header.page_size.get() != PAGE_SIZE as u32
            || header.checksum.get() != CRC64.checksum(&bytes[..40])
        {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("bad file header in {name}"),
            ));
        }
        Ok(())
    }
}

/// A random-access store file with an explicit file pointer.
#[derive(Debug)]
pub struct FileStore {
    name: String,
    file: File,
    file_pos: u64,
    length: u64,
    temp: Option<TempPath>,
}

impl FileStore {
    /// Opens (or creates, in `"rw"` mode) a store file and validates its
    /// header. A fresh file gets a header written immediately.
    pub fn open(path: impl AsRef<Path>, mode: &str) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let write = mode.contains('w');
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .create(write)
            .open(path)
            .wrap_err_with(|| format!("opening store file {name}"))?;

        let length = file.metadata()?.len();
        let mut store = Self {
            name,
            file,
            file_pos: 0,
            length,
            temp: None,
        };

        if length == 0 {
            ensure!(write, "cannot initialize read-only store {}", store.name);
            store.init_header()?;
        } else {
            store.check_header()?;
        }
        store.seek(FILE_HEADER_SIZE as u64)?;
        Ok(store)
    }

    /// Creates an auto-deleting temporary store file in `dir`.
    pub fn open_temp(dir: impl AsRef<Path>) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("tessera.")
            .suffix(".temp.db")
            .tempfile_in(dir)?;
        let (file, path) = file.into_parts();
        let name = path.display().to_string();
        let mut store = Self {
            name,
            file,
            file_pos: 0,
            length: 0,
            temp: Some(path),
        };
        store.init_header()?;
        store.seek(FILE_HEADER_SIZE as u64)?;
        Ok(store)
    }

    fn init_header(&mut self) -> Result<()> {
        let header = FileHeader::new();
        self.seek(0)?;
        self.write(header.as_bytes())?;
        Ok(())
    }

    fn check_header(&mut self) -> Result<()> {
        if self.length < FILE_HEADER_SIZE as u64 {
            return Err(DbError::get(
                ErrorCode::FileCorrupted,
                format!("{} is shorter than the file header", self.name),
            ));
        }
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        self.seek(0)?;
        self.read_fully(&mut bytes)?;
        FileHeader::validate(&bytes, &self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn file_pointer(&self) -> u64 {
        self.file_pos
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos != self.file_pos {
            self.file.seek(SeekFrom::Start(pos))?;
            self.file_pos = pos;
        }
        Ok(())
    }

    /// Reads exactly `dst.len()` bytes at the file pointer or fails.
    pub fn read_fully(&mut self, dst: &mut [u8]) -> Result<()> {
        self.file
            .read_exact(dst)
            .wrap_err_with(|| format!("short read in {} at {}", self.name, self.file_pos))?;
        self.file_pos += dst.len() as u64;
        Ok(())
    }

    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        self.file
            .write_all(src)
            .wrap_err_with(|| format!("write failed in {} at {}", self.name, self.file_pos))?;
        self.file_pos += src.len() as u64;
        self.length = self.length.max(self.file_pos);
        Ok(())
    }

    /// Grows or shrinks the file. The file pointer is clamped to the new end.
    pub fn set_length(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.length = len;
        if self.file_pos > len {
            self.file_pos = len;
            self.file.seek(SeekFrom::Start(len))?;
        }
        Ok(())
    }

    pub fn sync_all(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    // page-granular helpers

    /// Reads the page `page_id` into `dst` (`dst.len() == PAGE_SIZE`).
    pub fn read_page(&mut self, page_id: u32, dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(dst.len(), PAGE_SIZE);
        self.seek(page_id as u64 * PAGE_SIZE as u64)?;
        self.read_fully(dst)
    }

    pub fn write_page(&mut self, page_id: u32, src: &[u8]) -> Result<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        self.seek(page_id as u64 * PAGE_SIZE as u64)?;
        self.write(src)
    }

    /// Extends the file by one page and returns the new page id.
    pub fn allocate(&mut self) -> Result<u32> {
        let page_id = self.length.div_ceil(PAGE_SIZE as u64) as u32;
        self.set_length((page_id as u64 + 1) * PAGE_SIZE as u64)?;
        Ok(page_id)
    }

    /// Deletes the file. Errors are swallowed; the store is consumed either
    /// way.
    pub fn close_and_delete_silently(mut self) {
        if let Some(path) = self.temp.take() {
            let _ = path.close();
        }
    }
}

impl BlockStore for FileStore {
    fn read_fully_at(&mut self, pos: u64, dst: &mut [u8]) -> Result<()> {
        self.seek(pos)?;
        self.read_fully(dst)
    }

    fn write_fully_at(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        self.seek(pos)?;
        self.write(src)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.set_length(size)
    }

    fn sync(&mut self) -> Result<()> {
        self.sync_all()
    }

    fn length(&self) -> u64 {
        self.length
    }
}
