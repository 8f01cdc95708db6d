//! # Buffered Block Streams
//!
//! Record-aligned producer/consumer streams over the store, in two flavors:
//!
//! - [`FileBlockWriter`] / [`FileBlockReader`] work directly on a
//!   [`FileStore`], emitting one self-delimiting record per write call with
//!   optional per-record compression.
//! - [`PageOutputStream`] / [`PageInputStream`] carry a byte stream across a
//!   trunk/data page chain inside the page store, keyed by a monotonically
//!   increasing log key.
//!
//! ## File Record Layout
//!
//! Records are zero-padded to `FILE_BLOCK_SIZE` boundaries:
//!
//! ```text
//! uncompressed: i32 len                      | bytes[len]          | pad
//! compressed:   i32 clen | i32 uncompressed | bytes[clen]         | pad
//! ```
//!
//! The compression algorithm is not embedded in the record; the reader must
//! be configured with the writer's algorithm.
//!
//! ## Error Behavior
//!
//! A negative length prefix closes the reader cleanly; subsequent reads
//! report end of stream (`0`). The writer takes ownership of its backing
//! store and closes it when the stream is closed.
//!
//! ## Page Chain Layout
//!
//! ```text
//! trunk: header(next = next trunk, aux = log key) | u32 count | u32 ids[count]
//! data:  header(parent = trunk,   aux = log key) | u16 used  | bytes[used]
//! ```
//!
//! Trunks carry consecutive log keys. End-of-stream is reached when the next
//! trunk is absent or its log key does not continue the sequence.

use eyre::{ensure, Result};
use tracing::trace;

use super::{BlockStore, CompressTool, Data, FileStore, PageHeader, PageStore, PageType};
use crate::config::{FILE_BLOCK_SIZE, FILE_HEADER_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE};

const DATA_PAYLOAD_START: usize = PAGE_HEADER_SIZE + 2;
const DATA_CAPACITY: usize = PAGE_SIZE - DATA_PAYLOAD_START;
const TRUNK_CAPACITY: usize = (PAGE_SIZE - PAGE_HEADER_SIZE - 4) / 4;

fn align_up(len: usize) -> usize {
    len.div_ceil(FILE_BLOCK_SIZE) * FILE_BLOCK_SIZE
}

/// Writes one aligned record per `write` call to a file store.
pub struct FileBlockWriter {
    store: Option<FileStore>,
    page: Data,
    compress: Option<CompressTool>,
}

impl FileBlockWriter {
    /// Takes ownership of `store`; it is closed with the stream.
    pub fn new(store: FileStore, compress: Option<CompressTool>) -> Self {
        Self {
            store: Some(store),
            page: Data::create(FILE_BLOCK_SIZE),
            compress,
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| eyre::eyre!("write on closed stream"))?;
        self.page.reset();
        match self.compress {
            Some(tool) => {
                let packed = tool.compress(buf);
                self.page.check_capacity(8 + packed.len());
                self.page.write_i32(packed.len() as i32);
                self.page.write_i32(buf.len() as i32);
                self.page.write(&packed);
            }
            None => {
                self.page.check_capacity(4 + buf.len());
                self.page.write_i32(buf.len() as i32);
                self.page.write(buf);
            }
        }
        self.page.fill_aligned();
        store.write(&self.page.bytes()[..self.page.len()])
    }

    /// Closes the stream and its backing store.
    pub fn close(mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            drop(store);
        }
        Ok(())
    }
}

/// Reads records written by [`FileBlockWriter`].
pub struct FileBlockReader {
    store: Option<FileStore>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    remaining: usize,
    compress: Option<CompressTool>,
    end_of_file: bool,
}

impl FileBlockReader {
    pub fn new(mut store: FileStore, compress: Option<CompressTool>) -> Result<Self> {
        let mut reader = Self {
            store: None,
            buffer: Vec::new(),
            buffer_pos: 0,
            remaining: 0,
            compress,
            end_of_file: false,
        };
        if store.length() <= FILE_HEADER_SIZE as u64 {
            reader.end_of_file = true;
        } else {
            store.seek(FILE_HEADER_SIZE as u64)?;
            reader.store = Some(store);
            reader.fill_buffer()?;
        }
        Ok(reader)
    }

    /// Bytes available in the current record.
    pub fn available(&self) -> usize {
        self.remaining
    }

    /// Reads up to `dst.len()` bytes; `0` signals end of stream.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < dst.len() {
            let n = self.read_block(&mut dst[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    fn read_block(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.fill_buffer()?;
        if self.end_of_file {
            return Ok(0);
        }
        let n = self.remaining.min(dst.len());
        dst[..n].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
        self.buffer_pos += n;
        self.remaining -= n;
        Ok(n)
    }

    fn fill_buffer(&mut self) -> Result<()> {
        if self.remaining > 0 || self.end_of_file {
            return Ok(());
        }
        let Some(store) = self.store.as_mut() else {
            self.end_of_file = true;
            return Ok(());
        };
        if store.file_pointer() >= store.length() {
            self.close();
            return Ok(());
        }
        let mut head = [0u8; FILE_BLOCK_SIZE];
        store.read_fully(&mut head)?;
        let len = i32::from_le_bytes(head[..4].try_into().unwrap()); // INVARIANT: FILE_BLOCK_SIZE >= 4
        if len < 0 {
            // corrupt or zeroed header: close cleanly
            self.close();
            return Ok(());
        }
        let len = len as usize;
        let header = if self.compress.is_some() { 8 } else { 4 };
        let total = align_up(header + len);
        let mut record = vec![0u8; total];
        record[..FILE_BLOCK_SIZE].copy_from_slice(&head);
        if total > FILE_BLOCK_SIZE {
            store.read_fully(&mut record[FILE_BLOCK_SIZE..])?;
        }
        match self.compress {
            Some(tool) => {
                let uncompressed =
                    i32::from_le_bytes(record[4..8].try_into().unwrap()) as usize; // INVARIANT: header is 8 bytes in compressed mode
                let mut out = vec![0u8; uncompressed];
                tool.expand(&record[8..8 + len], &mut out, 0)?;
                self.buffer = out;
            }
            None => {
                self.buffer = record[4..4 + len].to_vec();
            }
        }
        self.buffer_pos = 0;
        self.remaining = self.buffer.len();
        Ok(())
    }

    fn close(&mut self) {
        self.end_of_file = true;
        self.store = None;
    }
}

/// Accumulates a byte stream and materializes it as a trunk/data page chain.
pub struct PageOutputStream {
    log_key: u32,
    buffer: Vec<u8>,
}

impl PageOutputStream {
    pub fn new(log_key: u32) -> Self {
        Self {
            log_key,
            buffer: Vec::new(),
        }
    }

    pub fn write(&mut self, buf: &[u8]) {
        self.buffer.extend_from_slice(buf);
    }

    /// Writes the accumulated stream into the store and returns the first
    /// trunk page id.
    pub fn flush<S: BlockStore>(self, store: &mut PageStore<S>) -> Result<u32> {
        ensure!(!self.buffer.is_empty(), "empty page stream");

        // partition payload into data pages
        let mut data_pages = Vec::new();
        for chunk in self.buffer.chunks(DATA_CAPACITY) {
            let id = store.allocate_page();
            data_pages.push((id, chunk.to_vec()));
        }

        // group data pages under consecutive trunks
        let trunk_count = data_pages.len().div_ceil(TRUNK_CAPACITY);
        let trunk_ids: Vec<u32> = (0..trunk_count).map(|_| store.allocate_page()).collect();

        for (i, trunk_id) in trunk_ids.iter().enumerate() {
            let log_key = self.log_key + i as u32;
            let members = &data_pages[i * TRUNK_CAPACITY..((i + 1) * TRUNK_CAPACITY).min(data_pages.len())];

            for (page_id, chunk) in members {
                let page = store.page_mut(*page_id)?;
                let mut header = PageHeader::new(PageType::StreamData);
                header.set_parent(*trunk_id);
                header.set_log_key(log_key);
                header.write_to(page)?;
                page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2]
                    .copy_from_slice(&(chunk.len() as u16).to_le_bytes());
                page[DATA_PAYLOAD_START..DATA_PAYLOAD_START + chunk.len()].copy_from_slice(chunk);
            }

            let next_trunk = trunk_ids.get(i + 1).copied().unwrap_or(0);
            let page = store.page_mut(*trunk_id)?;
            let mut header = PageHeader::new(PageType::StreamTrunk);
            header.set_next(next_trunk);
            header.set_log_key(log_key);
            header.set_entry_count(members.len() as u16);
            header.write_to(page)?;
            let mut pos = PAGE_HEADER_SIZE;
            page[pos..pos + 4].copy_from_slice(&(members.len() as u32).to_le_bytes());
            pos += 4;
            for (page_id, _) in members {
                page[pos..pos + 4].copy_from_slice(&page_id.to_le_bytes());
                pos += 4;
            }
        }

        trace!(
            trunks = trunk_ids.len(),
            pages = data_pages.len(),
            "page stream flushed"
        );
        Ok(trunk_ids[0])
    }
}

/// Reads a byte stream back across its trunk/data page chain.
pub struct PageInputStream {
    next_trunk: Option<u32>,
    log_key: u32,
    pending_pages: Vec<u32>,
    pending_index: usize,
    buffer: Vec<u8>,
    buffer_pos: usize,
    end_of_file: bool,
}

impl PageInputStream {
    /// `log_key` is the key of the first trunk in the chain.
    pub fn new(log_key: u32, first_trunk: u32) -> Self {
        Self {
            next_trunk: Some(first_trunk),
            // minus one because the key is incremented before comparing
            log_key: log_key.wrapping_sub(1),
            pending_pages: Vec::new(),
            pending_index: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
            end_of_file: false,
        }
    }

    /// Reads up to `dst.len()` bytes; `0` signals end of stream.
    pub fn read<S: BlockStore>(
        &mut self,
        store: &mut PageStore<S>,
        dst: &mut [u8],
    ) -> Result<usize> {
        let mut done = 0;
        while done < dst.len() {
            self.fill_buffer(store)?;
            if self.end_of_file {
                break;
            }
            let n = (self.buffer.len() - self.buffer_pos).min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
            self.buffer_pos += n;
            done += n;
        }
        Ok(done)
    }

    /// Reads the entire remaining stream.
    pub fn read_to_end<S: BlockStore>(&mut self, store: &mut PageStore<S>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; PAGE_SIZE];
        loop {
            let n = self.read(store, &mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    fn fill_buffer<S: BlockStore>(&mut self, store: &mut PageStore<S>) -> Result<()> {
        if self.buffer_pos < self.buffer.len() || self.end_of_file {
            return Ok(());
        }
        loop {
            if self.pending_index < self.pending_pages.len() {
                let page_id = self.pending_pages[self.pending_index];
                self.pending_index += 1;
                if store.page_type(page_id)? != PageType::StreamData {
                    self.end_of_file = true;
                    return Ok(());
                }
                let page = store.page(page_id)?;
                let header = PageHeader::from_bytes(page)?;
                if header.log_key() != self.log_key {
                    self.end_of_file = true;
                    return Ok(());
                }
                let used = u16::from_le_bytes(
                    page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].try_into().unwrap(), // INVARIANT: page is PAGE_SIZE bytes
                ) as usize;
                self.buffer = page[DATA_PAYLOAD_START..DATA_PAYLOAD_START + used].to_vec();
                self.buffer_pos = 0;
                return Ok(());
            }
            // advance to the next trunk
            let Some(trunk_id) = self.next_trunk.take() else {
                self.end_of_file = true;
                return Ok(());
            };
            if trunk_id == 0
                || !store.is_allocated(trunk_id)
                || store.page_type(trunk_id)? != PageType::StreamTrunk
            {
                self.end_of_file = true;
                return Ok(());
            }
            self.log_key = self.log_key.wrapping_add(1);
            let page = store.page(trunk_id)?;
            let header = PageHeader::from_bytes(page)?;
            if header.log_key() != self.log_key {
                self.end_of_file = true;
                return Ok(());
            }
            self.next_trunk = Some(header.next());
            let count = u32::from_le_bytes(
                page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4].try_into().unwrap(), // INVARIANT: page is PAGE_SIZE bytes
            ) as usize;
            let mut pages = Vec::with_capacity(count);
            let mut pos = PAGE_HEADER_SIZE + 4;
            for _ in 0..count {
                pages.push(u32::from_le_bytes(page[pos..pos + 4].try_into().unwrap())); // INVARIANT: count bounded by TRUNK_CAPACITY
                pos += 4;
            }
            self.pending_pages = pages;
            self.pending_index = 0;
        }
    }
}
