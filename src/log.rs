//! Append-only value log: page-buffered writes, cross-page reads, and the
//! block-granular scan GC rewrites against.
//!
//! Tracks `current_lbn`/`page_offset`/`byte_offset`/`first_block_offset`
//! plus a tail page buffer. Every mutating call requires `&mut self`,
//! enforcing single-writer access through ordinary borrowing instead of
//! an internal mutex.

use crate::config::{IMS_PAGE_SIZE, PAGES_PER_BLOCK};
use crate::driver::BlockDevice;
use crate::key::ValuePtr;
use crate::record::{Record, RECORD_HEADER_SIZE};
use crate::status::{Result, Status};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sentinel carried back from [`LogManager::read_block`] on a decode
/// violation.
pub const INVALID_BLOCK_OFFSET: u32 = u32::MAX;

/// The log-relevant slice of `DB_INIT`: everything needed to resume
/// appending at exactly the position the previous session left off.
#[derive(Debug, Clone)]
pub struct LogState {
    pub next_lbn: u32,
    pub current_lbn: u32,
    pub page_offset: u32,
    pub byte_offset: u32,
    pub first_block_offset: u32,
    pub block_list: Vec<u32>,
}

impl LogState {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + 4 * self.block_list.len());
        let mut head = [0u8; 24];
        LittleEndian::write_u32(&mut head[0..4], self.next_lbn);
        LittleEndian::write_u32(&mut head[4..8], self.current_lbn);
        LittleEndian::write_u32(&mut head[8..12], self.page_offset);
        LittleEndian::write_u32(&mut head[12..16], self.byte_offset);
        LittleEndian::write_u32(&mut head[16..20], self.first_block_offset);
        LittleEndian::write_u32(&mut head[20..24], self.block_list.len() as u32);
        out.extend_from_slice(&head);
        for &lbn in &self.block_list {
            let mut b = [0u8; 4];
            LittleEndian::write_u32(&mut b, lbn);
            out.extend_from_slice(&b);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 24 {
            return Err(Status::corruption("truncated log state header"));
        }
        let next_lbn = LittleEndian::read_u32(&buf[0..4]);
        let current_lbn = LittleEndian::read_u32(&buf[4..8]);
        let page_offset = LittleEndian::read_u32(&buf[8..12]);
        let byte_offset = LittleEndian::read_u32(&buf[12..16]);
        let first_block_offset = LittleEndian::read_u32(&buf[16..20]);
        let count = LittleEndian::read_u32(&buf[20..24]) as usize;
        let need = 24 + 4 * count;
        if buf.len() < need {
            return Err(Status::corruption("truncated log block list"));
        }
        let mut block_list = Vec::with_capacity(count);
        for i in 0..count {
            block_list.push(LittleEndian::read_u32(&buf[24 + 4 * i..28 + 4 * i]));
        }
        Ok((
            Self { next_lbn, current_lbn, page_offset, byte_offset, first_block_offset, block_list },
            need,
        ))
    }
}

pub struct LogManager {
    device: Arc<dyn BlockDevice>,
    block_list: Vec<u32>,
    current_lbn: u32,
    page_offset: u32,
    byte_offset: u32,
    first_block_offset: u32,
    buffer: Vec<u8>,
}

impl LogManager {
    /// Fresh log on an empty device: allocates the first block.
    pub fn new(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let lbn = device.allocate_lbn()?;
        Ok(Self {
            device,
            block_list: vec![lbn],
            current_lbn: lbn,
            page_offset: 0,
            byte_offset: 0,
            first_block_offset: 0,
            buffer: vec![0u8; IMS_PAGE_SIZE],
        })
    }

    /// Resumes from a persisted [`LogState`], re-reading the tail page so
    /// appends continue to build on whatever was already flushed there.
    pub fn restore(device: Arc<dyn BlockDevice>, state: LogState) -> Result<Self> {
        let mut buffer = vec![0u8; IMS_PAGE_SIZE];
        if state.byte_offset > 0 {
            let lpn = state.current_lbn * PAGES_PER_BLOCK as u32 + state.page_offset;
            device.read_log(lpn, &mut buffer)?;
        }
        Ok(Self {
            device,
            block_list: state.block_list,
            current_lbn: state.current_lbn,
            page_offset: state.page_offset,
            byte_offset: state.byte_offset,
            first_block_offset: state.first_block_offset,
            buffer,
        })
    }

    pub fn state(&self) -> LogState {
        LogState {
            next_lbn: self.current_lbn + 1,
            current_lbn: self.current_lbn,
            page_offset: self.page_offset,
            byte_offset: self.byte_offset,
            first_block_offset: self.first_block_offset,
            block_list: self.block_list.clone(),
        }
    }

    fn current_lpn(&self) -> u32 {
        self.current_lbn * PAGES_PER_BLOCK as u32 + self.page_offset
    }

    /// The position the *next* appended record will start at. Callers embed
    /// this in the record's internal key before handing the record to
    /// [`LogManager::append`]: the pointer must be captured before the
    /// bytes move, so key and log position agree.
    pub fn current_ptr(&self) -> ValuePtr {
        ValuePtr { lpn: self.current_lpn(), offset: self.byte_offset }
    }

    /// Appends `record`'s encoding at [`LogManager::current_ptr`],
    /// flushing full pages to the device as the buffer fills and
    /// allocating a new block when the current one is exhausted.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let data = record.encode();
        let mut pos = 0usize;
        while pos < data.len() {
            let space = IMS_PAGE_SIZE - self.byte_offset as usize;
            let n = space.min(data.len() - pos);
            let start = self.byte_offset as usize;
            self.buffer[start..start + n].copy_from_slice(&data[pos..pos + n]);
            self.byte_offset += n as u32;
            pos += n;
            if self.byte_offset as usize == IMS_PAGE_SIZE {
                self.flush_tail_page()?;
            }
        }
        Ok(())
    }

    /// Writes the buffered tail page to the device and advances the
    /// write cursor, allocating a fresh block when the current one fills.
    fn flush_tail_page(&mut self) -> Result<()> {
        self.device.write_log(self.current_lpn(), &self.buffer)?;
        self.byte_offset = 0;
        self.page_offset += 1;
        if self.page_offset as usize == PAGES_PER_BLOCK {
            let lbn = self.device.allocate_lbn()?;
            self.block_list.push(lbn);
            self.current_lbn = lbn;
            self.page_offset = 0;
        }
        self.buffer.fill(0);
        Ok(())
    }

    /// Flushes a partial tail page so `close` never loses buffered bytes.
    /// Leaves the cursor unchanged: a later `append` resumes writing into
    /// the same page at the same `byte_offset`.
    pub fn flush_partial(&mut self) -> Result<()> {
        if self.byte_offset > 0 {
            self.device.write_log(self.current_lpn(), &self.buffer)?;
        }
        Ok(())
    }

    fn read_page(&self, lpn: u32) -> Result<Vec<u8>> {
        if lpn == self.current_lpn() {
            return Ok(self.buffer.clone());
        }
        let mut page = vec![0u8; IMS_PAGE_SIZE];
        self.device.read_log(lpn, &mut page)?;
        Ok(page)
    }

    /// Reads `len` bytes starting at `(lpn, offset)`, crossing as many page
    /// boundaries as necessary.
    fn read_span(&self, lpn: u32, offset: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut remaining = len;
        let mut cur_lpn = lpn;
        let mut cur_off = offset as usize;
        let mut pos = 0usize;
        while remaining > 0 {
            let page = self.read_page(cur_lpn)?;
            if cur_off >= IMS_PAGE_SIZE {
                return Err(Status::corruption("value log offset out of page bounds"));
            }
            let avail = IMS_PAGE_SIZE - cur_off;
            let n = avail.min(remaining);
            out[pos..pos + n].copy_from_slice(&page[cur_off..cur_off + n]);
            pos += n;
            remaining -= n;
            cur_lpn += 1;
            cur_off = 0;
        }
        Ok(out)
    }

    /// Reads the 8-byte header then the full record at `(lpn, offset)`:
    /// validates `internal_key_size == 64`.
    pub fn read(&self, lpn: u32, offset: u32) -> Result<Record> {
        let header = self.read_span(lpn, offset, RECORD_HEADER_SIZE)?;
        let (_, value_size) = Record::decode_header(&header)?;
        let total = RECORD_HEADER_SIZE + crate::config::INTERNAL_KEY_SIZE + value_size as usize;
        let buf = self.read_span(lpn, offset, total)?;
        Record::decode(&buf)
    }

    pub fn oldest_block(&self) -> Option<u32> {
        self.block_list.first().copied()
    }

    pub fn block_count(&self) -> usize {
        self.block_list.len()
    }

    pub fn first_block_offset(&self) -> u32 {
        self.first_block_offset
    }

    /// Scans one 2 MiB block starting at `start_offset` bytes into it,
    /// parsing consecutive records. A record straddling the block boundary
    /// is completed by reading into the next block; the number of its
    /// bytes that fell in the next block is returned as the second element
    /// (0 if nothing straddled). Any decode violation returns
    /// `(vec![], INVALID_BLOCK_OFFSET)`.
    pub fn read_block(&self, lbn: u32, start_offset: u32) -> (Vec<Record>, u32) {
        const BLOCK_SIZE: usize = crate::config::BLOCK_SIZE;
        let mut records = Vec::new();
        let mut pos_in_block = start_offset as usize;
        loop {
            if pos_in_block >= BLOCK_SIZE {
                return (records, 0);
            }
            let lpn = lbn * PAGES_PER_BLOCK as u32 + (pos_in_block / IMS_PAGE_SIZE) as u32;
            let off = (pos_in_block % IMS_PAGE_SIZE) as u32;
            let record = match self.read(lpn, off) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, lbn, pos_in_block, "value log GC scan hit a decode violation");
                    return (Vec::new(), INVALID_BLOCK_OFFSET);
                }
            };
            let total = record.encoded_len();
            let end = pos_in_block + total;
            records.push(record);
            if end >= BLOCK_SIZE {
                return (records, (end - BLOCK_SIZE) as u32);
            }
            pos_in_block = end;
        }
    }

    /// Drops the oldest block from the block list and advances
    /// `first_block_offset` to carry a straddling record into the new
    /// oldest block. Caller (the GC orchestrator) must have already
    /// rewritten every live record the block held.
    pub fn retire_oldest_block(&mut self, next_block_valid_offset: u32) {
        if !self.block_list.is_empty() {
            debug!(lbn = self.block_list[0], "retiring value log block");
            self.block_list.remove(0);
        }
        self.first_block_offset = next_block_valid_offset;
    }
}

impl crate::sstable::ValueSource for LogManager {
    fn resolve(&self, lpn: u32, offset: u32) -> Result<bytes::Bytes> {
        Ok(self.read(lpn, offset)?.value)
    }
}
