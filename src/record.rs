//! On-log record framing: `internal_key_size(4) | value_size(4) |
//! internal_key(64) | value`. No per-record checksum.

use crate::config::INTERNAL_KEY_SIZE;
use crate::key::InternalKey;
use crate::status::{Result, Status};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

/// Fixed header size: two `u32` length fields.
pub const RECORD_HEADER_SIZE: usize = 8;

/// A decoded log record: an internal key plus its value bytes (empty for
/// tombstones).
#[derive(Debug, Clone)]
pub struct Record {
    pub internal_key: InternalKey,
    pub value: Bytes,
}

impl Record {
    pub fn new(internal_key: InternalKey, value: Bytes) -> Self {
        Self { internal_key, value }
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + INTERNAL_KEY_SIZE + self.value.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        let mut header = [0u8; RECORD_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], INTERNAL_KEY_SIZE as u32);
        LittleEndian::write_u32(&mut header[4..8], self.value.len() as u32);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.internal_key.encode());
        out.extend_from_slice(&self.value);
        out
    }

    /// Decodes the fixed 8-byte header only; validates
    /// `internal_key_size == 64`, returning `Corruption` otherwise.
    /// Returns `(internal_key_size, value_size)`.
    pub fn decode_header(buf: &[u8]) -> Result<(u32, u32)> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(Status::corruption("record header truncated"));
        }
        let internal_key_size = LittleEndian::read_u32(&buf[0..4]);
        let value_size = LittleEndian::read_u32(&buf[4..8]);
        if internal_key_size as usize != INTERNAL_KEY_SIZE {
            return Err(Status::corruption(format!(
                "corrupted record: internal_key_size {internal_key_size} != {INTERNAL_KEY_SIZE}"
            )));
        }
        Ok((internal_key_size, value_size))
    }

    /// Decodes a full record from a buffer whose length is exactly
    /// `RECORD_HEADER_SIZE + INTERNAL_KEY_SIZE + value_size`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (_, value_size) = Self::decode_header(buf)?;
        let key_start = RECORD_HEADER_SIZE;
        let key_end = key_start + INTERNAL_KEY_SIZE;
        let value_end = key_end + value_size as usize;
        if buf.len() < value_end {
            return Err(Status::corruption("record truncated"));
        }
        let internal_key = InternalKey::decode(&buf[key_start..key_end])?;
        let value = Bytes::copy_from_slice(&buf[key_end..value_end]);
        Ok(Self { internal_key, value })
    }
}
