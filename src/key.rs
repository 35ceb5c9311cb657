//! Fixed 64-byte internal-key encoding and the composite comparator.
//!
//! Layout (little-endian, total 64 bytes):
//! `L(1) | user_key(40, zero-padded) | lpn(4) | offset(4) | reserved(7) | tag(8)`
//! where `tag = (seq << 8) | type`.

use crate::config::{INTERNAL_KEY_SIZE, MAX_USER_KEY_LEN};
use crate::status::{Result, Status};
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::fmt;

/// Record type carried in the low byte of an internal key's tag.
///
/// `Deletion` and `Value` are the only types a decoded, persisted key may
/// legally carry; `Min`/`Max` exist only to build synthetic half-open range
/// endpoints (never written to a block); `Invalid` marks an unused packer
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
    Min = 2,
    Max = 3,
    Invalid = 0xFF,
}

impl ValueType {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ValueType::Deletion,
            1 => ValueType::Value,
            2 => ValueType::Min,
            3 => ValueType::Max,
            _ => ValueType::Invalid,
        }
    }
}

/// A value's on-device location: log page number + intra-page byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValuePtr {
    pub lpn: u32,
    pub offset: u32,
}

/// The fixed 64-byte internal key. Cheap to clone (it's a flat byte array).
#[derive(Clone, PartialEq, Eq)]
pub struct InternalKey {
    bytes: [u8; INTERNAL_KEY_SIZE],
}

impl InternalKey {
    /// Builds a key for a real record: user key + value pointer + seq/type.
    ///
    /// `user_key.len()` must be `<= MAX_USER_KEY_LEN`; callers at the API
    /// boundary are responsible for rejecting longer keys before this is
    /// called — an oversized user key is a programmer error, not `IoError`.
    pub fn new(user_key: &[u8], value_ptr: ValuePtr, seq: u64, ty: ValueType) -> Self {
        assert!(
            user_key.len() <= MAX_USER_KEY_LEN,
            "user key exceeds {MAX_USER_KEY_LEN} bytes"
        );
        assert!(seq <= (u64::MAX >> 8), "sequence number exceeds 56 bits");
        let mut bytes = [0u8; INTERNAL_KEY_SIZE];
        bytes[0] = user_key.len() as u8;
        bytes[1..1 + user_key.len()].copy_from_slice(user_key);
        LittleEndian::write_u32(&mut bytes[41..45], value_ptr.lpn);
        LittleEndian::write_u32(&mut bytes[45..49], value_ptr.offset);
        let tag = (seq << 8) | (ty as u64 & 0xFF);
        LittleEndian::write_u64(&mut bytes[56..64], tag);
        Self { bytes }
    }

    /// A sentinel that sorts before every real record sharing `user_key`
    /// (seq = `u64::MAX >> 8`, the highest representable 56-bit sequence,
    /// so it always "wins" the higher-seq-first tie-break). Used to build
    /// the inclusive lower bound of a `[lower, upper)` range.
    pub fn lower_sentinel(user_key: &[u8]) -> Self {
        Self::new(user_key, ValuePtr::default(), u64::MAX >> 8, ValueType::Min)
    }

    /// A sentinel that sorts after every real record sharing `user_key`
    /// (seq = 0, the lowest possible sequence). Used to build the strict
    /// upper bound of a `[lower, upper)` range.
    pub fn upper_sentinel(user_key: &[u8]) -> Self {
        Self::new(user_key, ValuePtr::default(), 0, ValueType::Max)
    }

    pub fn user_key(&self) -> &[u8] {
        let len = self.bytes[0] as usize;
        &self.bytes[1..1 + len]
    }

    pub fn user_key_len(&self) -> u8 {
        self.bytes[0]
    }

    pub fn value_ptr(&self) -> ValuePtr {
        ValuePtr {
            lpn: LittleEndian::read_u32(&self.bytes[41..45]),
            offset: LittleEndian::read_u32(&self.bytes[45..49]),
        }
    }

    fn tag(&self) -> u64 {
        LittleEndian::read_u64(&self.bytes[56..64])
    }

    pub fn seq(&self) -> u64 {
        self.tag() >> 8
    }

    pub fn value_type(&self) -> ValueType {
        ValueType::from_u8((self.tag() & 0xFF) as u8)
    }

    pub fn is_deletion(&self) -> bool {
        self.value_type() == ValueType::Deletion
    }

    /// Rejects oversized user keys, the reserved `Invalid` marker, and the
    /// all-zero slot a packer leaves uninitialized when it doesn't pre-fill
    /// with `0xFF`.
    pub fn is_valid(&self) -> bool {
        let len = self.bytes[0];
        if len as usize > MAX_USER_KEY_LEN || len == 0 {
            return false;
        }
        matches!(self.value_type(), ValueType::Deletion | ValueType::Value)
    }

    pub fn encode(&self) -> [u8; INTERNAL_KEY_SIZE] {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8; INTERNAL_KEY_SIZE] {
        &self.bytes
    }

    /// Decode is total only for 64-byte inputs; anything else is a
    /// malformed key.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != INTERNAL_KEY_SIZE {
            return Err(Status::corruption(format!(
                "malformed internal key: expected {INTERNAL_KEY_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let mut bytes = [0u8; INTERNAL_KEY_SIZE];
        bytes.copy_from_slice(buf);
        Ok(Self { bytes })
    }

    /// The comparator variant that ignores `seq`/`type`: used for hashing
    /// and dedup of user keys.
    pub fn user_key_cmp(a: &[u8], b: &[u8]) -> Ordering {
        match a.cmp(b) {
            Ordering::Equal => a.len().cmp(&b.len()),
            other => other,
        }
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKey")
            .field("user_key", &String::from_utf8_lossy(self.user_key()))
            .field("seq", &self.seq())
            .field("type", &self.value_type())
            .field("value_ptr", &self.value_ptr())
            .finish()
    }
}

/// The composite comparator: user-key bytewise ascending; on tie, shorter
/// key first; on tie, higher seq first (newer wins); on tie, lower type
/// value first (deletions sort before puts at the same seq — see
/// DESIGN.md for the reasoning behind this tie-break direction).
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match Self::user_key_cmp(self.user_key(), other.user_key()) {
            Ordering::Equal => {}
            other => return other,
        }
        match other.seq().cmp(&self.seq()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        (self.tag() & 0xFF).cmp(&(other.tag() & 0xFF))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let k = InternalKey::new(b"hello", ValuePtr { lpn: 7, offset: 42 }, 100, ValueType::Value);
        let decoded = InternalKey::decode(&k.encode()).unwrap();
        assert_eq!(decoded.user_key(), b"hello");
        assert_eq!(decoded.seq(), 100);
        assert_eq!(decoded.value_type(), ValueType::Value);
        assert_eq!(decoded.value_ptr(), ValuePtr { lpn: 7, offset: 42 });
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(InternalKey::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn total_order_is_strict() {
        let a = InternalKey::new(b"a", ValuePtr::default(), 1, ValueType::Value);
        let b = InternalKey::new(b"b", ValuePtr::default(), 1, ValueType::Value);
        assert!(a < b);
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn shorter_key_sorts_first_on_prefix_tie() {
        let short = InternalKey::new(b"ab", ValuePtr::default(), 1, ValueType::Value);
        let long = InternalKey::new(b"abc", ValuePtr::default(), 1, ValueType::Value);
        assert!(short < long);
    }

    #[test]
    fn higher_seq_sorts_first() {
        let newer = InternalKey::new(b"k", ValuePtr::default(), 5, ValueType::Value);
        let older = InternalKey::new(b"k", ValuePtr::default(), 2, ValueType::Value);
        assert!(newer < older);
    }

    #[test]
    fn tombstone_sorts_before_put_at_same_seq() {
        let del = InternalKey::new(b"k", ValuePtr::default(), 5, ValueType::Deletion);
        let put = InternalKey::new(b"k", ValuePtr::default(), 5, ValueType::Value);
        assert!(del < put);
    }

    #[test]
    fn sentinels_bound_the_user_key_cluster() {
        let lower = InternalKey::lower_sentinel(b"k");
        let upper = InternalKey::upper_sentinel(b"k");
        let real = InternalKey::new(b"k", ValuePtr::default(), 3, ValueType::Value);
        assert!(lower < real);
        assert!(real < upper);
    }

    #[test]
    fn invalid_rejects_invalid_marker_and_zeroed_slot() {
        let invalid = InternalKey::new(b"abc", ValuePtr::default(), 1, ValueType::Invalid);
        assert!(!invalid.is_valid());
        let zeroed = InternalKey { bytes: [0u8; INTERNAL_KEY_SIZE] };
        assert!(!zeroed.is_valid());
        let valid = InternalKey::new(b"k", ValuePtr::default(), 1, ValueType::Value);
        assert!(valid.is_valid());
    }
}
