//! Top-level range-query iterator: a k-way merge over the memtable, the
//! immutable memtable, the Level-0 merge, and one Level-N iterator per
//! non-empty level, folded by user key with tombstones surfaced to the
//! caller rather than silently skipped — callers decide what an absent
//! value means, so the fold step here only dedups same-user-key runs, it
//! never filters deletions.

use crate::iterators::RecordIterator;
use crate::status::Result;
use bytes::Bytes;

/// One folded entry: the newest record for `user_key` in the scanned
/// range. `value` is `None` for a tombstone.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub user_key: Vec<u8>,
    pub value: Option<Bytes>,
}

/// Wraps any already-bounded [`RecordIterator`] (typically a
/// [`crate::iterators::merge_iterator::MergeIterator`] over memtable,
/// immutable, Level-0, and per-level Level-N children) and folds
/// consecutive entries sharing a user key down to the first — which, by
/// the composite comparator, is always the one with the highest seq.
pub struct RangeQueryIterator {
    inner: Box<dyn RecordIterator>,
}

impl RangeQueryIterator {
    /// Takes ownership of an already-positioned-or-not merge tree and
    /// seeks it to the first entry.
    pub fn new(mut inner: Box<dyn RecordIterator>) -> Result<Self> {
        inner.seek_to_first()?;
        Ok(Self { inner })
    }

    /// Returns the next folded entry, or `None` once the range is
    /// exhausted. Propagates the inner iterator's sticky status on EOF.
    pub fn next_entry(&mut self) -> Result<Option<ScanEntry>> {
        if !self.inner.is_valid() {
            self.inner.status()?;
            return Ok(None);
        }
        let key = self.inner.key().clone();
        let user_key = key.user_key().to_vec();
        let value = if key.is_deletion() { None } else { Some(self.inner.read_value()?) };

        loop {
            self.inner.next()?;
            if !self.inner.is_valid() || self.inner.key().user_key() != user_key.as_slice() {
                break;
            }
        }
        Ok(Some(ScanEntry { user_key, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, ValuePtr, ValueType};
    use crate::mem_table::MemTable;
    use crate::config::PackingType;
    use std::ops::Bound;

    #[test]
    fn folds_overwrites_and_surfaces_tombstones() {
        let mt = MemTable::new(PackingType::KeyPerPage);
        mt.put(crate::record::Record::new(
            InternalKey::new(b"a", ValuePtr::default(), 1, ValueType::Value),
            Bytes::from_static(b"v1"),
        ))
        .unwrap();
        mt.put(crate::record::Record::new(
            InternalKey::new(b"a", ValuePtr::default(), 2, ValueType::Value),
            Bytes::from_static(b"v2"),
        ))
        .unwrap();
        mt.put(crate::record::Record::new(
            InternalKey::new(b"b", ValuePtr::default(), 1, ValueType::Deletion),
            Bytes::new(),
        ))
        .unwrap();

        let it = mt.range_iter(Bound::Unbounded, Bound::Unbounded);
        let mut scan = RangeQueryIterator::new(Box::new(it)).unwrap();

        let first = scan.next_entry().unwrap().unwrap();
        assert_eq!(first.user_key, b"a");
        assert_eq!(first.value, Some(Bytes::from_static(b"v2")));

        let second = scan.next_entry().unwrap().unwrap();
        assert_eq!(second.user_key, b"b");
        assert_eq!(second.value, None);

        assert!(scan.next_entry().unwrap().is_none());
    }
}
