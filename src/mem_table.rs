//! In-memory ordered table over a `crossbeam-skiplist` skip map, keyed on
//! the fixed internal key, with a packing-dependent fullness policy.

use crate::config::{PackingType, IMS_PAGE_NUM, SLOT_NUM_PER_PAGE};
use crate::hash::hash_mod_n;
use crate::iterators::RecordIterator;
use crate::key::InternalKey;
use crate::record::Record;
use crate::status::Result;
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Outcome of a point lookup in a single memtable.
pub enum Lookup {
    Value(Bytes),
    Tombstone,
    Absent,
}

/// Ordered in-memory buffer of current writes.
pub struct MemTable {
    map: Arc<SkipMap<InternalKey, Bytes>>,
    packing: PackingType,
    count: AtomicUsize,
    bucket_counts: Vec<AtomicUsize>,
}

impl MemTable {
    pub fn new(packing: PackingType) -> Self {
        let bucket_counts = if packing == PackingType::Hash {
            (0..SLOT_NUM_PER_PAGE).map(|_| AtomicUsize::new(0)).collect()
        } else {
            Vec::new()
        };
        Self {
            map: Arc::new(SkipMap::new()),
            packing,
            count: AtomicUsize::new(0),
            bucket_counts,
        }
    }

    /// Inserts `record`. The composite comparator already orders entries so
    /// that, for any user key, the highest `seq` sorts first; because `seq`
    /// is assigned by a single fetch-and-increment before this call, two
    /// records can only collide here if they carry an identical
    /// `(user_key, seq, type)` triple, in which case the later
    /// `put_from_gc`/`put` simply replaces the earlier map entry — the
    /// "keep the entry with the greater seq" rule is upheld trivially.
    pub fn put(&self, record: Record) -> Result<()> {
        if self.packing == PackingType::Hash {
            let bucket = hash_mod_n(&record.internal_key.encode(), SLOT_NUM_PER_PAGE);
            self.bucket_counts[bucket].fetch_add(1, AtomicOrdering::Relaxed);
        }
        self.map.insert(record.internal_key, record.value);
        self.count.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Looks up the newest entry for `user_key`, distinguishing "absent"
    /// from an explicit tombstone.
    pub fn get(&self, user_key: &[u8]) -> Lookup {
        match self.get_record(user_key) {
            None => Lookup::Absent,
            Some(rec) if rec.internal_key.is_deletion() => Lookup::Tombstone,
            Some(rec) => Lookup::Value(rec.value),
        }
    }

    pub fn get_record(&self, user_key: &[u8]) -> Option<Record> {
        let lower = InternalKey::lower_sentinel(user_key);
        let entry = self.map.lower_bound(Bound::Included(&lower))?;
        if entry.key().user_key() != user_key {
            return None;
        }
        Some(Record::new(entry.key().clone(), entry.value().clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.count.load(AtomicOrdering::Relaxed)
    }

    /// Fullness policy: per-page on total record count; hash on any bucket
    /// reaching `IMS_PAGE_NUM`; key-range on total count against the full
    /// block's slot capacity.
    pub fn is_full(&self) -> bool {
        match self.packing {
            PackingType::KeyPerPage => self.len() >= IMS_PAGE_NUM,
            PackingType::Hash => self
                .bucket_counts
                .iter()
                .any(|b| b.load(AtomicOrdering::Relaxed) >= IMS_PAGE_NUM),
            PackingType::KeyRange => self.len() >= SLOT_NUM_PER_PAGE * IMS_PAGE_NUM,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.map.iter().map(|e| Record::new(e.key().clone(), e.value().clone()))
    }

    /// A forward/backward [`RecordIterator`] over `[lower, upper)`.
    pub fn range_iter(&self, lower: Bound<InternalKey>, upper: Bound<InternalKey>) -> MemTableIterator {
        MemTableIterator {
            map: self.map.clone(),
            lower,
            upper,
            current: None,
        }
    }
}

/// Iterates a [`MemTable`] snapshot (an `Arc` clone of its skiplist) over a
/// `[lower, upper)` internal-key range. Re-ranges the underlying skiplist
/// on every move rather than holding a borrowed cursor, trading a little
/// throughput for a struct with no self-referential lifetime.
pub struct MemTableIterator {
    map: Arc<SkipMap<InternalKey, Bytes>>,
    lower: Bound<InternalKey>,
    upper: Bound<InternalKey>,
    current: Option<(InternalKey, Bytes)>,
}

impl MemTableIterator {
    fn bound_ref(b: &Bound<InternalKey>) -> Bound<&InternalKey> {
        match b {
            Bound::Included(k) => Bound::Included(k),
            Bound::Excluded(k) => Bound::Excluded(k),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
}

impl RecordIterator for MemTableIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.current = self
            .map
            .range((Self::bound_ref(&self.lower), Self::bound_ref(&self.upper)))
            .next()
            .map(|e| (e.key().clone(), e.value().clone()));
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.current = self
            .map
            .range((Self::bound_ref(&self.lower), Self::bound_ref(&self.upper)))
            .next_back()
            .map(|e| (e.key().clone(), e.value().clone()));
        Ok(())
    }

    fn seek(&mut self, target: &InternalKey) -> Result<()> {
        let start = if let Bound::Excluded(l) = &self.lower {
            if target < l {
                Bound::Excluded(l.clone())
            } else {
                Bound::Included(target.clone())
            }
        } else {
            Bound::Included(target.clone())
        };
        self.current = self
            .map
            .range((Self::bound_ref(&start), Self::bound_ref(&self.upper)))
            .next()
            .map(|e| (e.key().clone(), e.value().clone()));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if let Some((key, _)) = &self.current {
            let key = key.clone();
            self.current = self
                .map
                .range((Bound::Excluded(&key), Self::bound_ref(&self.upper)))
                .next()
                .map(|e| (e.key().clone(), e.value().clone()));
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if let Some((key, _)) = &self.current {
            let key = key.clone();
            self.current = self
                .map
                .range((Self::bound_ref(&self.lower), Bound::Excluded(&key)))
                .next_back()
                .map(|e| (e.key().clone(), e.value().clone()));
        }
        Ok(())
    }

    fn key(&self) -> &InternalKey {
        &self.current.as_ref().expect("valid iterator").0
    }

    fn read_value(&self) -> Result<Bytes> {
        Ok(self.current.as_ref().expect("valid iterator").1.clone())
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{ValuePtr, ValueType};

    fn rec(user_key: &str, seq: u64, ty: ValueType, value: &str) -> Record {
        Record::new(
            InternalKey::new(user_key.as_bytes(), ValuePtr::default(), seq, ty),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    }

    #[test]
    fn newest_seq_wins_on_get() {
        let mt = MemTable::new(PackingType::KeyPerPage);
        mt.put(rec("k", 1, ValueType::Value, "v1")).unwrap();
        mt.put(rec("k", 2, ValueType::Value, "v2")).unwrap();
        match mt.get(b"k") {
            Lookup::Value(v) => assert_eq!(v, Bytes::from_static(b"v2")),
            _ => panic!("expected value"),
        }
    }

    #[test]
    fn tombstone_is_distinguished_from_absent() {
        let mt = MemTable::new(PackingType::KeyPerPage);
        mt.put(rec("k", 1, ValueType::Value, "v1")).unwrap();
        mt.put(rec("k", 2, ValueType::Deletion, "")).unwrap();
        assert!(matches!(mt.get(b"k"), Lookup::Tombstone));
        assert!(matches!(mt.get(b"missing"), Lookup::Absent));
    }

    #[test]
    fn per_page_fullness_triggers_at_threshold() {
        let mt = MemTable::new(PackingType::KeyPerPage);
        for i in 0..IMS_PAGE_NUM {
            mt.put(rec(&format!("k{i:06}"), i as u64 + 1, ValueType::Value, "v")).unwrap();
        }
        assert!(mt.is_full());
    }

    #[test]
    fn forward_iteration_is_non_decreasing() {
        let mt = MemTable::new(PackingType::KeyPerPage);
        mt.put(rec("b", 1, ValueType::Value, "v")).unwrap();
        mt.put(rec("a", 1, ValueType::Value, "v")).unwrap();
        mt.put(rec("c", 1, ValueType::Value, "v")).unwrap();
        let mut it = mt.range_iter(Bound::Unbounded, Bound::Unbounded);
        it.seek_to_first().unwrap();
        let mut seen = Vec::new();
        while it.is_valid() {
            seen.push(it.key().user_key().to_vec());
            it.next().unwrap();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
