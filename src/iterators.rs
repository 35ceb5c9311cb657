//! Shared iterator contract consumed by every merging component: the
//! memtable, the SSTable block reader, the Level-0 k-way merge, the Level-N
//! sequential scan, and the top-level range query — a flat capability set
//! instead of deep inheritance.

pub mod merge_iterator;
pub mod two_merge_iterator;

use crate::key::InternalKey;
use crate::status::Result;
use bytes::Bytes;

/// `Init/Valid/Seek*/Next/Prev/key/ReadValue/status`, expressed as an
/// object-safe trait so every concrete iterator variant
/// (`MemTable`, `Level0Merge`, `LevelSequential`, `SSTable`) can be boxed
/// uniformly by the range-query merger and the compaction runner.
pub trait RecordIterator {
    /// True iff the iterator currently points at an entry.
    fn is_valid(&self) -> bool;

    fn seek_to_first(&mut self) -> Result<()>;
    fn seek_to_last(&mut self) -> Result<()>;

    /// Positions at the first entry `>= target` (a `lower_bound` by the
    /// composite comparator).
    fn seek(&mut self, target: &InternalKey) -> Result<()>;

    fn next(&mut self) -> Result<()>;
    fn prev(&mut self) -> Result<()>;

    /// The internal key at the current position. Only valid to call when
    /// `is_valid()` is true.
    fn key(&self) -> &InternalKey;

    /// Resolves the current entry's value, following its `(lpn, offset)`
    /// pointer into the value log when the entry is a real `Put` (not a
    /// tombstone, whose value is always empty).
    fn read_value(&self) -> Result<Bytes>;

    /// Sticky status: once set to an error it stays set and further
    /// movement is a no-op.
    fn status(&self) -> Result<()>;
}
