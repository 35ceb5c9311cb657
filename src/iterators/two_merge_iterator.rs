//! Explicit two-way merge used by the compaction runner: while either
//! side is valid, emit the smaller by the composite comparator; on a
//! tie, the left (`src`, the newer level) wins.

use crate::iterators::RecordIterator;
use crate::key::InternalKey;
use crate::status::Result;
use bytes::Bytes;

pub struct TwoMergeIterator {
    a: Box<dyn RecordIterator>,
    b: Box<dyn RecordIterator>,
    choose_a: bool,
}

impl TwoMergeIterator {
    pub fn create(a: Box<dyn RecordIterator>, b: Box<dyn RecordIterator>) -> Result<Self> {
        let mut iter = Self { a, b, choose_a: false };
        iter.skip_b_if_tied()?;
        iter.choose_a = Self::pick_a(&iter.a, &iter.b);
        Ok(iter)
    }

    /// `a` wins ties (it is always the src/newer side in the compaction
    /// runner's usage).
    fn pick_a(a: &dyn RecordIterator, b: &dyn RecordIterator) -> bool {
        if !a.is_valid() {
            return false;
        }
        if !b.is_valid() {
            return true;
        }
        a.key() <= b.key()
    }

    /// If both sides currently hold the same internal key, `b`'s copy is a
    /// stale duplicate (the two-way merge emits `a`'s once); drop it so the
    /// merge never yields the same internal key twice.
    fn skip_b_if_tied(&mut self) -> Result<()> {
        if self.a.is_valid() && self.b.is_valid() && self.a.key() == self.b.key() {
            self.b.next()?;
        }
        Ok(())
    }
}

impl RecordIterator for TwoMergeIterator {
    fn is_valid(&self) -> bool {
        if self.choose_a {
            self.a.is_valid()
        } else {
            self.b.is_valid()
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.a.seek_to_first()?;
        self.b.seek_to_first()?;
        self.skip_b_if_tied()?;
        self.choose_a = Self::pick_a(&*self.a, &*self.b);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.a.seek_to_last()?;
        self.b.seek_to_last()?;
        self.choose_a = if self.a.is_valid() && self.b.is_valid() {
            self.a.key() >= self.b.key()
        } else {
            self.a.is_valid()
        };
        Ok(())
    }

    fn seek(&mut self, target: &InternalKey) -> Result<()> {
        self.a.seek(target)?;
        self.b.seek(target)?;
        self.skip_b_if_tied()?;
        self.choose_a = Self::pick_a(&*self.a, &*self.b);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if self.choose_a {
            self.a.next()?;
        } else {
            self.b.next()?;
        }
        self.skip_b_if_tied()?;
        self.choose_a = Self::pick_a(&*self.a, &*self.b);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if self.choose_a {
            self.a.prev()?;
        } else {
            self.b.prev()?;
        }
        self.choose_a = if self.a.is_valid() && self.b.is_valid() {
            self.a.key() >= self.b.key()
        } else {
            self.a.is_valid()
        };
        Ok(())
    }

    fn key(&self) -> &InternalKey {
        if self.choose_a {
            self.a.key()
        } else {
            self.b.key()
        }
    }

    fn read_value(&self) -> Result<Bytes> {
        if self.choose_a {
            self.a.read_value()
        } else {
            self.b.read_value()
        }
    }

    fn status(&self) -> Result<()> {
        self.a.status()?;
        self.b.status()?;
        Ok(())
    }
}
