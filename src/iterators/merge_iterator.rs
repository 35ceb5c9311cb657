//! K-way heap merge over boxed [`RecordIterator`]s.
//!
//! Used by the Level-0 k-way merge and the top-level range-query
//! iterator. Callers that need the Level-0 "file id ascending" tie-break
//! simply hand in children already ordered oldest-file-first: ties are
//! broken by vector index ascending, so the first-listed child wins.

use crate::iterators::RecordIterator;
use crate::key::InternalKey;
use crate::status::Result;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct HeapWrapper {
    idx: usize,
    iter: Box<dyn RecordIterator>,
}

impl HeapWrapper {
    fn key(&self) -> &InternalKey {
        self.iter.key()
    }
}

/// `BinaryHeap` is a max-heap; flip the comparator so the smallest
/// composite key (and, on tie, the smallest `idx`) sorts to the top.
impl PartialEq for HeapWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.idx == other.idx
    }
}
impl Eq for HeapWrapper {}

impl PartialOrd for HeapWrapper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapWrapper {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key().cmp(other.key()) {
            Ordering::Equal => self.idx.cmp(&other.idx),
            ord => ord,
        }
        .reverse()
    }
}

/// Merges any number of child iterators into a single ascending-composite-
/// order stream.
pub struct MergeIterator {
    heap: BinaryHeap<HeapWrapper>,
    current: Option<HeapWrapper>,
    status: Result<()>,
}

impl MergeIterator {
    /// `children` should already be ordered so that index ascending encodes
    /// the desired tie-break priority (e.g. oldest-file-first for Level-0).
    pub fn create(children: Vec<Box<dyn RecordIterator>>) -> Self {
        let mut heap = BinaryHeap::new();
        for (idx, iter) in children.into_iter().enumerate() {
            if iter.is_valid() {
                heap.push(HeapWrapper { idx, iter });
            }
        }
        let current = heap.pop();
        Self { heap, current, status: Ok(()) }
    }
}

impl RecordIterator for MergeIterator {
    fn is_valid(&self) -> bool {
        self.current.as_ref().map(|c| c.iter.is_valid()).unwrap_or(false)
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let mut children: Vec<HeapWrapper> = self.heap.drain().collect();
        if let Some(c) = self.current.take() {
            children.push(c);
        }
        children.sort_by_key(|c| c.idx);
        for c in &mut children {
            c.iter.seek_to_first()?;
        }
        let mut heap = BinaryHeap::new();
        for c in children {
            if c.iter.is_valid() {
                heap.push(c);
            }
        }
        self.current = heap.pop();
        self.heap = heap;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        // Rebuild by seeking every child to its own last entry, then take
        // the maximum — mirrors `prev`'s re-seek strategy.
        let mut children: Vec<HeapWrapper> = self.heap.drain().collect();
        if let Some(c) = self.current.take() {
            children.push(c);
        }
        let mut best: Option<HeapWrapper> = None;
        for mut c in children {
            c.iter.seek_to_last()?;
            if c.iter.is_valid() {
                match &best {
                    Some(b) if b.key() >= c.key() => {}
                    _ => best = Some(c),
                }
            }
        }
        self.current = best;
        self.heap = BinaryHeap::new();
        Ok(())
    }

    fn seek(&mut self, target: &InternalKey) -> Result<()> {
        let mut children: Vec<HeapWrapper> = self.heap.drain().collect();
        if let Some(c) = self.current.take() {
            children.push(c);
        }
        children.sort_by_key(|c| c.idx);
        for c in &mut children {
            c.iter.seek(target)?;
        }
        let mut heap = BinaryHeap::new();
        for c in children {
            if c.iter.is_valid() {
                heap.push(c);
            }
        }
        self.current = heap.pop();
        self.heap = heap;
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let current = match self.current.as_mut() {
            Some(c) => c,
            None => return Ok(()),
        };
        while let Some(mut top) = self.heap.peek_mut() {
            if top.key() != current.key() {
                break;
            }
            if let Err(e) = top.iter.next() {
                self.status = Err(e.clone());
                std::collections::binary_heap::PeekMut::pop(top);
                return Err(e);
            }
            if !top.iter.is_valid() {
                std::collections::binary_heap::PeekMut::pop(top);
            }
        }

        current.iter.next()?;
        if !current.iter.is_valid() {
            self.current = self.heap.pop();
            return Ok(());
        }
        if let Some(mut top) = self.heap.peek_mut() {
            if *current < *top {
                std::mem::swap(&mut *top, current);
            }
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        // Re-seek every child to `< current key` and take the maximum —
        // the same strategy backward iteration over the heap needs
        // throughout, since a max-heap has no direct "previous" op.
        let current_key = match &self.current {
            Some(c) => c.key().clone(),
            None => return Ok(()),
        };
        let mut children: Vec<HeapWrapper> = self.heap.drain().collect();
        if let Some(c) = self.current.take() {
            children.push(c);
        }
        let mut best: Option<HeapWrapper> = None;
        for mut c in children {
            c.iter.seek(&current_key)?;
            if c.iter.is_valid() && c.key() == &current_key {
                c.iter.prev()?;
            } else {
                c.iter.seek_to_last()?;
                while c.iter.is_valid() && c.key() >= &current_key {
                    c.iter.prev()?;
                }
            }
            if c.iter.is_valid() {
                match &best {
                    Some(b) if b.key() >= c.key() => {}
                    _ => best = Some(c),
                }
            }
        }
        self.current = best;
        self.heap = BinaryHeap::new();
        Ok(())
    }

    fn key(&self) -> &InternalKey {
        self.current.as_ref().expect("valid iterator").key()
    }

    fn read_value(&self) -> Result<Bytes> {
        self.current.as_ref().expect("valid iterator").iter.read_value()
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}
