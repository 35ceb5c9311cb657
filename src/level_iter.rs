//! Level-0 k-way merge and Level-N sequential-with-LRU iterators.

use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::RecordIterator;
use crate::key::InternalKey;
use crate::sstable::{SsTable, ValueSource};
use crate::status::Result;
use crate::tree::TreeNode;
use bytes::Bytes;
use moka::sync::Cache;
use std::sync::Arc;

/// Wraps any [`RecordIterator`] with a `[lower, upper)` clamp: `SeekToFirst`
/// becomes `Seek(lower)`, and the iterator reports itself invalid once it
/// would emit a key `>= upper`.
pub struct RangeBounded<I> {
    inner: I,
    lower: InternalKey,
    upper: InternalKey,
}

impl<I: RecordIterator> RangeBounded<I> {
    pub fn new(inner: I, lower: InternalKey, upper: InternalKey) -> Self {
        Self { inner, lower, upper }
    }
}

impl<I: RecordIterator> RecordIterator for RangeBounded<I> {
    fn is_valid(&self) -> bool {
        self.inner.is_valid() && self.inner.key() < &self.upper
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let lower = self.lower.clone();
        self.inner.seek(&lower)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let upper = self.upper.clone();
        self.inner.seek(&upper)?;
        if self.inner.is_valid() {
            self.inner.prev()
        } else {
            self.inner.seek_to_last()
        }
    }

    fn seek(&mut self, target: &InternalKey) -> Result<()> {
        if target < &self.lower {
            let lower = self.lower.clone();
            self.inner.seek(&lower)
        } else {
            self.inner.seek(target)
        }
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    fn prev(&mut self) -> Result<()> {
        self.inner.prev()
    }

    fn key(&self) -> &InternalKey {
        self.inner.key()
    }

    fn read_value(&self) -> Result<Bytes> {
        self.inner.read_value()
    }

    fn status(&self) -> Result<()> {
        self.inner.status()
    }
}

/// Builds the Level-0 k-way merge over every L0 file overlapping
/// `[lower, upper)`, heap-ordered by (internal key, file age ascending):
/// `files` must already be in age order, oldest first, so the merge's
/// index tie-break is file-age ascending. An index tie only fires when
/// two files hold the literal same internal key (same user key, seq, and
/// type), which live data never produces.
pub fn level0_iterator(
    files: &[Arc<TreeNode>],
    values: Arc<dyn ValueSource>,
    load: impl Fn(&str) -> Result<SsTable>,
    lower: InternalKey,
    upper: InternalKey,
) -> Result<RangeBounded<MergeIterator>> {
    let mut children: Vec<Box<dyn RecordIterator>> = Vec::with_capacity(files.len());
    for f in files {
        let table = load(&f.file_name)?;
        children.push(Box::new(table.iter(values.clone())));
    }
    Ok(RangeBounded::new(MergeIterator::create(children), lower, upper))
}

type Opener = Arc<dyn Fn(&str) -> Result<SsTable> + Send + Sync>;

/// Sequential scan across a disjoint level's files, opening each lazily
/// and keeping at most `max_open` parsed tables in an LRU. A file still
/// referenced by this iterator's current position stays alive even if the
/// cache evicts its own copy: the iterator holds its own `Arc<SsTable>`
/// clone, so eviction only forces a future re-open, never an in-use
/// close.
pub struct LevelNIterator {
    files: Vec<Arc<TreeNode>>,
    cache: Cache<String, Arc<SsTable>>,
    opener: Opener,
    values: Arc<dyn ValueSource>,
    lower: InternalKey,
    upper: InternalKey,
    cur_file_idx: Option<usize>,
    cur_table: Option<Arc<SsTable>>,
    cur_iter: Option<crate::sstable::SsTableIterator>,
}

impl LevelNIterator {
    pub fn new(
        files: Vec<Arc<TreeNode>>,
        cache: Cache<String, Arc<SsTable>>,
        opener: Opener,
        values: Arc<dyn ValueSource>,
        lower: InternalKey,
        upper: InternalKey,
    ) -> Self {
        Self { files, cache, opener, values, lower, upper, cur_file_idx: None, cur_table: None, cur_iter: None }
    }

    fn open_file(&self, file_name: &str) -> Result<Arc<SsTable>> {
        if let Some(t) = self.cache.get(file_name) {
            return Ok(t);
        }
        let table = Arc::new((self.opener)(file_name)?);
        self.cache.insert(file_name.to_string(), table.clone());
        Ok(table)
    }

    /// `[first, end)`: the index range of files overlapping `[lower, upper)`,
    /// found by binary search since the level is disjoint and `range_min`-
    /// sorted.
    fn window(&self) -> (usize, usize) {
        let lower_uk = self.lower.user_key();
        let upper_uk = self.upper.user_key();
        let first = self.files.partition_point(|f| f.range_max.as_slice() < lower_uk);
        let end = self.files.partition_point(|f| f.range_min.as_slice() <= upper_uk);
        (first, end)
    }

    fn load_at(&mut self, idx: usize) -> Result<()> {
        let file = self.files[idx].clone();
        let table = self.open_file(&file.file_name)?;
        let it = table.iter(self.values.clone());
        self.cur_table = Some(table);
        self.cur_iter = Some(it);
        self.cur_file_idx = Some(idx);
        Ok(())
    }

    fn advance_forward(&mut self, mut idx: usize, end: usize, seek_target: Option<InternalKey>) -> Result<()> {
        loop {
            if idx >= end {
                self.cur_iter = None;
                self.cur_table = None;
                self.cur_file_idx = None;
                return Ok(());
            }
            self.load_at(idx)?;
            let it = self.cur_iter.as_mut().expect("just loaded");
            match &seek_target {
                Some(t) => it.seek(t)?,
                None => it.seek_to_first()?,
            }
            if it.is_valid() && it.key() < &self.upper {
                return Ok(());
            }
            idx += 1;
        }
    }

    fn retreat_backward(&mut self, mut idx: usize, first: usize) -> Result<()> {
        loop {
            self.load_at(idx)?;
            let it = self.cur_iter.as_mut().expect("just loaded");
            let upper = self.upper.clone();
            it.seek(&upper)?;
            if it.is_valid() {
                it.prev()?;
            } else {
                it.seek_to_last()?;
            }
            if it.is_valid() && it.key() >= &self.lower {
                return Ok(());
            }
            if idx == first {
                self.cur_iter = None;
                self.cur_table = None;
                self.cur_file_idx = None;
                return Ok(());
            }
            idx -= 1;
        }
    }
}

impl RecordIterator for LevelNIterator {
    fn is_valid(&self) -> bool {
        self.cur_iter.as_ref().map(|it| it.is_valid() && it.key() < &self.upper).unwrap_or(false)
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let (first, end) = self.window();
        let lower = self.lower.clone();
        self.advance_forward(first, end, Some(lower))
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let (first, end) = self.window();
        if end <= first {
            self.cur_iter = None;
            self.cur_table = None;
            self.cur_file_idx = None;
            return Ok(());
        }
        self.retreat_backward(end - 1, first)
    }

    fn seek(&mut self, target: &InternalKey) -> Result<()> {
        let (first, end) = self.window();
        if first >= end {
            self.cur_iter = None;
            self.cur_table = None;
            self.cur_file_idx = None;
            return Ok(());
        }
        let target_uk = target.user_key();
        let idx = first + self.files[first..end].partition_point(|f| f.range_max.as_slice() < target_uk);
        let t = if target < &self.lower { self.lower.clone() } else { target.clone() };
        self.advance_forward(idx, end, Some(t))
    }

    fn next(&mut self) -> Result<()> {
        let (_, end) = self.window();
        if let Some(it) = self.cur_iter.as_mut() {
            it.next()?;
            if it.is_valid() && it.key() < &self.upper {
                return Ok(());
            }
        }
        let idx = self.cur_file_idx.map(|i| i + 1).unwrap_or(end);
        self.advance_forward(idx, end, None)
    }

    fn prev(&mut self) -> Result<()> {
        let (first, _) = self.window();
        if let Some(it) = self.cur_iter.as_mut() {
            it.prev()?;
            if it.is_valid() && it.key() >= &self.lower {
                return Ok(());
            }
        }
        match self.cur_file_idx {
            None => Ok(()),
            Some(idx) if idx == first => {
                self.cur_iter = None;
                self.cur_table = None;
                self.cur_file_idx = None;
                Ok(())
            }
            Some(idx) => self.retreat_backward(idx - 1, first),
        }
    }

    fn key(&self) -> &InternalKey {
        self.cur_iter.as_ref().expect("valid iterator").key()
    }

    fn read_value(&self) -> Result<Bytes> {
        self.cur_iter.as_ref().expect("valid iterator").read_value()
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
