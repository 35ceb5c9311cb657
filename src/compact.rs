//! Compaction runner: merges a source level into the next with
//! last-writer-wins folding by user key.
//!
//! The selection rule is fixed rather than strategy-pluggable: the oldest
//! L0 file plus its overlaps, or a per-level cursor for `k >= 1`. A
//! runner owns device/tree access, produces new on-disk tables, and
//! reports which old ones were superseded.
//!
//! Compaction only ever moves internal keys between levels; value bytes
//! stay in the log untouched; value pointers embedded in the keys remain
//! valid verbatim in every level they pass through.

use crate::config::{IMS_PAGE_NUM, PackingType, SLOT_NUM_PER_PAGE};
use crate::driver::{BlockDevice, SstableInfo};
use crate::hash::hash_mod_n;
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::iterators::RecordIterator;
use crate::key::InternalKey;
use crate::level_iter::{level0_iterator, RangeBounded};
use crate::packing;
use crate::sstable::{SsTable, ValueSource};
use crate::status::Result;
use crate::tree::{LevelTree, TreeNode};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Always-invalid iterator, used as the destination side when a level has
/// no file overlapping the compacted range.
struct EmptyIterator;

impl RecordIterator for EmptyIterator {
    fn is_valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) -> Result<()> {
        Ok(())
    }
    fn seek_to_last(&mut self) -> Result<()> {
        Ok(())
    }
    fn seek(&mut self, _target: &InternalKey) -> Result<()> {
        Ok(())
    }
    fn next(&mut self) -> Result<()> {
        Ok(())
    }
    fn prev(&mut self) -> Result<()> {
        Ok(())
    }
    fn key(&self) -> &InternalKey {
        unreachable!("EmptyIterator is never valid")
    }
    fn read_value(&self) -> Result<Bytes> {
        unreachable!("EmptyIterator is never valid")
    }
    fn status(&self) -> Result<()> {
        Ok(())
    }
}

/// Accumulates merged keys until the packer's fullness threshold is
/// reached, mirroring the memtable's own fullness policy, reused here for
/// the compaction runner's pending queue.
struct PendingQueue {
    packing: PackingType,
    keys: Vec<InternalKey>,
    bucket_counts: Vec<usize>,
}

impl PendingQueue {
    fn new(packing: PackingType) -> Self {
        let bucket_counts = if packing == PackingType::Hash { vec![0; SLOT_NUM_PER_PAGE] } else { Vec::new() };
        Self { packing, keys: Vec::new(), bucket_counts }
    }

    fn push(&mut self, key: InternalKey) {
        if self.packing == PackingType::Hash {
            let bucket = hash_mod_n(&key.encode(), SLOT_NUM_PER_PAGE);
            self.bucket_counts[bucket] += 1;
        }
        self.keys.push(key);
    }

    fn is_full(&self) -> bool {
        match self.packing {
            PackingType::KeyPerPage => self.keys.len() >= IMS_PAGE_NUM,
            PackingType::Hash => self.bucket_counts.iter().any(|&c| c >= IMS_PAGE_NUM),
            PackingType::KeyRange => self.keys.len() >= SLOT_NUM_PER_PAGE * IMS_PAGE_NUM,
        }
    }

    fn take(&mut self) -> Vec<InternalKey> {
        self.bucket_counts.iter_mut().for_each(|c| *c = 0);
        std::mem::take(&mut self.keys)
    }
}

/// Drives compaction for one store. Holds the per-level cursor
/// (`compaction_key_list[k]`); process-only state, reset to "start of
/// level" on every reopen (see DESIGN.md).
pub struct CompactionRunner {
    device: Arc<dyn BlockDevice>,
    packing: PackingType,
    cursor: HashMap<u8, Vec<u8>>,
}

impl CompactionRunner {
    pub fn new(device: Arc<dyn BlockDevice>, packing: PackingType) -> Self {
        Self { device, packing, cursor: HashMap::new() }
    }

    fn load(&self, file_name: &str, level: u8) -> Result<SsTable> {
        crate::sstable::load_from_device(&self.device, file_name, level, self.packing)
    }

    fn write_run(&self, keys: &[InternalKey], level: u8, sstable_seq: &mut u64) -> Result<TreeNode> {
        let block = packing::pack(keys, self.packing)?;
        let file_name = crate::tree::next_file_name(*sstable_seq);
        *sstable_seq += 1;
        self.device.write_sstable(&SstableInfo { file_name: file_name.clone(), level }, &block)?;
        let range_min = keys.first().expect("non-empty run").user_key().to_vec();
        let range_max = keys.last().expect("non-empty run").user_key().to_vec();
        Ok(TreeNode::new(file_name, level, range_min, range_max))
    }

    /// Compacts level `src_level` into `src_level + 1` if the selection
    /// rule finds any source file to merge. Returns `false` when there was
    /// nothing to do (e.g. an empty or already-cursor-exhausted level).
    pub fn compact_level(
        &mut self,
        tree: &mut LevelTree,
        src_level: u8,
        sstable_seq: &mut u64,
        values: Arc<dyn ValueSource>,
    ) -> Result<bool> {
        let (src_files, dst_level) = if src_level == 0 {
            let oldest = match tree.oldest_l0() {
                Some(f) => f,
                None => return Ok(false),
            };
            let overlap = tree.overlapping(0, &oldest.range_min, &oldest.range_max);
            (overlap, 1u8)
        } else {
            let cursor = self.cursor.get(&src_level).cloned().unwrap_or_default();
            let next = match tree.next_after(src_level, &cursor) {
                Some(f) => f,
                None => return Ok(false),
            };
            (vec![next], src_level + 1)
        };

        let union_min = src_files.iter().map(|f| f.range_min.clone()).min().expect("non-empty");
        let union_max = src_files.iter().map(|f| f.range_max.clone()).max().expect("non-empty");
        let lower = InternalKey::lower_sentinel(&union_min);
        let upper = InternalKey::upper_sentinel(&union_max);

        let dst_files = tree.overlapping(dst_level, &union_min, &union_max);

        let src_iter: Box<dyn RecordIterator> = if src_level == 0 {
            Box::new(level0_iterator(
                &src_files,
                values.clone(),
                |name| self.load(name, 0),
                lower.clone(),
                upper.clone(),
            )?)
        } else {
            let table = self.load(&src_files[0].file_name, src_level)?;
            Box::new(RangeBounded::new(table.iter(values.clone()), lower.clone(), upper.clone()))
        };

        let dst_iter: Box<dyn RecordIterator> = match dst_files.len() {
            0 => Box::new(EmptyIterator),
            1 => {
                let table = self.load(&dst_files[0].file_name, dst_level)?;
                Box::new(RangeBounded::new(table.iter(values.clone()), lower.clone(), upper.clone()))
            }
            _ => {
                let mut children: Vec<Box<dyn RecordIterator>> = Vec::with_capacity(dst_files.len());
                for f in &dst_files {
                    let table = self.load(&f.file_name, dst_level)?;
                    children.push(Box::new(table.iter(values.clone())));
                }
                Box::new(RangeBounded::new(
                    crate::iterators::merge_iterator::MergeIterator::create(children),
                    lower.clone(),
                    upper.clone(),
                ))
            }
        };

        let mut merged = TwoMergeIterator::create(src_iter, dst_iter)?;
        merged.seek_to_first()?;

        let mut pending = PendingQueue::new(self.packing);
        let mut new_nodes = Vec::new();
        let mut last_user_key: Option<Vec<u8>> = None;

        while merged.is_valid() {
            let key = merged.key().clone();
            let same_as_last = last_user_key.as_deref() == Some(key.user_key());
            if !same_as_last {
                last_user_key = Some(key.user_key().to_vec());
                pending.push(key);
                if pending.is_full() {
                    new_nodes.push(self.write_run(&pending.take(), dst_level, sstable_seq)?);
                }
            }
            merged.next()?;
        }
        merged.status()?;
        if !pending.keys.is_empty() {
            new_nodes.push(self.write_run(&pending.take(), dst_level, sstable_seq)?);
        }

        for f in &src_files {
            tree.remove(src_level, &f.file_name);
            self.device.erase_sstable(&f.file_name)?;
        }
        for f in &dst_files {
            tree.remove(dst_level, &f.file_name);
            self.device.erase_sstable(&f.file_name)?;
        }
        for node in new_nodes {
            tree.insert(node);
        }

        if src_level >= 1 {
            self.cursor.insert(src_level, union_max);
        }
        Ok(true)
    }

    /// Repeatedly compacts the lowest over-threshold level until none
    /// remain, cascading the way a single write's compaction trigger can
    /// ripple through several levels.
    pub fn drain_overflowing_levels(
        &mut self,
        tree: &mut LevelTree,
        level_max: impl Fn(u8) -> usize,
        sstable_seq: &mut u64,
        values: Arc<dyn ValueSource>,
    ) -> Result<()> {
        loop {
            let max_level = tree.max_level();
            let mut did_work = false;
            for level in 0..=max_level {
                if tree.file_count(level) > level_max(level) {
                    if self.compact_level(tree, level, sstable_seq, values.clone())? {
                        did_work = true;
                    }
                    break;
                }
            }
            if !did_work {
                return Ok(());
            }
        }
    }
}
