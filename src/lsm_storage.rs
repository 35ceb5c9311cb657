//! API surface & recovery: `put`/`delete`/`get`/`scan` plus `open`/`close`,
//! wiring every lower-level module in this crate into the store the rest
//! of the system talks to.
//!
//! `state: Arc<RwLock<StateInner>>` snapshot-swap plus a `write_lock`
//! serializing writers keeps the foreground write path short and lets
//! reads proceed without blocking on it; everything downstream of a write
//! works off a fixed-size internal key and split key/value storage rather
//! than variable-length blocks, bloom filters, or pluggable compaction
//! strategies.

use crate::cache::ReadCache;
use crate::compact::CompactionRunner;
use crate::config::{Options, PutOrigin, MAX_USER_KEY_LEN};
use crate::db_init::DbInit;
use crate::driver::{BlockDevice, FileBlockDevice, SstableInfo};
use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::RecordIterator;
use crate::key::{InternalKey, ValueType};
use crate::level_iter::{level0_iterator, LevelNIterator};
use crate::log::{LogManager, INVALID_BLOCK_OFFSET};
use crate::mem_table::MemTable;
use crate::packing;
use crate::range_iter::RangeQueryIterator;
use crate::record::Record;
use crate::sstable::{load_from_device, SsTable, ValueSource};
use crate::status::{Result, Status};
use crate::tree::{next_file_name, LevelTree, TreeNode};
use bytes::Bytes;
use moka::sync::Cache;
use parking_lot::{Condvar, Mutex, RwLock};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Resolves value pointers against the shared log manager. A thin adapter
/// so every iterator and the compaction runner see the same `ValueSource`
/// regardless of which `RwLock` guard happens to be held when they were
/// built — the log is single-writer, multi-reader.
struct LogValueSource(Arc<RwLock<LogManager>>);

impl ValueSource for LogValueSource {
    fn resolve(&self, lpn: u32, offset: u32) -> Result<Bytes> {
        self.0.read().resolve(lpn, offset)
    }
}

/// The active/immutable memtable pair: only one immutable slot exists at
/// a time, so a second rotation blocks until the prior flush clears it.
struct StateInner {
    memtable: Arc<MemTable>,
    immutable: Option<Arc<MemTable>>,
}

/// Everything the store needs behind one `Arc`, shared between the
/// foreground caller and the background flush/compaction pool.
pub struct LsmStorageInner {
    weak_self: Weak<LsmStorageInner>,
    device: Arc<dyn BlockDevice>,
    options: Options,
    state: Mutex<StateInner>,
    /// Signaled whenever the immutable slot clears, unblocking a writer
    /// stuck in [`LsmStorageInner::freeze_if_full`].
    rotation_cv: Condvar,
    /// Serializes the whole "rotate if full, allocate seq, append to log,
    /// insert into memtable" critical section.
    write_lock: Mutex<()>,
    log: Arc<RwLock<LogManager>>,
    tree: RwLock<LevelTree>,
    next_seq: AtomicU64,
    sstable_seq: Mutex<u64>,
    pool: crate::pool::WorkerPool,
    compactor: Mutex<CompactionRunner>,
    #[allow(dead_code)]
    read_cache: ReadCache,
    sstable_cache: Cache<String, Arc<SsTable>>,
}

impl LsmStorageInner {
    fn arc(&self) -> Arc<LsmStorageInner> {
        self.weak_self.upgrade().expect("LsmStorageInner always lives behind an Arc")
    }

    fn value_source(&self) -> Arc<dyn ValueSource> {
        Arc::new(LogValueSource(self.log.clone()))
    }

    fn load_table(&self, file_name: &str, level: u8) -> Result<Arc<SsTable>> {
        if let Some(table) = self.sstable_cache.get(file_name) {
            return Ok(table);
        }
        let table = Arc::new(load_from_device(&self.device, file_name, level, self.options.packing)?);
        self.sstable_cache.insert(file_name.to_string(), table.clone());
        Ok(table)
    }

    // ---- writes ----------------------------------------------------

    pub fn put(&self, user_key: &[u8], value: &[u8]) -> Result<()> {
        self.write_record(user_key, Some(Bytes::copy_from_slice(value)), PutOrigin::User)
    }

    pub fn delete(&self, user_key: &[u8]) -> Result<()> {
        self.write_record(user_key, None, PutOrigin::User)
    }

    /// The full write path: rotate-if-full, then seq-allocate +
    /// log-append + memtable-insert as one critical section
    /// serialized by `write_lock`. GC only runs for user-initiated writes
    /// (`origin == PutOrigin::User`) — the GC path's own rewrites call back
    /// in with `PutOrigin::Gc` and must never trigger another GC cycle.
    fn write_record(&self, user_key: &[u8], value: Option<Bytes>, origin: PutOrigin) -> Result<()> {
        if user_key.len() > MAX_USER_KEY_LEN {
            return Err(Status::invalid_argument(format!(
                "user key exceeds {MAX_USER_KEY_LEN} bytes"
            )));
        }
        {
            let _guard = self.write_lock.lock();
            self.freeze_if_full()?;

            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let ty = if value.is_some() { ValueType::Value } else { ValueType::Deletion };
            let value_bytes = value.unwrap_or_default();

            let record = {
                let mut log = self.log.write();
                let ptr = log.current_ptr();
                let internal_key = InternalKey::new(user_key, ptr, seq, ty);
                let record = Record::new(internal_key, value_bytes);
                log.append(&record)?;
                record
            };

            let memtable = self.state.lock().memtable.clone();
            memtable.put(record)?;
        }

        if origin == PutOrigin::User {
            self.maybe_gc()?;
        }
        Ok(())
    }

    /// Rotates the active memtable to immutable and schedules its flush
    /// if it's full. Must be called with `write_lock` held.
    fn freeze_if_full(&self) -> Result<()> {
        if !self.state.lock().memtable.is_full() {
            return Ok(());
        }
        self.force_freeze()
    }

    /// Rotates the active memtable to immutable and schedules its flush
    /// regardless of fullness. Used by [`Self::freeze_if_full`] and by the
    /// CLI's manual `flush` command.
    fn force_freeze(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.memtable.is_empty() && state.immutable.is_none() {
            return Ok(());
        }
        while state.immutable.is_some() {
            self.rotation_cv.wait(&mut state);
        }
        if state.memtable.is_empty() {
            return Ok(());
        }
        let old = state.memtable.clone();
        state.memtable = Arc::new(MemTable::new(self.options.packing));
        state.immutable = Some(old.clone());
        drop(state);
        self.schedule_flush(old);
        Ok(())
    }

    /// Forces the active memtable to flush and waits for it to land,
    /// bypassing the fullness check (CLI `flush` command).
    pub fn flush(&self) -> Result<()> {
        {
            let _guard = self.write_lock.lock();
            self.force_freeze()?;
        }
        self.pool.wait_for_all();
        Ok(())
    }

    /// Forces a compaction pass over any level currently past its
    /// threshold, without waiting for a write to trigger it (CLI
    /// `compact` command).
    pub fn compact(&self) -> Result<()> {
        self.maybe_compact()
    }

    fn schedule_flush(&self, immutable: Arc<MemTable>) {
        let inner = self.arc();
        self.pool.submit(move || {
            if let Err(e) = inner.flush_immutable(&immutable) {
                tracing::error!(error = %e, "background memtable flush failed");
            }
        });
    }

    /// Packs `table`'s sorted records into a single Level-0 SSTable and
    /// inserts its metadata into the tree. Returns `None` when `table`
    /// has nothing to flush — `close` may call this on an
    /// empty active memtable.
    fn pack_and_install(&self, table: &MemTable) -> Result<Option<TreeNode>> {
        let keys: Vec<InternalKey> = table.iter().map(|r| r.internal_key).collect();
        if keys.is_empty() {
            return Ok(None);
        }
        let block = packing::pack(&keys, self.options.packing)?;
        let file_name = {
            let mut seq = self.sstable_seq.lock();
            let name = next_file_name(*seq);
            *seq += 1;
            name
        };
        self.device.write_sstable(&SstableInfo { file_name: file_name.clone(), level: 0 }, &block)?;
        let range_min = keys.first().expect("checked non-empty above").user_key().to_vec();
        let range_max = keys.last().expect("checked non-empty above").user_key().to_vec();
        let node = TreeNode::new(file_name, 0, range_min, range_max);
        self.tree.write().insert(node.clone());
        Ok(Some(node))
    }

    /// Runs on the background pool: pack the just-rotated immutable
    /// table, clear the slot so a waiting writer can rotate again, then
    /// trigger compaction — all outside the write lock.
    fn flush_immutable(&self, immutable: &Arc<MemTable>) -> Result<()> {
        self.pack_and_install(immutable)?;
        {
            let mut state = self.state.lock();
            state.immutable = None;
        }
        self.rotation_cv.notify_all();
        self.maybe_compact()
    }

    fn maybe_compact(&self) -> Result<()> {
        let values = self.value_source();
        let mut tree = self.tree.write();
        let mut seq = self.sstable_seq.lock();
        let mut compactor = self.compactor.lock();
        let options = &self.options;
        compactor.drain_overflowing_levels(&mut tree, |level| options.level_max(level as usize), &mut seq, values)
    }

    // ---- GC ----------------------------------------------------------

    fn maybe_gc(&self) -> Result<()> {
        let block_count = self.log.read().block_count();
        if block_count < self.options.log_gc_threshold {
            return Ok(());
        }
        for _ in 0..self.options.gc_block_num {
            self.run_gc_once()?;
        }
        Ok(())
    }

    /// One GC cycle on the oldest log block: rewrite every still-live
    /// record via a GC-origin write, skip tombstones, then retire the
    /// block. A decode violation aborts the cycle without touching the
    /// block list.
    fn run_gc_once(&self) -> Result<()> {
        let (records, next_block_valid_offset) = {
            let log = self.log.read();
            let lbn = match log.oldest_block() {
                Some(lbn) => lbn,
                None => return Ok(()),
            };
            log.read_block(lbn, log.first_block_offset())
        };
        if next_block_valid_offset == INVALID_BLOCK_OFFSET {
            warn!("aborting GC cycle: decode violation while scanning the oldest log block");
            return Ok(());
        }

        for record in records {
            if record.internal_key.is_deletion() {
                continue;
            }
            let user_key = record.internal_key.user_key().to_vec();
            let is_live = match self.find_current_key(&user_key)? {
                Some(current) if !current.is_deletion() => {
                    current.value_ptr() == record.internal_key.value_ptr()
                }
                _ => false,
            };
            if is_live {
                self.write_record(&user_key, Some(record.value.clone()), PutOrigin::Gc)?;
            }
        }

        self.log.write().retire_oldest_block(next_block_valid_offset);
        Ok(())
    }

    // ---- reads ---------------------------------------------------------

    /// The newest internal key for `user_key` across memtable, immutable,
    /// and the level tree. Shared by `get` and GC's liveness check.
    fn find_current_key(&self, user_key: &[u8]) -> Result<Option<InternalKey>> {
        let (memtable, immutable) = {
            let state = self.state.lock();
            (state.memtable.clone(), state.immutable.clone())
        };
        if let Some(rec) = memtable.get_record(user_key) {
            return Ok(Some(rec.internal_key));
        }
        if let Some(imm) = immutable {
            if let Some(rec) = imm.get_record(user_key) {
                return Ok(Some(rec.internal_key));
            }
        }

        let tree = self.tree.read();
        let max_level = tree.max_level();
        for level in 0..=max_level {
            if level == 0 {
                // L0 files can overlap; the newest write wins, so walk
                // age-descending (insertion order is age-ascending).
                for file in tree.files_at(0).iter().rev() {
                    if let Some(ik) = self.lookup_in_file(&file.file_name, 0, user_key)? {
                        return Ok(Some(ik));
                    }
                }
            } else if let Some(file) = tree.candidate_at(level, user_key) {
                if let Some(ik) = self.lookup_in_file(&file.file_name, level, user_key)? {
                    return Ok(Some(ik));
                }
            }
        }
        Ok(None)
    }

    fn lookup_in_file(&self, file_name: &str, level: u8, user_key: &[u8]) -> Result<Option<InternalKey>> {
        let table = self.load_table(file_name, level)?;
        let lower = InternalKey::lower_sentinel(user_key);
        let mut it = table.iter(self.value_source());
        it.seek(&lower)?;
        if it.is_valid() && it.key().user_key() == user_key {
            Ok(Some(it.key().clone()))
        } else {
            Ok(None)
        }
    }

    /// Point lookup: `NotFound` covers both "absent" and "most recent
    /// record is a tombstone".
    pub fn get(&self, user_key: &[u8]) -> Result<Bytes> {
        match self.find_current_key(user_key)? {
            None => Err(Status::not_found("key not present")),
            Some(ik) if ik.is_deletion() => Err(Status::not_found("key is deleted")),
            Some(ik) => {
                let ptr = ik.value_ptr();
                self.log.read().resolve(ptr.lpn, ptr.offset)
            }
        }
    }

    /// Builds the k-way merge over memtable, immutable, Level-0, and every
    /// non-empty level, bounded by `[lower, upper)`. `None` bounds are
    /// treated as the widest possible range, not "no keys".
    pub fn scan(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<RangeQueryIterator> {
        let lower_key = InternalKey::lower_sentinel(lower.unwrap_or(b""));
        let upper_key = match upper {
            Some(u) => InternalKey::upper_sentinel(u),
            None => InternalKey::upper_sentinel(&[0xFFu8; MAX_USER_KEY_LEN]),
        };
        let values = self.value_source();

        let (memtable, immutable) = {
            let state = self.state.lock();
            (state.memtable.clone(), state.immutable.clone())
        };

        let mut children: Vec<Box<dyn RecordIterator>> = Vec::new();
        children.push(Box::new(
            memtable.range_iter(Bound::Included(lower_key.clone()), Bound::Excluded(upper_key.clone())),
        ));
        if let Some(imm) = immutable {
            children.push(Box::new(
                imm.range_iter(Bound::Included(lower_key.clone()), Bound::Excluded(upper_key.clone())),
            ));
        }

        let tree = self.tree.read();
        if tree.file_count(0) > 0 {
            let device = self.device.clone();
            let packing = self.options.packing;
            let load = move |name: &str| load_from_device(&device, name, 0, packing);
            let l0 = level0_iterator(tree.files_at(0), values.clone(), load, lower_key.clone(), upper_key.clone())?;
            children.push(Box::new(l0));
        }
        for level in tree.levels_with_files() {
            if level == 0 {
                continue;
            }
            let files = tree.files_at(level).to_vec();
            let device = self.device.clone();
            let packing = self.options.packing;
            let opener: Arc<dyn Fn(&str) -> Result<SsTable> + Send + Sync> =
                Arc::new(move |name: &str| load_from_device(&device, name, level, packing));
            let ln = LevelNIterator::new(
                files,
                self.sstable_cache.clone(),
                opener,
                values.clone(),
                lower_key.clone(),
                upper_key.clone(),
            );
            children.push(Box::new(ln));
        }
        drop(tree);

        RangeQueryIterator::new(Box::new(MergeIterator::create(children)))
    }

    // ---- open/close ----------------------------------------------------

    fn open_inner(device: Arc<dyn BlockDevice>, options: Options) -> Result<Arc<LsmStorageInner>> {
        let buf = device.open_db()?;
        let fresh = buf.is_empty();
        let db_init = DbInit::decode(&buf)?;
        let log = if fresh {
            LogManager::new(device.clone())?
        } else {
            LogManager::restore(device.clone(), db_init.log_state.clone())?
        };
        let global_seq = db_init.global_seq;
        let sstable_seq = db_init.sstable_seq;
        let tree = db_init.into_tree();

        let sstable_cache = Cache::builder().max_capacity(options.max_open_children as u64).build();
        let read_cache = ReadCache::new(options.range_key_cache_size);
        let compactor = CompactionRunner::new(device.clone(), options.packing);
        let memtable = Arc::new(MemTable::new(options.packing));

        Ok(Arc::new_cyclic(|weak| LsmStorageInner {
            weak_self: weak.clone(),
            device,
            state: Mutex::new(StateInner { memtable, immutable: None }),
            rotation_cv: Condvar::new(),
            write_lock: Mutex::new(()),
            log: Arc::new(RwLock::new(log)),
            tree: RwLock::new(tree),
            next_seq: AtomicU64::new(global_seq),
            sstable_seq: Mutex::new(sstable_seq),
            pool: crate::pool::WorkerPool::new(),
            compactor: Mutex::new(compactor),
            read_cache,
            sstable_cache,
            options,
        }))
    }

    /// Drains the pool, flushes any in-flight memtable and log buffer, and
    /// persists `DB_INIT`. Leaves the in-memory tree empty afterward —
    /// there is no usable handle left to read it anyway, since
    /// `close` consumes [`MiniLsm`] by value.
    fn close_inner(&self) -> Result<()> {
        self.pool.wait_for_all();

        let memtable = self.state.lock().memtable.clone();
        self.pack_and_install(&memtable)?;
        self.log.write().flush_partial()?;

        let log_state = self.log.read().state();
        let global_seq = self.next_seq.load(Ordering::SeqCst);
        let sstable_seq = *self.sstable_seq.lock();
        let db_init = {
            let tree = self.tree.read();
            DbInit::from_tree(log_state, global_seq, sstable_seq, &tree)
        };
        self.device.close_db(&db_init.encode())?;
        *self.tree.write() = LevelTree::new();
        Ok(())
    }

    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let state = self.state.lock();
        let flushing = if state.immutable.is_some() { " (+1 immutable flushing)" } else { "" };
        let _ = writeln!(out, "memtable: {} records{flushing}", state.memtable.len());
        drop(state);
        let tree = self.tree.read();
        for level in 0..=tree.max_level() {
            let files = tree.files_at(level);
            if files.is_empty() {
                continue;
            }
            let _ = writeln!(out, "L{level} ({} files):", files.len());
            for f in files {
                let _ = writeln!(
                    out,
                    "  {} [{:?}, {:?}]",
                    f.file_name,
                    String::from_utf8_lossy(&f.range_min),
                    String::from_utf8_lossy(&f.range_max)
                );
            }
        }
        out
    }
}

impl std::fmt::Debug for LsmStorageInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dump())
    }
}

/// The public handle. A thin wrapper around `Arc<LsmStorageInner>` whose
/// only job is to make [`MiniLsm::close`]'s contract explicit: it
/// consumes `self`, so the type system — not a runtime "is this closed?"
/// check — refuses any further call after close.
pub struct MiniLsm {
    inner: Arc<LsmStorageInner>,
}

impl MiniLsm {
    pub fn open(device: Arc<dyn BlockDevice>, options: Options) -> Result<Self> {
        Ok(Self { inner: LsmStorageInner::open_inner(device, options)? })
    }

    pub fn open_on_disk(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let device = Arc::new(FileBlockDevice::open(path)?);
        Self::open(device, options)
    }

    pub fn put(&self, user_key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(user_key, value)
    }

    pub fn delete(&self, user_key: &[u8]) -> Result<()> {
        self.inner.delete(user_key)
    }

    pub fn get(&self, user_key: &[u8]) -> Result<Bytes> {
        self.inner.get(user_key)
    }

    pub fn scan(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<RangeQueryIterator> {
        self.inner.scan(lower, upper)
    }

    /// Blocks until every background flush/compaction submitted so far
    /// has completed.
    pub fn wait_all_tasks_done(&self) {
        self.inner.pool.wait_for_all()
    }

    /// Forces the active memtable to flush now, regardless of fullness.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Forces a compaction pass over any level currently past threshold.
    pub fn compact(&self) -> Result<()> {
        self.inner.compact()
    }

    pub fn dump(&self) -> String {
        self.inner.dump()
    }

    /// Consumes `self`: the store is not usable again until a fresh
    /// `open`.
    pub fn close(self) -> Result<()> {
        self.inner.close_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    fn open(dir: &std::path::Path) -> MiniLsm {
        MiniLsm::open_on_disk(dir, Options::default()).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.put(b"k", b"v1").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Bytes::from_static(b"v1"));
        db.close().unwrap();
    }

    #[test]
    fn overwrite_keeps_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.put(b"k", b"v1").unwrap();
        db.put(b"k", b"v2").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Bytes::from_static(b"v2"));
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.put(b"k", b"v").unwrap();
        db.delete(b"k").unwrap();
        assert!(db.get(b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn reopen_after_close_preserves_data_and_seq_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.close().unwrap();

        let db2 = open(dir.path());
        assert_eq!(db2.get(b"a").unwrap(), Bytes::from_static(b"1"));
        db2.put(b"c", b"3").unwrap();
        assert_eq!(db2.get(b"c").unwrap(), Bytes::from_static(b"3"));
        db2.close().unwrap();
    }

    #[test]
    fn scan_yields_each_key_once_in_order_with_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        for i in 0..50 {
            db.put(format!("key{i:04}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
        }
        db.put(b"key0010", b"updated").unwrap();
        db.delete(b"key0020").unwrap();

        let mut scan = db.scan(None, None).unwrap();
        let mut seen = Vec::new();
        while let Some(entry) = scan.next_entry().unwrap() {
            seen.push(entry);
        }
        assert_eq!(seen.len(), 50);
        for w in seen.windows(2) {
            assert!(w[0].user_key < w[1].user_key);
        }
        let updated = seen.iter().find(|e| e.user_key == b"key0010").unwrap();
        assert_eq!(updated.value, Some(Bytes::from_static(b"updated")));
        let deleted = seen.iter().find(|e| e.user_key == b"key0020").unwrap();
        assert!(deleted.value.is_none());
    }

    #[test]
    fn memtable_rotation_flushes_to_level_zero() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        for i in 0..crate::config::IMS_PAGE_NUM + 10 {
            db.put(format!("key{i:08}").as_bytes(), b"v").unwrap();
        }
        db.wait_all_tasks_done();
        assert!(db.dump().contains("L0"));
    }
}
