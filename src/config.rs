//! Build-time wire-format constants and runtime-tunable options.
//!
//! The wire-format sizes (`IMS_PAGE_SIZE`, `IMS_PAGE_NUM`, `SLOT_SIZE`, ...)
//! are fixed: every on-device binary layout in this crate depends on them,
//! so they stay `const`. Everything else (packing strategy, level
//! thresholds, GC thresholds, cache sizes) is a field on [`Options`] so
//! tests can vary it without recompiling.

use std::fmt;

/// Size of one device page, in bytes.
pub const IMS_PAGE_SIZE: usize = 4096;
/// Number of pages packed into a single SSTable block.
pub const IMS_PAGE_NUM: usize = 512;
/// Size of one SSTable block: `IMS_PAGE_NUM * IMS_PAGE_SIZE` (2 MiB).
pub const BLOCK_SIZE: usize = IMS_PAGE_NUM * IMS_PAGE_SIZE;
/// Size of one internal-key slot within a page.
pub const SLOT_SIZE: usize = 64;
/// Number of slots per page: `IMS_PAGE_SIZE / SLOT_SIZE`.
pub const SLOT_NUM_PER_PAGE: usize = IMS_PAGE_SIZE / SLOT_SIZE;
/// Number of 4 KiB pages in one 2 MiB value-log block.
pub const PAGES_PER_BLOCK: usize = BLOCK_SIZE / IMS_PAGE_SIZE;
/// Alignment required of every SSTable/metadata buffer.
pub const DEVICE_ALIGN: usize = 4096;

/// Maximum user-key length accepted by [`crate::key::InternalKey`].
pub const MAX_USER_KEY_LEN: usize = 40;
/// Encoded size of an internal key, in bytes. Fixed by the wire format.
pub const INTERNAL_KEY_SIZE: usize = 64;

/// Fixed width of a persisted SSTable file name (zero-padded decimal).
pub const FILE_NAME_WIDTH: usize = 35;

/// Default bound on concurrently open Level-N child iterators.
pub const DEFAULT_MAX_OPEN_CHILDREN: usize = 64;
/// Default bound on the read cache (file name -> user-key set).
pub const RANGE_KEY_CACHE_SIZE: u64 = 30;

/// Default Level-0 file-count threshold that triggers compaction.
pub const LEVEL0_MAX: usize = 4;
/// Default Level-1 file-count threshold.
pub const LEVEL1_MAX: usize = 10;

/// Default log-block-count threshold that triggers GC.
pub const LOG_GC_THRESHOLD: usize = 1000;
/// Default number of blocks reclaimed per GC trigger.
pub const GC_BLOCK_NUM: usize = 1;

/// SSTable packing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackingType {
    /// Slot `i` at byte offset `i * IMS_PAGE_SIZE`.
    KeyPerPage,
    /// Slot = `FNV1a64(encoded_key) mod slots_per_page`, probed across pages.
    Hash,
    /// Column-major fill across the 2-D slot grid.
    KeyRange,
}

impl Default for PackingType {
    fn default() -> Self {
        PackingType::KeyPerPage
    }
}

impl fmt::Display for PackingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackingType::KeyPerPage => "key-per-page",
            PackingType::Hash => "hash",
            PackingType::KeyRange => "key-range",
        };
        f.write_str(s)
    }
}

/// Who issued a `put`: the caller, or the GC path.
///
/// GC must never trigger another GC cycle; this distinguishes the two call
/// sites without duplicating the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOrigin {
    User,
    Gc,
}

/// Where the search-offload pattern is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPattern {
    /// The device builds the in-memory search pattern itself.
    Device,
    /// The host assembles the pattern and ships it to the device.
    Host,
}

impl Default for SearchPattern {
    fn default() -> Self {
        SearchPattern::Device
    }
}

/// Runtime-tunable knobs.
#[derive(Debug, Clone)]
pub struct Options {
    pub packing: PackingType,
    pub search_pattern: SearchPattern,
    pub level_max: Vec<usize>,
    pub log_gc_threshold: usize,
    pub gc_block_num: usize,
    pub range_key_cache_size: u64,
    pub max_open_children: usize,
}

impl Options {
    /// Threshold for `level`, extending the last configured entry by `*10`:
    /// `LEVEL_k_MAX = LEVEL_{k-1}_MAX * 10`.
    pub fn level_max(&self, level: usize) -> usize {
        if let Some(&v) = self.level_max.get(level) {
            return v;
        }
        let mut v = *self.level_max.last().expect("level_max non-empty");
        for _ in self.level_max.len()..=level {
            v *= 10;
        }
        v
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            packing: PackingType::default(),
            search_pattern: SearchPattern::default(),
            level_max: vec![LEVEL0_MAX, LEVEL1_MAX],
            log_gc_threshold: LOG_GC_THRESHOLD,
            gc_block_num: GC_BLOCK_NUM,
            range_key_cache_size: RANGE_KEY_CACHE_SIZE,
            max_open_children: DEFAULT_MAX_OPEN_CHILDREN,
        }
    }
}
