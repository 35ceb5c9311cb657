//! Bounded LRU from file name to its user-key set: backs the key-range
//! packing's `predecessor(search_key)` slot selection without re-reading
//! a file's key-range page on every search-offload request.

use moka::sync::Cache;
use std::sync::Arc;

/// `file_name -> sorted user keys`, used for the key-range packing's
/// predecessor search and general range-membership probes.
pub struct ReadCache {
    inner: Cache<String, Arc<Vec<Vec<u8>>>>,
}

impl ReadCache {
    pub fn new(capacity: u64) -> Self {
        Self { inner: Cache::builder().max_capacity(capacity).build() }
    }

    pub fn get(&self, file_name: &str) -> Option<Arc<Vec<Vec<u8>>>> {
        self.inner.get(file_name)
    }

    pub fn insert(&self, file_name: String, keys: Arc<Vec<Vec<u8>>>) {
        self.inner.insert(file_name, keys);
    }

    /// The largest cached key `<= search_key`, used to pick the key-range
    /// packer's slot index. Returns `None` on a cache miss or if every
    /// cached key is greater than `search_key`.
    pub fn predecessor(&self, file_name: &str, search_key: &[u8]) -> Option<usize> {
        let keys = self.get(file_name)?;
        let pos = keys.partition_point(|k| k.as_slice() <= search_key);
        if pos == 0 {
            None
        } else {
            Some(pos - 1)
        }
    }

    pub fn invalidate(&self, file_name: &str) {
        self.inner.invalidate(file_name);
    }
}
