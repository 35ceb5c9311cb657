//! Search-offload request assembly: when `SearchPattern::Host` is
//! configured, the host builds the pattern the device would otherwise
//! build itself, in one of two wire shapes selected by packing strategy.
//! The slot-index rule is shared with `packing.rs`/`hash.rs`.

use crate::cache::ReadCache;
use crate::config::{IMS_PAGE_SIZE, PackingType, SLOT_NUM_PER_PAGE, SLOT_SIZE};
use crate::hash::hash_mod_n;
use crate::key::InternalKey;
use crate::status::{Result, Status};

/// One candidate file and the slot index within it to probe.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub file_name: String,
    pub slot_index: u32,
}

/// The descriptor-form request: `{search_key, [(file_name, slot_index)]}`.
#[derive(Debug, Clone)]
pub struct DescriptorRequest {
    pub search_key: Vec<u8>,
    pub entries: Vec<PatternEntry>,
}

/// The hash-form request: each candidate carries a full 4 KiB pattern page
/// (`0xFF`-filled, with the encoded key placed at `slot_index * SLOT_SIZE`)
/// instead of a bare slot index.
#[derive(Debug, Clone)]
pub struct HashRequest {
    pub search_key: Vec<u8>,
    pub entries: Vec<(String, Vec<u8>)>,
}

/// Selects the slot index to probe for `search_key` in `file_name`, per
/// the packing-dependent rule.
pub fn slot_index(
    packing: PackingType,
    search_key: &[u8],
    file_name: &str,
    cache: &ReadCache,
) -> Result<usize> {
    match packing {
        PackingType::KeyPerPage => Ok(0),
        PackingType::Hash => {
            // The slot test is keyed on the encoded internal key elsewhere
            // (memtable fullness, packing); at search time only the user
            // key is known, so hash the lower-sentinel encoding, matching
            // the bucket a `Get` would land a real record in first.
            let probe = InternalKey::lower_sentinel(search_key);
            Ok(hash_mod_n(&probe.encode(), SLOT_NUM_PER_PAGE))
        }
        PackingType::KeyRange => cache
            .predecessor(file_name, search_key)
            .ok_or_else(|| Status::not_found(format!("no cached key <= search key in {file_name}"))),
    }
}

/// Builds the descriptor-form request (per-page and hash packing).
pub fn build_descriptor_request(
    packing: PackingType,
    search_key: &[u8],
    file_names: &[String],
    cache: &ReadCache,
) -> Result<DescriptorRequest> {
    let mut entries = Vec::with_capacity(file_names.len());
    for file_name in file_names {
        let slot = slot_index(packing, search_key, file_name, cache)?;
        entries.push(PatternEntry { file_name: file_name.clone(), slot_index: slot as u32 });
    }
    Ok(DescriptorRequest { search_key: search_key.to_vec(), entries })
}

/// Builds the hash-form request: a full `0xFF`-filled 4 KiB pattern page
/// per candidate, with the encoded search key placed at its slot.
pub fn build_hash_request(
    search_key: &[u8],
    file_names: &[String],
    cache: &ReadCache,
) -> Result<HashRequest> {
    let probe = InternalKey::lower_sentinel(search_key);
    let slot = hash_mod_n(&probe.encode(), SLOT_NUM_PER_PAGE);
    let mut entries = Vec::with_capacity(file_names.len());
    for file_name in file_names {
        let mut page = vec![0xFFu8; IMS_PAGE_SIZE];
        let offset = slot * SLOT_SIZE;
        page[offset..offset + crate::config::INTERNAL_KEY_SIZE].copy_from_slice(&probe.encode());
        entries.push((file_name.clone(), page));
    }
    Ok(HashRequest { search_key: search_key.to_vec(), entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_page_slot_is_always_zero() {
        let cache = ReadCache::new(10);
        assert_eq!(slot_index(PackingType::KeyPerPage, b"k", "f", &cache).unwrap(), 0);
    }

    #[test]
    fn key_range_slot_uses_cached_predecessor() {
        let cache = ReadCache::new(10);
        cache.insert("f".into(), std::sync::Arc::new(vec![b"a".to_vec(), b"m".to_vec()]));
        assert_eq!(slot_index(PackingType::KeyRange, b"z", "f", &cache).unwrap(), 1);
    }

    #[test]
    fn hash_request_places_key_at_computed_slot() {
        let cache = ReadCache::new(10);
        let req = build_hash_request(b"k", &["f".to_string()], &cache).unwrap();
        let probe = InternalKey::lower_sentinel(b"k");
        let slot = hash_mod_n(&probe.encode(), SLOT_NUM_PER_PAGE);
        let (name, page) = &req.entries[0];
        assert_eq!(name, "f");
        let offset = slot * SLOT_SIZE;
        assert_eq!(&page[offset..offset + crate::config::INTERNAL_KEY_SIZE], &probe.encode());
    }
}
