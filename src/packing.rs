//! SSTable packing strategies: place a sorted run of internal keys into a
//! single fixed-size, 4 KiB-aligned 2 MiB block.

use crate::config::{IMS_PAGE_NUM, IMS_PAGE_SIZE, INTERNAL_KEY_SIZE, SLOT_NUM_PER_PAGE, SLOT_SIZE};
use crate::config::PackingType;
use crate::hash::hash_mod_n;
use crate::key::InternalKey;
use crate::status::{Result, Status};

/// A fresh, `0xFF`-filled 2 MiB buffer ready to be packed.
pub fn new_block() -> Vec<u8> {
    vec![0xFFu8; crate::config::BLOCK_SIZE]
}

fn slot_offset(page: usize, slot: usize) -> usize {
    page * IMS_PAGE_SIZE + slot * SLOT_SIZE
}

fn slot_is_empty(block: &[u8], offset: usize) -> bool {
    block[offset] == 0 || block[offset] == 0xFF
}

fn write_slot(block: &mut [u8], offset: usize, key: &InternalKey) {
    block[offset..offset + INTERNAL_KEY_SIZE].copy_from_slice(&key.encode());
}

/// Packs `keys` (assumed already sorted by the composite comparator) into
/// one block using `strategy`. Fails with `InvalidArgument` on per-page
/// overflow (`i >= IMS_PAGE_NUM`) and a dedicated "block full" error on
/// hash-probing exhaustion — both are programmer errors, not transient
/// faults.
pub fn pack(keys: &[InternalKey], strategy: PackingType) -> Result<Vec<u8>> {
    let mut block = new_block();
    match strategy {
        PackingType::KeyPerPage => pack_per_page(&mut block, keys)?,
        PackingType::Hash => pack_hash(&mut block, keys)?,
        PackingType::KeyRange => pack_key_range(&mut block, keys)?,
    }
    Ok(block)
}

fn pack_per_page(block: &mut [u8], keys: &[InternalKey]) -> Result<()> {
    for (i, key) in keys.iter().enumerate() {
        if i >= IMS_PAGE_NUM {
            return Err(Status::invalid_argument(format!(
                "per-page packing overflow: {} keys exceeds {IMS_PAGE_NUM} pages",
                keys.len()
            )));
        }
        write_slot(block, i * IMS_PAGE_SIZE, key);
    }
    Ok(())
}

/// Hash packing: slot = `FNV1a64(key) mod slots_per_page`, linearly probed
/// across pages at that slot index.
fn pack_hash(block: &mut [u8], keys: &[InternalKey]) -> Result<()> {
    for key in keys {
        let slot = hash_mod_n(&key.encode(), SLOT_NUM_PER_PAGE);
        let mut placed = false;
        for page in 0..IMS_PAGE_NUM {
            let offset = slot_offset(page, slot);
            if slot_is_empty(block, offset) {
                write_slot(block, offset, key);
                placed = true;
                break;
            }
        }
        if !placed {
            return Err(Status::invalid_argument(format!(
                "hash packing overflow: bucket {slot} full across all {IMS_PAGE_NUM} pages"
            )));
        }
    }
    Ok(())
}

/// Key-range packing: column-major fill — slot 0 across every page, then
/// slot 1 across every page, and so on.
fn pack_key_range(block: &mut [u8], keys: &[InternalKey]) -> Result<()> {
    let capacity = SLOT_NUM_PER_PAGE * IMS_PAGE_NUM;
    if keys.len() > capacity {
        return Err(Status::invalid_argument(format!(
            "key-range packing overflow: {} keys exceeds capacity {capacity}",
            keys.len()
        )));
    }
    for (i, key) in keys.iter().enumerate() {
        let slot = i / IMS_PAGE_NUM;
        let page = i % IMS_PAGE_NUM;
        write_slot(block, slot_offset(page, slot), key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{ValuePtr, ValueType};

    fn keys(n: usize) -> Vec<InternalKey> {
        (0..n)
            .map(|i| InternalKey::new(format!("k{i:06}").as_bytes(), ValuePtr::default(), i as u64 + 1, ValueType::Value))
            .collect()
    }

    #[test]
    fn per_page_round_trips_in_order() {
        let ks = keys(10);
        let block = pack(&ks, PackingType::KeyPerPage).unwrap();
        for (i, k) in ks.iter().enumerate() {
            let offset = i * IMS_PAGE_SIZE;
            let decoded = InternalKey::decode(&block[offset..offset + INTERNAL_KEY_SIZE]).unwrap();
            assert_eq!(decoded.user_key(), k.user_key());
        }
    }

    #[test]
    fn per_page_overflow_is_rejected() {
        let ks = keys(IMS_PAGE_NUM + 1);
        assert!(pack(&ks, PackingType::KeyPerPage).is_err());
    }

    #[test]
    fn hash_packing_places_every_key_findable() {
        let ks = keys(200);
        let block = pack(&ks, PackingType::Hash).unwrap();
        for k in &ks {
            let slot = hash_mod_n(&k.encode(), SLOT_NUM_PER_PAGE);
            let found = (0..IMS_PAGE_NUM).any(|page| {
                let offset = slot_offset(page, slot);
                !slot_is_empty(&block, offset)
                    && InternalKey::decode(&block[offset..offset + INTERNAL_KEY_SIZE])
                        .map(|d| d.user_key() == k.user_key())
                        .unwrap_or(false)
            });
            assert!(found, "key not found in its hash bucket");
        }
    }

    /// An adversarial key-set that drives a single hash bucket past its
    /// `IMS_PAGE_NUM` capacity must fail with a dedicated error, not
    /// silently overwrite or corrupt the buffer. Keys are generated
    /// randomly (rather than hand-picked collisions) and grouped by bucket
    /// until one overflows, so the property holds for whichever bucket
    /// the RNG happens to overload.
    #[test]
    fn hash_packing_adversarial_bucket_overload_is_rejected() {
        use rand::Rng;
        use std::collections::HashMap;

        let mut rng = rand::thread_rng();
        let mut buckets: HashMap<usize, Vec<InternalKey>> = HashMap::new();
        let mut overloaded_slot = None;
        for _ in 0..500_000 {
            let n: u64 = rng.gen();
            let key = InternalKey::new(format!("adv{n:020}").as_bytes(), ValuePtr::default(), n, ValueType::Value);
            let slot = hash_mod_n(&key.encode(), SLOT_NUM_PER_PAGE);
            let bucket = buckets.entry(slot).or_default();
            bucket.push(key);
            if bucket.len() > IMS_PAGE_NUM {
                overloaded_slot = Some(slot);
                break;
            }
        }
        let slot = overloaded_slot.expect("RNG failed to overload any bucket within the iteration budget");
        let overloaded = buckets.remove(&slot).unwrap();

        let err = pack(&overloaded, PackingType::Hash).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn key_range_column_major_layout() {
        let ks = keys(SLOT_NUM_PER_PAGE * 2);
        let block = pack(&ks, PackingType::KeyRange).unwrap();
        // Key 0 -> (slot 0, page 0); key IMS_PAGE_NUM -> (slot 1, page 0).
        let at = |page: usize, slot: usize| {
            let offset = slot_offset(page, slot);
            InternalKey::decode(&block[offset..offset + INTERNAL_KEY_SIZE]).unwrap()
        };
        assert_eq!(at(0, 0).user_key(), ks[0].user_key());
        assert_eq!(at(0, 1).user_key(), ks[IMS_PAGE_NUM].user_key());
    }
}
