//! Resize, rehash and packed/hashed conversion (spec §4.7.4, §4.7.5,
//! §4.7.6).

use super::bucket::{Bucket, INVALID_INDEX};
use super::{ArrayError, ArrayFlags, ArrayResult, HashTable, MAX_CAPACITY};

/// Live-bucket moves produced by a compaction, for the facade to relay to
/// the iterator registry via `notify_move`. A dead bucket is never the
/// source of a registered position by the time rehash runs: `delete_by_index`
/// already rebinds any iterator sitting on the deleted slot to the next
/// live entry at delete time (spec §4.7.7), so compaction only ever needs
/// to report where *surviving* entries landed.
pub struct RehashEffect {
    pub moves: Vec<(u32, u32)>,
    pub internal_pointer_moved_to: Option<u32>,
}

pub fn resize(ht: &mut HashTable) -> ArrayResult<RehashEffect> {
    if ht.used() > ht.count + ht.count / 32 {
        return Ok(rehash(ht));
    }
    if ht.capacity >= MAX_CAPACITY {
        return Err(ArrayError::CapacityOverflow);
    }
    ht.capacity *= 2;
    ht.slots = vec![INVALID_INDEX; ht.capacity];
    Ok(rehash(ht))
}

/// Packed-only growth that does not touch the (nonexistent) slot table
/// (spec §4.7.3's `k < 2·capacity && used ≥ capacity/2` branch).
pub fn grow_capacity(ht: &mut HashTable) {
    ht.capacity = (ht.capacity * 2).min(MAX_CAPACITY);
}

/// Spec §4.7.5.
pub fn to_hashed(ht: &mut HashTable) {
    if !ht.is_packed() {
        return;
    }
    ht.flags.remove(ArrayFlags::PACKED);
    ht.slots = vec![INVALID_INDEX; ht.capacity];
    rehash(ht);
}

/// Spec §4.7.6. Resets the slot table and relinks every live bucket.
/// When `used > count` (holes present), also compacts the bucket vector,
/// preserving relative order.
pub fn rehash(ht: &mut HashTable) -> RehashEffect {
    let mut effect = RehashEffect { moves: Vec::new(), internal_pointer_moved_to: None };

    if ht.used() > ht.count {
        let old_internal = ht.internal_pointer;
        let mut compacted: Vec<Bucket> = Vec::with_capacity(ht.count);
        for (read, bucket) in std::mem::take(&mut ht.buckets).into_iter().enumerate() {
            if bucket.is_live() {
                let write = compacted.len() as u32;
                if write != read as u32 {
                    effect.moves.push((read as u32, write));
                    if old_internal == read as u32 {
                        effect.internal_pointer_moved_to = Some(write);
                    }
                }
                compacted.push(bucket);
            }
        }
        ht.buckets = compacted;
        if let Some(new_pos) = effect.internal_pointer_moved_to {
            ht.internal_pointer = new_pos;
        } else if old_internal != INVALID_INDEX && (old_internal as usize) >= ht.used() {
            ht.internal_pointer = INVALID_INDEX;
        }
    }

    for slot in ht.slots.iter_mut() {
        *slot = INVALID_INDEX;
    }
    for idx in 0..ht.used() {
        let hash = ht.buckets[idx].key.chain_hash();
        let slot = (hash as usize) & (ht.capacity - 1);
        ht.buckets[idx].set_next(ht.slots[slot]);
        ht.slots[slot] = idx as u32;
    }

    effect
}
