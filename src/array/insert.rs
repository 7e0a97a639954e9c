//! Insert, update and delete (spec §4.7.3, §4.7.7).

use super::bucket::{Bucket, Key, INVALID_INDEX};
use super::{resize, ArrayError, ArrayFlags, ArrayResult, HashTable};
use crate::value::{Value, ValueKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PutMode {
    Add,
    Update,
    UpdateIndirect,
    AddNew,
    AddNext,
}

/// What happened during a `put`, for the facade layer to relay to the
/// iterator registry (spec §4.7.3: "update iterator registrations
/// pointing at `INVALID_INDEX`").
#[derive(Default)]
pub struct PutEffect {
    pub bound_internal_pointer: Option<u32>,
    /// Bucket moves produced by an insertion-triggered resize/rehash
    /// (spec §4.7.4), for `notify_move` to replay against the iterator
    /// registry.
    pub rehash_moves: Vec<(u32, u32)>,
    pub rehash_internal_pointer_moved_to: Option<u32>,
}

pub fn put(ht: &mut HashTable, key: Key, value: Value, mode: PutMode) -> ArrayResult<PutEffect> {
    if ht.is_packed() {
        match &key {
            Key::Int(k) if *k >= 0 => {
                let k = *k;
                let idx = k as usize;
                if idx < ht.used() {
                    if ht.buckets[idx].is_live() {
                        if mode == PutMode::Add {
                            return Err(ArrayError::AlreadyExists);
                        }
                        write_value(ht, idx, value, mode);
                        return Ok(PutEffect::default());
                    }
                    // A hole below the tail: packed invariant cannot hold.
                    resize::to_hashed(ht);
                } else if idx == ht.used() {
                    return append_packed(ht, k, value);
                } else if idx < ht.capacity {
                    fill_undef_up_to(ht, idx);
                    return append_packed(ht, k, value);
                } else if idx < 2 * ht.capacity && ht.used() >= ht.capacity / 2 {
                    resize::grow_capacity(ht);
                    fill_undef_up_to(ht, idx);
                    return append_packed(ht, k, value);
                } else {
                    resize::to_hashed(ht);
                }
            }
            _ => {
                // Negative integer key, or a string key — packed cannot
                // represent either.
                resize::to_hashed(ht);
            }
        }
    }

    put_hashed(ht, key, value, mode)
}

fn write_value(ht: &mut HashTable, idx: usize, value: Value, mode: PutMode) {
    match mode {
        PutMode::UpdateIndirect => {
            *ht.buckets[idx].value.deref_indirect_mut() = value;
        }
        _ => {
            ht.buckets[idx].value = value;
        }
    }
}

fn fill_undef_up_to(ht: &mut HashTable, idx: usize) {
    while ht.used() < idx {
        let next_key = ht.used() as i64;
        ht.buckets.push(Bucket::tombstone(Key::Int(next_key)));
    }
}

fn append_packed(ht: &mut HashTable, k: i64, value: Value) -> ArrayResult<PutEffect> {
    ht.buckets.push(Bucket::new(Key::Int(k), value));
    ht.count += 1;
    ht.next_free_index = ht.next_free_index.max(k.saturating_add(1));
    let mut effect = PutEffect::default();
    if ht.internal_pointer == INVALID_INDEX {
        let pos = (ht.used() - 1) as u32;
        ht.internal_pointer = pos;
        effect.bound_internal_pointer = Some(pos);
    }
    Ok(effect)
}

fn put_hashed(ht: &mut HashTable, key: Key, value: Value, mode: PutMode) -> ArrayResult<PutEffect> {
    if mode != PutMode::AddNew {
        let hash = key.chain_hash();
        if let Some(idx) = find_index(ht, hash, &key) {
            match mode {
                PutMode::Add => return Err(ArrayError::AlreadyExists),
                PutMode::UpdateIndirect => {
                    *ht.buckets[idx].value.deref_indirect_mut() = value;
                }
                _ => {
                    ht.buckets[idx].value = value;
                }
            }
            return Ok(PutEffect::default());
        }
    }

    let mut rehash_moves = Vec::new();
    let mut rehash_ip_move = None;
    if ht.used() == ht.capacity {
        let rehash_effect = resize::resize(ht)?;
        rehash_moves = rehash_effect.moves;
        rehash_ip_move = rehash_effect.internal_pointer_moved_to;
    }
    ht.ensure_initialized();

    let is_interned_or_int = match &key {
        Key::Int(_) => true,
        Key::Str(s) => s.is_interned(),
    };
    if !is_interned_or_int {
        ht.flags.remove(ArrayFlags::STATIC_KEYS);
    }

    let hash = key.chain_hash();
    let new_idx = ht.used() as u32;
    let int_key = if let Key::Int(k) = &key { Some(*k) } else { None };
    let mut bucket = Bucket::new(key, value);
    let slot = ht.slot_for(hash);
    bucket.set_next(ht.slots[slot]);
    ht.buckets.push(bucket);
    ht.slots[slot] = new_idx;
    ht.count += 1;

    let mut effect = PutEffect::default();
    effect.rehash_moves = rehash_moves;
    effect.rehash_internal_pointer_moved_to = rehash_ip_move;
    if ht.internal_pointer == INVALID_INDEX {
        ht.internal_pointer = new_idx;
        effect.bound_internal_pointer = Some(new_idx);
    }
    if let Some(k) = int_key {
        ht.next_free_index = ht.next_free_index.max(k.saturating_add(1));
    }
    Ok(effect)
}

fn find_index(ht: &HashTable, hash: u64, key: &Key) -> Option<usize> {
    if ht.slots.is_empty() {
        return None;
    }
    let mut idx = ht.slots[ht.slot_for(hash)];
    while idx != INVALID_INDEX {
        let bucket = &ht.buckets[idx as usize];
        if bucket.key.chain_hash() == hash && bucket.key.matches(key) {
            return if bucket.is_effectively_live() { Some(idx as usize) } else { None };
        }
        idx = bucket.next();
    }
    None
}

/// What happened during a delete, for the facade to relay to the iterator
/// registry (`internal_pointer` rewind, `notify_move` on tail trim).
#[derive(Default)]
pub struct DeleteEffect {
    pub new_internal_pointer: Option<u32>,
}

/// Look up `key` and delete it, if present (spec §4.7.7's `del(ht, key)` —
/// `del_by_position` is `delete_by_index` directly).
pub fn delete(ht: &mut HashTable, key: &Key) -> Option<DeleteEffect> {
    let idx = ht.index_of(key)?;
    Some(delete_by_index(ht, idx))
}

pub fn delete_by_index(ht: &mut HashTable, idx: usize) -> DeleteEffect {
    let bucket = &mut ht.buckets[idx];

    if let ValueKind::Indirect(target) = &bucket.value.kind {
        let target = *target;
        unsafe {
            if !(*target).is_undef() {
                *target = Value::undef();
                ht.flags |= ArrayFlags::HAS_EMPTY_INDIRECT;
            }
        }
        return DeleteEffect::default();
    }

    unlink_from_chain(ht, idx);
    ht.buckets[idx].value = Value::undef();
    ht.count -= 1;

    // Trim a dead tail (cheap "used" shrink, spec §4.7.7).
    while matches!(ht.buckets.last(), Some(b) if !b.is_live()) {
        ht.buckets.pop();
    }

    let mut effect = DeleteEffect::default();
    if ht.internal_pointer as usize == idx || ht.internal_pointer as usize >= ht.used() {
        let next_live = ht.buckets.iter().enumerate().skip(idx).find(|(_, b)| b.is_live()).map(|(i, _)| i as u32);
        ht.internal_pointer = next_live.unwrap_or(INVALID_INDEX);
        effect.new_internal_pointer = Some(ht.internal_pointer);
    }
    effect
}

fn unlink_from_chain(ht: &mut HashTable, idx: usize) {
    if ht.slots.is_empty() {
        return;
    }
    let hash = ht.buckets[idx].key.chain_hash();
    let slot = ht.slot_for(hash);
    let mut cur = ht.slots[slot];
    if cur == idx as u32 {
        ht.slots[slot] = ht.buckets[idx].next();
        return;
    }
    while cur != INVALID_INDEX {
        let next = ht.buckets[cur as usize].next();
        if next == idx as u32 {
            ht.buckets[cur as usize].set_next(ht.buckets[idx].next());
            return;
        }
        cur = next;
    }
}
