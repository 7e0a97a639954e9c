//! The array engine's outward-facing API (spec §6 "Array API surface"),
//! operating on a shared, reference-counted handle rather than a bare
//! `HashTable` so that copy-on-write (spec §5) and the iterator registry
//! (component H, spec §4.8) can be wired in at the one place every mutator
//! passes through. `HashTable` itself (`array::mod`) stays registry-
//! agnostic plain data; this module is the seam the rest of the crate
//! calls through.

use super::bucket::Key;
use super::{convert, sort as sort_impl, ArrayError, ArrayResult, HashTable, PutMode};
use crate::iterator::{self, ArrayHandle};
use crate::value::Value;
use std::cmp::Ordering;
use std::rc::Rc;

pub fn new_handle(ht: HashTable) -> ArrayHandle {
    Rc::new(std::cell::RefCell::new(ht))
}

pub fn init(capacity: usize, persistent: bool) -> ArrayHandle {
    new_handle(HashTable::init(capacity, persistent))
}

pub fn init_packed(capacity: usize, persistent: bool) -> ArrayHandle {
    new_handle(HashTable::init_packed(capacity, persistent))
}

pub fn init_as_empty() -> ArrayHandle {
    new_handle(HashTable::new_empty())
}

/// Copy-on-write fork (spec §5): any mutator must ensure unique ownership
/// first. `Rc::strong_count` is this crate's stand-in for the original's
/// value-cell refcount check — both ask the same question, "does anyone
/// else see this array", before writing through a shared pointer.
pub fn separate(handle: &mut ArrayHandle) {
    if Rc::strong_count(handle) > 1 {
        let copy = convert::dup(&handle.borrow());
        *handle = new_handle(copy);
    }
}

fn relay_rehash(handle: &ArrayHandle, moves: &[(u32, u32)]) {
    if moves.is_empty() {
        return;
    }
    iterator::with_registry(|reg| {
        for &(from, to) in moves {
            reg.notify_move(handle, from, to);
        }
    });
}

pub fn insert(handle: &mut ArrayHandle, key: Key, value: Value, mode: PutMode) -> ArrayResult<()> {
    separate(handle);
    let effect = handle.borrow_mut().put(key, value, mode)?;
    relay_rehash(handle, &effect.rehash_moves);
    Ok(())
}

/// `next_append` (spec §6): uses `next_free_index`, always succeeds unless
/// the table is genuinely exhausted (capacity overflow).
pub fn next_append(handle: &mut ArrayHandle, value: Value) -> ArrayResult<()> {
    separate(handle);
    let next = handle.borrow().next_free_index;
    let effect = handle.borrow_mut().put(Key::Int(next), value, PutMode::AddNext)?;
    relay_rehash(handle, &effect.rehash_moves);
    Ok(())
}

/// `delete(key)` (spec §6). Returns whether an entry was actually
/// removed.
pub fn delete(handle: &mut ArrayHandle, key: &Key) -> bool {
    separate(handle);
    handle.borrow_mut().delete(key).is_some()
}

pub fn delete_by_position(handle: &mut ArrayHandle, pos: u32) -> bool {
    separate(handle);
    let used = handle.borrow().used();
    if (pos as usize) >= used || !handle.borrow().buckets[pos as usize].is_live() {
        return false;
    }
    super::insert::delete_by_index(&mut handle.borrow_mut(), pos as usize);
    true
}

/// `extend(new_capacity, packed)` (spec §6): grow ahead of a known bulk
/// insert, optionally forcing the hashed representation.
pub fn extend(handle: &mut ArrayHandle, new_capacity: usize, force_hashed: bool) {
    separate(handle);
    let mut all_moves = Vec::new();
    {
        let mut ht = handle.borrow_mut();
        if force_hashed && ht.is_packed() {
            super::resize::to_hashed(&mut ht);
        }
        while ht.capacity < new_capacity {
            if ht.is_packed() {
                super::resize::grow_capacity(&mut ht);
            } else {
                if let Ok(effect) = super::resize::resize(&mut ht) {
                    all_moves.extend(effect.moves);
                }
            }
        }
    }
    relay_rehash(handle, &all_moves);
}

pub fn find(handle: &ArrayHandle, key: &Key) -> Option<Value> {
    let ht = handle.borrow();
    match key {
        Key::Int(i) => ht.find_int(*i).map(|b| b.value.clone()),
        Key::Str(s) => ht.find_str(s).map(|b| b.value.clone()),
    }
}

pub fn exists(handle: &ArrayHandle, key: &Key) -> bool {
    let ht = handle.borrow();
    match key {
        Key::Int(i) => ht.exists_int(*i),
        Key::Str(s) => ht.exists_str(s),
    }
}

// ---------------------------------------------------------------------
// Legacy "current element" cursor (spec §3.8 `internal_pointer`, not to
// be confused with the external iterator registry of component H).
// ---------------------------------------------------------------------

pub fn cursor_reset(handle: &ArrayHandle) {
    let mut ht = handle.borrow_mut();
    let pos = super::iter::forward_from(&ht, 0, false);
    ht.internal_pointer = pos;
}

pub fn cursor_next(handle: &ArrayHandle) -> u32 {
    let mut ht = handle.borrow_mut();
    if ht.internal_pointer == super::INVALID_INDEX {
        return super::INVALID_INDEX;
    }
    let pos = super::iter::forward_from(&ht, ht.internal_pointer + 1, false);
    ht.internal_pointer = pos;
    pos
}

pub fn cursor_prev(handle: &ArrayHandle) -> u32 {
    let mut ht = handle.borrow_mut();
    if ht.internal_pointer == super::INVALID_INDEX || ht.internal_pointer == 0 {
        ht.internal_pointer = super::INVALID_INDEX;
        return super::INVALID_INDEX;
    }
    let pos = super::iter::backward_from(&ht, ht.internal_pointer - 1, false);
    ht.internal_pointer = pos;
    pos
}

// ---------------------------------------------------------------------
// Bulk operations (spec §6 "Bulk").
// ---------------------------------------------------------------------

pub fn clone_handle(handle: &ArrayHandle) -> ArrayHandle {
    new_handle(convert::dup(&handle.borrow()))
}

pub fn merge(dst: &mut ArrayHandle, src: &ArrayHandle, overwrite: bool) {
    separate(dst);
    let effects = {
        let src_ht = src.borrow();
        let mut dst_ht = dst.borrow_mut();
        convert::merge(&mut dst_ht, &src_ht, overwrite)
    };
    for effect in effects {
        relay_rehash(dst, &effect.rehash_moves);
    }
}

pub fn compare(a: &ArrayHandle, b: &ArrayHandle, element_cmp: impl Fn(&Value, &Value) -> Ordering, ordered: bool) -> Ordering {
    convert::compare(&a.borrow(), &b.borrow(), element_cmp, ordered)
}

pub fn sort(handle: &mut ArrayHandle, cmp: impl Fn(&super::Bucket, &super::Bucket) -> Ordering, renumber: bool) {
    separate(handle);
    sort_impl::sort(&mut handle.borrow_mut(), cmp, renumber);
}

/// `clean` (spec §6): drop every entry, keeping the handle itself (and
/// any external iterators registered on it, which will simply observe an
/// empty table from here on).
pub fn clean(handle: &mut ArrayHandle) {
    separate(handle);
    let mut ht = handle.borrow_mut();
    ht.buckets.clear();
    ht.slots.clear();
    ht.count = 0;
    ht.next_free_index = 0;
    ht.internal_pointer = super::INVALID_INDEX;
    ht.flags |= super::ArrayFlags::PACKED | super::ArrayFlags::STATIC_KEYS;
    ht.flags.remove(super::ArrayFlags::HAS_EMPTY_INDIRECT | super::ArrayFlags::INITIALIZED);
}

/// `to_packed`/`to_hashed` (spec §6, §4.7.5).
pub fn to_packed(handle: &mut ArrayHandle) -> ArrayResult<()> {
    separate(handle);
    let mut ht = handle.borrow_mut();
    if ht.is_packed() {
        return Ok(());
    }
    if ht.buckets.iter().enumerate().any(|(i, b)| !matches!(&b.key, Key::Int(k) if *k == i as i64)) {
        return Err(ArrayError::CapacityOverflow);
    }
    ht.flags |= super::ArrayFlags::PACKED;
    ht.slots.clear();
    Ok(())
}

pub fn to_hashed(handle: &mut ArrayHandle) {
    separate(handle);
    super::resize::to_hashed(&mut handle.borrow_mut());
}

/// Spec §4.7.14: shares (bumps the refcount) when `handle`'s keys are
/// already all-integer; only a genuine key-shape change allocates a new
/// table.
pub fn to_symtable(handle: &ArrayHandle) -> ArrayResult<ArrayHandle> {
    match convert::to_symtable(&handle.borrow())? {
        convert::Conversion::Shared => Ok(Rc::clone(handle)),
        convert::Conversion::Converted(ht) => Ok(new_handle(ht)),
    }
}

/// Spec §4.7.14: shares when `handle` already has no numeric-looking
/// string keys to convert.
pub fn to_proptable(handle: &ArrayHandle) -> ArrayResult<ArrayHandle> {
    match convert::to_proptable(&handle.borrow())? {
        convert::Conversion::Shared => Ok(Rc::clone(handle)),
        convert::Conversion::Converted(ht) => Ok(new_handle(ht)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueKind;

    #[test]
    fn separate_forks_on_shared_access() {
        let mut a = init_as_empty();
        insert(&mut a, Key::Int(0), Value::new(ValueKind::Int(1)), PutMode::Add).unwrap();
        let b = a.clone();
        assert_eq!(Rc::strong_count(&a), 2);
        insert(&mut a, Key::Int(1), Value::new(ValueKind::Int(2)), PutMode::Add).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(b.borrow().count(), 1);
        assert_eq!(a.borrow().count(), 2);
    }

    #[test]
    fn cursor_walks_forward_then_resets() {
        let mut a = init_as_empty();
        next_append(&mut a, Value::new(ValueKind::Int(1))).unwrap();
        next_append(&mut a, Value::new(ValueKind::Int(2))).unwrap();
        cursor_reset(&a);
        assert_eq!(a.borrow().internal_pointer(), 0);
        assert_eq!(cursor_next(&a), 1);
        assert_eq!(cursor_next(&a), super::super::INVALID_INDEX);
    }

    #[test]
    fn clean_empties_and_repacks() {
        let mut a = init_as_empty();
        next_append(&mut a, Value::new(ValueKind::Int(1))).unwrap();
        clean(&mut a);
        assert_eq!(a.borrow().count(), 0);
        assert!(a.borrow().is_packed());
    }
}
