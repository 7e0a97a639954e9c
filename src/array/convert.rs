//! Duplication, comparison, merge, and symtable/proptable conversions
//! (spec §4.7.9, §4.7.12, §4.7.13, §4.7.14).
//!
//! Deviation: spec §4.7.9 additionally unwraps a refcount-1 reference
//! payload during duplication, unless doing so would alias the source
//! array. References are out of scope here (spec §1 treats them as an
//! opaque external collaborator, like objects and resources) — there is no
//! modeled reference cell to dereference, so `dup` copies `Opaque`
//! payloads verbatim. See DESIGN.md.

use super::bucket::{Bucket, Key, INVALID_INDEX};
use super::insert::{self, PutMode};
use super::{ArrayFlags, HashTable};
use crate::value::Value;
use crate::zstring::{as_canonical_integer_key, ZString, ZStringRef};
use std::cmp::Ordering;

/// Spec §4.7.9.
pub fn dup(src: &HashTable) -> HashTable {
    let mut out = HashTable {
        buckets: Vec::with_capacity(src.used()),
        slots: Vec::new(),
        count: 0,
        capacity: src.capacity,
        next_free_index: src.next_free_index,
        internal_pointer: INVALID_INDEX,
        next_iterator_count: 0,
        flags: src.flags & !ArrayFlags::HAS_EMPTY_INDIRECT,
        recursion_depth: 0,
    };

    for (i, bucket) in src.buckets.iter().enumerate() {
        if bucket.is_live() {
            let key = clone_key(&bucket.key, &mut out);
            out.buckets.push(Bucket::new(key, bucket.value.clone()));
            out.count += 1;
        } else if src.is_packed() {
            out.buckets.push(Bucket::tombstone(Key::Int(i as i64)));
        }
    }

    if !src.is_packed() {
        out.slots = vec![INVALID_INDEX; out.capacity];
        for idx in 0..out.used() {
            let hash = out.buckets[idx].key.chain_hash();
            let slot = (hash as usize) & (out.capacity - 1);
            out.buckets[idx].set_next(out.slots[slot]);
            out.slots[slot] = idx as u32;
        }
    }

    out.internal_pointer = super::iter::forward_from(&out, 0, false);
    out
}

fn clone_key(key: &Key, out: &mut HashTable) -> Key {
    match key {
        Key::Int(i) => Key::Int(*i),
        Key::Str(s) => {
            if !s.is_interned() {
                out.flags.remove(ArrayFlags::STATIC_KEYS);
            }
            Key::Str(s.clone())
        }
    }
}

fn key_order(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Int(x), Key::Int(y)) => x.cmp(y),
        (Key::Str(x), Key::Str(y)) => x.as_bytes().len().cmp(&y.as_bytes().len()).then_with(|| x.as_bytes().cmp(y.as_bytes())),
        (Key::Str(_), Key::Int(_)) => Ordering::Greater,
        (Key::Int(_), Key::Str(_)) => Ordering::Less,
    }
}

/// Spec §4.7.12. `element_cmp` compares two already-dereferenced-of-
/// INDIRECT values; an UNDEF value is strictly less than any other.
pub fn compare(a: &HashTable, b: &HashTable, element_cmp: impl Fn(&Value, &Value) -> Ordering, ordered: bool) -> Ordering {
    if a.count() != b.count() {
        return a.count().cmp(&b.count());
    }
    if ordered {
        let mut ai = a.iter();
        let mut bi = b.iter();
        loop {
            match (ai.next(), bi.next()) {
                (None, None) => return Ordering::Equal,
                (Some(ab), Some(bb)) => {
                    let ko = key_order(&ab.key, &bb.key);
                    if ko != Ordering::Equal {
                        return ko;
                    }
                    let vo = value_order(ab.value.deref_indirect(), bb.value.deref_indirect(), &element_cmp);
                    if vo != Ordering::Equal {
                        return vo;
                    }
                }
                _ => unreachable!("counts matched above"),
            }
        }
    }

    for ab in a.iter() {
        let found = match &ab.key {
            Key::Int(k) => b.find_int(*k),
            Key::Str(s) => b.find_str(s),
        };
        match found {
            None => return Ordering::Greater,
            Some(bb) => {
                let vo = value_order(ab.value.deref_indirect(), bb.value.deref_indirect(), &element_cmp);
                if vo != Ordering::Equal {
                    return vo;
                }
            }
        }
    }
    Ordering::Equal
}

fn value_order(a: &Value, b: &Value, element_cmp: &impl Fn(&Value, &Value) -> Ordering) -> Ordering {
    match (a.is_undef(), b.is_undef()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => element_cmp(a, b),
    }
}

/// Spec §4.7.12.
pub fn minmax<'a>(ht: &'a HashTable, element_cmp: impl Fn(&Value, &Value) -> Ordering, want_max: bool) -> Option<&'a Bucket> {
    let mut best: Option<&Bucket> = None;
    for bucket in ht.iter() {
        best = match best {
            None => Some(bucket),
            Some(cur) => {
                let ord = element_cmp(bucket.value.deref_indirect(), cur.value.deref_indirect());
                let take = if want_max { ord == Ordering::Greater } else { ord == Ordering::Less };
                if take {
                    Some(bucket)
                } else {
                    Some(cur)
                }
            }
        };
    }
    best
}

/// Spec §4.7.13. Returns `put` effects for the facade to relay to the
/// iterator registry, one per inserted entry.
pub fn merge(dst: &mut HashTable, src: &HashTable, overwrite: bool) -> Vec<insert::PutEffect> {
    let mut effects = Vec::new();
    for bucket in src.iter() {
        let key = bucket.key.clone();
        let exists = match &key {
            Key::Int(k) => dst.exists_int(*k),
            Key::Str(s) => dst.exists_str(s),
        };
        if exists && !overwrite {
            continue;
        }
        let mode = if overwrite { PutMode::UpdateIndirect } else { PutMode::Add };
        if let Ok(effect) = insert::put(dst, key, bucket.value.deref_indirect().clone(), mode) {
            effects.push(effect);
        }
    }
    effects
}

/// `merge_ex`: as `merge`, gated by a caller predicate over `(key, value)`.
pub fn merge_ex(dst: &mut HashTable, src: &HashTable, overwrite: bool, check: impl Fn(&Key, &Value) -> bool) -> Vec<insert::PutEffect> {
    let mut effects = Vec::new();
    for bucket in src.iter() {
        if !check(&bucket.key, bucket.value.deref_indirect()) {
            continue;
        }
        let key = bucket.key.clone();
        let exists = match &key {
            Key::Int(k) => dst.exists_int(*k),
            Key::Str(s) => dst.exists_str(s),
        };
        if exists && !overwrite {
            continue;
        }
        let mode = if overwrite { PutMode::UpdateIndirect } else { PutMode::Add };
        if let Ok(effect) = insert::put(dst, key, bucket.value.deref_indirect().clone(), mode) {
            effects.push(effect);
        }
    }
    effects
}

/// Outcome of a symtable/proptable conversion attempt (spec §4.7.14): either
/// the source's key shape already matches and the caller should share it
/// (`Rc::clone`, "just bump `src`'s refcount") rather than copy, or a freshly
/// built table with keys converted.
pub enum Conversion {
    Shared,
    Converted(HashTable),
}

/// symtable → proptable: string-only keys (spec §4.7.14).
pub fn to_proptable(src: &HashTable) -> Result<Conversion, super::ArrayError> {
    let has_int_key = src.iter().any(|b| matches!(b.key, Key::Int(_)));
    if !has_int_key {
        return Ok(Conversion::Shared);
    }
    let mut out = HashTable::new_empty();
    out.flags.remove(ArrayFlags::PACKED);
    out.capacity = src.capacity;
    out.slots = vec![INVALID_INDEX; out.capacity];
    for bucket in src.iter() {
        let key = match &bucket.key {
            Key::Int(i) => Key::Str(ZStringRef::new(ZString::new(i.to_string().as_bytes()))),
            Key::Str(s) => Key::Str(s.clone()),
        };
        insert::put(&mut out, key, bucket.value.deref_indirect().clone(), PutMode::AddNew)?;
    }
    out.internal_pointer = super::iter::forward_from(&out, 0, false);
    Ok(Conversion::Converted(out))
}

/// proptable → symtable: numeric-looking string keys become integers
/// (spec §4.7.14).
pub fn to_symtable(src: &HashTable) -> Result<Conversion, super::ArrayError> {
    let has_numeric_string = src.iter().any(|b| matches!(&b.key, Key::Str(s) if as_canonical_integer_key(s.as_bytes()).is_some()));
    if !has_numeric_string {
        return Ok(Conversion::Shared);
    }
    let mut out = HashTable::new_empty();
    out.flags.remove(ArrayFlags::PACKED);
    out.capacity = src.capacity;
    out.slots = vec![INVALID_INDEX; out.capacity];
    for bucket in src.iter() {
        let key = match &bucket.key {
            Key::Str(s) => match as_canonical_integer_key(s.as_bytes()) {
                Some(i) => Key::Int(i),
                None => Key::Str(s.clone()),
            },
            Key::Int(i) => Key::Int(*i),
        };
        insert::put(&mut out, key, bucket.value.deref_indirect().clone(), PutMode::AddNew)?;
    }
    out.internal_pointer = super::iter::forward_from(&out, 0, false);
    Ok(Conversion::Converted(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueKind;

    fn default_cmp(a: &Value, b: &Value) -> Ordering {
        match (&a.kind, &b.kind) {
            (ValueKind::Int(x), ValueKind::Int(y)) => x.cmp(y),
            _ => Ordering::Equal,
        }
    }

    #[test]
    fn dup_preserves_entries_and_order() {
        let mut ht = HashTable::new_empty();
        insert::put(&mut ht, Key::Int(0), Value::new(ValueKind::Int(1)), PutMode::Add).unwrap();
        insert::put(&mut ht, Key::Int(1), Value::new(ValueKind::Int(2)), PutMode::Add).unwrap();
        let cloned = dup(&ht);
        assert_eq!(cloned.count(), 2);
        let vals: Vec<i64> = cloned.iter().map(|b| match b.value.kind { ValueKind::Int(i) => i, _ => unreachable!() }).collect();
        assert_eq!(vals, vec![1, 2]);
    }

    #[test]
    fn compare_by_count_first() {
        let mut a = HashTable::new_empty();
        let b = HashTable::new_empty();
        insert::put(&mut a, Key::Int(0), Value::new(ValueKind::Int(1)), PutMode::Add).unwrap();
        assert_eq!(compare(&a, &b, default_cmp, true), Ordering::Greater);
    }
}
