//! The polymorphic ordered associative array (spec §3.8, §4.7 — component
//! G). Grounded on `examples/original_source/Zend/zend_hash.c` /
//! `zend_hash.h` (PHP's `HashTable`): packed vs. hashed representation,
//! insertion-order iteration via a dense bucket vector, open-addressed
//! collision chains, copy-on-write duplication, and the numeric-string key
//! coercion rule.
//!
//! Deviation from spec §3.8's physical layout: the original packs a
//! negative-indexed slot table and the bucket array into one allocation so
//! that `slots` sits immediately before `buckets` in memory. Here `slots`
//! and `buckets` are two ordinary `Vec`s. Nothing outside this module reads
//! a `HashTable`'s raw bytes (spec §9: "the bit-for-bit layout is not
//! required by anything outside the allocator"), and the single-allocation
//! trick exists purely to save one pointer chase per access in C — a
//! concern a `Vec`-backed design does not share. See DESIGN.md.

mod bucket;
mod convert;
pub mod handle;
mod insert;
mod iter;
mod resize;
mod sort;

pub use bucket::{Bucket, Key, INVALID_INDEX};
pub use insert::{DeleteEffect, PutEffect, PutMode};
pub use resize::RehashEffect;

use bitflags::bitflags;
use std::convert::TryFrom;
use thiserror::Error;
use crate::value::Value;

bitflags! {
    #[derive(Default)]
    pub struct ArrayFlags: u16 {
        const PACKED            = 0b0000_0001;
        const INITIALIZED       = 0b0000_0010;
        const STATIC_KEYS       = 0b0000_0100;
        const HAS_EMPTY_INDIRECT = 0b0000_1000;
        const PERSISTENT        = 0b0001_0000;
        const APPLY_PROTECTION  = 0b0010_0000;
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArrayError {
    #[error("key already exists")]
    AlreadyExists,
    #[error("array capacity overflow")]
    CapacityOverflow,
    #[error("recursive structure too deep (limit {limit})")]
    RecursionTooDeep { limit: u8 },
}

pub type ArrayResult<T> = Result<T, ArrayError>;

/// Minimum (and default starting) capacity for a hashed table (spec
/// §4.7.1).
pub const MIN_CAPACITY: usize = 8;
/// Ceiling on capacity growth (spec §4.7.4's "else raise overflow").
pub const MAX_CAPACITY: usize = 1 << 28;
/// Array recursion guard depth (spec §5: "3 nests over the protection
/// bitfield's width").
pub const RECURSION_LIMIT: u8 = 3;

pub struct HashTable {
    pub buckets: Vec<Bucket>,
    /// Open-addressing slot table; empty while `packed` (spec: "a packed
    /// array ... no slot region is consulted").
    pub slots: Vec<u32>,
    pub count: usize,
    pub capacity: usize,
    pub next_free_index: i64,
    pub internal_pointer: u32,
    pub next_iterator_count: u8,
    pub flags: ArrayFlags,
    pub recursion_depth: u8,
}

impl HashTable {
    pub fn new_empty() -> HashTable {
        HashTable {
            buckets: Vec::new(),
            slots: Vec::new(),
            count: 0,
            capacity: MIN_CAPACITY,
            next_free_index: 0,
            internal_pointer: INVALID_INDEX,
            next_iterator_count: 0,
            flags: ArrayFlags::PACKED | ArrayFlags::STATIC_KEYS,
            recursion_depth: 0,
        }
    }

    pub fn init(capacity: usize, persistent: bool) -> HashTable {
        let mut ht = HashTable::new_empty();
        ht.capacity = capacity.next_power_of_two().max(MIN_CAPACITY);
        if persistent {
            ht.flags |= ArrayFlags::PERSISTENT;
        }
        ht
    }

    pub fn init_packed(capacity: usize, persistent: bool) -> HashTable {
        HashTable::init(capacity, persistent)
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.flags.contains(ArrayFlags::PACKED)
    }

    #[inline]
    pub fn internal_pointer(&self) -> u32 {
        self.internal_pointer
    }

    #[inline]
    pub fn iterator_count(&self) -> u8 {
        self.next_iterator_count
    }

    pub fn inc_iterator_count(&mut self) {
        if self.next_iterator_count < 255 {
            self.next_iterator_count += 1;
        }
    }

    pub fn dec_iterator_count_unless_saturated(&mut self) {
        if self.next_iterator_count > 0 && self.next_iterator_count < 255 {
            self.next_iterator_count -= 1;
        }
    }

    fn ensure_initialized(&mut self) {
        self.flags |= ArrayFlags::INITIALIZED;
        if !self.is_packed() && self.slots.is_empty() {
            self.slots = vec![INVALID_INDEX; self.capacity];
        }
    }

    #[inline]
    fn slot_for(&self, hash: u64) -> usize {
        (hash as usize) & (self.capacity - 1)
    }

    /// Lookup by integer key (spec §4.7.2).
    pub fn find_int(&self, k: i64) -> Option<&Bucket> {
        if self.is_packed() {
            let idx = usize::try_from(k).ok()?;
            return self.buckets.get(idx).filter(|b| b.is_effectively_live());
        }
        self.walk_chain(k as u64, &Key::Int(k))
    }

    pub fn find_str(&self, s: &crate::zstring::ZStringRef) -> Option<&Bucket> {
        if self.is_packed() {
            return None;
        }
        self.walk_chain(s.hash(), &Key::Str(s.clone()))
    }

    fn walk_chain(&self, hash: u64, key: &Key) -> Option<&Bucket> {
        if self.slots.is_empty() {
            return None;
        }
        let mut idx = self.slots[self.slot_for(hash)];
        while idx != INVALID_INDEX {
            let bucket = &self.buckets[idx as usize];
            if bucket.key.chain_hash() == hash && bucket.key.matches(key) {
                return if bucket.is_effectively_live() { Some(bucket) } else { None };
            }
            idx = bucket.next();
        }
        None
    }

    pub fn exists_int(&self, k: i64) -> bool {
        self.find_int(k).is_some()
    }

    pub fn exists_str(&self, s: &crate::zstring::ZStringRef) -> bool {
        self.find_str(s).is_some()
    }

    /// Observed count: live entries minus empty indirects (spec §4.7.8,
    /// testable property 11). `count` itself already excludes UNDEF
    /// tombstones but not empty-indirect entries, which remain "live"
    /// buckets until compaction.
    pub fn observed_count(&self) -> usize {
        if !self.flags.contains(ArrayFlags::HAS_EMPTY_INDIRECT) {
            return self.count;
        }
        self.buckets.iter().filter(|b| b.is_effectively_live()).count()
    }

    /// Spec §6 Array API surface: `insert(key, value, mode)`.
    pub fn put(&mut self, key: Key, value: Value, mode: PutMode) -> ArrayResult<PutEffect> {
        insert::put(self, key, value, mode)
    }

    /// Spec §6 Array API surface: `delete(key)`.
    pub fn delete(&mut self, key: &Key) -> Option<DeleteEffect> {
        insert::delete(self, key)
    }

    pub fn delete_int(&mut self, k: i64) -> Option<DeleteEffect> {
        self.delete(&Key::Int(k))
    }

    /// Index of the live bucket holding `key`, if any — the shared lookup
    /// primitive behind both `find_*` and `delete` (spec §4.7.2, §4.7.7).
    pub fn index_of(&self, key: &Key) -> Option<usize> {
        match key {
            Key::Int(k) => {
                if self.is_packed() {
                    let idx = usize::try_from(*k).ok()?;
                    return if idx < self.used() && self.buckets[idx].is_effectively_live() { Some(idx) } else { None };
                }
                self.index_of_chain(*k as u64, key)
            }
            Key::Str(s) => {
                if self.is_packed() {
                    return None;
                }
                self.index_of_chain(s.hash(), key)
            }
        }
    }

    fn index_of_chain(&self, hash: u64, key: &Key) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mut idx = self.slots[self.slot_for(hash)];
        while idx != INVALID_INDEX {
            let bucket = &self.buckets[idx as usize];
            if bucket.key.chain_hash() == hash && bucket.key.matches(key) {
                return if bucket.is_effectively_live() { Some(idx as usize) } else { None };
            }
            idx = bucket.next();
        }
        None
    }

    pub fn push_recursion_guard(&mut self) -> ArrayResult<()> {
        if self.recursion_depth >= RECURSION_LIMIT {
            return Err(ArrayError::RecursionTooDeep { limit: RECURSION_LIMIT });
        }
        self.recursion_depth += 1;
        Ok(())
    }

    pub fn pop_recursion_guard(&mut self) {
        self.recursion_depth = self.recursion_depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueKind};

    #[test]
    fn new_empty_is_packed_and_empty() {
        let ht = HashTable::new_empty();
        assert!(ht.is_packed());
        assert_eq!(ht.count(), 0);
        assert!(ht.is_empty());
    }

    #[test]
    fn observed_count_matches_count_without_indirects() {
        let mut ht = HashTable::new_empty();
        ht.buckets.push(Bucket::new(Key::Int(0), Value::new(ValueKind::Int(1))));
        ht.count = 1;
        assert_eq!(ht.observed_count(), 1);
    }

    #[test]
    fn indirect_accounting_matches_live_targets() {
        let mut target_a = Value::new(ValueKind::Int(1));
        let mut target_b = Value::new(ValueKind::Undef);
        let mut ht = HashTable::new_empty();
        ht.put(Key::Int(0), Value::new(ValueKind::Indirect(&mut target_a as *mut Value)), PutMode::Add).unwrap();
        ht.put(Key::Int(1), Value::new(ValueKind::Indirect(&mut target_b as *mut Value)), PutMode::Add).unwrap();
        ht.put(Key::Int(2), Value::new(ValueKind::Int(9)), PutMode::Add).unwrap();
        ht.flags |= ArrayFlags::HAS_EMPTY_INDIRECT;
        // Spec §8 invariant 11: count() == live indirect targets + live
        // direct entries — here one live indirect, one UNDEF indirect
        // (excluded), one direct.
        assert_eq!(ht.observed_count(), 2);
    }

    proptest::proptest! {
        /// Spec §8 invariant 5: without intermediate deletes, forward
        /// iteration yields entries in insertion order.
        #[test]
        fn insertion_order_is_preserved(keys in proptest::collection::vec(0i64..500, 0..60)) {
            let mut ht = HashTable::new_empty();
            let mut expected = Vec::new();
            for k in keys {
                if ht.exists_int(k) {
                    continue;
                }
                ht.put(Key::Int(k), Value::new(ValueKind::Int(k)), PutMode::Add).unwrap();
                expected.push(k);
            }
            let order: Vec<i64> = ht.iter().map(|b| match b.key { Key::Int(i) => i, _ => unreachable!() }).collect();
            proptest::prop_assert_eq!(order, expected);
        }

        /// Spec §8 invariant 6: `insert("<decimal i>", v)` then `find(i)`
        /// returns `v`, and `insert(i, v)` then `find("<decimal i>")`
        /// returns `v` — both directions go through `Key::new_str`, the
        /// one place the decimal-string-to-integer coercion happens.
        #[test]
        fn numeric_key_normalization(i in -2_000_000_000i64..2_000_000_000i64) {
            let digits = i.to_string();

            let mut via_string = HashTable::new_empty();
            via_string.put(Key::new_str(digits.as_bytes()), Value::new(ValueKind::Int(1)), PutMode::Add).unwrap();
            proptest::prop_assert!(via_string.find_int(i).is_some());

            let mut via_int = HashTable::new_empty();
            via_int.put(Key::Int(i), Value::new(ValueKind::Int(2)), PutMode::Add).unwrap();
            proptest::prop_assert!(via_int.index_of(&Key::new_str(digits.as_bytes())).is_some());
        }

        /// Spec §8 invariant 8: after inserting a sequence of key/value
        /// pairs (possibly triggering resizes along the way), every key
        /// still maps to its last-written value.
        #[test]
        fn resize_preserves_mapping(pairs in proptest::collection::vec((0i64..2000, 0i64..1000), 1..200)) {
            let mut ht = HashTable::new_empty();
            let mut expected = std::collections::HashMap::new();
            for (k, v) in pairs {
                let mode = if ht.exists_int(k) { PutMode::Update } else { PutMode::Add };
                ht.put(Key::Int(k), Value::new(ValueKind::Int(v)), mode).unwrap();
                expected.insert(k, v);
            }
            for (k, v) in expected {
                let found = ht.find_int(k).expect("every inserted key must still be found");
                match found.value.kind {
                    ValueKind::Int(got) => proptest::prop_assert_eq!(got, v),
                    _ => proptest::prop_assert!(false, "expected an int value"),
                }
            }
        }
    }
}
