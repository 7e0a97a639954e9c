//! Sorting (spec §4.7.11).
//!
//! Deviation: the original dispatches to a caller-supplied sort routine
//! through one of three swap functions (swap-with-keys, swap-with-
//! renumber, swap-packed) because C has no generic, in-place stable sort
//! over a custom element type. Rust's slice `sort_by` already is that
//! generic stable sort; there is nothing for a hand-rolled swap function
//! to add here, so `sort` calls it directly and the "swap flavor" is
//! expressed afterward, as the renumber/rehash step.

use super::bucket::{Bucket, Key, INVALID_INDEX};
use super::{resize, ArrayFlags, HashTable};
use std::cmp::Ordering;

pub fn sort(ht: &mut HashTable, cmp: impl Fn(&Bucket, &Bucket) -> Ordering, renumber: bool) {
    resize::rehash(ht); // compact out UNDEF tombstones first.
    ht.buckets.sort_by(cmp);

    if renumber {
        for (i, bucket) in ht.buckets.iter_mut().enumerate() {
            bucket.key = Key::Int(i as i64);
            bucket.set_next(INVALID_INDEX);
        }
        ht.flags |= ArrayFlags::PACKED | ArrayFlags::STATIC_KEYS;
        ht.slots.clear();
        ht.next_free_index = ht.used() as i64;
    } else {
        resize::rehash(ht);
    }

    ht.internal_pointer = super::iter::forward_from(ht, 0, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::insert::{self, PutMode};
    use crate::value::{Value, ValueKind};

    #[test]
    fn sort_by_value_renumbers_packed() {
        let mut ht = HashTable::new_empty();
        insert::put(&mut ht, Key::Int(0), Value::new(ValueKind::Int(3)), PutMode::Add).unwrap();
        insert::put(&mut ht, Key::Int(1), Value::new(ValueKind::Int(1)), PutMode::Add).unwrap();
        insert::put(&mut ht, Key::Int(2), Value::new(ValueKind::Int(2)), PutMode::Add).unwrap();

        sort(
            &mut ht,
            |a, b| match (&a.value.kind, &b.value.kind) {
                (ValueKind::Int(x), ValueKind::Int(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
            true,
        );

        let vals: Vec<i64> = ht.iter().map(|b| match b.value.kind { ValueKind::Int(i) => i, _ => unreachable!() }).collect();
        assert_eq!(vals, vec![1, 2, 3]);
        assert!(ht.is_packed());
    }
}
