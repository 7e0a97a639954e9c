//! Forward/reverse iteration over live entries (spec §4.7.10).

use super::bucket::{Bucket, INVALID_INDEX};
use super::HashTable;

/// Advance `pos` to the next live bucket at or after `pos`, or
/// `INVALID_INDEX` if none remains. `skip_empty_indirect` additionally
/// skips INDIRECT cells whose target is UNDEF (symbol-table view, spec
/// §4.7.8).
pub fn forward_from(ht: &HashTable, pos: u32, skip_empty_indirect: bool) -> u32 {
    let mut p = pos;
    while (p as usize) < ht.used() {
        let bucket = &ht.buckets[p as usize];
        let alive = if skip_empty_indirect { bucket.is_effectively_live() } else { bucket.is_live() };
        if alive {
            return p;
        }
        p += 1;
    }
    INVALID_INDEX
}

pub fn backward_from(ht: &HashTable, pos: u32, skip_empty_indirect: bool) -> u32 {
    if pos == INVALID_INDEX || ht.used() == 0 {
        return INVALID_INDEX;
    }
    let mut p = pos.min(ht.used() as u32 - 1) as i64;
    while p >= 0 {
        let bucket = &ht.buckets[p as usize];
        let alive = if skip_empty_indirect { bucket.is_effectively_live() } else { bucket.is_live() };
        if alive {
            return p as u32;
        }
        p -= 1;
    }
    INVALID_INDEX
}

pub struct Iter<'a> {
    ht: &'a HashTable,
    pos: u32,
    skip_empty_indirect: bool,
}

impl<'a> Iter<'a> {
    pub fn new(ht: &'a HashTable, skip_empty_indirect: bool) -> Iter<'a> {
        Iter { ht, pos: forward_from(ht, 0, skip_empty_indirect), skip_empty_indirect }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Bucket;

    fn next(&mut self) -> Option<&'a Bucket> {
        if self.pos == INVALID_INDEX {
            return None;
        }
        let bucket = &self.ht.buckets[self.pos as usize];
        self.pos = forward_from(self.ht, self.pos + 1, self.skip_empty_indirect);
        Some(bucket)
    }
}

impl HashTable {
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self, false)
    }

    pub fn iter_symtable(&self) -> Iter<'_> {
        Iter::new(self, true)
    }
}
