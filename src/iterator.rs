//! External iterator registry (spec §3.9, §4.8 — component H).
//!
//! Scoped per execution context, not process-wide, per spec §9's design
//! note ("thread-local in a multi-threaded host"): each OS thread that
//! hosts an interpreter context gets its own registry, matching §5's rule
//! that a heap (and everything reachable from it, including registered
//! iterators) never crosses threads.

use crate::array::HashTable;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub const INVALID_POS: u32 = u32::MAX;
pub type ArrayHandle = Rc<RefCell<HashTable>>;
pub type Handle = u32;

const GROWTH_STEP: usize = 8;

struct Entry {
    array: Weak<RefCell<HashTable>>,
    position: u32,
}

#[derive(Default)]
pub struct IteratorRegistry {
    entries: Vec<Option<Entry>>,
}

thread_local! {
    static REGISTRY: RefCell<IteratorRegistry> = RefCell::new(IteratorRegistry::new());
}

/// Run `f` against this thread's registry.
pub fn with_registry<R>(f: impl FnOnce(&mut IteratorRegistry) -> R) -> R {
    REGISTRY.with(|r| f(&mut r.borrow_mut()))
}

impl IteratorRegistry {
    pub fn new() -> IteratorRegistry {
        IteratorRegistry { entries: Vec::new() }
    }

    /// Find the lowest-indexed free entry, growing by `GROWTH_STEP` if
    /// none exists (spec §4.8: "grows in steps of 8; once grown it does
    /// not shrink within a request" — shrinking only ever trims a
    /// trailing run of nulls back to the prior high-water mark, it never
    /// drops below a size it has grown to and is still using).
    pub fn register(&mut self, ht: &ArrayHandle, pos: u32) -> Handle {
        let idx = match self.entries.iter().position(Option::is_none) {
            Some(i) => i,
            None => {
                let base = self.entries.len();
                self.entries.resize_with(base + GROWTH_STEP, || None);
                base
            }
        };
        self.entries[idx] = Some(Entry { array: Rc::downgrade(ht), position: pos });
        ht.borrow_mut().inc_iterator_count();
        idx as Handle
    }

    pub fn unregister(&mut self, handle: Handle) {
        let idx = handle as usize;
        if idx >= self.entries.len() {
            return;
        }
        if let Some(entry) = self.entries[idx].take() {
            if let Some(ht) = entry.array.upgrade() {
                ht.borrow_mut().dec_iterator_count_unless_saturated();
            }
        }
        // Trim a trailing run of empty slots back to the prior high-water
        // mark, but never below a multiple of GROWTH_STEP still in use.
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
    }

    /// Resolve `handle` against the array the caller currently expects to
    /// be iterating. If a COW fork reassigned the variable to a different
    /// `HashTable` since registration, rebind the handle to the new one at
    /// its current `internal_pointer` (spec §4.8, testable property 9).
    pub fn resolve(&mut self, handle: Handle, expected: &ArrayHandle) -> u32 {
        let idx = handle as usize;
        if idx >= self.entries.len() {
            return INVALID_POS;
        }
        let matches_expected = self.entries[idx]
            .as_ref()
            .and_then(|e| e.array.upgrade())
            .map_or(false, |ht| Rc::ptr_eq(&ht, expected));

        if matches_expected {
            return self.entries[idx].as_ref().unwrap().position;
        }

        if let Some(entry) = self.entries[idx].take() {
            if let Some(old_ht) = entry.array.upgrade() {
                old_ht.borrow_mut().dec_iterator_count_unless_saturated();
            }
        }

        let pos = expected.borrow().internal_pointer();
        self.entries[idx] = Some(Entry { array: Rc::downgrade(expected), position: pos });
        expected.borrow_mut().inc_iterator_count();
        pos
    }

    /// Bulk-rebind every handle pointing at `(ht, from)` to `(ht, to)`.
    /// No-op when `ht` has no registered iterators, per spec.
    pub fn notify_move(&mut self, ht: &ArrayHandle, from: u32, to: u32) {
        if ht.borrow().iterator_count() == 0 {
            return;
        }
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                if entry.position == from {
                    if let Some(owner) = entry.array.upgrade() {
                        if Rc::ptr_eq(&owner, ht) {
                            entry.position = to;
                        }
                    }
                }
            }
        }
    }

    /// Smallest registered position `>= start` for `ht` (used by the
    /// rehash-with-holes compactor, spec §4.7.6).
    pub fn lowest_position(&self, ht: &ArrayHandle, start: u32) -> u32 {
        self.entries
            .iter()
            .flatten()
            .filter(|e| e.position >= start)
            .filter(|e| e.array.upgrade().map_or(false, |owner| Rc::ptr_eq(&owner, ht)))
            .map(|e| e.position)
            .min()
            .unwrap_or(INVALID_POS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::HashTable;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn register_unregister_roundtrip() {
        let ht: ArrayHandle = Rc::new(RefCell::new(HashTable::new_empty()));
        with_registry(|reg| {
            let h = reg.register(&ht, 0);
            assert_eq!(ht.borrow().iterator_count(), 1);
            reg.unregister(h);
            assert_eq!(ht.borrow().iterator_count(), 0);
        });
    }

    #[test]
    fn notify_move_rewrites_matching_entries() {
        let ht: ArrayHandle = Rc::new(RefCell::new(HashTable::new_empty()));
        with_registry(|reg| {
            let h = reg.register(&ht, 2);
            reg.notify_move(&ht, 2, 5);
            assert_eq!(reg.resolve(h, &ht), 5);
            reg.unregister(h);
        });
    }
}
