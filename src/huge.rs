//! Huge allocations (spec §3.6, §4.1, §4.6 — part of component E).
//!
//! Allocations larger than `CHUNK_SIZE - PAGE_SIZE` bypass the chunk ring
//! entirely and are served straight from the OS, rounded up to a whole
//! chunk (spec §3.6: "the heap keeps a singly-linked list of huge blocks
//! (`ptr`, `size`, `next`)"). Kept as an ordinary `Vec` here rather than an
//! intrusive list — nothing outside this module ever walks huge blocks by
//! pointer, so there is no reason to hand-roll the link.

use crate::config::Config;
use crate::os;
use crate::stats::Stats;
use crate::types::{align_up, CHUNK_SIZE};
use std::ptr::NonNull;

pub struct HugeBlock {
    pub ptr: NonNull<u8>,
    pub size: usize,
}

#[derive(Default)]
pub struct HugeList {
    blocks: Vec<HugeBlock>,
}

impl HugeList {
    pub fn new() -> HugeList {
        HugeList { blocks: Vec::new() }
    }

    pub fn alloc(&mut self, requested: usize, cfg: &Config, stats: &mut Stats) -> Option<NonNull<u8>> {
        let size = align_up(requested, CHUNK_SIZE);
        let ptr = os::os_alloc_aligned(size, CHUNK_SIZE, cfg, stats)?;
        self.blocks.push(HugeBlock { ptr, size });
        Some(ptr)
    }

    fn index_of(&self, ptr: *mut u8) -> Option<usize> {
        self.blocks.iter().position(|b| b.ptr.as_ptr() == ptr)
    }

    pub fn size_of(&self, ptr: *mut u8) -> Option<usize> {
        self.index_of(ptr).map(|i| self.blocks[i].size)
    }

    pub fn free(&mut self, ptr: *mut u8, stats: &mut Stats) -> bool {
        match self.index_of(ptr) {
            Some(i) => {
                let block = self.blocks.swap_remove(i);
                os::os_free(block.ptr.as_ptr(), block.size, stats);
                true
            }
            None => false,
        }
    }

    /// In-place resize, falling through to allocate-copy-free when the
    /// platform can't truncate/extend the mapping (spec §4.6 realloc
    /// table, huge→huge row).
    pub fn realloc(&mut self, ptr: *mut u8, new_requested: usize, cfg: &Config, stats: &mut Stats) -> Option<NonNull<u8>> {
        let i = self.index_of(ptr)?;
        let old_size = self.blocks[i].size;
        let new_size = align_up(new_requested, CHUNK_SIZE);
        if new_size == old_size {
            return Some(self.blocks[i].ptr);
        }
        if new_size < old_size {
            if os::os_truncate(ptr, old_size, new_size, stats) {
                self.blocks[i].size = new_size;
                return Some(self.blocks[i].ptr);
            }
        } else if os::os_extend(ptr, old_size, new_size, stats) {
            self.blocks[i].size = new_size;
            return Some(self.blocks[i].ptr);
        }
        None
    }

    pub fn destroy_all(&mut self, stats: &mut Stats) {
        for block in self.blocks.drain(..) {
            os::os_free(block.ptr.as_ptr(), block.size, stats);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_rounds_up_to_chunk_multiple() {
        let cfg = Config::default();
        let mut stats = Stats::default();
        let mut list = HugeList::new();
        let p = list.alloc(CHUNK_SIZE + 1, &cfg, &mut stats).unwrap();
        assert_eq!(list.size_of(p.as_ptr()), Some(CHUNK_SIZE * 2));
        list.destroy_all(&mut stats);
    }

    #[test]
    fn free_unknown_pointer_reports_false() {
        let mut list = HugeList::new();
        let mut stats = Stats::default();
        assert!(!list.free(std::ptr::null_mut::<u8>().wrapping_add(8), &mut stats));
    }
}
