//! Chunk manager (spec §3.3, §4.3, §4.4 — component C).
//!
//! A chunk is a 2 MiB, 2 MiB-aligned region split into 512 4 KiB pages.
//! Page 0 holds the `ChunkHeader`; interior pointers recover it in O(1) via
//! `ptr & !(CHUNK_SIZE - 1)` (spec §3.3 invariant, verified by the
//! "chunk ownership" property in spec §8).
//!
//! Deviation from spec §3.3's last sentence ("the main chunk additionally
//! has the heap structure embedded inside its first page"): here `Heap` is
//! an ordinary heap-allocated Rust value, not embedded in chunk memory. See
//! DESIGN.md — the embedding is a C-era trick to avoid one extra
//! allocation at process start and has no effect on any of spec §8's
//! testable properties, none of which reference where `Heap` itself
//! lives.

use crate::bitset;
use crate::config::Config;
use crate::os;
use crate::stats::Stats;
use crate::types::{PageInfo, CHUNK_MASK, CHUNK_SIZE, PAGES_PER_CHUNK, PAGE_SIZE};
use std::ptr;

pub const FREE_MAP_WORDS: usize = PAGES_PER_CHUNK / 64;

#[repr(C)]
pub struct ChunkHeader {
    /// Back-pointer to the owning heap, stored as a raw address: the heap
    /// itself is not `'static` and chunk headers must stay `repr(C)` plain
    /// old data so they can be written into raw mmap'd memory.
    pub heap: usize,
    pub prev: *mut ChunkHeader,
    pub next: *mut ChunkHeader,
    pub free_pages: u32,
    pub free_tail: u32,
    pub num: u32,
    pub free_map: [u64; FREE_MAP_WORDS],
    pub map: [PageInfo; PAGES_PER_CHUNK],
}

impl ChunkHeader {
    /// Recover the chunk header owning `p` in O(1) (spec §3.3).
    #[inline]
    pub unsafe fn of(p: *const u8) -> *mut ChunkHeader {
        ((p as usize) & !CHUNK_MASK) as *mut ChunkHeader
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        (self as *const ChunkHeader as usize) as *mut u8
    }

    #[inline]
    pub fn page_addr(&self, page: usize) -> *mut u8 {
        (self.base() as usize + page * PAGE_SIZE) as *mut u8
    }
}

/// Allocate and initialize a fresh chunk from the OS (spec §4.3: "A newly
/// allocated chunk has page 0 marked as LRUN(1), free_pages = 511,
/// free_tail = 1, free_map with bit 0 set").
pub fn new_chunk(heap_addr: usize, num: u32, cfg: &Config, stats: &mut Stats) -> Option<*mut ChunkHeader> {
    let region = os::os_alloc_aligned(CHUNK_SIZE, CHUNK_SIZE, cfg, stats)?;
    let hdr_ptr = region.as_ptr() as *mut ChunkHeader;
    unsafe {
        ptr::write(
            hdr_ptr,
            ChunkHeader {
                heap: heap_addr,
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                free_pages: (PAGES_PER_CHUNK - 1) as u32,
                free_tail: 1,
                num,
                free_map: [0u64; FREE_MAP_WORDS],
                map: [PageInfo::FREE; PAGES_PER_CHUNK],
            },
        );
        bitset::set_bit(&mut (*hdr_ptr).free_map, 0);
        (*hdr_ptr).map[0] = PageInfo::lrun(1);
    }
    stats.chunks.increase(1);
    Some(hdr_ptr)
}

pub fn destroy_chunk(chunk: *mut ChunkHeader, stats: &mut Stats) {
    os::os_free(chunk as *mut u8, CHUNK_SIZE, stats);
    stats.chunks.decrease(1);
}

/// Splice `chunk` in after `after` in the ring (or make it the sole
/// member if `after` is null).
pub unsafe fn ring_insert_after(after: *mut ChunkHeader, chunk: *mut ChunkHeader) {
    if after.is_null() {
        (*chunk).prev = chunk;
        (*chunk).next = chunk;
        return;
    }
    let next = (*after).next;
    (*chunk).prev = after;
    (*chunk).next = next;
    (*after).next = chunk;
    (*next).prev = chunk;
}

pub unsafe fn ring_remove(chunk: *mut ChunkHeader) {
    let prev = (*chunk).prev;
    let next = (*chunk).next;
    if prev != chunk {
        (*prev).next = next;
        (*next).prev = prev;
    }
    (*chunk).prev = ptr::null_mut();
    (*chunk).next = ptr::null_mut();
}

/// Move `chunk` to immediately follow `head` (ring-head splice used by
/// `alloc_pages` for small, far-from-head allocations, spec §4.3).
pub unsafe fn ring_move_to_front(head: *mut ChunkHeader, chunk: *mut ChunkHeader) {
    if head == chunk {
        return;
    }
    ring_remove(chunk);
    ring_insert_after(head, chunk);
}

/// Find the best (smallest) run of `>= n` contiguous free pages within one
/// chunk (spec §4.3's per-chunk best-fit scan), starting the scan at page
/// 1 (page 0 is always the LRUN(1) header page).
unsafe fn find_best_gap(chunk: *mut ChunkHeader, n: usize) -> Option<(usize, usize)> {
    let free_map = &(*chunk).free_map;
    let mut best: Option<(usize, usize)> = None;
    let mut page = 1usize;
    while page < PAGES_PER_CHUNK {
        if bitset::test_bit(free_map, page) {
            page += 1;
            continue;
        }
        let start = page;
        while page < PAGES_PER_CHUNK && !bitset::test_bit(free_map, page) {
            page += 1;
        }
        let len = page - start;
        if len >= n {
            match best {
                None => best = Some((start, len)),
                Some((_, blen)) if len < blen => best = Some((start, len)),
                _ => {}
            }
            // spec's free_tail hint: the tail gap is the only one that can
            // reach 511, so an exact-size tail gap is never beaten by a
            // smaller interior gap of the same length; nothing further to
            // special-case beyond the linear scan here.
            if len == n {
                break;
            }
        }
    }
    best
}

pub struct Ring {
    pub head: *mut ChunkHeader,
    pub len: usize,
    pub next_serial: u32,
}

impl Ring {
    pub fn new() -> Ring {
        Ring { head: ptr::null_mut(), len: 0, next_serial: 0 }
    }
}

/// Find `n` contiguous free pages somewhere in the ring, installing a
/// fresh chunk (from cache or the OS) if none has room (spec §4.3).
///
/// `hops` tracks ring distance from `ring.head`; a small (`< 8` page)
/// allocation satisfied more than two hops in moves its chunk to the ring
/// head to reduce future search cost, per spec.
pub unsafe fn alloc_pages(
    ring: &mut Ring,
    cache: &mut super::chunk_cache::ChunkCache,
    heap_addr: usize,
    n: usize,
    cfg: &Config,
    stats: &mut Stats,
) -> Option<(*mut ChunkHeader, usize)> {
    if !ring.head.is_null() {
        let mut chunk = ring.head;
        let mut hops = 0usize;
        loop {
            if (*chunk).free_pages as usize >= n {
                if let Some((start, _len)) = find_best_gap(chunk, n) {
                    commit_pages(chunk, start, n);
                    if n < 8 && hops > 2 {
                        ring_move_to_front(ring.head, chunk);
                        ring.head = chunk;
                    }
                    return Some((chunk, start));
                }
            }
            chunk = (*chunk).next;
            hops += 1;
            if chunk == ring.head {
                break;
            }
        }
    }

    // No room anywhere in the ring: pull from the cache, or mint fresh.
    let fresh = cache.pop().or_else(|| {
        let c = new_chunk(heap_addr, ring.next_serial, cfg, stats)?;
        ring.next_serial += 1;
        Some(c)
    })?;
    (*fresh).heap = heap_addr;
    (*fresh).num = ring.next_serial.max((*fresh).num);
    if ring.head.is_null() {
        ring_insert_after(ptr::null_mut(), fresh);
        ring.head = fresh;
    } else {
        ring_insert_after((*ring.head).prev, fresh);
    }
    ring.len += 1;

    if (*fresh).free_pages as usize >= n {
        if let Some((start, _len)) = find_best_gap(fresh, n) {
            commit_pages(fresh, start, n);
            return Some((fresh, start));
        }
    }
    None
}

unsafe fn commit_pages(chunk: *mut ChunkHeader, start: usize, n: usize) {
    bitset::set_range(&mut (*chunk).free_map, start, n);
    (*chunk).map[start] = PageInfo::lrun(n as u32);
    (*chunk).free_pages -= n as u32;
    if start == (*chunk).free_tail as usize {
        (*chunk).free_tail += n as u32;
    }
}

/// Release `n` pages starting at `p` back to `chunk`'s free map (spec
/// §4.3). Entries `map[p+1..p+n)` are left untouched — they are
/// don't-cares for a live or freed LRUN.
pub unsafe fn free_pages(ring: &mut Ring, cache: &mut super::chunk_cache::ChunkCache, chunk: *mut ChunkHeader, p: usize, n: usize, may_release_chunk: bool, cfg: &Config, stats: &mut Stats) {
    bitset::clear_range(&mut (*chunk).free_map, p, n);
    (*chunk).map[p] = PageInfo::FREE;
    (*chunk).free_pages += n as u32;
    if (*chunk).free_tail as usize == p + n {
        (*chunk).free_tail = p as u32;
    }

    if (*chunk).free_pages as usize == PAGES_PER_CHUNK - 1 && may_release_chunk {
        detach_chunk(ring, cache, chunk, cfg, stats);
    }
}

/// Detach a fully-free chunk from the ring, retaining it in the cache or
/// releasing it to the OS per the policy in spec §4.4.
pub unsafe fn detach_chunk(ring: &mut Ring, cache: &mut super::chunk_cache::ChunkCache, chunk: *mut ChunkHeader, cfg: &Config, stats: &mut Stats) {
    if chunk == ring.head {
        let next = (*chunk).next;
        ring.head = if next == chunk { ptr::null_mut() } else { next };
    }
    ring_remove(chunk);
    ring.len -= 1;
    cache.retain_or_release(chunk, ring.len, cfg, stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_cache::ChunkCache;

    #[test]
    fn alloc_pages_finds_best_fit_gap() {
        let cfg = Config::default();
        let mut stats = Stats::default();
        let mut ring = Ring::new();
        let mut cache = ChunkCache::new();
        unsafe {
            let (chunk, start) = alloc_pages(&mut ring, &mut cache, 0, 3, &cfg, &mut stats).unwrap();
            assert_eq!(start, 1);
            assert_eq!((*chunk).free_pages as usize, PAGES_PER_CHUNK - 1 - 3);

            let (chunk2, start2) = alloc_pages(&mut ring, &mut cache, 0, 2, &cfg, &mut stats).unwrap();
            assert_eq!(chunk2, chunk);
            assert_eq!(start2, 4);

            free_pages(&mut ring, &mut cache, chunk, 1, 3, false, &cfg, &mut stats);
            assert!(bitset::is_free_range(&(*chunk).free_map, 1, 3));

            destroy_chunk(chunk, &mut stats);
        }
    }
}
