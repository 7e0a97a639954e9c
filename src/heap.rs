//! Heap façade (spec §3.7, §4.6 — components F, and the large/huge
//! dispatch of component E). Grounded on `zend_alloc.c`'s `zend_mm_heap`
//! (fields) and `zend_mm_alloc_heap`/`zend_mm_free_heap`/
//! `zend_mm_realloc_heap`/`zend_mm_gc` (behavior).

use crate::bitset;
use crate::chunk::{self, ChunkHeader, Ring};
use crate::chunk_cache::ChunkCache;
use crate::config::Config;
use crate::custom_allocator::CustomAllocator;
use crate::error::{MmError, MmResult};
use crate::huge::HugeList;
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::stats::Stats;
use crate::types::{self, align_up, ceil_pages, PageInfo, CHUNK_MASK, MAX_SMALL_SIZE, PAGE_SHIFT, PAGE_SIZE};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

fn next_heap_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Zero and retain the main chunk, trim the cache, update `avg` (spec
    /// §4.6: "`reset` zeroes and retains the main chunk").
    Reset,
    /// Release every cached chunk and the main chunk (spec: "`full`
    /// additionally releases every cached chunk and the main chunk").
    Full,
}

/// Per-request heap (spec §3.7). One heap serves one execution context;
/// nothing here is `Sync` or `Send` (spec §5: "not synchronized").
pub struct Heap {
    id: u64,
    ring: Ring,
    cache: ChunkCache,
    free_slot: [Option<NonNull<u8>>; NUM_SIZE_CLASSES],
    huge: HugeList,
    pub stats: Stats,
    pub limit: usize,
    overflow_in_progress: bool,
    config: Config,
    custom: Option<Box<dyn CustomAllocator>>,
}

impl Heap {
    pub fn new(limit: usize) -> Heap {
        Heap::with_config(limit, Config::from_env())
    }

    pub fn with_config(limit: usize, config: Config) -> Heap {
        let custom: Option<Box<dyn CustomAllocator>> = if config.use_managed_heap {
            None
        } else {
            Some(Box::new(crate::custom_allocator::SystemAllocator))
        };
        Heap {
            id: next_heap_id(),
            ring: Ring::new(),
            cache: ChunkCache::new(),
            free_slot: [None; NUM_SIZE_CLASSES],
            huge: HugeList::new(),
            stats: Stats::default(),
            limit,
            overflow_in_progress: false,
            config,
            custom,
        }
    }

    #[inline]
    fn heap_addr(&self) -> usize {
        self.id as usize
    }

    fn owns_chunk(&self, chunk: *mut ChunkHeader) -> bool {
        unsafe { (*chunk).heap == self.heap_addr() }
    }

    // -------------------------------------------------------------
    // Façade entry points (spec §4.6, §6)
    // -------------------------------------------------------------

    pub fn alloc(&mut self, size: usize) -> MmResult<NonNull<u8>> {
        if let Some(custom) = &self.custom {
            return custom.alloc(size.max(1)).ok_or(MmError::OutOfMemory { allocated: 0, tried: size, limit: self.limit });
        }
        if size == 0 {
            return self.alloc(1);
        }
        if size <= MAX_SMALL_SIZE {
            self.alloc_small(size_class::size_to_class(size))
        } else if size <= types::CHUNK_SIZE - PAGE_SIZE {
            self.alloc_large(ceil_pages(size))
        } else {
            self.alloc_huge(size)
        }
    }

    /// Spec §7: freeing a pointer this heap does not own is allocator
    /// misuse, surfaced as `MmError::AllocatorMisuse` rather than trusted
    /// blindly — debug builds additionally assert, so misuse is caught
    /// loudly in development while still returning an error in release.
    pub fn free(&mut self, ptr: NonNull<u8>) -> MmResult<()> {
        if let Some(custom) = &self.custom {
            custom.free(ptr);
            return Ok(());
        }
        let addr = ptr.as_ptr() as usize;
        if addr & CHUNK_MASK == 0 {
            return match self.huge.size_of(ptr.as_ptr()) {
                Some(size) => {
                    self.free_huge(ptr, size);
                    Ok(())
                }
                None => {
                    debug_assert!(false, "free(): pointer not owned by this heap's huge list");
                    Err(MmError::AllocatorMisuse { ptr: addr })
                }
            };
        }
        let chunk = unsafe { ChunkHeader::of(ptr.as_ptr()) };
        if !self.owns_chunk(chunk) {
            debug_assert!(false, "free(): pointer not owned by this heap");
            return Err(MmError::AllocatorMisuse { ptr: addr });
        }
        let page = (addr & CHUNK_MASK) >> PAGE_SHIFT;
        let info = unsafe { (*chunk).map[page] };
        if info.is_lrun() {
            self.free_large(chunk, page, info.lrun_pages() as usize);
        } else {
            self.free_small(ptr);
        }
        Ok(())
    }

    pub fn size_of(&self, ptr: NonNull<u8>) -> usize {
        let addr = ptr.as_ptr() as usize;
        if addr & CHUNK_MASK == 0 {
            return self.huge.size_of(ptr.as_ptr()).unwrap_or(0);
        }
        let chunk = unsafe { ChunkHeader::of(ptr.as_ptr()) };
        let page = (addr & CHUNK_MASK) >> PAGE_SHIFT;
        let info = unsafe { (*chunk).map[page] };
        if info.is_lrun() {
            info.lrun_pages() as usize * PAGE_SIZE
        } else {
            let class = self.class_of_small(chunk, page, info);
            size_class::class_size(class)
        }
    }

    /// `realloc_preserving(ptr, new_size, copy_size)` (spec §6): `copy_size`
    /// bounds how much of the old allocation's content actually needs to
    /// survive, letting callers skip copying a soon-to-be-overwritten tail.
    pub fn realloc_preserving(&mut self, ptr: Option<NonNull<u8>>, new_size: usize, copy_size: usize) -> MmResult<NonNull<u8>> {
        let ptr = match ptr {
            None => return self.alloc(new_size),
            Some(p) => p,
        };
        if self.custom.is_some() {
            let new_ptr = self
                .custom
                .as_ref()
                .unwrap()
                .realloc(ptr, new_size.max(1))
                .ok_or(MmError::OutOfMemory { allocated: 0, tried: new_size, limit: self.limit })?;
            return Ok(new_ptr);
        }

        let addr = ptr.as_ptr() as usize;
        if addr & CHUNK_MASK == 0 {
            let old_rounded = self.huge.size_of(ptr.as_ptr()).unwrap_or(0);
            if let Some(p) = self.huge.realloc(ptr.as_ptr(), new_size, &self.config, &mut self.stats) {
                let new_rounded = self.huge.size_of(p.as_ptr()).unwrap_or(old_rounded);
                self.stats.size.update(new_rounded as i64 - old_rounded as i64);
                return Ok(p);
            }
            return self.reallocate_via_copy(ptr, new_size, copy_size);
        }

        let chunk = unsafe { ChunkHeader::of(ptr.as_ptr()) };
        let page = (addr & CHUNK_MASK) >> PAGE_SHIFT;
        let info = unsafe { (*chunk).map[page] };

        if info.is_lrun() {
            let old_pages = info.lrun_pages() as usize;
            let new_pages = ceil_pages(new_size);
            if new_size > MAX_SMALL_SIZE && new_size <= types::CHUNK_SIZE - PAGE_SIZE {
                if new_pages == old_pages {
                    return Ok(ptr);
                }
                if new_pages < old_pages {
                    self.shrink_large_tail(chunk, page, old_pages, new_pages);
                    return Ok(ptr);
                }
                if self.try_grow_large_in_place(chunk, page, old_pages, new_pages) {
                    return Ok(ptr);
                }
            }
            return self.reallocate_via_copy(ptr, new_size, copy_size);
        }

        let class = self.class_of_small(chunk, page, info);
        if new_size <= MAX_SMALL_SIZE && size_class::size_to_class(new_size) == class {
            return Ok(ptr);
        }
        self.reallocate_via_copy(ptr, new_size, copy_size)
    }

    pub fn realloc(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> MmResult<NonNull<u8>> {
        self.realloc_preserving(ptr, new_size, new_size)
    }

    fn reallocate_via_copy(&mut self, old: NonNull<u8>, new_size: usize, copy_size: usize) -> MmResult<NonNull<u8>> {
        let old_size = self.size_of(old);
        let new_ptr = self.alloc(new_size)?;
        let n = old_size.min(new_size).min(copy_size);
        unsafe {
            std::ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), n);
        }
        self.free(old)?;
        Ok(new_ptr)
    }

    /// Overflow-checked `nmemb * size + offset` (spec §6, §7).
    pub fn safe_alloc(&mut self, nmemb: usize, size: usize, offset: usize) -> MmResult<NonNull<u8>> {
        let total = nmemb
            .checked_mul(size)
            .and_then(|v| v.checked_add(offset))
            .ok_or(MmError::IntegerOverflow { nmemb, size, offset })?;
        self.alloc(total)
    }

    pub fn calloc(&mut self, nmemb: usize, size: usize) -> MmResult<NonNull<u8>> {
        let ptr = self.safe_alloc(nmemb, size, 0)?;
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, nmemb * size);
        }
        Ok(ptr)
    }

    pub fn strdup(&mut self, bytes: &[u8]) -> MmResult<NonNull<u8>> {
        self.strndup(bytes, bytes.len())
    }

    pub fn strndup(&mut self, bytes: &[u8], len: usize) -> MmResult<NonNull<u8>> {
        let n = len.min(bytes.len());
        let ptr = self.alloc(n + 1)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), n);
            *ptr.as_ptr().add(n) = 0;
        }
        Ok(ptr)
    }

    // -------------------------------------------------------------
    // Size-specialized fast paths (spec §6: `alloc_class_k`/`free_class_k`).
    // A const generic stands in for the original's 30 hand-unrolled
    // functions: each instantiation still monomorphizes to code that knows
    // its class at compile time, without 30 copy-pasted bodies.
    // -------------------------------------------------------------

    #[inline]
    pub fn alloc_class<const K: usize>(&mut self) -> MmResult<NonNull<u8>> {
        self.alloc_small(K)
    }

    #[inline]
    pub fn free_class<const K: usize>(&mut self, ptr: NonNull<u8>) {
        let _ = K;
        self.free_small(ptr);
    }

    // -------------------------------------------------------------
    // Small allocations (spec §4.5, component D)
    // -------------------------------------------------------------

    fn alloc_small(&mut self, class_id: usize) -> MmResult<NonNull<u8>> {
        if let Some(head) = self.free_slot[class_id] {
            let next = unsafe { *(head.as_ptr() as *const usize) };
            self.free_slot[class_id] = NonNull::new(next as *mut u8);
            self.stats.size.increase(size_class::class_size(class_id) as i64);
            return Ok(head);
        }
        self.alloc_small_slow(class_id)
    }

    fn alloc_small_slow(&mut self, class_id: usize) -> MmResult<NonNull<u8>> {
        let pages = size_class::class_pages_per_run(class_id);
        // Spec §4.6: only the large/huge paths explicitly gate on `limit`;
        // a small-class run almost always carves out of an already-
        // committed chunk, and the rare chunk-minting case still updates
        // `real_size` for the next large/huge check to see.
        let (chunk, start) = self.find_pages_with_gc(pages, false)?;

        unsafe {
            (*chunk).map[start] = PageInfo::srun(class_id as u32);
            for i in 1..pages {
                (*chunk).map[start + i] = PageInfo::nrun(class_id as u32, i as u32);
            }
        }

        let elems = size_class::class_elements_per_run(class_id);
        let cell_size = size_class::class_size(class_id);
        let base = unsafe { (*chunk).page_addr(start) };

        // Thread cells [1..elems) onto the freelist; cell 0 is returned
        // directly (spec §3.4: "the caller gets cell 0 immediately").
        unsafe {
            for i in (1..elems).rev() {
                let cell = base.add(i * cell_size);
                let next_cell = if i + 1 < elems { base.add((i + 1) * cell_size) } else { std::ptr::null_mut() };
                *(cell as *mut usize) = next_cell as usize;
            }
            if elems > 1 {
                self.free_slot[class_id] = NonNull::new(base.add(cell_size));
            }
        }

        self.stats.size.increase(cell_size as i64);
        Ok(unsafe { NonNull::new_unchecked(base) })
    }

    fn free_small(&mut self, ptr: NonNull<u8>) {
        let chunk = unsafe { ChunkHeader::of(ptr.as_ptr()) };
        let page = (ptr.as_ptr() as usize & CHUNK_MASK) >> PAGE_SHIFT;
        let info = unsafe { (*chunk).map[page] };
        let class_id = self.class_of_small(chunk, page, info);
        self.stats.size.decrease(size_class::class_size(class_id) as i64);

        unsafe {
            *(ptr.as_ptr() as *mut usize) = self.free_slot[class_id].map_or(0, |p| p.as_ptr() as usize);
        }
        self.free_slot[class_id] = Some(ptr);
    }

    fn class_of_small(&self, chunk: *mut ChunkHeader, page: usize, info: PageInfo) -> usize {
        if info.is_nrun() {
            let base_page = page - info.nrun_offset() as usize;
            unsafe { (*chunk).map[base_page].srun_bin_num() as usize }
        } else {
            info.srun_bin_num() as usize
        }
    }

    // -------------------------------------------------------------
    // Large allocations (spec §3.5, §4.6)
    // -------------------------------------------------------------

    fn alloc_large(&mut self, pages: usize) -> MmResult<NonNull<u8>> {
        let (chunk, start) = self.find_pages_with_gc(pages, true)?;
        self.stats.size.increase((pages * PAGE_SIZE) as i64);
        Ok(unsafe { NonNull::new_unchecked((*chunk).page_addr(start)) })
    }

    fn free_large(&mut self, chunk: *mut ChunkHeader, page: usize, pages: usize) {
        self.stats.size.decrease((pages * PAGE_SIZE) as i64);
        unsafe {
            chunk::free_pages(&mut self.ring, &mut self.cache, chunk, page, pages, true, &self.config, &mut self.stats);
        }
    }

    fn shrink_large_tail(&mut self, chunk: *mut ChunkHeader, page: usize, old_pages: usize, new_pages: usize) {
        let freed = old_pages - new_pages;
        unsafe {
            bitset::clear_range(&mut (*chunk).free_map, page + new_pages, freed);
            (*chunk).map[page] = PageInfo::lrun(new_pages as u32);
            (*chunk).free_pages += freed as u32;
        }
        self.stats.size.decrease((freed * PAGE_SIZE) as i64);
    }

    fn try_grow_large_in_place(&mut self, chunk: *mut ChunkHeader, page: usize, old_pages: usize, new_pages: usize) -> bool {
        let grow = new_pages - old_pages;
        let fits = unsafe { bitset::is_free_range(&(*chunk).free_map, page + old_pages, grow) };
        if !fits {
            return false;
        }
        unsafe {
            bitset::set_range(&mut (*chunk).free_map, page + old_pages, grow);
            (*chunk).map[page] = PageInfo::lrun(new_pages as u32);
            (*chunk).free_pages -= grow as u32;
            if (*chunk).free_tail as usize == page + old_pages {
                (*chunk).free_tail += grow as u32;
            }
        }
        self.stats.size.increase((grow * PAGE_SIZE) as i64);
        true
    }

    fn find_pages_with_gc(&mut self, pages: usize, gate_on_limit: bool) -> MmResult<(*mut ChunkHeader, usize)> {
        if let Some(hit) = unsafe { chunk::alloc_pages(&mut self.ring, &mut self.cache, self.heap_addr(), pages, &self.config, &mut self.stats) } {
            if gate_on_limit && self.over_limit_after_gc() {
                let (chunk, start) = hit;
                // The run was already committed by `alloc_pages`; give it
                // back rather than leak it now that we're refusing the
                // allocation.
                unsafe {
                    chunk::free_pages(&mut self.ring, &mut self.cache, chunk, start, pages, true, &self.config, &mut self.stats);
                }
                self.overflow_in_progress = true;
                return Err(MmError::OutOfMemory { allocated: self.stats.size.current as usize, tried: pages * PAGE_SIZE, limit: self.limit });
            }
            return Ok(hit);
        }
        self.gc();
        if let Some(hit) = unsafe { chunk::alloc_pages(&mut self.ring, &mut self.cache, self.heap_addr(), pages, &self.config, &mut self.stats) } {
            return Ok(hit);
        }
        Err(MmError::OutOfMemory { allocated: self.stats.size.current as usize, tried: pages * PAGE_SIZE, limit: self.limit })
    }

    /// `true` once real-footprint has genuinely exceeded `limit` even after
    /// a reclaim attempt (spec §4.6: "if `real_size` would exceed `limit`,
    /// call `gc(heap)` and retry; if still over, raise").
    fn over_limit_after_gc(&mut self) -> bool {
        if self.limit == 0 || self.stats.real_size.current as usize <= self.limit {
            return false;
        }
        self.gc();
        self.stats.real_size.current as usize > self.limit
    }

    // -------------------------------------------------------------
    // Huge allocations (spec §3.6)
    // -------------------------------------------------------------

    fn alloc_huge(&mut self, size: usize) -> MmResult<NonNull<u8>> {
        if self.limit > 0 {
            let projected = self.stats.real_size.current as usize + align_up(size, types::CHUNK_SIZE);
            if projected > self.limit {
                self.gc();
                let projected = self.stats.real_size.current as usize + align_up(size, types::CHUNK_SIZE);
                if projected > self.limit {
                    self.overflow_in_progress = true;
                    return Err(MmError::OutOfMemory { allocated: self.stats.size.current as usize, tried: size, limit: self.limit });
                }
            }
        }
        let ptr = self.huge.alloc(size, &self.config, &mut self.stats).ok_or(MmError::OutOfMemory {
            allocated: self.stats.size.current as usize,
            tried: size,
            limit: self.limit,
        })?;
        // Tracked at the rounded block size, matching what `size_of`/`free`
        // later see — `real_size` already reflects the OS-mapped size.
        let rounded = align_up(size, types::CHUNK_SIZE);
        self.stats.size.increase(rounded as i64);
        Ok(ptr)
    }

    fn free_huge(&mut self, ptr: NonNull<u8>, size: usize) {
        self.stats.size.decrease(size as i64);
        self.huge.free(ptr.as_ptr(), &mut self.stats);
    }

    // -------------------------------------------------------------
    // GC: slab compaction (spec §4.6)
    // -------------------------------------------------------------

    /// Walk every size class's freelist, find runs that are entirely free,
    /// and release those runs' pages back to the chunk manager. Returns
    /// bytes reclaimed. Idempotent and safe at any quiescent point.
    pub fn gc(&mut self) -> usize {
        self.stats.gc_runs.record(1);
        let mut reclaimed = 0usize;

        for class_id in 0..NUM_SIZE_CLASSES {
            let elems = size_class::class_elements_per_run(class_id);
            let mut counts: std::collections::HashMap<usize, u32> = std::collections::HashMap::new();

            // Pass 1: count free cells per owning SRUN page.
            let mut cur = self.free_slot[class_id];
            while let Some(cell) = cur {
                let chunk = unsafe { ChunkHeader::of(cell.as_ptr()) };
                let page = (cell.as_ptr() as usize & CHUNK_MASK) >> PAGE_SHIFT;
                let base_page = unsafe {
                    let info = (*chunk).map[page];
                    if info.is_nrun() {
                        page - info.nrun_offset() as usize
                    } else {
                        page
                    }
                };
                *counts.entry((chunk as usize) ^ base_page).or_insert(0) += 1;
                let next = unsafe { *(cell.as_ptr() as *const usize) };
                cur = NonNull::new(next as *mut u8);
            }

            let fully_free: std::collections::HashSet<usize> =
                counts.into_iter().filter(|&(_, n)| n as usize == elems).map(|(k, _)| k).collect();
            if fully_free.is_empty() {
                continue;
            }

            // Pass 2: splice those cells out of the freelist.
            let mut new_head: Option<NonNull<u8>> = None;
            let mut tail: Option<NonNull<u8>> = None;
            let mut cur = self.free_slot[class_id];
            while let Some(cell) = cur {
                let chunk = unsafe { ChunkHeader::of(cell.as_ptr()) };
                let page = (cell.as_ptr() as usize & CHUNK_MASK) >> PAGE_SHIFT;
                let base_page = unsafe {
                    let info = (*chunk).map[page];
                    if info.is_nrun() {
                        page - info.nrun_offset() as usize
                    } else {
                        page
                    }
                };
                let next = unsafe { *(cell.as_ptr() as *const usize) };
                let next_ptr = NonNull::new(next as *mut u8);
                if !fully_free.contains(&((chunk as usize) ^ base_page)) {
                    match tail {
                        None => new_head = Some(cell),
                        Some(t) => unsafe { *(t.as_ptr() as *mut usize) = cell.as_ptr() as usize },
                    }
                    tail = Some(cell);
                }
                cur = next_ptr;
            }
            if let Some(t) = tail {
                unsafe {
                    *(t.as_ptr() as *mut usize) = 0;
                }
            }
            self.free_slot[class_id] = new_head;

            // Pass 3: release the now fully-free runs' pages. Walk a
            // snapshot of chunk pointers first — `free_pages` can detach
            // (and recycle) a chunk once its last run is released, which
            // would otherwise invalidate an in-progress ring walk.
            let pages = size_class::class_pages_per_run(class_id);
            let mut snapshot = Vec::new();
            let start = self.ring.head;
            if !start.is_null() {
                let mut chunk = start;
                loop {
                    snapshot.push(chunk);
                    chunk = unsafe { (*chunk).next };
                    if chunk == start {
                        break;
                    }
                }
            }
            for chunk in snapshot {
                for page in 1..crate::types::PAGES_PER_CHUNK {
                    if !unsafe { (*chunk).map[page] }.is_srun() {
                        continue;
                    }
                    if !fully_free.contains(&((chunk as usize) ^ page)) {
                        continue;
                    }
                    // If this release empties the whole chunk, `free_pages`
                    // detaches it (and may hand it to the OS), so the
                    // pointer must not be touched again afterward.
                    let will_detach = unsafe { (*chunk).free_pages as usize + pages == crate::types::PAGES_PER_CHUNK - 1 };
                    unsafe {
                        chunk::free_pages(&mut self.ring, &mut self.cache, chunk, page, pages, true, &self.config, &mut self.stats);
                    }
                    reclaimed += pages * PAGE_SIZE;
                    if will_detach {
                        break;
                    }
                }
            }
        }

        self.stats.gc_reclaimed.increase(reclaimed as i64);
        reclaimed
    }

    // -------------------------------------------------------------
    // Shutdown (spec §4.6)
    // -------------------------------------------------------------

    pub fn shutdown(&mut self, mode: ShutdownMode) {
        self.huge.destroy_all(&mut self.stats);
        match mode {
            ShutdownMode::Reset => {
                self.cache.clear(&mut self.stats);
                self.free_slot = [None; NUM_SIZE_CLASSES];
            }
            ShutdownMode::Full => {
                self.cache.clear(&mut self.stats);
                let start = self.ring.head;
                if !start.is_null() {
                    let mut chunk = start;
                    loop {
                        let next = unsafe { (*chunk).next };
                        unsafe {
                            chunk::destroy_chunk(chunk, &mut self.stats);
                        }
                        if next == start {
                            break;
                        }
                        chunk = next;
                    }
                }
                self.ring = Ring::new();
                self.free_slot = [None; NUM_SIZE_CLASSES];
            }
        }
    }

    /// Spec §7: OOM / overflow / recursion errors "do not return to the
    /// caller". Logs and aborts — the only noreturn path this crate
    /// exposes, used by callers that must match that contract exactly.
    pub fn fatal(&mut self, err: MmError) -> ! {
        self.overflow_in_progress = true;
        log::error!("{}", err);
        std::process::abort();
    }

    pub fn is_overflowing(&self) -> bool {
        self.overflow_in_progress
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.shutdown(ShutdownMode::Full);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_alloc_free_reuses_cell() {
        let mut heap = Heap::new(0);
        let p = heap.alloc(24).unwrap();
        heap.free(p).unwrap();
        let q = heap.alloc(24).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn size_of_rounds_to_class() {
        let mut heap = Heap::new(0);
        let p = heap.alloc(50).unwrap();
        assert!(heap.size_of(p) >= 50);
        heap.free(p).unwrap();
    }

    #[test]
    fn realloc_preserves_bytes() {
        let mut heap = Heap::new(0);
        let p = heap.alloc(100 * 1024).unwrap();
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0xAB, 100 * 1024);
        }
        let q = heap.realloc(Some(p), 5 * 1024 * 1024).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 100 * 1024) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
        heap.free(q).unwrap();
    }

    #[test]
    fn limit_enforcement_raises_oom() {
        let mut heap = Heap::new(2 * 1024 * 1024);
        let mut ptrs = Vec::new();
        loop {
            match heap.alloc(4096) {
                Ok(p) => ptrs.push(p),
                Err(MmError::OutOfMemory { limit, .. }) => {
                    assert_eq!(limit, 2 * 1024 * 1024);
                    break;
                }
                Err(e) => panic!("unexpected error: {:?}", e),
            }
            if ptrs.len() > 10_000 {
                panic!("limit was never enforced");
            }
        }
    }

    #[test]
    fn safe_alloc_detects_overflow() {
        let mut heap = Heap::new(0);
        let err = heap.safe_alloc(usize::MAX, 2, 0).unwrap_err();
        assert!(matches!(err, MmError::IntegerOverflow { .. }));
    }

    #[test]
    fn gc_does_not_invalidate_live_pointers() {
        let mut heap = Heap::new(0);
        let mut live = Vec::new();
        for _ in 0..64 {
            live.push(heap.alloc(32).unwrap());
        }
        for i in (0..64).step_by(2) {
            heap.free(live[i]).unwrap();
        }
        let sizes_before: Vec<usize> = live.iter().step_by(2).skip(1).map(|&p| heap.size_of(p)).collect();
        heap.gc();
        let sizes_after: Vec<usize> = live.iter().step_by(2).skip(1).map(|&p| heap.size_of(p)).collect();
        assert_eq!(sizes_before, sizes_after);
    }

    proptest::proptest! {
        /// Spec §8 invariant 4: for `p = alloc(n)`, `q = realloc(p, m, k)`,
        /// bytes `0..min(n,m,k)` of `q` equal the original bytes of `p`.
        /// Bounded to the small/large range so a single proptest case
        /// never needs a multi-chunk huge allocation to run quickly.
        #[test]
        fn realloc_preserves_content(n in 1usize..=200_000usize, m in 1usize..=200_000usize, fill in 0u8..=255u8) {
            let mut heap = Heap::new(0);
            let p = heap.alloc(n).unwrap();
            unsafe { std::ptr::write_bytes(p.as_ptr(), fill, n); }
            let k = n.min(m);
            let q = heap.realloc_preserving(Some(p), m, k).unwrap();
            let preserved = unsafe { std::slice::from_raw_parts(q.as_ptr(), n.min(m).min(k)) };
            proptest::prop_assert!(preserved.iter().all(|&b| b == fill));
            heap.free(q).unwrap();
        }

        /// Spec §8 invariant 10: `gc(heap)` never invalidates a live
        /// pointer, and `size_of(p)` is unchanged across a `gc` call for
        /// every pointer that was not freed.
        #[test]
        fn gc_is_lossless(count in 1usize..64usize, free_every in 2usize..5usize) {
            let mut heap = Heap::new(0);
            let mut all = Vec::new();
            for _ in 0..count {
                all.push(heap.alloc(48).unwrap());
            }
            let mut survivors = Vec::new();
            for (i, &p) in all.iter().enumerate() {
                if i % free_every == 0 {
                    heap.free(p).unwrap();
                } else {
                    survivors.push(p);
                }
            }
            let sizes_before: Vec<usize> = survivors.iter().map(|&p| heap.size_of(p)).collect();
            heap.gc();
            let sizes_after: Vec<usize> = survivors.iter().map(|&p| heap.size_of(p)).collect();
            proptest::prop_assert_eq!(sizes_before, sizes_after);
            for p in survivors {
                heap.free(p).unwrap();
            }
        }
    }
}
