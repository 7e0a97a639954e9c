//! Custom allocator override (spec §4.6 "Custom allocator override", §9
//! "Custom allocator hook").
//!
//! `USE_ZEND_ALLOC=0` swaps the managed heap for a trait object wrapping
//! `malloc`/`realloc`/`free` — this exists specifically for memory-checker
//! tooling (ASan, valgrind) that needs every allocation to go through the
//! system allocator it instruments. Modeled as a trait with the three
//! methods spec §9 calls for, plus a debug variant carrying `file:line`;
//! the managed heap itself never implements this trait; it is strictly an
//! alternative to it, selected once at `Heap::new` and never mixed.

use std::ptr::NonNull;

pub trait CustomAllocator {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;
    fn free(&self, ptr: NonNull<u8>);
    fn realloc(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>>;
}

/// Plain libc passthrough — the non-debug half of spec §9's union
/// (`std: { _malloc, _free, _realloc }`).
pub struct SystemAllocator;

impl CustomAllocator for SystemAllocator {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let p = unsafe { libc::malloc(size) } as *mut u8;
        NonNull::new(p)
    }

    fn free(&self, ptr: NonNull<u8>) {
        unsafe { libc::free(ptr.as_ptr() as *mut libc::c_void) }
    }

    fn realloc(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let p = unsafe { libc::realloc(ptr.as_ptr() as *mut libc::c_void, new_size) } as *mut u8;
        NonNull::new(p)
    }
}

/// The debug half of spec §9's union: every call additionally carries the
/// call site, logged on allocation failure so a checker build can point at
/// the offending line instead of just "OOM somewhere".
pub struct DebugSystemAllocator;

impl DebugSystemAllocator {
    pub fn alloc_at(&self, size: usize, file: &'static str, line: u32) -> Option<NonNull<u8>> {
        let result = SystemAllocator.alloc(size);
        if result.is_none() {
            log::warn!("custom allocator: alloc({}) failed at {}:{}", size, file, line);
        }
        result
    }

    pub fn free_at(&self, ptr: NonNull<u8>, file: &'static str, line: u32) {
        let _ = (file, line);
        SystemAllocator.free(ptr);
    }

    pub fn realloc_at(&self, ptr: NonNull<u8>, new_size: usize, file: &'static str, line: u32) -> Option<NonNull<u8>> {
        let result = SystemAllocator.realloc(ptr, new_size);
        if result.is_none() {
            log::warn!("custom allocator: realloc(.., {}) failed at {}:{}", new_size, file, line);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocator_roundtrip() {
        let a = SystemAllocator;
        let p = a.alloc(64).unwrap();
        let p = a.realloc(p, 128).unwrap();
        a.free(p);
    }
}
