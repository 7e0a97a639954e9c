//! Startup tunables (spec §6).
//!
//! Mirrors the teacher's `options.rs` split (declared in `lib.rs`, read once
//! during `os_init`): a handful of environment-variable knobs read once and
//! cached on the heap rather than re-read on every allocation.

use std::env;

/// Snapshot of the environment variables this crate consults at startup.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// `USE_ZEND_ALLOC=0` disables the managed heap in favor of the system
    /// allocator.
    pub use_managed_heap: bool,
    /// `USE_ZEND_ALLOC_HUGE_PAGES=1` requests huge-page backed chunks,
    /// best-effort.
    pub use_huge_pages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_managed_heap: true,
            use_huge_pages: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(v) = env::var("USE_ZEND_ALLOC") {
            cfg.use_managed_heap = !(v == "0");
        }
        if let Ok(v) = env::var("USE_ZEND_ALLOC_HUGE_PAGES") {
            cfg.use_huge_pages = v == "1";
        }
        cfg
    }
}
