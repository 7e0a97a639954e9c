//! Chunk LRU cache (spec §4.4 — part of component C).
//!
//! Fully-free chunks detached from the ring are not always handed straight
//! back to the OS: a short LIFO cache absorbs alloc/free churn at chunk
//! granularity. Retention follows spec §4.4's literal two-clause rule over
//! `avg`, the exponentially-smoothed "peak chunks per request", damped
//! against oscillation by remembering the boundary and count of the last
//! deletion round.

use crate::chunk::{self, ChunkHeader};
use crate::config::Config;
use crate::stats::Stats;
use std::ptr;

/// Cached chunks are kept in a simple intrusive LIFO stack, threaded
/// through the same `prev`/`next` fields the ring otherwise uses (a cached
/// chunk is never in the ring at the same time).
pub struct ChunkCache {
    top: *mut ChunkHeader,
    count: usize,
    avg: f64,
    last_chunks_delete_boundary: usize,
    last_chunks_delete_count: usize,
    /// High-water mark of `live_count` since the last shutdown, folded
    /// into `avg` at shutdown (spec §4.4: "`avg` is updated to `(avg +
    /// peak_chunks_count) / 2`").
    peak_chunks_count: usize,
}

impl ChunkCache {
    pub fn new() -> ChunkCache {
        ChunkCache {
            top: ptr::null_mut(),
            count: 0,
            avg: 0.0,
            last_chunks_delete_boundary: 0,
            last_chunks_delete_count: 0,
            peak_chunks_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Pop a cached chunk for reuse, if any.
    pub fn pop(&mut self) -> Option<*mut ChunkHeader> {
        if self.top.is_null() {
            return None;
        }
        let chunk = self.top;
        unsafe {
            self.top = (*chunk).next;
        }
        self.count -= 1;
        Some(chunk)
    }

    fn push(&mut self, chunk: *mut ChunkHeader) {
        unsafe {
            (*chunk).next = self.top;
            (*chunk).prev = ptr::null_mut();
        }
        self.top = chunk;
        self.count += 1;
    }

    /// Called when a chunk has just become fully free and been removed
    /// from the ring. `live_count` is the ring length *after* removal: the
    /// retention decision is based on how many chunks the heap still needs
    /// for its current working set, not on the cache's own size.
    ///
    /// Spec §4.4: retain iff `live_count + cached_count < avg + 0.1`, or
    /// `live_count == last_chunks_delete_boundary` and
    /// `last_chunks_delete_count >= 4`. Otherwise release to the OS —
    /// preferring to release a *different* chunk than the one just
    /// detached if the detached chunk's `num` is smaller than the cache
    /// head's, so small-`num` chunks (closer to the main chunk) stay hot.
    pub unsafe fn retain_or_release(&mut self, chunk: *mut ChunkHeader, live_count: usize, cfg: &Config, stats: &mut Stats) {
        let _ = cfg;
        self.peak_chunks_count = self.peak_chunks_count.max(live_count);

        let cached_count = self.count;
        let below_average = (live_count + cached_count) as f64 < self.avg + 0.1;
        let at_damped_boundary = self.last_chunks_delete_count >= 4 && live_count == self.last_chunks_delete_boundary;

        if below_average || at_damped_boundary {
            self.push(chunk);
            return;
        }

        let to_release = if !self.top.is_null() && (*chunk).num < (*self.top).num {
            let head = self.pop().expect("top was non-null");
            self.push(chunk);
            head
        } else {
            chunk
        };

        chunk::destroy_chunk(to_release, stats);
        self.last_chunks_delete_boundary = live_count;
        self.last_chunks_delete_count += 1;
    }

    /// Request shutdown (spec §4.4): fold `peak_chunks_count` into `avg`,
    /// then trim the cache so `cached_count + 0.9 <= avg`.
    pub fn clear(&mut self, stats: &mut Stats) {
        self.avg = (self.avg + self.peak_chunks_count as f64) / 2.0;
        self.peak_chunks_count = 0;

        while (self.count as f64) + 0.9 > self.avg {
            match self.pop() {
                Some(chunk) => chunk::destroy_chunk(chunk, stats),
                None => break,
            }
        }

        self.last_chunks_delete_boundary = 0;
        self.last_chunks_delete_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::new_chunk;

    /// With `avg` still at its initial 0.0, the below-average clause never
    /// fires; repeated detaches at the same `live_count` release every time
    /// until the damped-boundary clause kicks in on the fifth.
    #[test]
    fn damped_boundary_retains_after_four_releases_at_same_live_count() {
        let cfg = Config::default();
        let mut stats = Stats::default();
        let mut cache = ChunkCache::new();

        unsafe {
            for _ in 0..4 {
                let c = new_chunk(0, 0, &cfg, &mut stats).unwrap();
                cache.retain_or_release(c, 3, &cfg, &mut stats);
                assert_eq!(cache.len(), 0);
            }
            let c = new_chunk(0, 0, &cfg, &mut stats).unwrap();
            cache.retain_or_release(c, 3, &cfg, &mut stats);
            assert_eq!(cache.len(), 1);
        }
    }

    /// Shutdown folds the session's peak live count into `avg` via
    /// `(avg + peak_chunks_count) / 2`, then trims until
    /// `cached_count + 0.9 <= avg`.
    #[test]
    fn clear_folds_peak_into_average_and_trims() {
        let cfg = Config::default();
        let mut stats = Stats::default();
        let mut cache = ChunkCache::new();
        unsafe {
            let c = new_chunk(0, 0, &cfg, &mut stats).unwrap();
            cache.push(c);
        }
        cache.peak_chunks_count = 4;

        cache.clear(&mut stats);

        assert_eq!(cache.avg, 2.0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peak_chunks_count, 0);
    }
}
