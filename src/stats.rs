//! Allocation statistics (spec §3.7, §4.6).
//!
//! The teacher keeps these as `AtomicI64` because a `Stats` block is shared
//! across every thread's `Tld`. Spec §5 rules that out here — one heap
//! serves one execution context and is never touched concurrently — so the
//! counters are plain integers. `StatCount`/`StatCounter` keep the
//! teacher's shape (allocated/freed/peak/current, and total/count) so the
//! update helpers below read the same way the teacher's did.

#[derive(Debug, Default, Clone, Copy)]
pub struct StatCount {
    pub allocated: i64,
    pub freed: i64,
    pub peak: i64,
    pub current: i64,
}

impl StatCount {
    pub fn update(&mut self, amount: i64) {
        if amount == 0 {
            return;
        }
        self.current += amount;
        if self.current > self.peak {
            self.peak = self.current;
        }
        if amount > 0 {
            self.allocated += amount;
        } else {
            self.freed += -amount;
        }
    }

    pub fn increase(&mut self, amount: i64) {
        self.update(amount);
    }

    pub fn decrease(&mut self, amount: i64) {
        self.update(-amount);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StatCounter {
    pub total: i64,
    pub count: i64,
}

impl StatCounter {
    pub fn record(&mut self, amount: i64) {
        self.total += amount;
        self.count += 1;
    }
}

/// Per-heap statistics block. Fields map 1:1 onto spec §3.7's counters plus
/// the OS-provider bookkeeping spec §4.1 implies ("higher layers retry
/// after a GC pass").
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// bytes from the interpreter's point of view (small + large + huge)
    pub size: StatCount,
    /// bytes actually held from the OS (chunks + huge blocks)
    pub real_size: StatCount,
    pub chunks: StatCount,
    pub pages: StatCount,
    pub huge: StatCount,
    pub mmap_calls: StatCounter,
    pub madvise_calls: StatCounter,
    pub gc_runs: StatCounter,
    pub gc_reclaimed: StatCount,
}
