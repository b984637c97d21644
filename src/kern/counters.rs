//! Event Counters
//!
//! Based on Mach4 kern/counters.h/c by CMU (1987-1991)
//!
//! Named, atomically updated counters for tracking paths through the
//! buffer cache. Unlike the kernel-wide Mach counters these live inside
//! the pool that owns them, so independent pools (and tests running in
//! parallel) never share a count.
//!
//! ## Counter Set
//!
//! - **Window cache**: hits, misses, blocked allocations, purges
//! - **Faults**: total faults, fault-busy pre-population, pager retries
//! - **Memory**: loan-break waits, pmap enter failures

use core::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Counter Type
// ============================================================================

/// Event counter (atomically updated)
#[derive(Debug)]
pub struct EvCounter {
    value: AtomicU64,
    name: &'static str,
}

impl EvCounter {
    /// Create a new counter
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    /// Increment counter by 1
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment counter by n
    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero
    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// Get counter name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Buffer Cache Counters
// ============================================================================

/// Counters kept by a window pool
#[derive(Debug)]
pub struct UbcStats {
    /// Acquire found the binding already in the hash index
    pub wincachehit: EvCounter,
    /// Acquire had to recycle a window
    pub wincachemiss: EvCounter,
    /// Acquire pre-populated and pinned the window's pages
    pub faultbusy: EvCounter,
    /// Faults taken on window addresses
    pub faults: EvCounter,
    /// Pager asked for a fault to be retried
    pub fault_retries: EvCounter,
    /// Loan breaks that had to wait for memory
    pub loanbreak_waits: EvCounter,
    /// Acquires that blocked because no window was free
    pub alloc_waits: EvCounter,
    /// Overwrites and faults that waited for another holder to let go
    pub busy_waits: EvCounter,
    /// Page mappings that could not be entered
    pub pmap_enter_failures: EvCounter,
    /// Windows disassociated by purge
    pub purged: EvCounter,
}

impl UbcStats {
    pub const fn new() -> Self {
        Self {
            wincachehit: EvCounter::new("wincachehit"),
            wincachemiss: EvCounter::new("wincachemiss"),
            faultbusy: EvCounter::new("faultbusy"),
            faults: EvCounter::new("faults"),
            fault_retries: EvCounter::new("fault_retries"),
            loanbreak_waits: EvCounter::new("loanbreak_waits"),
            alloc_waits: EvCounter::new("alloc_waits"),
            busy_waits: EvCounter::new("busy_waits"),
            pmap_enter_failures: EvCounter::new("pmap_enter_failures"),
            purged: EvCounter::new("purged"),
        }
    }

    /// Take a copy of every counter
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            wincachehit: self.wincachehit.get(),
            wincachemiss: self.wincachemiss.get(),
            faultbusy: self.faultbusy.get(),
            faults: self.faults.get(),
            fault_retries: self.fault_retries.get(),
            loanbreak_waits: self.loanbreak_waits.get(),
            alloc_waits: self.alloc_waits.get(),
            busy_waits: self.busy_waits.get(),
            pmap_enter_failures: self.pmap_enter_failures.get(),
            purged: self.purged.get(),
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        for counter in self.all() {
            counter.reset();
        }
    }

    /// All counters, for iteration
    pub fn all(&self) -> [&EvCounter; 10] {
        [
            &self.wincachehit,
            &self.wincachemiss,
            &self.faultbusy,
            &self.faults,
            &self.fault_retries,
            &self.loanbreak_waits,
            &self.alloc_waits,
            &self.busy_waits,
            &self.pmap_enter_failures,
            &self.purged,
        ]
    }
}

impl Default for UbcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub wincachehit: u64,
    pub wincachemiss: u64,
    pub faultbusy: u64,
    pub faults: u64,
    pub fault_retries: u64,
    pub loanbreak_waits: u64,
    pub alloc_waits: u64,
    pub busy_waits: u64,
    pub pmap_enter_failures: u64,
    pub purged: u64,
}
