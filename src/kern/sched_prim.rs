//! Scheduling Primitives - Wait/Wakeup and Event Management
//!
//! Based on Mach4 kern/sched_prim.h/c
//! Provides the blocking points used by the buffer cache.
//!
//! ## Protocol
//!
//! A waiter samples the event with `assert_wait()` while it still holds
//! the lock protecting the condition it is about to sleep on, drops that
//! lock, and then calls `thread_block()`. Any `thread_wakeup()` posted
//! after the sample releases the waiter, so a wakeup that races with the
//! unlock is never lost.
//!
//! None of these waits are cancellable and none time out: forward progress
//! comes from other threads eventually posting the event.
//!
//! ## Blocking
//!
//! Without a scheduler to hand the processor to, a blocked thread spins
//! (yielding to the host under the `std` feature). A kernel embedding the
//! cache installs a `BlockHook` once at startup with `set_block_hook()`;
//! from then on blocked threads sleep in the hook and `thread_wakeup()`
//! makes them runnable again.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Once;

// ============================================================================
// Wait Reason
// ============================================================================

/// Wait reason (for debugging/statistics)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WaitReason {
    /// No reason
    None = 0,
    /// Waiting for a window to be released
    WindowFree = 1,
    /// Waiting for a busy page to be released
    PageBusy = 2,
    /// Waiting for free memory
    Memory = 3,
    /// Pausing before retrying a pager request
    PagerRetry = 4,
    /// Waiting for other holders of a window to let go
    WindowBusy = 5,
}

// ============================================================================
// Block Hook
// ============================================================================

/// Scheduler interface used to sleep instead of spin
///
/// Events are identified by address. `block` follows futex rules: it must
/// return at once if `generation` no longer holds `token`, and a `wake`
/// for the same event issued after that check must not be lost. Spurious
/// returns are allowed.
pub trait BlockHook: Sync {
    /// Sleep the current thread while `generation` still equals `token`
    fn block(&self, event: usize, generation: &AtomicU64, token: u64);
    /// Make every thread sleeping on `event` runnable
    fn wake(&self, event: usize);
}

static BLOCK_HOOK: Once<&'static dyn BlockHook> = Once::new();

/// Install the scheduler's block hook
///
/// Only the first call takes effect; returns whether this one did.
pub fn set_block_hook(hook: &'static dyn BlockHook) -> bool {
    let mut installed = false;
    BLOCK_HOOK.call_once(|| {
        installed = true;
        hook
    });
    installed
}

// ============================================================================
// Wait Event
// ============================================================================

/// Snapshot of an event taken by `assert_wait()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitToken(u64);

/// Event that threads can wait on
///
/// The event is a generation counter: posting it bumps the generation and
/// every thread that sampled an older generation stops waiting.
#[derive(Debug)]
pub struct WaitEvent {
    generation: AtomicU64,
    waiters: AtomicU32,
    name: &'static str,
}

impl WaitEvent {
    /// Create a new event
    pub const fn new(name: &'static str) -> Self {
        Self {
            generation: AtomicU64::new(0),
            waiters: AtomicU32::new(0),
            name,
        }
    }

    /// Sample the event before dropping the lock that guards the condition
    pub fn assert_wait(&self) -> WaitToken {
        WaitToken(self.generation.load(Ordering::Acquire))
    }

    /// Block until the event has been posted since `token` was taken
    pub fn thread_block(&self, token: WaitToken, reason: WaitReason) {
        if self.generation.load(Ordering::Acquire) != token.0 {
            return;
        }

        log::trace!("{}: blocking ({:?})", self.name, reason);
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut spins = 0u32;
        while self.generation.load(Ordering::Acquire) == token.0 {
            match BLOCK_HOOK.get() {
                Some(hook) => hook.block(self.addr(), &self.generation, token.0),
                None => relax(&mut spins),
            }
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    /// Post the event, releasing every thread blocked on an older sample
    pub fn thread_wakeup(&self) {
        self.generation.fetch_add(1, Ordering::Release);
        if let Some(hook) = BLOCK_HOOK.get() {
            hook.wake(self.addr());
        }
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Number of threads currently blocked on this event
    pub fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Event name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Bounded Pause
// ============================================================================

/// Pause the current thread for a bounded number of relax rounds
///
/// Used where the condition being waited for has no event to post
/// (for example a pager that asked to be retried later).
pub fn kpause(reason: WaitReason, rounds: u32) {
    log::trace!("kpause: {:?} for {} rounds", reason, rounds);
    let mut spins = 0u32;
    for _ in 0..rounds {
        relax(&mut spins);
    }
}

/// Give up the processor for a moment
#[inline]
fn relax(spins: &mut u32) {
    *spins = spins.wrapping_add(1);

    #[cfg(feature = "std")]
    {
        if *spins % 16 == 0 {
            std::thread::yield_now();
            return;
        }
    }

    for _ in 0..(1u32 << (*spins % 8)) {
        core::hint::spin_loop();
    }
}
