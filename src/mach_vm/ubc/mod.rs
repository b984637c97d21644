//! Unified Buffer Cache - Mapping Windows onto Objects
//!
//! A fixed pool of kernel address windows, each bound on demand to a
//! window-aligned range of some VM object, so file data can be copied
//! with ordinary loads and stores instead of explicit page handling.
//!
//! ## Window Lifecycle
//!
//! ```text
//!            acquire (miss)                 release (last ref)
//!   queued ─────────────────> referenced ───────────────────────> queued
//!   (unbound or cached)          │  ▲        KeepCached: tail, mapping kept
//!                                │  │        Invalidate: head, unbound
//!                                └──┘
//!                           acquire (hit)
//! ```
//!
//! - Bindings are unique: at most one window per (object, aligned offset).
//! - Idle windows wait on per-color recycling queues, oldest first.
//! - Pages are faulted in lazily on first touch, or populated and pinned
//!   up front by an `OVERWRITE` acquire.
//!
//! ## Locking
//!
//! One pool lock guards windows, hash index and queues. Object locks are
//! taken only with the pool lock dropped, around pager calls.

pub mod config;
pub mod error;
pub mod fault;
pub mod inactive;
pub mod pool;
pub mod transfer;
pub mod window;

use alloc::sync::Arc;
use spin::Once;

use crate::mach_vm::pmap::Pmap;
use crate::mach_vm::vm_page::PageAllocator;

pub use config::{UbcConfig, UBC_MAX_FAULT_RETRIES, UBC_MAX_WINSHIFT};
pub use error::{FailureSource, ShortTransfer, UbcError};
pub use pool::{AuditFailure, UbcPool};
pub use window::{ReleaseMode, UbcFlags, UbcWinFlags, UbcWindow};

// ============================================================================
// Global Pool
// ============================================================================

static UBC_POOL: Once<UbcPool> = Once::new();

/// Create the system-wide pool
///
/// Only the first successful call builds the pool; later calls return it
/// unchanged.
pub fn init(
    config: UbcConfig,
    pmap: Arc<dyn Pmap>,
    allocator: Arc<PageAllocator>,
) -> Result<&'static UbcPool, UbcError> {
    if let Some(pool) = UBC_POOL.get() {
        log::warn!("ubc: already initialized, ignoring new configuration");
        return Ok(pool);
    }
    let pool = UbcPool::new(config, pmap, allocator)?;
    Ok(UBC_POOL.call_once(|| pool))
}

/// The system-wide pool, if `init` has run
pub fn pool() -> Option<&'static UbcPool> {
    UBC_POOL.get()
}
