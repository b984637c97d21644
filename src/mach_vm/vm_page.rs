//! VM Page Management - Physical Page Abstraction
//!
//! Based on Mach4 vm/vm_page.h/c
//! Manages physical pages, their busy/dirty state and the allocator
//! they are drawn from.
//!
//! ## Busy Pages
//!
//! A page handed out by a pager is *busy*: the holder owns it exclusively
//! until `unbusy()`. Anyone else who needs the page marks it *wanted* and
//! blocks in `wait_unbusy()`; `unbusy()` wakes them.
//!
//! ## Loaned Pages
//!
//! A page with a non-zero loan count is shared with another subsystem and
//! must not be written until the loan is broken (see
//! `memory_object::Pager::break_loan`).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use bitflags::bitflags;
use spin::{Mutex, MutexGuard};

use crate::kern::sched_prim::{WaitEvent, WaitReason};
use crate::mach_vm::vm_object::VmObjectId;

// ============================================================================
// Constants
// ============================================================================

/// Page size (4KB on most platforms)
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Mask of the in-page offset bits
pub const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

// ============================================================================
// Page Flags
// ============================================================================

bitflags! {
    /// Page state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageFlags: u32 {
        /// Page is owned exclusively by whoever is filling or mapping it
        const BUSY = 0x0001;
        /// Someone is waiting for the page to become unbusy
        const WANTED = 0x0002;
        /// Page contents differ from backing store
        const DIRTY = 0x0004;
        /// Page contents have not been initialized
        const FAKE = 0x0008;
        /// Page was released while busy and must be freed by the holder
        const RELEASED = 0x0010;
        /// Backing store is only partially allocated, map read-only
        const RDONLY = 0x0020;
        /// Page is on the active queue
        const ACTIVE = 0x0040;
        /// Page is on the inactive queue
        const INACTIVE = 0x0080;
        /// Page is in an object's resident table
        const TABLED = 0x0100;
    }
}

// ============================================================================
// VM Page Structure
// ============================================================================

/// Shared handle to a physical page
pub type PageRef = Arc<VmPage>;

/// Virtual Memory Page
///
/// Represents a single physical page of memory together with its contents.
pub struct VmPage {
    /// Page number in the allocator it came from
    pub page_num: u64,

    /// Object this page belongs to (if any)
    object: Mutex<Option<VmObjectId>>,

    /// Offset within the object
    offset: AtomicU64,

    /// Page flags
    flags: AtomicU32,

    /// Number of outstanding loans
    loan_count: AtomicU32,

    /// Page contents
    data: Mutex<[u8; PAGE_SIZE]>,

    /// Posted when the page stops being busy
    busy_event: WaitEvent,

    /// Allocator the page is accounted to
    zone: Option<Arc<PageAllocator>>,
}

impl core::fmt::Debug for VmPage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmPage")
            .field("page_num", &self.page_num)
            .field("object", &self.get_object())
            .field("offset", &self.offset())
            .field("flags", &self.get_flags())
            .field("loan_count", &self.loan_count())
            .finish()
    }
}

impl VmPage {
    /// Create a new zero-filled page not accounted to any allocator
    pub fn new(page_num: u64) -> Self {
        Self {
            page_num,
            object: Mutex::new(None),
            offset: AtomicU64::new(0),
            flags: AtomicU32::new(0),
            loan_count: AtomicU32::new(0),
            data: Mutex::new([0u8; PAGE_SIZE]),
            busy_event: WaitEvent::new("vm_page_busy"),
            zone: None,
        }
    }

    /// Get page flags
    pub fn get_flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    /// Set page flags
    pub fn set_flags(&self, flags: PageFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    /// Clear page flags
    pub fn clear_flags(&self, flags: PageFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::SeqCst);
    }

    /// Check if page has specific flags
    pub fn has_flags(&self, flags: PageFlags) -> bool {
        self.get_flags().contains(flags)
    }

    /// Mark page as dirty
    pub fn set_dirty(&self) {
        self.set_flags(PageFlags::DIRTY);
    }

    /// Clear dirty flag
    pub fn clear_dirty(&self) {
        self.clear_flags(PageFlags::DIRTY);
    }

    /// Check if page is dirty
    pub fn is_dirty(&self) -> bool {
        self.has_flags(PageFlags::DIRTY)
    }

    // ========================================================================
    // Busy protocol
    // ========================================================================

    /// Try to take exclusive ownership of the page
    pub fn try_busy(&self) -> bool {
        let prev = self.flags.fetch_or(PageFlags::BUSY.bits(), Ordering::SeqCst);
        prev & PageFlags::BUSY.bits() == 0
    }

    /// Check if page is busy
    pub fn is_busy(&self) -> bool {
        self.has_flags(PageFlags::BUSY)
    }

    /// Give up exclusive ownership and wake anyone waiting for it
    pub fn unbusy(&self) {
        let prev = self.flags.fetch_and(
            !(PageFlags::BUSY | PageFlags::WANTED).bits(),
            Ordering::SeqCst,
        );
        if prev & PageFlags::WANTED.bits() != 0 {
            log::trace!("page {}: waking waiters", self.page_num);
        }
        self.busy_event.thread_wakeup();
    }

    /// Wake waiters without giving up ownership
    pub fn wakeup(&self) {
        self.clear_flags(PageFlags::WANTED);
        self.busy_event.thread_wakeup();
    }

    /// Block until the page is no longer busy
    ///
    /// Must be called without the owning object's lock held.
    pub fn wait_unbusy(&self) {
        let token = self.busy_event.assert_wait();
        self.set_flags(PageFlags::WANTED);
        if !self.is_busy() {
            return;
        }
        self.busy_event.thread_block(token, WaitReason::PageBusy);
    }

    // ========================================================================
    // Loans
    // ========================================================================

    /// Number of outstanding loans
    pub fn loan_count(&self) -> u32 {
        self.loan_count.load(Ordering::SeqCst)
    }

    /// Lend the page to another subsystem
    pub fn loan(&self) {
        self.loan_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Return a loan
    pub fn unloan(&self) {
        let _ = self
            .loan_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
    }

    // ========================================================================
    // Queues
    // ========================================================================

    /// Activate the page (move to active queue)
    pub fn activate(&self) {
        let prev = self.flags.fetch_or(PageFlags::ACTIVE.bits(), Ordering::SeqCst);
        self.clear_flags(PageFlags::INACTIVE);
        if prev & PageFlags::ACTIVE.bits() == 0 {
            if let Some(zone) = &self.zone {
                zone.active.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Deactivate the page (move to inactive queue)
    pub fn deactivate(&self) {
        let prev = self.flags.fetch_and(!PageFlags::ACTIVE.bits(), Ordering::SeqCst);
        self.set_flags(PageFlags::INACTIVE);
        if prev & PageFlags::ACTIVE.bits() != 0 {
            if let Some(zone) = &self.zone {
                zone.active.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    // ========================================================================
    // Ownership and contents
    // ========================================================================

    /// Get the object this page belongs to
    pub fn get_object(&self) -> Option<VmObjectId> {
        *self.object.lock()
    }

    /// Offset within the owning object
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Set the object this page belongs to
    pub fn set_object(&self, object: Option<VmObjectId>, offset: u64) {
        *self.object.lock() = object;
        self.offset.store(offset, Ordering::SeqCst);
        if object.is_some() {
            self.set_flags(PageFlags::TABLED);
        } else {
            self.clear_flags(PageFlags::TABLED);
        }
    }

    /// Lock the page contents
    pub fn data(&self) -> MutexGuard<'_, [u8; PAGE_SIZE]> {
        self.data.lock()
    }
}

impl Drop for VmPage {
    fn drop(&mut self) {
        if let Some(zone) = self.zone.take() {
            if self.has_flags(PageFlags::ACTIVE) {
                zone.active.fetch_sub(1, Ordering::Relaxed);
            }
            zone.release();
        }
    }
}

// ============================================================================
// Page Allocator
// ============================================================================

/// Bounded source of physical pages
///
/// Pages drawn from the allocator return their slot when the last
/// reference is dropped, which posts the memory-available event.
#[derive(Debug)]
pub struct PageAllocator {
    /// Maximum number of pages outstanding at once
    capacity: usize,
    /// Pages currently allocated
    in_use: AtomicUsize,
    /// Pages currently active
    active: AtomicUsize,
    /// Next page number to hand out
    next_page: AtomicU64,
    /// Posted whenever a page is freed
    freed: WaitEvent,
}

impl PageAllocator {
    /// Create an allocator that hands out at most `capacity` pages
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_use: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            next_page: AtomicU64::new(1),
            freed: WaitEvent::new("vm_page_free"),
        })
    }

    /// Allocate a zero-filled page, or `None` if memory is exhausted
    pub fn alloc(self: &Arc<Self>) -> Option<PageRef> {
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()?;

        let page_num = self.next_page.fetch_add(1, Ordering::Relaxed);
        let mut page = VmPage::new(page_num);
        page.zone = Some(Arc::clone(self));
        Some(Arc::new(page))
    }

    /// Return a page slot and wake memory waiters
    fn release(&self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        self.freed.thread_wakeup();
    }

    /// Block until at least one page can be allocated
    pub fn wait_for_memory(&self) {
        let token = self.freed.assert_wait();
        if self.free_count() > 0 {
            return;
        }
        log::debug!("vm_page: waiting for free memory");
        self.freed.thread_block(token, WaitReason::Memory);
    }

    /// Number of pages that can still be allocated
    pub fn free_count(&self) -> usize {
        self.capacity.saturating_sub(self.in_use.load(Ordering::SeqCst))
    }

    /// Number of pages currently allocated
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Number of allocated pages on the active queue
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Total capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Page Arithmetic
// ============================================================================

/// Round address down to page boundary
pub const fn trunc_page(addr: u64) -> u64 {
    addr & !PAGE_MASK
}

/// Round address up to page boundary
pub const fn round_page(addr: u64) -> u64 {
    (addr + PAGE_MASK) & !PAGE_MASK
}

/// Number of pages needed to hold `bytes`
pub const fn page_count(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) >> PAGE_SHIFT
}
