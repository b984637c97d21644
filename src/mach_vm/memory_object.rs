//! Memory Object Interface - Page Provider Contract
//!
//! Based on Mach4 vm/memory_object.h/c and the UVM pager operations.
//!
//! A pager produces resident pages for a range of its object and accepts
//! dirty pages back. The buffer cache calls it from two places: the
//! fault handler (lazily, on first touch of a window page) and the
//! overwrite acquire path (eagerly, pinning the pages until release).
//!
//! ## Contract
//!
//! - `get_pages` is entered with the object lock held and returns with it
//!   held. It may drop the lock while it sleeps, via
//!   `ObjectGuard::unlocked()`.
//! - Every page it returns is busy, owned by the caller until `unbusy()`,
//!   and present in the object's resident table.
//! - `PagerError::Again` asks the caller to pause and retry the request.

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::mach_vm::vm_object::ObjectGuard;
use crate::mach_vm::vm_page::{PageAllocator, PageFlags, PageRef};
use crate::mach_vm::vm_param::{Advice, VmProt};

// ============================================================================
// Constants
// ============================================================================

/// Largest number of pages a single request may cover
pub const PAGER_MAX_PAGES: usize = 16;

/// Pages returned by a pager, one slot per requested page
///
/// A `None` slot is a page the pager chose not to provide (for example one
/// lying past end-of-object on a request without `PASTEOF`).
pub type PageList = heapless::Vec<Option<PageRef>, PAGER_MAX_PAGES>;

// ============================================================================
// Request Flags
// ============================================================================

bitflags! {
    /// Pager operation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PgoFlags: u32 {
        /// Synchronous I/O
        const SYNCIO = 0x0001;
        /// Caller will overwrite the whole page, skip reading it
        const OVERWRITE = 0x0002;
        /// Pages past end-of-object are acceptable
        const PASTEOF = 0x0004;
        /// Backing block allocation may be deferred
        const NOBLOCKALLOC = 0x0008;
        /// Write dirty pages back (put_pages)
        const CLEANIT = 0x0010;
        /// Drop pages from the object after writing (put_pages)
        const FREE = 0x0020;
    }
}

/// A request for pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page-aligned object offset of the first page
    pub offset: u64,
    /// Number of pages wanted
    pub npages: usize,
    /// Index of the page the caller actually needs
    pub centeridx: usize,
    /// Access that will be made to the pages
    pub access: VmProt,
    /// Access-pattern hint
    pub advice: Advice,
    /// Request flags
    pub flags: PgoFlags,
}

// ============================================================================
// Errors
// ============================================================================

/// Pager errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PagerError {
    /// Transient condition, retry the request later
    #[error("pager busy, try again")]
    Again,
    /// Offset lies beyond end-of-object
    #[error("offset beyond end of object")]
    OutOfRange,
    /// Backing store I/O failed
    #[error("pager I/O error")]
    Io,
    /// No memory even after waiting
    #[error("pager out of memory")]
    NoMemory,
}

// ============================================================================
// Pager Trait
// ============================================================================

/// Page provider for a VM object
pub trait Pager: Send + Sync {
    /// Make `req.npages` pages starting at `req.offset` resident and busy
    fn get_pages(
        &self,
        guard: &mut ObjectGuard<'_>,
        req: &PageRequest,
    ) -> Result<PageList, PagerError>;

    /// Write back (and optionally free) resident pages in `[start, end)`
    ///
    /// Returns the number of pages written.
    fn put_pages(
        &self,
        guard: &mut ObjectGuard<'_>,
        start: u64,
        end: u64,
        flags: PgoFlags,
    ) -> Result<usize, PagerError>;

    /// Allocator new pages are drawn from
    fn page_allocator(&self) -> &Arc<PageAllocator>;

    /// Replace a loaned page with an exclusively owned copy
    ///
    /// `page` is busy and resident in the locked object. On success the
    /// copy takes its place in the resident table, busy, and the loaned
    /// page leaves the object. Returns `None` if no page could be
    /// allocated; the caller waits for memory and retries.
    fn break_loan(&self, guard: &mut ObjectGuard<'_>, page: &PageRef) -> Option<PageRef> {
        let copy = self.page_allocator().alloc()?;
        copy.try_busy();
        copy.data().copy_from_slice(&page.data()[..]);

        let offset = page.offset();
        copy.set_object(Some(guard.object().id()), offset);
        copy.set_flags(page.get_flags() & (PageFlags::DIRTY | PageFlags::RDONLY));
        copy.set_dirty();
        guard.insert(offset, Arc::clone(&copy));

        page.set_object(None, 0);
        page.unbusy();

        log::trace!(
            "memory_object: broke loan on page {} -> {} at {:#x}",
            page.page_num,
            copy.page_num,
            offset
        );
        Some(copy)
    }
}
