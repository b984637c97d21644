//! Windows and window handles
//!
//! A window is a fixed-size slice of the pool's address range. The pool
//! keeps one `Window` record per slice in its arena; callers hold a
//! `UbcWindow` handle for as long as they reference one.

use alloc::sync::Weak;
use bitflags::bitflags;
use core::ops::Range;

use crate::kern::uio::{Uio, UioRw};
use crate::mach_vm::ubc::config::UBC_MAX_FAULT_RETRIES;
use crate::mach_vm::ubc::error::UbcError;
use crate::mach_vm::ubc::pool::UbcPool;
use crate::mach_vm::vm_object::{VmObject, VmObjectId};
use crate::mach_vm::vm_page::{PageRef, PAGE_MASK, PAGE_SIZE};
use crate::mach_vm::vm_param::{Advice, VmProt};

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// Per-window state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UbcWinFlags: u32 {
        /// Pages under `pinned` are busy and mapped unmanaged until the
        /// overwriting handle is released
        const PAGES_LOCKED = 0x0001;
        /// Managed mappings left in place after the last release
        const MAPPING_CACHED = 0x0002;
    }
}

bitflags! {
    /// Acquire flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UbcFlags: u32 {
        /// Caller will read through the window
        const READ = 0x0001;
        /// Caller will write; records the write sub-range
        const WRITE = 0x0002;
        /// Caller overwrites the whole range: populate and pin the pages now
        const OVERWRITE = 0x0004;
        /// Invalidate the binding on release instead of caching it
        const ONESHOT = 0x0008;
    }
}

/// What to do with a window's mapping when the last reference goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// Keep the binding and mapping as a soft cache
    #[default]
    KeepCached,
    /// Remove the mapping and binding; recycle the window first
    Invalidate,
}

impl From<UbcFlags> for ReleaseMode {
    fn from(flags: UbcFlags) -> Self {
        if flags.contains(UbcFlags::ONESHOT) {
            ReleaseMode::Invalidate
        } else {
            ReleaseMode::KeepCached
        }
    }
}

// ============================================================================
// Window Record
// ============================================================================

/// Hash key of a binding
pub type BindingKey = (VmObjectId, u64);

/// Association of a window with an object range
#[derive(Debug, Clone)]
pub struct Binding {
    /// Bound object, not kept alive by the window
    pub object: Weak<VmObject>,
    /// Identity of the bound object
    pub id: VmObjectId,
    /// Window-aligned object offset
    pub offset: u64,
}

impl Binding {
    pub fn key(&self) -> BindingKey {
        (self.id, self.offset)
    }
}

/// Arena entry for one window, protected by the pool lock
#[derive(Debug, Default)]
pub struct Window {
    pub binding: Option<Binding>,
    /// Write sub-range, relative to the window start
    pub writeoff: usize,
    pub writelen: usize,
    /// Page-aligned slot range pinned by an overwrite
    pub pinned: Option<Range<usize>>,
    pub refcount: u32,
    pub flags: UbcWinFlags,
    pub advice: Advice,
}

impl Window {
    /// Does the write sub-range cover the page holding `slot_offset`?
    pub fn write_range_covers(&self, slot_offset: usize) -> bool {
        if self.writelen == 0 {
            return false;
        }
        let start = self.writeoff & !(PAGE_SIZE - 1);
        let end = (self.writeoff + self.writelen + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        (start..end).contains(&slot_offset)
    }

    /// Is the page holding `slot_offset` pinned by an overwrite?
    pub fn is_pinned(&self, slot_offset: usize) -> bool {
        self.pinned
            .as_ref()
            .is_some_and(|range| range.contains(&slot_offset))
    }
}

/// What a handle owns beyond its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct Claims {
    /// The window's write range was recorded by this handle
    pub writer: bool,
    /// This handle pinned the pages of the write range
    pub pinned: bool,
}

// ============================================================================
// Window Handle
// ============================================================================

/// A referenced window
///
/// Dropping the handle releases it with `ReleaseMode::KeepCached`. Only the
/// handle that recorded a write range (or pinned pages) undoes it on
/// release; other holders of the same window leave it alone.
pub struct UbcWindow<'p> {
    pool: &'p UbcPool,
    index: usize,
    va: u64,
    len: usize,
    slot_offset: usize,
    claims: Claims,
    released: bool,
}

impl core::fmt::Debug for UbcWindow<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UbcWindow")
            .field("index", &self.index)
            .field("va", &format_args!("{:#x}", self.va))
            .field("len", &self.len)
            .field("slot_offset", &self.slot_offset)
            .field("claims", &self.claims)
            .finish()
    }
}

impl<'p> UbcWindow<'p> {
    pub(super) fn new(
        pool: &'p UbcPool,
        index: usize,
        slot_offset: usize,
        len: usize,
        claims: Claims,
    ) -> Self {
        Self {
            pool,
            index,
            va: pool.window_va(index) + slot_offset as u64,
            len,
            slot_offset,
            claims,
            released: false,
        }
    }

    /// Arena index of the window
    pub fn index(&self) -> usize {
        self.index
    }

    /// Address of the first requested byte
    pub fn va(&self) -> u64 {
        self.va
    }

    /// Usable length, clamped to the end of the window
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of `va()` within the window
    pub fn slot_offset(&self) -> usize {
        self.slot_offset
    }

    /// Does this handle hold the window's pages pinned?
    pub fn is_pinned(&self) -> bool {
        self.claims.pinned
    }

    /// Drop the reference
    pub fn release(mut self, mode: ReleaseMode) {
        self.released = true;
        self.pool.release_index(self.index, mode, self.claims);
    }

    // ========================================================================
    // Byte access
    // ========================================================================

    /// Resolve `va` to a page mapped with at least `access`, faulting as needed
    fn translate(&self, va: u64, access: VmProt) -> Result<PageRef, UbcError> {
        let pmap = self.pool.pmap();
        let mut faults = 0;
        loop {
            if let Some(m) = pmap.extract(va) {
                if !access.can_write() || m.prot.can_write() {
                    return Ok(m.page);
                }
            }
            if faults == UBC_MAX_FAULT_RETRIES {
                log::debug!("ubc: {:#x} still unmapped after {} faults", va, faults);
                return Err(UbcError::PageUnavailable);
            }
            self.pool.fault(va, access)?;
            faults += 1;
        }
    }

    /// Walk `[off, off + len)` page by page, handing each mapped chunk to `f`
    fn for_each_chunk(
        &self,
        off: usize,
        len: usize,
        access: VmProt,
        mut f: impl FnMut(&mut [u8], usize) -> Result<(), UbcError>,
    ) -> Result<(), UbcError> {
        if off.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(UbcError::BadAddress);
        }

        let mut done = 0;
        while done < len {
            let va = self.va + (off + done) as u64;
            let page_off = (va & PAGE_MASK) as usize;
            let n = (PAGE_SIZE - page_off).min(len - done);

            let page = self.translate(va, access)?;
            let mut data = page.data();
            f(&mut data[page_off..page_off + n], done)?;
            if access.can_write() {
                page.set_dirty();
            }
            done += n;
        }
        Ok(())
    }

    /// Copy window bytes starting at `off` into `buf`
    pub fn read(&self, off: usize, buf: &mut [u8]) -> Result<(), UbcError> {
        self.for_each_chunk(off, buf.len(), VmProt::READ, |chunk, done| {
            buf[done..done + chunk.len()].copy_from_slice(chunk);
            Ok(())
        })
    }

    /// Copy `buf` into the window starting at `off`
    pub fn write(&self, off: usize, buf: &[u8]) -> Result<(), UbcError> {
        self.for_each_chunk(off, buf.len(), VmProt::WRITE, |chunk, done| {
            chunk.copy_from_slice(&buf[done..done + chunk.len()]);
            Ok(())
        })
    }

    /// Zero `len` window bytes starting at `off`
    pub fn zero(&self, off: usize, len: usize) -> Result<(), UbcError> {
        self.for_each_chunk(off, len, VmProt::WRITE, |chunk, _| {
            chunk.fill(0);
            Ok(())
        })
    }

    /// Move up to `len()` bytes between the window and `uio`
    ///
    /// The direction comes from `uio`. On error `uio` records how far the
    /// transfer got.
    pub fn uiomove(&self, uio: &mut Uio<'_>) -> Result<usize, UbcError> {
        let len = self.len.min(uio.resid());
        let access = match uio.rw() {
            UioRw::Read => VmProt::READ,
            UioRw::Write => VmProt::WRITE,
        };
        let mut moved = 0;
        self.for_each_chunk(0, len, access, |chunk, _| {
            moved += uio.uiomove(chunk)?;
            Ok(())
        })?;
        Ok(moved)
    }
}

impl Drop for UbcWindow<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.pool
                .release_index(self.index, ReleaseMode::KeepCached, self.claims);
        }
    }
}
