//! Window fault handling
//!
//! Based on Mach4 vm/vm_fault.c, reduced to the buffer-cache case: the
//! faulting address always lies in a window, the window names the object
//! and offset, and the pager supplies the pages.
//!
//! ## Fault Flow
//!
//! ```text
//! fault(va, access)
//!   ├── window lookup (pool lock): binding, write range, advice
//!   ├── effective access: WRITE if the write range covers va
//!   ├── get_pages (object lock)       ── Again ──> kpause, retry
//!   ├── per page: wake/free/loan-break ── no memory ──> wait, retry all
//!   └── pmap enter, activate, unbusy  ── shortage ──> wait, next page
//! ```
//!
//! The overwrite acquire path (`faultbusy`) asks for the pages the same
//! way but maps them unmanaged and leaves them busy until release. Faults
//! on the pinned range from other holders wait for that release; the rest
//! of the window faults as usual.

use alloc::sync::Arc;

use crate::kern::sched_prim::{kpause, WaitReason};
use crate::mach_vm::memory_object::{PageRequest, PagerError, PgoFlags};
use crate::mach_vm::pmap::PmapFlags;
use crate::mach_vm::ubc::error::UbcError;
use crate::mach_vm::ubc::pool::UbcPool;
use crate::mach_vm::vm_object::{ObjectGuard, VmObject};
use crate::mach_vm::vm_page::{round_page, trunc_page, PageFlags, PageRef, PAGE_SHIFT, PAGE_SIZE};
use crate::mach_vm::vm_param::{Advice, VmProt};

/// Outcome of entering one faulted page
enum PageOutcome {
    /// Page mapped (or discarded because it was released)
    Done,
    /// Mapping could not be entered; the page will fault again
    EnterFailed,
    /// Loan break found no memory; the whole fault must be retried
    NoMemory,
}

impl UbcPool {
    /// Resolve a fault at `va` inside a referenced window
    pub fn fault(&self, va: u64, access: VmProt) -> Result<(), UbcError> {
        let index = self.window_index(va).ok_or(UbcError::BadAddress)?;
        let slot_offset = (va - self.window_va(index)) as usize;
        self.stats().faults.inc();

        let (binding, writeoff, writelen, covered, advice, pinned_start) = loop {
            let inner = self.inner.lock();
            let win = &inner.windows[index];
            if win.refcount == 0 {
                return Err(UbcError::BadAddress);
            }
            if win.is_pinned(slot_offset) {
                // The overwriting holder unpins on release
                let token = self.released.assert_wait();
                drop(inner);
                self.stats().busy_waits.inc();
                log::trace!("ubc: fault at {:#x} waiting for pinned pages", va);
                self.released.thread_block(token, WaitReason::PageBusy);
                continue;
            }
            let binding = win.binding.clone().ok_or(UbcError::BadAddress)?;
            break (
                binding,
                win.writeoff,
                win.writelen,
                win.write_range_covers(slot_offset),
                win.advice,
                win.pinned.as_ref().map(|range| range.start as u64),
            );
        };
        let obj = binding.object.upgrade().ok_or(UbcError::ObjectGone)?;

        // Writes must stay within the recorded write range. A read inside
        // it is treated as a write so partial-page stores assemble the
        // page for writing.
        let access = if covered {
            VmProt::WRITE
        } else if access.can_write() {
            return Err(UbcError::Protection);
        } else {
            VmProt::READ
        };

        let winsize = self.config().winsize() as u64;
        let first = trunc_page(slot_offset as u64);
        let (npages, gpflags) = if access.can_write() {
            let eoff = round_page((writeoff + writelen) as u64).min(winsize);
            (
                ((eoff - first) >> PAGE_SHIFT) as usize,
                PgoFlags::SYNCIO | PgoFlags::PASTEOF,
            )
        } else {
            // Stop short of pages an overwrite holds busy
            let eoff = pinned_start.filter(|&start| start > first).unwrap_or(winsize);
            (((eoff - first) >> PAGE_SHIFT) as usize, PgoFlags::SYNCIO)
        };

        let prot = if self.config().vivt_cache {
            VmProt::READ | access
        } else {
            VmProt::READ | VmProt::WRITE
        };

        let req = PageRequest {
            offset: binding.offset + first,
            npages,
            centeridx: 0,
            access,
            advice,
            flags: gpflags,
        };
        let base_va = self.window_va(index) + first;

        log::trace!(
            "ubc: fault va {:#x} {:?}+{:#x} npages {} access {:?}",
            va,
            binding.id,
            req.offset,
            npages,
            access
        );

        'again: loop {
            let mut guard = obj.lock();
            let pages = match obj.pager().get_pages(&mut guard, &req) {
                Ok(pages) => pages,
                Err(PagerError::Again) => {
                    drop(guard);
                    self.stats().fault_retries.inc();
                    log::trace!("ubc: pager busy at {:#x}, retrying", req.offset);
                    kpause(WaitReason::PagerRetry, self.config().pause_spins);
                    continue 'again;
                }
                Err(e) => return Err(e.into()),
            };

            for (i, slot) in pages.iter().enumerate() {
                let Some(page) = slot else { continue };
                let page_va = base_va + ((i << PAGE_SHIFT) as u64);

                match self.fault_page(&mut guard, page, page_va, prot, access) {
                    PageOutcome::Done => {}
                    PageOutcome::EnterFailed => {
                        self.stats().pmap_enter_failures.inc();
                        log::warn!("ubc: could not map {:#x}, will refault", page_va);
                        self.pmap().update();
                        guard.unlocked(|| self.allocator().wait_for_memory());
                    }
                    PageOutcome::NoMemory => {
                        for rest in pages.iter().skip(i + 1).flatten() {
                            rest.unbusy();
                        }
                        self.pmap().update();
                        drop(guard);
                        self.stats().loanbreak_waits.inc();
                        log::warn!("ubc: loan break out of memory at {:#x}", page_va);
                        self.allocator().wait_for_memory();
                        continue 'again;
                    }
                }
            }

            self.pmap().update();
            return Ok(());
        }
    }

    /// Enter one busy page returned by the pager and unbusy it
    fn fault_page(
        &self,
        guard: &mut ObjectGuard<'_>,
        page: &PageRef,
        va: u64,
        mut prot: VmProt,
        access: VmProt,
    ) -> PageOutcome {
        let obj = guard.object();

        if page.has_flags(PageFlags::WANTED) {
            page.wakeup();
        }
        if page.has_flags(PageFlags::RELEASED) {
            let offset = page.offset();
            if guard.lookup(offset).is_some_and(|p| Arc::ptr_eq(p, page)) {
                guard.remove(offset);
            }
            page.set_object(None, 0);
            page.unbusy();
            return PageOutcome::Done;
        }

        let mut page = page.clone();
        if page.loan_count() != 0 {
            if !access.can_write() {
                prot.remove(VmProt::WRITE);
            }
            if prot.can_write() {
                match obj.pager().break_loan(guard, &page) {
                    Some(copy) => page = copy,
                    None => {
                        page.unbusy();
                        return PageOutcome::NoMemory;
                    }
                }
            }
        }

        if !access.can_write() && page.has_flags(PageFlags::RDONLY) {
            prot.remove(VmProt::WRITE);
        }

        let result = self.pmap().enter(va, &page, prot, PmapFlags::CANFAIL);
        page.activate();
        page.unbusy();
        match result {
            Ok(()) => PageOutcome::Done,
            Err(_) => PageOutcome::EnterFailed,
        }
    }

    /// Populate the pages under a pinned write range, mapped unmanaged
    pub(super) fn faultbusy(
        &self,
        obj: &Arc<VmObject>,
        index: usize,
        umap_offset: u64,
        slot_offset: usize,
        len: usize,
        advice: Advice,
    ) -> Result<(), UbcError> {
        let first = trunc_page(slot_offset as u64);
        let npages = ((round_page((slot_offset + len) as u64) - first) >> PAGE_SHIFT) as usize;
        let va = self.window_va(index) + first;
        let req = PageRequest {
            offset: umap_offset + first,
            npages,
            centeridx: 0,
            access: VmProt::READ | VmProt::WRITE,
            advice,
            flags: PgoFlags::SYNCIO
                | PgoFlags::OVERWRITE
                | PgoFlags::PASTEOF
                | PgoFlags::NOBLOCKALLOC,
        };

        'again: loop {
            let mut guard = obj.lock();
            let mut pages = match obj.pager().get_pages(&mut guard, &req) {
                Ok(pages) => pages,
                Err(PagerError::Again) => {
                    drop(guard);
                    self.stats().fault_retries.inc();
                    kpause(WaitReason::PagerRetry, self.config().pause_spins);
                    continue 'again;
                }
                Err(e) => return Err(e.into()),
            };

            if pages.iter().any(Option::is_none) {
                // A hole would leave the pinned range unmapped for good
                for pg in pages.iter().flatten() {
                    pg.unbusy();
                }
                log::warn!("ubc: pager left a hole in overwrite at {:#x}", req.offset);
                return Err(UbcError::PageUnavailable);
            }

            for i in 0..pages.len() {
                let Some(page) = pages[i].clone() else { continue };
                if page.loan_count() != 0 {
                    match obj.pager().break_loan(&mut guard, &page) {
                        Some(copy) => pages[i] = Some(copy),
                        None => {
                            self.pmap().kremove(va, (npages * PAGE_SIZE) as u64);
                            self.pmap().update();
                            for pg in pages.iter().flatten() {
                                pg.unbusy();
                            }
                            drop(guard);
                            self.stats().loanbreak_waits.inc();
                            log::warn!("ubc: overwrite loan break out of memory, waiting");
                            self.allocator().wait_for_memory();
                            continue 'again;
                        }
                    }
                }
                if let Some(page) = &pages[i] {
                    self.pmap().kenter_pa(
                        va + ((i << PAGE_SHIFT) as u64),
                        page,
                        VmProt::READ | VmProt::WRITE,
                    );
                }
            }
            self.pmap().update();
            return Ok(());
        }
    }
}
