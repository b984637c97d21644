//! Vnode Pager - In-Memory Backing Store
//!
//! Based on Mach4 vm/vnode_pager.c and the generic file pager get/put path.
//!
//! Serves an object's pages out of a byte store held in memory. It is the
//! page provider for embedders without a file system underneath, and the
//! one the buffer cache tests run against.
//!
//! ## Behavior
//!
//! - Pages already resident are returned as they are (after waiting for
//!   them to become unbusy, with the object lock dropped).
//! - Missing pages are allocated, entered into the object and filled from
//!   the store, unless the request carries `OVERWRITE`, in which case they
//!   are left zero-filled and marked `FAKE`.
//! - Without `PASTEOF`, a request starting past end-of-object fails and
//!   slots past end-of-object come back empty.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::kern::counters::EvCounter;
use crate::mach_vm::memory_object::{PageList, PageRequest, Pager, PagerError, PgoFlags};
use crate::mach_vm::vm_object::ObjectGuard;
use crate::mach_vm::vm_page::{round_page, PageAllocator, PageFlags, PageRef, PAGE_SHIFT, PAGE_SIZE};

/// In-memory vnode pager
#[derive(Debug)]
pub struct VnodePager {
    /// Backing store contents
    store: Mutex<Vec<u8>>,
    /// Page allocator
    allocator: Arc<PageAllocator>,
    /// Calls to get_pages
    pub getpages: EvCounter,
    /// Pages filled from the store
    pub pagein: EvCounter,
    /// Pages written back to the store
    pub pageout: EvCounter,
    /// Bytes read from the store
    bytes_in: AtomicU64,
}

impl VnodePager {
    /// Create a pager over an empty store
    pub fn new(allocator: Arc<PageAllocator>) -> Arc<Self> {
        Self::with_contents(allocator, &[])
    }

    /// Create a pager whose store starts out holding `contents`
    pub fn with_contents(allocator: Arc<PageAllocator>, contents: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(contents.to_vec()),
            allocator,
            getpages: EvCounter::new("getpages"),
            pagein: EvCounter::new("pagein"),
            pageout: EvCounter::new("pageout"),
            bytes_in: AtomicU64::new(0),
        })
    }

    /// Copy of the backing store contents
    pub fn store_snapshot(&self) -> Vec<u8> {
        self.store.lock().clone()
    }

    /// Bytes read from the store so far
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Fill `page` with store bytes for object offset `offset`
    fn read_page(&self, page: &PageRef, offset: u64, size: u64) {
        let store = self.store.lock();
        let mut data = page.data();
        data.fill(0);

        let start = offset as usize;
        let end = (offset + PAGE_SIZE as u64).min(size) as usize;
        let end = end.min(store.len());
        if start < end {
            data[..end - start].copy_from_slice(&store[start..end]);
            self.bytes_in.fetch_add((end - start) as u64, Ordering::Relaxed);
        }
        self.pagein.inc();
    }

    /// Write `page` back to the store, clipped to the object size
    fn write_page(&self, page: &PageRef, offset: u64, size: u64) {
        let end = (offset + PAGE_SIZE as u64).min(size);
        if offset >= end {
            return;
        }
        let (start, end) = (offset as usize, end as usize);

        let mut store = self.store.lock();
        if store.len() < end {
            store.resize(end, 0);
        }
        let data = page.data();
        store[start..end].copy_from_slice(&data[..end - start]);
        self.pageout.inc();
    }
}

impl Pager for VnodePager {
    fn get_pages(
        &self,
        guard: &mut ObjectGuard<'_>,
        req: &PageRequest,
    ) -> Result<PageList, PagerError> {
        self.getpages.inc();
        let id = guard.object().id();
        let size = guard.size();

        let npages = if req.flags.contains(PgoFlags::PASTEOF) {
            req.npages
        } else {
            let eof = round_page(size);
            if req.offset >= eof {
                return Err(PagerError::OutOfRange);
            }
            req.npages.min(((eof - req.offset) >> PAGE_SHIFT) as usize)
        };

        let mut pages = PageList::new();
        for i in 0..req.npages {
            if i >= npages {
                pages.push(None).map_err(|_| PagerError::NoMemory)?;
                continue;
            }
            let offset = req.offset + (i << PAGE_SHIFT) as u64;

            let page = loop {
                if let Some(pg) = guard.lookup(offset).cloned() {
                    if pg.try_busy() {
                        break pg;
                    }
                    guard.unlocked(|| pg.wait_unbusy());
                    continue;
                }

                let Some(pg) = self.allocator.alloc() else {
                    guard.unlocked(|| self.allocator.wait_for_memory());
                    continue;
                };
                pg.try_busy();
                pg.set_object(Some(id), offset);
                if req.flags.contains(PgoFlags::OVERWRITE) {
                    pg.set_flags(PageFlags::FAKE);
                } else {
                    self.read_page(&pg, offset, size);
                }
                guard.insert(offset, Arc::clone(&pg));
                break pg;
            };

            pages.push(Some(page)).map_err(|_| PagerError::NoMemory)?;
        }

        log::trace!(
            "vnode_pager: get_pages {:?} off {:#x} npages {} flags {:?}",
            id,
            req.offset,
            req.npages,
            req.flags
        );
        Ok(pages)
    }

    fn put_pages(
        &self,
        guard: &mut ObjectGuard<'_>,
        start: u64,
        end: u64,
        flags: PgoFlags,
    ) -> Result<usize, PagerError> {
        let size = guard.size();
        let candidates: Vec<(u64, PageRef)> = guard
            .range(start, end)
            .map(|(off, pg)| (*off, Arc::clone(pg)))
            .collect();

        let mut written = 0;
        for (offset, page) in candidates {
            if !page.try_busy() {
                continue;
            }
            if flags.contains(PgoFlags::CLEANIT) && page.is_dirty() {
                self.write_page(&page, offset, size);
                page.clear_dirty();
                written += 1;
            }
            if flags.contains(PgoFlags::FREE) && page.loan_count() == 0 {
                guard.remove(offset);
                page.set_object(None, 0);
            }
            page.unbusy();
        }

        Ok(written)
    }

    fn page_allocator(&self) -> &Arc<PageAllocator> {
        &self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach_vm::vm_object::VmObject;
    use crate::mach_vm::vm_param::{Advice, VmProt};

    fn request(offset: u64, npages: usize, flags: PgoFlags) -> PageRequest {
        PageRequest {
            offset,
            npages,
            centeridx: 0,
            access: VmProt::READ,
            advice: Advice::Normal,
            flags,
        }
    }

    #[test]
    fn test_pagein_fills_from_store() {
        let zone = PageAllocator::new(8);
        let mut contents = alloc::vec![0u8; PAGE_SIZE + 10];
        contents[PAGE_SIZE + 3] = 42;
        let pager = VnodePager::with_contents(zone, &contents);
        let obj = VmObject::new(pager.clone(), contents.len() as u64);

        let mut guard = obj.lock();
        let pages = pager.get_pages(&mut guard, &request(0, 2, PgoFlags::SYNCIO)).unwrap();
        assert_eq!(pages.len(), 2);
        let second = pages[1].clone().unwrap();
        assert!(second.is_busy());
        assert_eq!(second.data()[3], 42);
        assert_eq!(second.offset(), PAGE_SIZE as u64);
        assert_eq!(pager.pagein.get(), 2);
        for pg in pages.iter().flatten() {
            pg.unbusy();
        }
    }

    #[test]
    fn test_overwrite_skips_read() {
        let zone = PageAllocator::new(8);
        let pager = VnodePager::with_contents(zone, &[7u8; PAGE_SIZE]);
        let obj = VmObject::new(pager.clone(), PAGE_SIZE as u64);

        let mut guard = obj.lock();
        let flags = PgoFlags::SYNCIO | PgoFlags::OVERWRITE;
        let pages = pager.get_pages(&mut guard, &request(0, 1, flags)).unwrap();
        let page = pages[0].clone().unwrap();
        assert!(page.has_flags(PageFlags::FAKE));
        assert_eq!(pager.pagein.get(), 0);
        page.unbusy();
    }

    #[test]
    fn test_eof_handling() {
        let zone = PageAllocator::new(8);
        let pager = VnodePager::with_contents(zone, &[1u8; 100]);
        let obj = VmObject::new(pager.clone(), 100);

        let mut guard = obj.lock();
        assert_eq!(
            pager.get_pages(&mut guard, &request(PAGE_SIZE as u64, 1, PgoFlags::SYNCIO)).err(),
            Some(PagerError::OutOfRange)
        );

        let pages = pager.get_pages(&mut guard, &request(0, 2, PgoFlags::SYNCIO)).unwrap();
        assert!(pages[0].is_some());
        assert!(pages[1].is_none());
        pages[0].as_ref().unwrap().unbusy();

        let flags = PgoFlags::SYNCIO | PgoFlags::PASTEOF;
        let pages = pager.get_pages(&mut guard, &request(PAGE_SIZE as u64, 1, flags)).unwrap();
        assert!(pages[0].is_some());
        pages[0].as_ref().unwrap().unbusy();
    }

    #[test]
    fn test_put_pages_writes_dirty() {
        let zone = PageAllocator::new(8);
        let pager = VnodePager::new(zone);
        let obj = VmObject::new(pager.clone(), 10);

        {
            let mut guard = obj.lock();
            let flags = PgoFlags::SYNCIO | PgoFlags::PASTEOF | PgoFlags::OVERWRITE;
            let pages = pager.get_pages(&mut guard, &request(0, 1, flags)).unwrap();
            let page = pages[0].clone().unwrap();
            page.data()[..4].copy_from_slice(b"abcd");
            page.set_dirty();
            page.unbusy();
        }

        assert_eq!(obj.flush(), Ok(1));
        let store = pager.store_snapshot();
        assert_eq!(store.len(), 10);
        assert_eq!(&store[..4], b"abcd");
        // Clean now
        assert_eq!(obj.flush(), Ok(0));

        let mut guard = obj.lock();
        pager.put_pages(&mut guard, 0, 10, PgoFlags::FREE).unwrap();
        assert_eq!(guard.resident_count(), 0);
    }
}
