//! Window pool: hash index, recycling and acquire/release
//!
//! All window records, the hash index and the recycling queues sit behind
//! one pool lock. The lock is held only for lookups and list updates; it
//! is never held across a pager call or a byte copy.

use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::Mutex;

use crate::kern::counters::UbcStats;
use crate::kern::sched_prim::{WaitEvent, WaitReason};
use crate::mach_vm::ubc::config::UbcConfig;
use crate::mach_vm::ubc::error::UbcError;
use crate::mach_vm::ubc::inactive::{InactiveQueues, QueueLink};
use crate::mach_vm::ubc::window::{
    Binding, BindingKey, Claims, ReleaseMode, UbcFlags, UbcWinFlags, UbcWindow, Window,
};
use crate::mach_vm::pmap::Pmap;
use crate::mach_vm::vm_object::VmObject;
use crate::mach_vm::vm_page::{round_page, trunc_page, PageAllocator, PageFlags, PAGE_SIZE};
use crate::mach_vm::vm_param::Advice;

/// State guarded by the pool lock
#[derive(Debug)]
pub(super) struct PoolInner {
    pub(super) windows: Vec<Window>,
    pub(super) links: Vec<QueueLink>,
    pub(super) queues: InactiveQueues,
    pub(super) hash: HashMap<BindingKey, usize>,
}

/// An invariant `audit()` found broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("window {window}: {reason}")]
pub struct AuditFailure {
    pub window: usize,
    pub reason: &'static str,
}

/// The window pool
pub struct UbcPool {
    config: UbcConfig,
    pmap: Arc<dyn Pmap>,
    allocator: Arc<PageAllocator>,
    pub(super) inner: Mutex<PoolInner>,
    /// Posted on every release
    pub(super) released: WaitEvent,
    stats: UbcStats,
}

impl core::fmt::Debug for UbcPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UbcPool")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl UbcPool {
    /// Build a pool of `config.nwins` unbound windows
    pub fn new(
        config: UbcConfig,
        pmap: Arc<dyn Pmap>,
        allocator: Arc<PageAllocator>,
    ) -> Result<Self, UbcError> {
        config.validate()?;

        let mut windows = Vec::with_capacity(config.nwins);
        windows.resize_with(config.nwins, Window::default);
        let mut links = alloc::vec![QueueLink::default(); config.nwins];
        let mut queues = InactiveQueues::new(config.ncolors);
        for i in 0..config.nwins {
            queues.insert_tail(&mut links, i & (config.ncolors - 1), i);
        }

        log::debug!(
            "ubc: {} windows of {:#x} bytes at {:#x}, {} colors",
            config.nwins,
            config.winsize(),
            config.kva_base,
            config.ncolors
        );

        Ok(Self {
            config,
            pmap,
            allocator,
            inner: Mutex::new(PoolInner {
                windows,
                links,
                queues,
                hash: HashMap::with_capacity(config.nwins),
            }),
            released: WaitEvent::new("ubc_release"),
            stats: UbcStats::new(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &UbcConfig {
        &self.config
    }

    pub fn stats(&self) -> &UbcStats {
        &self.stats
    }

    pub fn pmap(&self) -> &Arc<dyn Pmap> {
        &self.pmap
    }

    pub fn allocator(&self) -> &Arc<PageAllocator> {
        &self.allocator
    }

    /// Start address of window `index`
    pub fn window_va(&self, index: usize) -> u64 {
        self.config.kva_base + ((index as u64) << self.config.winshift)
    }

    /// Window index holding `va`, if it lies in the pool's range
    pub fn window_index(&self, va: u64) -> Option<usize> {
        let rel = va.checked_sub(self.config.kva_base)?;
        if rel >= self.config.kva_size() {
            return None;
        }
        Some((rel >> self.config.winshift) as usize)
    }

    /// Recycling queue serving window-aligned object offset `offset`
    fn queue_of(&self, offset: u64) -> usize {
        ((offset >> self.config.winshift) as usize) & (self.config.ncolors - 1)
    }

    /// Recycling queue window `index` lives on
    fn color_of(&self, index: usize) -> usize {
        index & (self.config.ncolors - 1)
    }

    /// Number of windows currently referenced
    pub fn referenced(&self) -> usize {
        let inner = self.inner.lock();
        inner.windows.iter().filter(|w| w.refcount > 0).count()
    }

    /// Threads blocked waiting for a free window
    pub fn waiters(&self) -> u32 {
        self.released.waiters()
    }

    // ========================================================================
    // Acquire
    // ========================================================================

    /// Reference a window mapping `obj` at `offset`
    ///
    /// The returned handle covers at most `len` bytes and never crosses a
    /// window boundary. Blocks while every window that could serve the
    /// offset is referenced. An `OVERWRITE` acquire also blocks until it
    /// can take the window with no other holder, then pins its pages; the
    /// caller must not already hold that window.
    pub fn acquire(
        &self,
        obj: &Arc<VmObject>,
        offset: u64,
        len: usize,
        advice: Advice,
        flags: UbcFlags,
    ) -> Result<UbcWindow<'_>, UbcError> {
        let winsize = self.config.winsize();
        let umap_offset = offset & !(winsize as u64 - 1);
        let slot_offset = (offset - umap_offset) as usize;
        let len = len.min(winsize - slot_offset);
        let key = (obj.id(), umap_offset);
        let q = self.queue_of(umap_offset);
        let overwrite = flags.contains(UbcFlags::OVERWRITE);

        let (mut inner, index) = loop {
            let mut inner = self.inner.lock();
            let hit = inner.hash.get(&key).copied();
            if let Some(index) = hit {
                if overwrite && inner.windows[index].refcount > 0 {
                    let token = self.released.assert_wait();
                    drop(inner);
                    self.stats.busy_waits.inc();
                    log::debug!("ubc: window {} shared, overwrite waiting", index);
                    self.released.thread_block(token, WaitReason::WindowBusy);
                    continue;
                }
                self.stats.wincachehit.inc();
                break (inner, index);
            }

            let Some(victim) = inner.queues.first(q) else {
                let token = self.released.assert_wait();
                drop(inner);
                self.stats.alloc_waits.inc();
                log::debug!("ubc: no free window on queue {}, waiting", q);
                self.released.thread_block(token, WaitReason::WindowFree);
                continue;
            };

            self.stats.wincachemiss.inc();
            self.rebind(&mut inner, victim, obj, umap_offset);
            break (inner, victim);
        };
        let color = self.color_of(index);

        let PoolInner {
            windows,
            links,
            queues,
            ..
        } = &mut *inner;
        let win = &mut windows[index];
        if win.refcount == 0 {
            queues.remove(links, color, index);
        }
        win.refcount += 1;
        win.advice = advice;

        let mut claims = Claims::default();
        if flags.intersects(UbcFlags::WRITE | UbcFlags::OVERWRITE) {
            debug_assert!(
                win.writelen == 0,
                "window {} already has a write range",
                index
            );
            win.writeoff = slot_offset;
            win.writelen = len;
            claims.writer = true;
        }

        if overwrite {
            debug_assert_eq!(win.refcount, 1);
            let first = trunc_page(slot_offset as u64) as usize;
            let end = round_page((slot_offset + len) as u64) as usize;
            win.pinned = Some(first..end);
            win.flags.insert(UbcWinFlags::PAGES_LOCKED);
            claims.pinned = true;

            // Cached managed mappings would shadow the pinned pages
            if win.flags.contains(UbcWinFlags::MAPPING_CACHED) {
                win.flags.remove(UbcWinFlags::MAPPING_CACHED);
                let va = self.window_va(index);
                self.pmap.remove(va, va + winsize as u64);
                self.pmap.update();
            }
        }
        drop(inner);

        let window = UbcWindow::new(self, index, slot_offset, len, claims);
        if overwrite {
            // Dropping `window` on error releases the reference and the pin
            self.faultbusy(obj, index, umap_offset, slot_offset, len, advice)?;
            self.stats.faultbusy.inc();
        }
        Ok(window)
    }

    /// Move window `index` from its old binding (if any) to `(obj, offset)`
    fn rebind(&self, inner: &mut PoolInner, index: usize, obj: &Arc<VmObject>, offset: u64) {
        let win = &mut inner.windows[index];
        debug_assert_eq!(win.refcount, 0);

        if let Some(old) = win.binding.take() {
            inner.hash.remove(&old.key());
            log::trace!(
                "ubc: window {} evicted from {:?}+{:#x}",
                index,
                old.id,
                old.offset
            );
        }
        if win.flags.contains(UbcWinFlags::MAPPING_CACHED) {
            win.flags.remove(UbcWinFlags::MAPPING_CACHED);
            let va = self.window_va(index);
            self.pmap.remove(va, va + self.config.winsize() as u64);
            self.pmap.update();
        }

        win.binding = Some(Binding {
            object: Arc::downgrade(obj),
            id: obj.id(),
            offset,
        });
        inner.hash.insert((obj.id(), offset), index);
        log::trace!("ubc: window {} bound to {:?}+{:#x}", index, obj.id(), offset);
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Drop one reference on window `index`, undoing what `claims` owns
    pub(super) fn release_index(&self, index: usize, mode: ReleaseMode, claims: Claims) {
        if claims.pinned {
            let (binding, writeoff, writelen) = {
                let inner = self.inner.lock();
                let win = &inner.windows[index];
                (win.binding.clone(), win.writeoff, win.writelen)
            };
            self.unpin_pages(index, binding.as_ref(), writeoff, writelen);
        }

        let mut inner = self.inner.lock();
        let color = self.color_of(index);
        let PoolInner {
            windows,
            links,
            queues,
            hash,
        } = &mut *inner;
        let win = &mut windows[index];

        if claims.pinned {
            win.flags.remove(UbcWinFlags::PAGES_LOCKED);
            win.pinned = None;
        }
        if claims.writer {
            win.writeoff = 0;
            win.writelen = 0;
        }
        debug_assert!(win.refcount > 0, "window {} over-released", index);
        win.refcount = win.refcount.saturating_sub(1);

        if win.refcount == 0 {
            if mode == ReleaseMode::Invalidate {
                let va = self.window_va(index);
                self.pmap.remove(va, va + self.config.winsize() as u64);
                self.pmap.update();
                if let Some(old) = win.binding.take() {
                    hash.remove(&old.key());
                }
                win.flags.remove(UbcWinFlags::MAPPING_CACHED);
                queues.insert_head(links, color, index);
                log::trace!("ubc: window {} invalidated", index);
            } else {
                win.flags.insert(UbcWinFlags::MAPPING_CACHED);
                queues.insert_tail(links, color, index);
            }
        }
        drop(inner);

        self.released.thread_wakeup();
    }

    /// Finish an overwrite: zero the tail, mark pages modified, unmap, unbusy
    ///
    /// Only the pinned range holds unmanaged mappings, so only it is
    /// `kremove`d; managed mappings other holders faulted in elsewhere in
    /// the window stay.
    fn unpin_pages(&self, index: usize, binding: Option<&Binding>, writeoff: usize, writelen: usize) {
        let endoff = writeoff as u64 + writelen as u64;
        let start = trunc_page(writeoff as u64);
        let end = round_page(endoff);
        let va = self.window_va(index);

        let object = binding.and_then(|b| b.object.upgrade());
        let _guard = object.as_ref().map(|obj| obj.lock());

        let mut pinned = Vec::new();
        let mut off = start;
        while off < end {
            if let Some(m) = self.pmap.extract(va + off) {
                let page = m.page;
                if endoff > off && endoff < off + PAGE_SIZE as u64 {
                    page.data()[(endoff - off) as usize..].fill(0);
                }
                page.clear_flags(PageFlags::FAKE);
                page.set_dirty();
                page.activate();
                pinned.push(page);
            }
            off += PAGE_SIZE as u64;
        }
        self.pmap.kremove(va + start, end - start);
        self.pmap.update();

        for page in pinned {
            page.unbusy();
        }
    }

    // ========================================================================
    // Purge
    // ========================================================================

    /// Drop every cached binding of `obj`
    ///
    /// Fails with `WindowBusy`, changing nothing, if any window bound to
    /// the object is referenced. Returns the number of windows unbound.
    pub fn purge(&self, obj: &VmObject) -> Result<usize, UbcError> {
        let id = obj.id();
        let mut inner = self.inner.lock();

        let bound: Vec<usize> = inner
            .windows
            .iter()
            .enumerate()
            .filter(|(_, w)| w.binding.as_ref().is_some_and(|b| b.id == id))
            .map(|(i, _)| i)
            .collect();
        if bound.iter().any(|&i| inner.windows[i].refcount > 0) {
            return Err(UbcError::WindowBusy);
        }

        let PoolInner { windows, hash, .. } = &mut *inner;
        for &index in &bound {
            let va = self.window_va(index);
            self.pmap.remove(va, va + self.config.winsize() as u64);
            let win = &mut windows[index];
            win.flags.remove(UbcWinFlags::MAPPING_CACHED);
            if let Some(old) = win.binding.take() {
                hash.remove(&old.key());
            }
        }
        drop(inner);

        if !bound.is_empty() {
            self.pmap.update();
            self.stats.purged.add(bound.len() as u64);
            log::debug!("ubc: purged {} windows of {:?}", bound.len(), id);
        }
        Ok(bound.len())
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Check the pool's structural invariants
    pub fn audit(&self) -> Result<(), AuditFailure> {
        let inner = self.inner.lock();
        let fail = |window, reason| Err(AuditFailure { window, reason });

        for (key, &index) in inner.hash.iter() {
            match inner.windows.get(index).and_then(|w| w.binding.as_ref()) {
                Some(b) if b.key() == *key => {}
                _ => return fail(index, "hash entry does not match binding"),
            }
        }

        let mut idle = 0;
        for (index, win) in inner.windows.iter().enumerate() {
            if let Some(b) = &win.binding {
                if inner.hash.get(&b.key()) != Some(&index) {
                    return fail(index, "bound window missing from hash");
                }
            }
            let queued = inner.links[index].is_queued();
            if win.refcount == 0 {
                idle += 1;
                if !queued {
                    return fail(index, "idle window not queued");
                }
                if win.writelen != 0 {
                    return fail(index, "idle window has a write range");
                }
                if win.flags.contains(UbcWinFlags::PAGES_LOCKED) {
                    return fail(index, "idle window has pinned pages");
                }
            } else {
                if queued {
                    return fail(index, "referenced window queued");
                }
                if win.binding.is_none() {
                    return fail(index, "referenced window unbound");
                }
            }
            if win.flags.contains(UbcWinFlags::PAGES_LOCKED) != win.pinned.is_some() {
                return fail(index, "pinned range out of step with PAGES_LOCKED");
            }
            if win.flags.contains(UbcWinFlags::MAPPING_CACHED) && win.binding.is_none() {
                return fail(index, "cached mapping on unbound window");
            }
        }

        let mut seen = 0;
        for q in 0..inner.queues.ncolors() {
            let limit = self.config.nwins + 1;
            for index in inner.queues.iter(&inner.links, q).take(limit) {
                if self.color_of(index) != q {
                    return fail(index, "window on wrong color queue");
                }
                seen += 1;
            }
        }
        if seen != idle || inner.queues.total() != idle {
            return fail(usize::MAX, "queue length does not match idle windows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach_vm::pmap::KernelPmap;
    use crate::mach_vm::vnode_pager::VnodePager;

    fn small_pool(nwins: usize) -> (UbcPool, Arc<PageAllocator>) {
        let zone = PageAllocator::new(256);
        let config = UbcConfig {
            nwins,
            ..UbcConfig::default()
        };
        let pool = UbcPool::new(config, KernelPmap::new(), zone.clone()).unwrap();
        (pool, zone)
    }

    fn object(zone: &Arc<PageAllocator>, size: usize) -> Arc<VmObject> {
        VmObject::new(VnodePager::with_contents(zone.clone(), &alloc::vec![0u8; size]), size as u64)
    }

    #[test]
    fn test_new_pool_is_consistent() {
        let (pool, _) = small_pool(4);
        assert_eq!(pool.audit(), Ok(()));
        assert_eq!(pool.referenced(), 0);
        assert_eq!(pool.window_index(pool.window_va(3) + 5), Some(3));
        assert_eq!(pool.window_index(pool.window_va(4)), None);
        assert_eq!(pool.window_index(0), None);
    }

    #[test]
    fn test_acquire_clamps_to_window() {
        let (pool, zone) = small_pool(4);
        let obj = object(&zone, 64 * 1024);
        let winsize = pool.config().winsize();

        let win = pool
            .acquire(&obj, winsize as u64 - 6, 100, Advice::Normal, UbcFlags::READ)
            .unwrap();
        assert_eq!(win.len(), 6);
        assert_eq!(win.slot_offset(), winsize - 6);
        assert_eq!(win.va(), pool.window_va(win.index()) + (winsize - 6) as u64);
        win.release(ReleaseMode::KeepCached);

        let win = pool
            .acquire(&obj, winsize as u64, 94, Advice::Normal, UbcFlags::READ)
            .unwrap();
        assert_eq!(win.len(), 94);
        assert_eq!(win.slot_offset(), 0);
    }

    #[test]
    fn test_hit_shares_window() {
        let (pool, zone) = small_pool(4);
        let obj = object(&zone, 16384);

        let a = pool.acquire(&obj, 0, 10, Advice::Normal, UbcFlags::READ).unwrap();
        let b = pool.acquire(&obj, 100, 10, Advice::Normal, UbcFlags::READ).unwrap();
        assert_eq!(a.index(), b.index());
        assert_eq!(pool.stats().snapshot().wincachehit, 1);
        assert_eq!(pool.stats().snapshot().wincachemiss, 1);
        assert_eq!(pool.referenced(), 1);
        assert_eq!(pool.audit(), Ok(()));
        drop(a);
        drop(b);
        assert_eq!(pool.referenced(), 0);
        assert_eq!(pool.audit(), Ok(()));
    }

    #[test]
    fn test_release_keep_cached_then_invalidate() {
        let (pool, zone) = small_pool(2);
        let obj = object(&zone, 16384);

        let win = pool.acquire(&obj, 0, 1, Advice::Normal, UbcFlags::READ).unwrap();
        let index = win.index();
        win.release(ReleaseMode::KeepCached);
        {
            let inner = pool.inner.lock();
            assert!(inner.windows[index].flags.contains(UbcWinFlags::MAPPING_CACHED));
            assert!(inner.windows[index].binding.is_some());
            // Most recently released goes to the tail
            assert_ne!(inner.queues.first(0), Some(index));
        }

        let win = pool.acquire(&obj, 0, 1, Advice::Normal, UbcFlags::READ).unwrap();
        assert_eq!(win.index(), index);
        win.release(ReleaseMode::Invalidate);
        {
            let inner = pool.inner.lock();
            assert!(inner.windows[index].binding.is_none());
            assert!(inner.hash.is_empty());
            assert_eq!(inner.queues.first(0), Some(index));
        }
        assert_eq!(pool.audit(), Ok(()));
    }

    #[test]
    fn test_write_range_recorded_and_cleared() {
        let (pool, zone) = small_pool(2);
        let obj = object(&zone, 16384);

        let win = pool.acquire(&obj, 8192 + 300, 50, Advice::Normal, UbcFlags::WRITE).unwrap();
        {
            let inner = pool.inner.lock();
            let w = &inner.windows[win.index()];
            assert_eq!((w.writeoff, w.writelen), (300, 50));
        }
        let index = win.index();
        drop(win);
        let inner = pool.inner.lock();
        assert_eq!(inner.windows[index].writelen, 0);
    }

    fn patterned(zone: &Arc<PageAllocator>, size: usize) -> Arc<VmObject> {
        let contents: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        VmObject::new(VnodePager::with_contents(zone.clone(), &contents), size as u64)
    }

    #[test]
    fn test_overwrite_waits_for_other_holders() {
        let (pool, zone) = small_pool(2);
        let obj = object(&zone, 16384);

        let reader = pool.acquire(&obj, 4096, 10, Advice::Normal, UbcFlags::READ).unwrap();
        let index = reader.index();

        std::thread::scope(|s| {
            let writer = s.spawn(|| {
                pool.acquire(&obj, 0, PAGE_SIZE, Advice::Normal, UbcFlags::WRITE | UbcFlags::OVERWRITE)
                    .unwrap()
            });
            while pool.waiters() == 0 {
                std::thread::yield_now();
            }
            assert_eq!(pool.referenced(), 1);
            assert!(!pool.inner.lock().windows[index].flags.contains(UbcWinFlags::PAGES_LOCKED));
            drop(reader);

            let writer = writer.join().unwrap();
            assert_eq!(writer.index(), index);
            assert!(writer.is_pinned());
        });

        assert!(pool.stats().snapshot().busy_waits >= 1);
        assert_eq!(pool.referenced(), 0);
        assert_eq!(pool.audit(), Ok(()));
    }

    #[test]
    fn test_reader_release_keeps_overwrite_pinned() {
        let (pool, zone) = small_pool(2);
        let obj = patterned(&zone, 8192);

        let writer = pool
            .acquire(&obj, 0, PAGE_SIZE, Advice::Normal, UbcFlags::WRITE | UbcFlags::OVERWRITE)
            .unwrap();
        let reader = pool.acquire(&obj, 4096, 10, Advice::Normal, UbcFlags::READ).unwrap();
        assert_eq!(reader.index(), writer.index());

        // The page next to the pinned one faults normally
        let mut buf = [0u8; 10];
        reader.read(0, &mut buf).unwrap();
        let expected: Vec<u8> = (4096..4106).map(|i| (i % 251) as u8).collect();
        assert_eq!(&buf[..], &expected[..]);

        reader.release(ReleaseMode::KeepCached);
        let m = pool.pmap().extract(writer.va()).unwrap();
        assert!(m.unmanaged);
        assert!(m.page.is_busy());
        {
            let inner = pool.inner.lock();
            let win = &inner.windows[writer.index()];
            assert!(win.flags.contains(UbcWinFlags::PAGES_LOCKED));
            assert_eq!((win.writeoff, win.writelen), (0, PAGE_SIZE));
        }

        writer.write(0, &[7u8; PAGE_SIZE]).unwrap();
        let va = writer.va();
        writer.release(ReleaseMode::KeepCached);

        assert!(pool.pmap().extract(va).is_none());
        let page = obj.lock().lookup(0).cloned().unwrap();
        assert!(!page.is_busy());
        assert!(page.is_dirty());
        assert_eq!(page.data()[0], 7);
        assert_eq!(pool.audit(), Ok(()));
    }

    #[test]
    fn test_overwrite_drops_cached_mappings() {
        let (pool, zone) = small_pool(2);
        let obj = patterned(&zone, 8192);

        let win = pool.acquire(&obj, 0, 8192, Advice::Normal, UbcFlags::READ).unwrap();
        let mut buf = [0u8; 8192];
        win.read(0, &mut buf).unwrap();
        let (index, base) = (win.index(), win.va());
        win.release(ReleaseMode::KeepCached);
        assert!(pool.pmap().extract(base + PAGE_SIZE as u64).is_some());

        let writer = pool
            .acquire(&obj, 0, PAGE_SIZE, Advice::Normal, UbcFlags::WRITE | UbcFlags::OVERWRITE)
            .unwrap();
        assert_eq!(writer.index(), index);
        {
            let inner = pool.inner.lock();
            let flags = inner.windows[index].flags;
            assert!(flags.contains(UbcWinFlags::PAGES_LOCKED));
            assert!(!flags.contains(UbcWinFlags::MAPPING_CACHED));
        }
        assert!(pool.pmap().extract(base).unwrap().unmanaged);
        assert!(pool.pmap().extract(base + PAGE_SIZE as u64).is_none());

        writer.release(ReleaseMode::KeepCached);
        assert_eq!(pool.audit(), Ok(()));
    }

    #[test]
    fn test_purge() {
        let (pool, zone) = small_pool(4);
        let obj = object(&zone, 32768);
        let other = object(&zone, 8192);

        for off in [0u64, 8192, 16384] {
            pool.acquire(&obj, off, 1, Advice::Normal, UbcFlags::READ).unwrap();
        }
        drop(pool.acquire(&other, 0, 1, Advice::Normal, UbcFlags::READ).unwrap());

        let held = pool.acquire(&obj, 0, 1, Advice::Normal, UbcFlags::READ).unwrap();
        assert_eq!(pool.purge(&obj), Err(UbcError::WindowBusy));
        assert_eq!(pool.inner.lock().hash.len(), 4);
        drop(held);

        assert_eq!(pool.purge(&obj), Ok(3));
        assert_eq!(pool.inner.lock().hash.len(), 1);
        assert_eq!(pool.stats().snapshot().purged, 3);
        assert_eq!(pool.purge(&obj), Ok(0));
        assert_eq!(pool.audit(), Ok(()));
    }

    #[test]
    fn test_colors_partition_windows() {
        let zone = PageAllocator::new(64);
        let config = UbcConfig {
            nwins: 4,
            ncolors: 2,
            ..UbcConfig::default()
        };
        let pool = UbcPool::new(config, KernelPmap::new(), zone.clone()).unwrap();
        let obj = object(&zone, 65536);
        let winsize = config.winsize() as u64;

        for n in 0..4u64 {
            let win = pool.acquire(&obj, n * winsize, 1, Advice::Normal, UbcFlags::READ).unwrap();
            assert_eq!(win.index() & 1, (n & 1) as usize);
        }
        assert_eq!(pool.audit(), Ok(()));
    }
}
