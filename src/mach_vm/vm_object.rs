//! VM Object - Memory Object Abstraction
//!
//! Based on Mach4 vm/vm_object.h/c
//! A VM object is the backing store for cached file data. It owns:
//! - its identity (used to key window bindings)
//! - the object lock, which guards the resident page table and the size
//! - the pager that produces and accepts its pages
//!
//! ## Object Lock
//!
//! Pagers are called with the object lock held and may drop and retake it
//! while they sleep (for memory, or on a busy page). `ObjectGuard` is the
//! held lock; `ObjectGuard::unlocked()` is the only way to drop it
//! temporarily, so a pager always returns with the lock held again.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

use crate::mach_vm::memory_object::{Pager, PagerError, PgoFlags};
use crate::mach_vm::vm_page::PageRef;

// ============================================================================
// VM Object ID
// ============================================================================

/// VM Object ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmObjectId(pub u64);

impl VmObjectId {
    /// Null object ID
    pub const NULL: Self = Self(0);

    /// Allocate a fresh ID; IDs are never reused
    fn allocate() -> Self {
        static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Resident Pages
// ============================================================================

/// State protected by the object lock
#[derive(Debug, Default)]
pub struct ObjectPages {
    /// Resident pages keyed by page-aligned offset
    resident: BTreeMap<u64, PageRef>,
    /// Object size in bytes
    size: u64,
}

impl ObjectPages {
    /// Look up the resident page at `offset`
    pub fn lookup(&self, offset: u64) -> Option<&PageRef> {
        self.resident.get(&offset)
    }

    /// Insert a page, returning whatever page it displaced
    pub fn insert(&mut self, offset: u64, page: PageRef) -> Option<PageRef> {
        self.resident.insert(offset, page)
    }

    /// Remove the page at `offset`
    pub fn remove(&mut self, offset: u64) -> Option<PageRef> {
        self.resident.remove(&offset)
    }

    /// Resident pages in `[start, end)`
    pub fn range(&self, start: u64, end: u64) -> impl Iterator<Item = (&u64, &PageRef)> {
        self.resident.range(start..end)
    }

    /// Number of resident pages
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Object size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Set object size in bytes
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }
}

// ============================================================================
// Object Lock Guard
// ============================================================================

/// Held object lock
pub struct ObjectGuard<'a> {
    object: &'a VmObject,
    guard: Option<MutexGuard<'a, ObjectPages>>,
}

impl<'a> ObjectGuard<'a> {
    /// Object this lock belongs to
    pub fn object(&self) -> &'a VmObject {
        self.object
    }

    /// Run `f` with the object lock dropped, then take it again
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.guard = None;
        let r = f();
        self.guard = Some(self.object.vmobjlock.lock());
        r
    }
}

impl Deref for ObjectGuard<'_> {
    type Target = ObjectPages;

    fn deref(&self) -> &ObjectPages {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("object lock not held"),
        }
    }
}

impl DerefMut for ObjectGuard<'_> {
    fn deref_mut(&mut self) -> &mut ObjectPages {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!("object lock not held"),
        }
    }
}

// ============================================================================
// VM Object Structure
// ============================================================================

/// VM Object - backing store for cached data
pub struct VmObject {
    /// Object ID
    id: VmObjectId,

    /// Object lock
    vmobjlock: Mutex<ObjectPages>,

    /// Page provider
    pager: Arc<dyn Pager>,
}

impl core::fmt::Debug for VmObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmObject").field("id", &self.id).finish_non_exhaustive()
    }
}

impl VmObject {
    /// Create an object of `size` bytes served by `pager`
    pub fn new(pager: Arc<dyn Pager>, size: u64) -> Arc<Self> {
        let object = Arc::new(Self {
            id: VmObjectId::allocate(),
            vmobjlock: Mutex::new(ObjectPages {
                resident: BTreeMap::new(),
                size,
            }),
            pager,
        });
        log::trace!("vm_object: created {:?} size {:#x}", object.id, size);
        object
    }

    /// Object ID
    pub fn id(&self) -> VmObjectId {
        self.id
    }

    /// Take the object lock
    pub fn lock(&self) -> ObjectGuard<'_> {
        ObjectGuard {
            object: self,
            guard: Some(self.vmobjlock.lock()),
        }
    }

    /// Page provider
    pub fn pager(&self) -> &Arc<dyn Pager> {
        &self.pager
    }

    /// Object size in bytes
    pub fn size(&self) -> u64 {
        self.lock().size()
    }

    /// Set object size in bytes (extend or truncate the logical size)
    pub fn set_size(&self, size: u64) {
        self.lock().set_size(size);
    }

    /// Number of resident pages
    pub fn resident_count(&self) -> usize {
        self.lock().resident_count()
    }

    /// Write every dirty resident page back through the pager
    ///
    /// Returns the number of pages written.
    pub fn flush(&self) -> Result<usize, PagerError> {
        let mut guard = self.lock();
        let end = guard.size();
        self.pager.put_pages(&mut guard, 0, end, PgoFlags::CLEANIT | PgoFlags::SYNCIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach_vm::vm_page::{PageAllocator, VmPage};
    use crate::mach_vm::vnode_pager::VnodePager;

    #[test]
    fn test_object_ids_unique() {
        let zone = PageAllocator::new(4);
        let a = VmObject::new(VnodePager::new(zone.clone()), 0);
        let b = VmObject::new(VnodePager::new(zone), 0);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), VmObjectId::NULL);
    }

    #[test]
    fn test_size() {
        let zone = PageAllocator::new(4);
        let obj = VmObject::new(VnodePager::new(zone), 100);
        assert_eq!(obj.size(), 100);
        obj.set_size(8192);
        assert_eq!(obj.size(), 8192);
    }

    #[test]
    fn test_guard_unlocked_relocks() {
        let zone = PageAllocator::new(4);
        let obj = VmObject::new(VnodePager::new(zone), 0);
        let mut guard = obj.lock();
        guard.insert(0, Arc::new(VmPage::new(1)));

        // Lock is free inside the closure
        let count = guard.unlocked(|| obj.resident_count());
        assert_eq!(count, 1);
        assert!(guard.lookup(0).is_some());
        assert!(guard.remove(0).is_some());
        assert_eq!(guard.resident_count(), 0);
    }
}
