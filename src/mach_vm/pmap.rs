//! Physical Map (pmap) - Address-Space Primitives
//!
//! Based on Mach4 vm/pmap.h/c
//!
//! The pmap interface installs and removes translations from kernel
//! virtual addresses to physical pages. The buffer cache uses two kinds:
//!
//! - **Managed** mappings (`enter`/`remove`), entered by the fault handler
//!   and left in place as a soft cache after a window is released.
//! - **Unmanaged** mappings (`kenter_pa`/`kremove`), entered by the
//!   overwrite acquire path for pinned pages and always removed on release.
//!
//! ## Key Operations
//!
//! - `enter`: Install a managed mapping (may fail with `CANFAIL`)
//! - `kenter_pa`: Install an unmanaged mapping (never fails)
//! - `remove` / `kremove`: Remove mappings in a range
//! - `extract`: Look up the translation for an address
//! - `update`: Flush deferred work (TLB shootdowns)
//!
//! `KernelPmap` is a software implementation that keeps translations in a
//! table; the window byte accessors walk it like an MMU would.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::mach_vm::vm_page::{trunc_page, PageRef, PAGE_SIZE};
use crate::mach_vm::vm_param::VmProt;

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// pmap_enter flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PmapFlags: u32 {
        /// Return `ResourceShortage` instead of sleeping
        const CANFAIL = 0x0001;
        /// Wired mapping
        const WIRED = 0x0002;
    }
}

// ============================================================================
// Pmap Errors
// ============================================================================

/// Pmap operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PmapError {
    /// Out of page-table resources
    #[error("pmap resource shortage")]
    ResourceShortage,
    /// Address not mapped
    #[error("address not mapped")]
    NotMapped,
    /// Address not page aligned or outside the pmap
    #[error("bad pmap address")]
    BadAddress,
}

// ============================================================================
// Pmap Interface
// ============================================================================

/// A translation returned by `extract`
#[derive(Debug, Clone)]
pub struct PmapMapping {
    /// Physical page
    pub page: PageRef,
    /// Protection the mapping allows
    pub prot: VmProt,
    /// Entered with `kenter_pa`
    pub unmanaged: bool,
}

/// Address-space primitives consumed by the buffer cache
pub trait Pmap: Send + Sync {
    /// Enter a managed mapping of `page` at `va`
    fn enter(&self, va: u64, page: &PageRef, prot: VmProt, flags: PmapFlags) -> Result<(), PmapError>;

    /// Enter an unmanaged mapping of `page` at `va`
    fn kenter_pa(&self, va: u64, page: &PageRef, prot: VmProt);

    /// Remove managed mappings in `[start, end)`
    fn remove(&self, start: u64, end: u64);

    /// Remove unmanaged mappings in `[va, va + len)`
    fn kremove(&self, va: u64, len: u64);

    /// Look up the translation for `va`
    fn extract(&self, va: u64) -> Option<PmapMapping>;

    /// Process deferred operations
    fn update(&self) {}
}

// ============================================================================
// Pmap Statistics
// ============================================================================

/// Statistics for a pmap
#[derive(Debug, Default)]
pub struct PmapStats {
    /// Number of resident (managed) mappings
    pub resident_count: AtomicU32,
    /// Number of unmanaged mappings
    pub wired_count: AtomicU32,
    /// Number of update() calls
    pub updates: AtomicU64,
}

impl PmapStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resident(&self) -> u32 {
        self.resident_count.load(Ordering::Relaxed)
    }

    pub fn wired(&self) -> u32 {
        self.wired_count.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Software Kernel Pmap
// ============================================================================

#[derive(Debug, Clone)]
struct PmapEntry {
    page: PageRef,
    prot: VmProt,
    unmanaged: bool,
}

/// Software kernel pmap
#[derive(Debug)]
pub struct KernelPmap {
    /// Page-aligned va -> translation
    mappings: Mutex<BTreeMap<u64, PmapEntry>>,
    /// Managed mappings allowed at once (page-table pages stand-in)
    limit: Option<usize>,
    /// Statistics
    pub stats: PmapStats,
}

impl KernelPmap {
    /// Create a pmap with no mapping limit
    pub fn new() -> Arc<Self> {
        Self::with_limit(None)
    }

    /// Create a pmap that accepts at most `limit` managed mappings
    pub fn with_limit(limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            mappings: Mutex::new(BTreeMap::new()),
            limit,
            stats: PmapStats::new(),
        })
    }

    /// Is `va` mapped?
    pub fn is_mapped(&self, va: u64) -> bool {
        self.mappings.lock().contains_key(&trunc_page(va))
    }

    /// Number of mappings of either kind
    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().len()
    }

    /// Drop every mapping in `[start, end)` matching `unmanaged`
    fn remove_kind(&self, start: u64, end: u64, unmanaged: bool) {
        let mut map = self.mappings.lock();
        let victims: Vec<u64> = map
            .range(trunc_page(start)..end)
            .filter(|(_, e)| e.unmanaged == unmanaged)
            .map(|(va, _)| *va)
            .collect();
        for va in victims {
            map.remove(&va);
            if unmanaged {
                self.stats.wired_count.fetch_sub(1, Ordering::Relaxed);
            } else {
                self.stats.resident_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Install an entry, replacing and accounting for any previous one
    fn install(&self, va: u64, entry: PmapEntry) {
        let unmanaged = entry.unmanaged;
        let old = self.mappings.lock().insert(va, entry);
        match old {
            Some(old) if old.unmanaged => {
                self.stats.wired_count.fetch_sub(1, Ordering::Relaxed);
            }
            Some(_) => {
                self.stats.resident_count.fetch_sub(1, Ordering::Relaxed);
            }
            None => {}
        }
        if unmanaged {
            self.stats.wired_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.resident_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Pmap for KernelPmap {
    fn enter(&self, va: u64, page: &PageRef, prot: VmProt, flags: PmapFlags) -> Result<(), PmapError> {
        if va % PAGE_SIZE as u64 != 0 {
            return Err(PmapError::BadAddress);
        }
        if let Some(limit) = self.limit {
            let replacing = self.is_mapped(va);
            if !replacing && self.stats.resident() as usize >= limit {
                if flags.contains(PmapFlags::CANFAIL) {
                    return Err(PmapError::ResourceShortage);
                }
                log::warn!("pmap: mapping limit exceeded at {:#x}", va);
            }
        }

        self.install(
            va,
            PmapEntry {
                page: Arc::clone(page),
                prot,
                unmanaged: false,
            },
        );
        Ok(())
    }

    fn kenter_pa(&self, va: u64, page: &PageRef, prot: VmProt) {
        debug_assert!(va % PAGE_SIZE as u64 == 0);
        self.install(
            trunc_page(va),
            PmapEntry {
                page: Arc::clone(page),
                prot,
                unmanaged: true,
            },
        );
    }

    fn remove(&self, start: u64, end: u64) {
        self.remove_kind(start, end, false);
    }

    fn kremove(&self, va: u64, len: u64) {
        self.remove_kind(va, va + len, true);
    }

    fn extract(&self, va: u64) -> Option<PmapMapping> {
        self.mappings.lock().get(&trunc_page(va)).map(|e| PmapMapping {
            page: Arc::clone(&e.page),
            prot: e.prot,
            unmanaged: e.unmanaged,
        })
    }

    fn update(&self) {
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach_vm::vm_page::VmPage;

    #[test]
    fn test_enter_extract_remove() {
        let pmap = KernelPmap::new();
        let page = Arc::new(VmPage::new(1));

        pmap.enter(0x1000, &page, VmProt::READ, PmapFlags::CANFAIL).unwrap();
        let m = pmap.extract(0x1234).unwrap();
        assert!(Arc::ptr_eq(&m.page, &page));
        assert_eq!(m.prot, VmProt::READ);
        assert!(!m.unmanaged);
        assert_eq!(pmap.stats.resident(), 1);

        // Replacing keeps the count
        pmap.enter(0x1000, &page, VmProt::DEFAULT, PmapFlags::empty()).unwrap();
        assert_eq!(pmap.stats.resident(), 1);

        pmap.remove(0x0, 0x2000);
        assert!(pmap.extract(0x1000).is_none());
        assert_eq!(pmap.stats.resident(), 0);
    }

    #[test]
    fn test_unmanaged_mappings() {
        let pmap = KernelPmap::new();
        let page = Arc::new(VmPage::new(1));
        pmap.kenter_pa(0x4000, &page, VmProt::DEFAULT);
        assert_eq!(pmap.stats.wired(), 1);

        // remove() leaves unmanaged mappings alone
        pmap.remove(0x4000, 0x5000);
        assert!(pmap.is_mapped(0x4000));

        pmap.kremove(0x4000, PAGE_SIZE as u64);
        assert!(!pmap.is_mapped(0x4000));
        assert_eq!(pmap.stats.wired(), 0);
    }

    #[test]
    fn test_canfail_limit() {
        let pmap = KernelPmap::with_limit(Some(1));
        let page = Arc::new(VmPage::new(1));
        pmap.enter(0x1000, &page, VmProt::READ, PmapFlags::CANFAIL).unwrap();
        assert_eq!(
            pmap.enter(0x2000, &page, VmProt::READ, PmapFlags::CANFAIL),
            Err(PmapError::ResourceShortage)
        );
        assert_eq!(
            pmap.enter(0x2001, &page, VmProt::READ, PmapFlags::CANFAIL),
            Err(PmapError::BadAddress)
        );
    }
}
