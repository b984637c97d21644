//! Window pool configuration

use crate::mach_vm::memory_object::PAGER_MAX_PAGES;
use crate::mach_vm::ubc::error::UbcError;
use crate::mach_vm::vm_page::PAGE_SHIFT;

/// Largest supported window size shift
pub const UBC_MAX_WINSHIFT: u32 = 16;

/// Consecutive faults a single byte access may take before giving up
pub const UBC_MAX_FAULT_RETRIES: u32 = 3;

/// Default number of windows
pub const UBC_NWINS: usize = 1024;

/// Default window size shift (8KB windows)
pub const UBC_WINSHIFT: u32 = 13;

/// Default base of the window address range
pub const UBC_KVA_BASE: u64 = 0xFFFF_9000_0000_0000;

/// Window pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UbcConfig {
    /// Number of windows in the pool
    pub nwins: usize,
    /// log2 of the window size
    pub winshift: u32,
    /// Number of cache colors (recycling queues), a power of two
    pub ncolors: usize,
    /// Virtually indexed caches: restrict mapping protection to the access
    pub vivt_cache: bool,
    /// Start of the window address range
    pub kva_base: u64,
    /// Relax rounds to pause when a pager asks to be retried
    pub pause_spins: u32,
}

impl Default for UbcConfig {
    fn default() -> Self {
        Self {
            nwins: UBC_NWINS,
            winshift: UBC_WINSHIFT,
            ncolors: 1,
            vivt_cache: false,
            kva_base: UBC_KVA_BASE,
            pause_spins: 64,
        }
    }
}

impl UbcConfig {
    /// Window size in bytes
    pub const fn winsize(&self) -> usize {
        1 << self.winshift
    }

    /// Pages per window
    pub const fn pages_per_window(&self) -> usize {
        1 << (self.winshift as usize - PAGE_SHIFT)
    }

    /// Size of the whole window address range
    pub fn kva_size(&self) -> u64 {
        (self.nwins as u64) << self.winshift
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), UbcError> {
        if self.nwins == 0 {
            return Err(UbcError::InvalidConfig("nwins must be non-zero"));
        }
        if (self.winshift as usize) < PAGE_SHIFT || self.winshift > UBC_MAX_WINSHIFT {
            return Err(UbcError::InvalidConfig("winshift out of range"));
        }
        if self.pages_per_window() > PAGER_MAX_PAGES {
            return Err(UbcError::InvalidConfig("window larger than a pager request"));
        }
        if !self.ncolors.is_power_of_two() || self.ncolors > self.nwins {
            return Err(UbcError::InvalidConfig("ncolors must be a power of two <= nwins"));
        }
        if self.kva_base & ((1u64 << self.winshift) - 1) != 0 {
            return Err(UbcError::InvalidConfig("kva_base not window aligned"));
        }
        if self.kva_base.checked_add(self.kva_size()).is_none() {
            return Err(UbcError::InvalidConfig("window range wraps"));
        }
        Ok(())
    }
}
