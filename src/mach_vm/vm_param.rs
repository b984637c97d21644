//! VM Parameters - Protection and Access Advice
//!
//! Based on Mach4 mach/vm_prot.h and the UVM advice values.

use bitflags::bitflags;

bitflags! {
    /// Memory protection / access type
    ///
    /// Used both for the protection a mapping is entered with and for the
    /// kind of access that raised a fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VmProt: u32 {
        /// Read access
        const READ = 1 << 0;
        /// Write access
        const WRITE = 1 << 1;
        /// Execute access
        const EXECUTE = 1 << 2;
        /// Read/write
        const DEFAULT = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl VmProt {
    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl Default for VmProt {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Access-pattern hint passed through to the pager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Advice {
    /// No particular pattern
    #[default]
    Normal = 0,
    /// Random access, no read-ahead
    Random = 1,
    /// Sequential access, read-ahead welcome
    Sequential = 2,
}
