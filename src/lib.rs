//! Ubc_R - A unified buffer cache for a Rust Mach-style VM
//!
//! This crate provides the buffered-I/O fast path of a VM-integrated
//! storage stack: a fixed pool of kernel address windows that are bound on
//! demand to ranges of VM objects, so file data can be read and written
//! with plain copies while pages are faulted in through the object's pager.

#![no_std]

// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Kernel code often needs explicit casts between address and size types
#![allow(clippy::unnecessary_cast)]
// Manual ceiling division is clearer in page arithmetic
#![allow(clippy::manual_div_ceil)]
// Window accessors report length but emptiness is rarely meaningful
#![allow(clippy::len_without_is_empty)]

// Standard library replacement for no_std
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// Core kernel primitives
pub mod kern;

// Mach VM subsystem and the buffer cache
pub mod mach_vm;

pub use kern::copyio::CopyError;
pub use kern::sched_prim::{set_block_hook, BlockHook};
pub use kern::uio::{IoSegment, Uio, UioRw};
pub use mach_vm::memory_object::{PageRequest, Pager, PagerError, PgoFlags};
pub use mach_vm::pmap::{KernelPmap, Pmap, PmapError};
pub use mach_vm::ubc::{
    FailureSource, ReleaseMode, ShortTransfer, UbcConfig, UbcError, UbcFlags, UbcPool, UbcWindow,
};
pub use mach_vm::vm_object::{VmObject, VmObjectId};
pub use mach_vm::vm_page::{PageAllocator, PAGE_SIZE};
pub use mach_vm::vm_param::{Advice, VmProt};
pub use mach_vm::vnode_pager::VnodePager;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = "Ubc_R";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(NAME, "Ubc_R");
        assert!(!VERSION.is_empty());
    }
}
