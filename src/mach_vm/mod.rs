//! Mach Virtual Memory Subsystem
//!
//! Based on Mach4 vm/ subsystem.
//! Provides the pieces the unified buffer cache is built from:
//! - vm_param: Protection and advice values
//! - vm_page: Physical pages and the page allocator
//! - vm_object: Memory objects (backing store abstraction)
//! - memory_object: Pager interface
//! - vnode_pager: In-memory pager
//! - pmap: Physical map (address-space primitives)
//! - ubc: The window cache itself

pub mod memory_object;
pub mod pmap;
pub mod ubc;
pub mod vm_object;
pub mod vm_page;
pub mod vm_param;
pub mod vnode_pager;

pub use memory_object::{PageList, PageRequest, Pager, PagerError, PgoFlags};
pub use pmap::{KernelPmap, Pmap, PmapError, PmapFlags, PmapMapping};
pub use vm_object::{ObjectGuard, VmObject, VmObjectId};
pub use vm_page::{PageAllocator, PageFlags, PageRef, VmPage, PAGE_SIZE};
pub use vm_param::{Advice, VmProt};
pub use vnode_pager::VnodePager;
