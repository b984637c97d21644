//! Kern subsystem - Core kernel primitives
//!
//! Based on Mach4 kern/ directory
//! Contains the scheduling, counting and caller-copy services the VM layer
//! is built on.

pub mod copyio;
pub mod counters;
pub mod sched_prim;
pub mod uio;

pub use copyio::{copyin, copyout, CopyError, CopyResult, UserRange};
pub use counters::{CounterSnapshot, EvCounter, UbcStats};
pub use sched_prim::{kpause, set_block_hook, BlockHook, WaitEvent, WaitReason, WaitToken};
pub use uio::{IoSegment, Uio, UioRw};
