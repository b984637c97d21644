//! Transfers through windows
//!
//! `copy` moves bytes between an object and a `Uio`, one window at a time:
//! acquire, copy, release, advance. `zerorange` does the same with zeroes.

use alloc::sync::Arc;

use crate::kern::uio::{Uio, UioRw};
use crate::mach_vm::ubc::error::{ShortTransfer, UbcError};
use crate::mach_vm::ubc::pool::UbcPool;
use crate::mach_vm::ubc::window::{ReleaseMode, UbcFlags};
use crate::mach_vm::vm_object::VmObject;
use crate::mach_vm::vm_param::Advice;

impl UbcPool {
    /// Copy up to `todo` bytes between `obj` and `uio`
    ///
    /// The direction comes from `uio` and must agree with `flags`
    /// (`READ` for reads, `WRITE` for writes). With `OVERWRITE` the caller
    /// promises to replace every byte of the range, so no page is read in
    /// first. With `ONESHOT` each window is invalidated on release.
    ///
    /// Stops at the first error; `ShortTransfer::transferred` says how far
    /// it got.
    pub fn copy(
        &self,
        obj: &Arc<VmObject>,
        uio: &mut Uio<'_>,
        todo: usize,
        advice: Advice,
        flags: UbcFlags,
    ) -> Result<usize, ShortTransfer> {
        let required = match uio.rw() {
            UioRw::Read => UbcFlags::READ,
            UioRw::Write => UbcFlags::WRITE,
        };
        if !flags.contains(required) {
            return Err(ShortTransfer {
                transferred: 0,
                error: UbcError::DirectionMismatch,
            });
        }

        let overwrite = uio.rw() == UioRw::Write && flags.contains(UbcFlags::OVERWRITE);
        let flags = if overwrite {
            flags
        } else {
            flags - UbcFlags::OVERWRITE
        };
        let mode = ReleaseMode::from(flags);
        let start = uio.resid();
        let mut todo = todo.min(start);

        while todo > 0 {
            let win = self
                .acquire(obj, uio.offset(), todo, advice, flags)
                .map_err(|error| ShortTransfer {
                    transferred: start - uio.resid(),
                    error,
                })?;
            let bytelen = win.len();

            match win.uiomove(uio) {
                Ok(moved) => {
                    win.release(mode);
                    todo -= moved.min(todo);
                    if moved < bytelen {
                        break;
                    }
                }
                Err(error) => {
                    if overwrite {
                        // Pages were never read in; don't expose them
                        if let Err(e) = win.zero(0, bytelen) {
                            log::warn!("ubc: zero-fill after failed overwrite: {}", e);
                        }
                    }
                    win.release(mode);
                    return Err(ShortTransfer {
                        transferred: start - uio.resid(),
                        error,
                    });
                }
            }
        }

        Ok(start - uio.resid())
    }

    /// Zero `len` bytes of `obj` starting at `offset`
    pub fn zerorange(
        &self,
        obj: &Arc<VmObject>,
        mut offset: u64,
        mut len: usize,
        mode: ReleaseMode,
    ) -> Result<(), UbcError> {
        while len > 0 {
            let win = self.acquire(obj, offset, len, Advice::Normal, UbcFlags::WRITE)?;
            let bytelen = win.len();
            let result = win.zero(0, bytelen);
            win.release(mode);
            result?;

            offset += bytelen as u64;
            len -= bytelen;
        }
        Ok(())
    }
}
