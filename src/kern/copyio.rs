//! Caller Buffer Access
//!
//! `copyin`/`copyout` move bytes between a raw caller range and a kernel
//! slice. A bad caller address comes back as `CopyError` rather than a
//! fault, so a transfer can stop short and report how far it got.
//!
//! A caller range is accepted when it is non-null, does not wrap, and lies
//! below `USER_VA_LIMIT`. Validation cannot prove the memory is mapped;
//! that promise is made by whoever built the range, which is why the entry
//! points are `unsafe`.

use core::ptr;

use crate::mach_vm::vm_page::PAGE_SIZE;

/// First address above the caller address range
#[cfg(target_arch = "aarch64")]
pub const USER_VA_LIMIT: usize = 0x0001_0000_0000_0000;
#[cfg(target_arch = "x86_64")]
pub const USER_VA_LIMIT: usize = 0x0000_8000_0000_0000;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const USER_VA_LIMIT: usize = (usize::MAX >> 1) + 1;

/// Largest single copy: one window's worth of pages
pub const COPYIO_MAX_SIZE: usize = 16 * PAGE_SIZE;

/// Bytes copied, or why the copy failed
pub type CopyResult = Result<usize, CopyError>;

/// Errors that can occur during copy operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum CopyError {
    #[error("bad caller address")]
    BadAddress = -1,
    #[error("page fault in caller buffer")]
    PageFault = -2,
    /// Copy into a buffer that may only be read
    #[error("caller buffer protection violation")]
    Protection = -3,
    #[error("copy too large")]
    TooLarge = -4,
    #[error("invalid copy argument")]
    InvalidArg = -5,
}

impl CopyError {
    /// kern_return_t compatible value
    pub fn to_kern_return(self) -> i32 {
        self as i32
    }
}

/// A caller range that passed address validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRange {
    base: usize,
    len: usize,
}

impl UserRange {
    /// Validate `[base, base + len)`
    pub fn check(base: usize, len: usize) -> Result<Self, CopyError> {
        if len > COPYIO_MAX_SIZE {
            return Err(CopyError::TooLarge);
        }
        if base == 0 {
            return Err(CopyError::BadAddress);
        }
        match base.checked_add(len) {
            Some(end) if end <= USER_VA_LIMIT => Ok(Self { base, len }),
            _ => Err(CopyError::BadAddress),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Copy `kernel_dst.len()` caller bytes at `user_src` into `kernel_dst`
///
/// # Safety
/// If `user_src` passes validation it must be valid for reads of
/// `kernel_dst.len()` bytes and must not overlap `kernel_dst`.
pub unsafe fn copyin(user_src: *const u8, kernel_dst: &mut [u8]) -> CopyResult {
    if kernel_dst.is_empty() {
        return Ok(0);
    }
    let range = UserRange::check(user_src as usize, kernel_dst.len())?;

    // SAFETY: validated above, validity promised by the caller
    unsafe {
        ptr::copy_nonoverlapping(user_src, kernel_dst.as_mut_ptr(), range.len());
    }
    Ok(range.len())
}

/// Copy `kernel_src` out to the caller range at `user_dst`
///
/// # Safety
/// If `user_dst` passes validation it must be valid for writes of
/// `kernel_src.len()` bytes and must not overlap `kernel_src`.
pub unsafe fn copyout(kernel_src: &[u8], user_dst: *mut u8) -> CopyResult {
    if kernel_src.is_empty() {
        return Ok(0);
    }
    let range = UserRange::check(user_dst as usize, kernel_src.len())?;

    // SAFETY: validated above, validity promised by the caller
    unsafe {
        ptr::copy_nonoverlapping(kernel_src.as_ptr(), user_dst, range.len());
    }
    Ok(range.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_range_check() {
        assert!(UserRange::check(0x1000, PAGE_SIZE).is_ok());
        assert_eq!(UserRange::check(0, 8), Err(CopyError::BadAddress));
        assert_eq!(
            UserRange::check(USER_VA_LIMIT - 4, 8),
            Err(CopyError::BadAddress)
        );
        assert_eq!(
            UserRange::check(usize::MAX - 2, 8),
            Err(CopyError::BadAddress)
        );
        assert_eq!(
            UserRange::check(0x1000, COPYIO_MAX_SIZE + 1),
            Err(CopyError::TooLarge)
        );
    }

    #[test]
    fn test_copyin_copyout() {
        let src = [1u8, 2, 3, 4];
        let mut kbuf = [0u8; 4];
        assert_eq!(unsafe { copyin(src.as_ptr(), &mut kbuf) }, Ok(4));
        assert_eq!(kbuf, src);

        let mut dst = [0u8; 4];
        assert_eq!(unsafe { copyout(&kbuf, dst.as_mut_ptr()) }, Ok(4));
        assert_eq!(dst, src);
    }

    #[test]
    fn test_null_caller_buffer() {
        let mut kbuf = [0u8; 4];
        assert_eq!(
            unsafe { copyin(core::ptr::null(), &mut kbuf) },
            Err(CopyError::BadAddress)
        );
        assert_eq!(
            unsafe { copyout(&kbuf, core::ptr::null_mut()) },
            Err(CopyError::BadAddress)
        );
        // Empty copies never look at the pointer
        assert_eq!(unsafe { copyin(core::ptr::null(), &mut []) }, Ok(0));
    }

    #[test]
    fn test_kern_return_codes() {
        assert_eq!(CopyError::BadAddress.to_kern_return(), -1);
        assert_eq!(CopyError::Protection.to_kern_return(), -3);
    }
}
