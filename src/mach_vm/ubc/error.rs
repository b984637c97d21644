//! Buffer cache errors

use crate::kern::copyio::CopyError;
use crate::mach_vm::memory_object::PagerError;

/// Where a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// The backing object (pager) failed
    Object,
    /// The caller's buffer could not be accessed
    Buffer,
    /// The caller misused the interface
    Caller,
}

/// Buffer cache errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UbcError {
    /// Pager reported a hard error
    #[error("pager error: {0}")]
    Pager(#[from] PagerError),
    /// Caller buffer could not be copied to or from
    #[error("copy error: {0}")]
    Copy(#[from] CopyError),
    /// Access not allowed by the window's current state
    #[error("protection failure")]
    Protection,
    /// The object a window is bound to no longer exists
    #[error("backing object gone")]
    ObjectGone,
    /// Window (or object) is referenced by someone else
    #[error("window busy")]
    WindowBusy,
    /// Address is not inside a referenced window
    #[error("bad window address")]
    BadAddress,
    /// Page could not be made resident
    #[error("page unavailable")]
    PageUnavailable,
    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Transfer direction does not match the requested access
    #[error("transfer direction does not match access flags")]
    DirectionMismatch,
}

impl UbcError {
    /// Classify the failure
    pub fn failure_source(&self) -> FailureSource {
        match self {
            UbcError::Pager(_) | UbcError::ObjectGone | UbcError::PageUnavailable => {
                FailureSource::Object
            }
            UbcError::Copy(_) => FailureSource::Buffer,
            UbcError::Protection
            | UbcError::WindowBusy
            | UbcError::BadAddress
            | UbcError::InvalidConfig(_)
            | UbcError::DirectionMismatch => FailureSource::Caller,
        }
    }
}

/// A copy that stopped before moving every byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("short transfer after {transferred} bytes: {error}")]
pub struct ShortTransfer {
    /// Bytes moved before the failure
    pub transferred: usize,
    /// What stopped the transfer
    pub error: UbcError,
}
