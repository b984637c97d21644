//! Scatter/Gather I/O Descriptor
//!
//! Based on the BSD `struct uio` carried by Mach-derived kernels.
//! A `Uio` describes the caller's side of a transfer: a list of buffer
//! segments, the object offset the transfer starts at, the number of bytes
//! still to move and the direction.
//!
//! `uiomove()` advances the descriptor as it copies, so after an error the
//! descriptor records exactly how far the transfer got.

use alloc::vec::Vec;

use crate::kern::copyio::{self, CopyError, CopyResult};

/// Direction of a transfer, from the object's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UioRw {
    /// Object bytes flow into the caller's buffers
    Read,
    /// Caller bytes flow into the object
    Write,
}

/// One caller buffer segment
#[derive(Debug)]
pub enum IoSegment<'a> {
    /// Kernel buffer, readable and writable
    Kernel(&'a mut [u8]),
    /// Kernel buffer that may only be copied from
    KernelRo(&'a [u8]),
    /// Raw caller range, validated on every copy
    User { base: usize, len: usize },
}

impl<'a> IoSegment<'a> {
    /// Describe a raw caller range
    ///
    /// # Safety
    /// If the range passes caller-address validation it must stay valid
    /// for reads and writes of `len` bytes for as long as the segment is
    /// used.
    pub unsafe fn user(base: *mut u8, len: usize) -> Self {
        IoSegment::User {
            base: base as usize,
            len,
        }
    }

    /// Segment length in bytes
    pub fn len(&self) -> usize {
        match self {
            IoSegment::Kernel(buf) => buf.len(),
            IoSegment::KernelRo(buf) => buf.len(),
            IoSegment::User { len, .. } => *len,
        }
    }

    /// Is the segment empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `kbuf` into the segment at `off`
    fn copy_to(&mut self, off: usize, kbuf: &[u8]) -> CopyResult {
        match self {
            IoSegment::Kernel(buf) => {
                buf[off..off + kbuf.len()].copy_from_slice(kbuf);
                Ok(kbuf.len())
            }
            IoSegment::KernelRo(_) => Err(CopyError::Protection),
            IoSegment::User { base, .. } => {
                let dst = base.wrapping_add(off) as *mut u8;
                // SAFETY: validity of the range was promised in `IoSegment::user`
                unsafe { copyio::copyout(kbuf, dst) }
            }
        }
    }

    /// Copy from the segment at `off` into `kbuf`
    fn copy_from(&self, off: usize, kbuf: &mut [u8]) -> CopyResult {
        let n = kbuf.len();
        match self {
            IoSegment::Kernel(buf) => {
                kbuf.copy_from_slice(&buf[off..off + n]);
                Ok(n)
            }
            IoSegment::KernelRo(buf) => {
                kbuf.copy_from_slice(&buf[off..off + n]);
                Ok(n)
            }
            IoSegment::User { base, .. } => {
                let src = base.wrapping_add(off) as *const u8;
                // SAFETY: validity of the range was promised in `IoSegment::user`
                unsafe { copyio::copyin(src, kbuf) }
            }
        }
    }
}

/// Transfer descriptor
#[derive(Debug)]
pub struct Uio<'a> {
    segments: Vec<IoSegment<'a>>,
    seg_idx: usize,
    seg_off: usize,
    offset: u64,
    resid: usize,
    rw: UioRw,
}

impl<'a> Uio<'a> {
    /// Create a descriptor over `segments` starting at object `offset`
    pub fn new(rw: UioRw, offset: u64, segments: Vec<IoSegment<'a>>) -> Self {
        let resid = segments.iter().map(IoSegment::len).sum();
        Self {
            segments,
            seg_idx: 0,
            seg_off: 0,
            offset,
            resid,
            rw,
        }
    }

    /// Read `buf.len()` object bytes at `offset` into `buf`
    pub fn for_read(offset: u64, buf: &'a mut [u8]) -> Self {
        let mut segments = Vec::with_capacity(1);
        segments.push(IoSegment::Kernel(buf));
        Self::new(UioRw::Read, offset, segments)
    }

    /// Write `buf` into the object at `offset`
    pub fn for_write(offset: u64, buf: &'a [u8]) -> Self {
        let mut segments = Vec::with_capacity(1);
        segments.push(IoSegment::KernelRo(buf));
        Self::new(UioRw::Write, offset, segments)
    }

    /// Bytes still to transfer
    pub fn resid(&self) -> usize {
        self.resid
    }

    /// Object offset of the next byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Transfer direction
    pub fn rw(&self) -> UioRw {
        self.rw
    }

    /// Move up to `kbuf.len()` bytes between `kbuf` and the caller segments
    ///
    /// For `UioRw::Read` `kbuf` is the source, for `UioRw::Write` it is the
    /// destination. On error the descriptor has advanced past every byte
    /// that was moved before the failing segment.
    pub fn uiomove(&mut self, kbuf: &mut [u8]) -> CopyResult {
        let want = kbuf.len().min(self.resid);
        let mut done = 0;

        while done < want {
            let seg = match self.segments.get_mut(self.seg_idx) {
                Some(seg) => seg,
                None => return Err(CopyError::InvalidArg),
            };
            let avail = seg.len() - self.seg_off;
            if avail == 0 {
                self.seg_idx += 1;
                self.seg_off = 0;
                continue;
            }

            let n = avail.min(want - done);
            let chunk = &mut kbuf[done..done + n];
            match self.rw {
                UioRw::Read => seg.copy_to(self.seg_off, chunk)?,
                UioRw::Write => seg.copy_from(self.seg_off, chunk)?,
            };

            self.seg_off += n;
            self.offset += n as u64;
            self.resid -= n;
            done += n;
        }

        Ok(done)
    }
}
