//! Shared fixtures for the buffer cache integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ubc_r::*;

/// A pool together with the pieces tests want to inspect
pub struct Fixture {
    pub pool: UbcPool,
    pub pmap: Arc<KernelPmap>,
    pub zone: Arc<PageAllocator>,
}

/// Pool of `nwins` windows of `1 << winshift` bytes
pub fn fixture(nwins: usize, winshift: u32) -> Fixture {
    let zone = PageAllocator::new(1024);
    let pmap = KernelPmap::new();
    let config = UbcConfig {
        nwins,
        winshift,
        ..UbcConfig::default()
    };
    let pool = UbcPool::new(config, pmap.clone(), zone.clone()).expect("pool config");
    Fixture { pool, pmap, zone }
}

/// Object backed by a vnode pager holding `contents`
pub fn object_with(zone: &Arc<PageAllocator>, contents: &[u8]) -> (Arc<VmObject>, Arc<VnodePager>) {
    let pager = VnodePager::with_contents(zone.clone(), contents);
    let obj = VmObject::new(pager.clone(), contents.len() as u64);
    (obj, pager)
}

/// Deterministic test pattern
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Write `data` at `offset` through the pool
pub fn write_at(pool: &UbcPool, obj: &Arc<VmObject>, offset: u64, data: &[u8], flags: UbcFlags) -> Result<usize, ShortTransfer> {
    let mut uio = Uio::for_write(offset, data);
    pool.copy(obj, &mut uio, data.len(), Advice::Normal, flags)
}

/// Read `len` bytes at `offset` through the pool
pub fn read_at(pool: &UbcPool, obj: &Arc<VmObject>, offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let mut uio = Uio::for_read(offset, &mut buf);
    let n = pool
        .copy(obj, &mut uio, len, Advice::Normal, UbcFlags::READ)
        .expect("read copy");
    assert_eq!(n, len);
    drop(uio);
    buf
}
