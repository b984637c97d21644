//! Concurrency tests: binding uniqueness, exhaustion and parallel copies

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use ubc_r::*;

/// Poll `cond` until it holds or a generous deadline passes
fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_acquire_storm_binds_once() {
    let fx = fixture(8, 13);
    let (obj, _) = object_with(&fx.zone, &pattern(8192, 0));
    let seen = Mutex::new(Vec::new());

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..200 {
                    let win = fx
                        .pool
                        .acquire(&obj, 64, 16, Advice::Normal, UbcFlags::READ)
                        .unwrap();
                    seen.lock().unwrap().push(win.index());
                }
            });
        }
    });

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 1600);
    assert!(seen.iter().all(|&i| i == seen[0]));

    let snap = fx.pool.stats().snapshot();
    assert_eq!(snap.wincachemiss, 1);
    assert_eq!(snap.wincachehit, 1599);
    assert_eq!(fx.pool.referenced(), 0);
    assert_eq!(fx.pool.audit(), Ok(()));
}

#[test]
fn test_exhaustion_blocks_until_release() {
    let fx = fixture(4, 12);
    let (obj, _) = object_with(&fx.zone, &pattern(5 * 4096, 1));

    let mut held: Vec<_> = (0..4u64)
        .map(|i| {
            fx.pool
                .acquire(&obj, i * 4096, 1, Advice::Normal, UbcFlags::READ)
                .unwrap()
        })
        .collect();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let blocked = s.spawn(|| {
            let win = fx
                .pool
                .acquire(&obj, 4 * 4096, 1, Advice::Normal, UbcFlags::READ)
                .unwrap();
            done.store(true, Ordering::SeqCst);
            (win.index(), win.va())
        });

        assert!(wait_until(|| fx.pool.waiters() == 1));
        assert!(!done.load(Ordering::SeqCst));

        let freed = held[2].index();
        held.remove(2).release(ReleaseMode::KeepCached);

        let (index, va) = blocked.join().unwrap();
        assert_eq!(index, freed);
        assert_eq!(va, fx.pool.window_va(freed));
        drop(held);
    });

    assert!(fx.pool.stats().snapshot().alloc_waits >= 1);
    assert_eq!(fx.pool.referenced(), 0);
    assert_eq!(fx.pool.audit(), Ok(()));
}

#[test]
fn test_parallel_copies_through_small_pool() {
    let fx = fixture(2, 12);
    let len = 6 * 4096 + 123;
    let objects: Vec<_> = (0..4)
        .map(|_| {
            let (obj, _) = object_with(&fx.zone, &[]);
            obj.set_size(len as u64);
            obj
        })
        .collect();

    thread::scope(|s| {
        for (n, obj) in objects.iter().enumerate() {
            let pool = &fx.pool;
            s.spawn(move || {
                let data = pattern(len, n as u8);
                let flags = if n % 2 == 0 {
                    UbcFlags::WRITE | UbcFlags::OVERWRITE
                } else {
                    UbcFlags::WRITE
                };
                assert_eq!(write_at(pool, obj, 0, &data, flags), Ok(len));
                assert_eq!(read_at(pool, obj, 0, len), data);
            });
        }
    });

    for (n, obj) in objects.iter().enumerate() {
        assert_eq!(read_at(&fx.pool, obj, 0, len), pattern(len, n as u8));
    }
    assert_eq!(fx.pool.referenced(), 0);
    assert_eq!(fx.pool.audit(), Ok(()));
}

#[test]
fn test_overwrite_alongside_reader_of_same_window() {
    let fx = fixture(2, 13);
    let original = pattern(8192, 9);
    let (obj, _) = object_with(&fx.zone, &original);

    thread::scope(|s| {
        let reader = s.spawn(|| {
            for _ in 0..200 {
                assert_eq!(read_at(&fx.pool, &obj, 4096, 4096), original[4096..]);
            }
        });
        let writer = s.spawn(|| {
            for round in 0..50u8 {
                let data = pattern(4096, round);
                let flags = UbcFlags::WRITE | UbcFlags::OVERWRITE;
                assert_eq!(write_at(&fx.pool, &obj, 0, &data, flags), Ok(4096));
            }
        });
        reader.join().unwrap();
        writer.join().unwrap();
    });

    let mut expected = pattern(4096, 49);
    expected.extend_from_slice(&original[4096..]);
    assert_eq!(read_at(&fx.pool, &obj, 0, 8192), expected);
    assert_eq!(fx.pool.referenced(), 0);
    assert_eq!(fx.pool.audit(), Ok(()));
}

#[test]
fn test_empty_color_queue_blocks_despite_idle_windows() {
    let zone = PageAllocator::new(64);
    let config = UbcConfig {
        nwins: 4,
        winshift: 12,
        ncolors: 2,
        ..UbcConfig::default()
    };
    let pool = UbcPool::new(config, KernelPmap::new(), zone.clone()).unwrap();
    let (obj, _) = object_with(&zone, &pattern(8 * 4096, 2));

    // Offsets 0 and 2W both map to color 0, which has two windows
    let first = pool.acquire(&obj, 0, 1, Advice::Normal, UbcFlags::READ).unwrap();
    let second = pool.acquire(&obj, 2 * 4096, 1, Advice::Normal, UbcFlags::READ).unwrap();
    assert_eq!((first.index() & 1, second.index() & 1), (0, 0));
    let freed = second.index();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let blocked = s.spawn(|| {
            let win = pool.acquire(&obj, 4 * 4096, 1, Advice::Normal, UbcFlags::READ).unwrap();
            done.store(true, Ordering::SeqCst);
            win.index()
        });

        assert!(wait_until(|| pool.waiters() == 1));
        assert!(!done.load(Ordering::SeqCst));

        // Color 1 still serves its own offsets
        let odd = pool.acquire(&obj, 4096, 1, Advice::Normal, UbcFlags::READ).unwrap();
        assert_eq!(odd.index() & 1, 1);
        drop(odd);
        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));

        second.release(ReleaseMode::KeepCached);
        assert_eq!(blocked.join().unwrap(), freed);
    });

    drop(first);
    assert!(pool.stats().snapshot().alloc_waits >= 1);
    assert_eq!(pool.audit(), Ok(()));
}
