//! Integration tests for the `compact_pool` package.
//!
//! These tests drive the pool the way a caller placing real payloads would:
//! storage is acquired through the pool, payloads are written and read back
//! through handles, and every scenario is run across a grid of block
//! size/count combinations so both tiny and large arenas are covered.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::cast_possible_truncation,
    clippy::float_cmp,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::alloc::Layout;
use std::ptr::NonNull;

use compact_pool::{CompactPool, Error, Handle};

/// The size/count grid the scenarios run over. Each pair builds a pool of
/// exactly `size * count` bytes that fits `count` blocks of `size` bytes.
const PARAMS: &[(usize, usize)] = &[
    (1, 1),
    (1, 24),
    (3, 1),
    (7, 4),
    (7, 15),
    (10, 10),
    (256, 1),
    (256, 256),
];

fn pool_of(size: usize, count: usize) -> CompactPool {
    CompactPool::builder().capacity(size * count).build()
}

fn block_layout(size: usize) -> Layout {
    Layout::from_size_align(size, 1).expect("valid test layout")
}

/// Fills a block with a pattern derived from a seed, one byte per offset.
fn write_pattern(address: NonNull<u8>, size: usize, seed: u8) {
    for offset in 0..size {
        unsafe {
            address.add(offset).write(seed.wrapping_add(offset as u8));
        }
    }
}

/// Verifies a block still carries the pattern written by `write_pattern`.
fn check_pattern(address: NonNull<u8>, size: usize, seed: u8) {
    for offset in 0..size {
        unsafe {
            assert_eq!(
                address.add(offset).read(),
                seed.wrapping_add(offset as u8),
                "payload byte {offset} changed"
            );
        }
    }
}

#[test]
fn single_block_round_trip() {
    for &(size, count) in PARAMS {
        let mut pool = pool_of(size, count);

        let handle = pool.allocate(block_layout(size)).unwrap();
        let address = pool.address_of(handle).unwrap();
        write_pattern(address, size, 112);
        check_pattern(address, size, 112);

        pool.deallocate(handle).unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.total_free(), pool.capacity());
    }
}

#[test]
fn fill_to_capacity_then_fail_then_reuse() {
    for &(size, count) in PARAMS {
        let mut pool = pool_of(size, count);
        let layout = block_layout(size);

        let handles: Vec<Handle> = (0..count)
            .map(|i| {
                let handle = pool.allocate(layout).unwrap();
                write_pattern(pool.address_of(handle).unwrap(), size, 199_u8.wrapping_add(i as u8));
                handle
            })
            .collect();

        assert_eq!(pool.total_free(), 0);

        // The pool is byte-exact full; the next request fails, twice, without
        // disturbing anything.
        assert!(matches!(
            pool.allocate(layout),
            Err(Error::OutOfCapacity { .. })
        ));
        assert!(matches!(
            pool.allocate(layout),
            Err(Error::OutOfCapacity { .. })
        ));

        for (i, handle) in handles.iter().enumerate() {
            check_pattern(
                pool.address_of(*handle).unwrap(),
                size,
                199_u8.wrapping_add(i as u8),
            );
            pool.deallocate(*handle).unwrap();
        }

        // A full free/refill cycle works.
        let again = pool.allocate(layout).unwrap();
        pool.deallocate(again).unwrap();
    }
}

#[test]
fn mixed_sizes_fill_exactly() {
    // Interleave two block sizes until the pool is exhausted, mirroring how
    // real payload mixes share an arena.
    for &(size, count) in PARAMS {
        let mut pool = pool_of(size, count);
        let other_size = 24_usize;

        let mut small = Vec::new();
        let mut large = Vec::new();
        let mut available = pool.capacity();

        while available >= size || available >= other_size {
            if available >= other_size {
                let handle = pool.allocate(block_layout(other_size)).unwrap();
                write_pattern(pool.address_of(handle).unwrap(), other_size, 0x1f);
                large.push(handle);
                available -= other_size;
            }
            if available >= size {
                let handle = pool.allocate(block_layout(size)).unwrap();
                write_pattern(pool.address_of(handle).unwrap(), size, 0x7b);
                small.push(handle);
                available -= size;
            }
        }

        assert_eq!(pool.total_free(), available);
        assert!(matches!(
            pool.allocate(block_layout(size.max(other_size))),
            Err(Error::OutOfCapacity { .. })
        ));

        for handle in &large {
            check_pattern(pool.address_of(*handle).unwrap(), other_size, 0x1f);
            pool.deallocate(*handle).unwrap();
        }
        for handle in &small {
            check_pattern(pool.address_of(*handle).unwrap(), size, 0x7b);
            pool.deallocate(*handle).unwrap();
        }

        assert_eq!(pool.total_free(), pool.capacity());
    }
}

#[test]
fn fragmentation_is_rescued_by_compaction() {
    // Fill the pool, free every other block, then allocate blocks of a
    // different size. Thanks to compaction, allocation keeps succeeding as
    // long as the request fits in aggregate free space - and the surviving
    // payloads come through every relocation bit-identical.
    for &(size, count) in PARAMS {
        let mut pool = pool_of(size, count);
        let layout = block_layout(size);

        let mut survivors: Vec<Option<Handle>> = (0..count)
            .map(|_| Some(pool.allocate(layout).unwrap()))
            .collect();

        for (i, slot) in survivors.iter().enumerate() {
            write_pattern(
                pool.address_of(slot.unwrap()).unwrap(),
                size,
                0x5a_u8.wrapping_add(i as u8),
            );
        }

        let mut available = 0;
        for slot in survivors.iter_mut().step_by(2) {
            pool.deallocate(slot.take().unwrap()).unwrap();
            available += size;
        }

        // Refill the freed space with blocks of an unrelated size. Each
        // allocation may trigger compaction; none may fail while it fits.
        let refill_size = 13_usize;
        let mut refills = Vec::new();
        let mut refill_seed = 0_u8;
        while available >= refill_size {
            let handle = pool
                .allocate(block_layout(refill_size))
                .expect("request fits in aggregate free space");
            write_pattern(pool.address_of(handle).unwrap(), refill_size, refill_seed);
            refills.push((handle, refill_seed));
            refill_seed = refill_seed.wrapping_add(1);
            available -= refill_size;
        }

        for (i, slot) in survivors.iter().enumerate() {
            if let Some(handle) = slot {
                check_pattern(
                    pool.address_of(*handle).unwrap(),
                    size,
                    0x5a_u8.wrapping_add(i as u8),
                );
            }
        }
        for &(handle, seed) in &refills {
            check_pattern(pool.address_of(handle).unwrap(), refill_size, seed);
        }
    }
}

#[test]
fn pointer_like_payload_survives_relocation() {
    // A payload carrying a pointer and an immutable float, stored as raw
    // bytes and moved by compaction. The pool treats it as an opaque byte
    // run; the pointer inside stays meaningful because it points outside
    // the arena.
    #[repr(C)]
    struct Complex {
        a: i32,
        b: *const u8,
        c: f64,
    }

    let shared = 64_u8;

    let mut pool = CompactPool::builder().capacity(96).build();
    let layout = Layout::new::<Complex>();

    let doomed = pool.allocate(block_layout(8)).unwrap();
    let handle = pool.allocate(layout).unwrap();
    unsafe {
        pool.address_of(handle)
            .unwrap()
            .cast::<Complex>()
            .write(Complex {
                a: -511,
                b: &raw const shared,
                c: 0.05,
            });
    }

    // Freeing the leading block and requesting more than any single run
    // forces the Complex payload to slide down.
    pool.deallocate(doomed).unwrap();
    let rest = pool.total_free();
    let filler = pool.allocate(block_layout(rest)).unwrap();

    let value = unsafe { pool.address_of(handle).unwrap().cast::<Complex>().read() };
    assert_eq!(value.a, -511);
    assert_eq!(unsafe { value.b.read() }, 64);
    assert_eq!(value.c, 0.05);

    pool.deallocate(filler).unwrap();
    pool.deallocate(handle).unwrap();
}

#[test]
fn twenty_four_byte_pool_fills_exactly() {
    let mut pool = CompactPool::builder().capacity(24).build();
    let one = block_layout(1);

    let handles: Vec<Handle> = (0..24).map(|_| pool.allocate(one).unwrap()).collect();

    assert!(matches!(
        pool.allocate(one),
        Err(Error::OutOfCapacity {
            requested: 1,
            available: 0
        })
    ));

    pool.deallocate(handles[11]).unwrap();
    assert!(pool.allocate(one).is_ok());
}

#[test]
fn two_live_blocks_compact_into_one_run() {
    // Params size=7, count=4: fill, free blocks 0 and 2, then ask for a
    // 14-byte block. Only compaction can produce the contiguous run.
    let mut pool = CompactPool::builder().capacity(28).build();
    let seven = block_layout(7);

    let handles: Vec<Handle> = (0..4).map(|_| pool.allocate(seven).unwrap()).collect();
    write_pattern(pool.address_of(handles[1]).unwrap(), 7, 10);
    write_pattern(pool.address_of(handles[3]).unwrap(), 7, 30);

    pool.deallocate(handles[0]).unwrap();
    pool.deallocate(handles[2]).unwrap();

    assert_eq!(pool.total_free(), 14);
    assert_eq!(pool.largest_free_run(), 7);

    let big = pool.allocate(block_layout(14)).unwrap();

    assert_eq!(pool.total_free(), 0);
    check_pattern(pool.address_of(handles[1]).unwrap(), 7, 10);
    check_pattern(pool.address_of(handles[3]).unwrap(), 7, 30);
    assert!(pool.address_of(big).is_ok());
}

#[test]
fn double_free_and_stale_dereference_are_detected() {
    let mut pool = CompactPool::builder().capacity(64).build();

    let handle = pool.allocate(block_layout(16)).unwrap();
    pool.deallocate(handle).unwrap();

    // Both misuses fail the same way, both times.
    assert!(matches!(pool.deallocate(handle), Err(Error::InvalidHandle)));
    assert!(matches!(pool.deallocate(handle), Err(Error::InvalidHandle)));
    assert!(matches!(pool.address_of(handle), Err(Error::InvalidHandle)));
    assert!(matches!(pool.address_of(handle), Err(Error::InvalidHandle)));

    // A stale handle does not alias storage reused by a new allocation.
    let fresh = pool.allocate(block_layout(16)).unwrap();
    assert!(matches!(pool.address_of(handle), Err(Error::InvalidHandle)));
    assert!(pool.address_of(fresh).is_ok());
}

#[test]
fn capacity_is_conserved_through_arbitrary_churn() {
    let mut pool = CompactPool::builder().capacity(240).build();

    let mut live: Vec<(Handle, usize)> = Vec::new();
    let mut requested = 0_usize;

    // A deterministic churn: allocate blocks of rotating sizes, freeing the
    // oldest whenever the caller-side running total would overflow capacity.
    // Per the aggregate guarantee, no allocation in this sequence may fail.
    for step in 0..200 {
        let size = [16, 7, 24, 3, 40][step % 5];

        while requested + size > pool.capacity() {
            let (oldest, oldest_size) = live.remove(0);
            pool.deallocate(oldest).unwrap();
            requested -= oldest_size;
        }

        let handle = pool
            .allocate(block_layout(size))
            .expect("running total never exceeds capacity");
        live.push((handle, size));
        requested += size;

        // The free counter always mirrors the caller's own accounting.
        assert_eq!(pool.total_free(), pool.capacity() - requested);
        assert!(pool.largest_free_run() <= pool.total_free());
    }

    for (handle, _) in live {
        pool.deallocate(handle).unwrap();
    }
    assert_eq!(pool.total_free(), pool.capacity());
    assert!(pool.is_empty());
}

#[test]
fn pinned_allocation_keeps_its_address_through_compaction() {
    let mut pool = CompactPool::builder().capacity(64).build();

    // A pinned block at the arena start does not fence off any free space,
    // so compaction can still deliver the full aggregate guarantee while
    // packing the unpinned survivors up against it.
    let pinned = pool.allocate(block_layout(8)).unwrap();
    let doomed = pool.allocate(block_layout(8)).unwrap();
    let survivor = pool.allocate(block_layout(8)).unwrap();

    pool.pin(pinned).unwrap();
    write_pattern(pool.address_of(pinned).unwrap(), 8, 77);
    write_pattern(pool.address_of(survivor).unwrap(), 8, 88);

    let address_before = pool.address_of(pinned).unwrap();

    // Freeing the middle block leaves 48 free bytes in runs of 8 and 40;
    // the 48-byte request forces a compaction around the pin.
    pool.deallocate(doomed).unwrap();
    assert_eq!(pool.total_free(), 48);
    assert_eq!(pool.largest_free_run(), 40);

    let big = pool.allocate(block_layout(48)).unwrap();

    assert_eq!(pool.address_of(pinned).unwrap(), address_before);
    check_pattern(pool.address_of(pinned).unwrap(), 8, 77);
    check_pattern(pool.address_of(survivor).unwrap(), 8, 88);

    pool.deallocate(big).unwrap();
    pool.unpin(pinned).unwrap();
    pool.deallocate(pinned).unwrap();
    pool.deallocate(survivor).unwrap();
}
