//! Demonstrates the aggregate-free-space guarantee.
//!
//! A fragmented pool - plenty of free bytes, none of them contiguous -
//! still satisfies a large request, because the pool relocates live
//! allocations to merge the scattered free space before placing the block.

use std::alloc::Layout;

use compact_pool::CompactPool;

fn main() -> Result<(), compact_pool::Error> {
    let mut pool = CompactPool::builder().capacity(160).build();
    let block = Layout::from_size_align(16, 1).expect("valid layout");

    // Fill the pool with ten 16-byte blocks.
    let handles: Vec<_> = (0..10)
        .map(|_| pool.allocate(block))
        .collect::<Result<_, _>>()?;

    // Stamp each surviving block so we can prove relocation preserves bytes.
    for (i, handle) in handles.iter().enumerate().skip(1).step_by(2) {
        let stamp = u8::try_from(i).expect("ten blocks fit in u8");
        let address = pool.address_of(*handle)?;
        // SAFETY: The block is 16 bytes of our own storage.
        unsafe { address.write_bytes(stamp, 16) };
    }

    // Free every other block: 80 bytes free, largest single run 16.
    for handle in handles.iter().step_by(2) {
        pool.deallocate(*handle)?;
    }

    println!(
        "Fragmented: {} bytes free, largest contiguous run {}",
        pool.total_free(),
        pool.largest_free_run()
    );
    assert_eq!(pool.total_free(), 80);
    assert_eq!(pool.largest_free_run(), 16);

    // An 80-byte request exceeds every single free run, but fits the
    // aggregate - so it must succeed.
    let big = pool.allocate(Layout::from_size_align(80, 1).expect("valid layout"))?;

    println!(
        "80-byte allocation succeeded; {} bytes free, largest run {}",
        pool.total_free(),
        pool.largest_free_run()
    );
    assert_eq!(pool.total_free(), 0);

    // The survivors were relocated, not altered.
    for (i, handle) in handles.iter().enumerate().skip(1).step_by(2) {
        let stamp = u8::try_from(i).expect("ten blocks fit in u8");
        let address = pool.address_of(*handle)?;
        for offset in 0..16 {
            // SAFETY: The block still holds the bytes we stamped above.
            assert_eq!(unsafe { address.add(offset).read() }, stamp);
        }
    }
    println!("All surviving payloads intact after relocation");

    pool.deallocate(big)?;
    for handle in handles.iter().skip(1).step_by(2) {
        pool.deallocate(*handle)?;
    }

    println!("Defragmentation example completed successfully!");

    Ok(())
}
