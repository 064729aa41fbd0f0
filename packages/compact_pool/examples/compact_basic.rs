//! Basic usage example for `CompactPool`.
//!
//! This example demonstrates the acquire/use/release lifecycle: requesting
//! raw storage, constructing a payload in it, resolving the handle back to
//! an address, and returning the storage to the pool.

use std::alloc::Layout;

use compact_pool::CompactPool;

fn main() -> Result<(), compact_pool::Error> {
    // Create a pool with a fixed one-kilobyte arena.
    let mut pool = CompactPool::builder().capacity(1024).build();

    println!("Created CompactPool with capacity: {}", pool.capacity());

    // Acquire storage for three u64 values.
    let layout = Layout::new::<u64>();
    let first = pool.allocate(layout)?;
    let second = pool.allocate(layout)?;
    let third = pool.allocate(layout)?;

    println!(
        "Allocated 3 blocks; {} of {} bytes free",
        pool.total_free(),
        pool.capacity()
    );

    // Construct payloads in place. The pool hands out raw storage; writing
    // the values is our job.
    for (handle, value) in [
        (first, 0xdeadbeef_u64),
        (second, 0xcafebabe_u64),
        (third, 0xfeedface_u64),
    ] {
        let address = pool.address_of(handle)?;
        // SAFETY: The storage is valid for a u64 and exclusively ours.
        unsafe { address.cast::<u64>().write(value) };
    }

    // Handles are plain Copy values; every copy names the same allocation.
    let stored = second;
    let address = pool.address_of(stored)?;
    // SAFETY: The storage holds the u64 we wrote above.
    let value = unsafe { address.cast::<u64>().read() };
    println!("Read back through a copied handle: {value:#x}");
    assert_eq!(value, 0xcafebabe);

    // Release one block; its bytes immediately merge with free neighbors.
    pool.deallocate(second)?;
    println!(
        "After one deallocation: {} bytes free, {} live allocations",
        pool.total_free(),
        pool.len()
    );

    // The retired handle - and the copy of it - are now rejected.
    assert!(pool.address_of(stored).is_err());
    println!("Stale handle correctly rejected");

    pool.deallocate(first)?;
    pool.deallocate(third)?;

    assert!(pool.is_empty());
    println!("CompactPool example completed successfully!");

    Ok(())
}
