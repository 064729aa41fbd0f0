use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use crate::{
    Arena, CompactPoolBuilder, DropPolicy, Error, ExtentDirectory, Handle, HandleTable, Result,
};

/// A fixed-capacity memory pool that defragments itself.
///
/// `CompactPool` owns one contiguous arena of bytes, sized at construction
/// and never resized. Callers request raw blocks of any size and alignment
/// and release them in any order. The pool's defining guarantee is that **any
/// request no larger than the total free bytes succeeds**, no matter how
/// fragmented the free space is: when no single free run is big enough, the
/// pool relocates live allocations to merge the scattered free space into one
/// contiguous run, then places the block there.
///
/// Because live bytes can move, allocations are named by [`Handle`]s rather
/// than addresses. A handle keeps resolving to its allocation across any
/// number of relocations; the raw address behind it is obtained on demand via
/// [`address_of()`](Self::address_of) and is only guaranteed stable until the
/// next mutating call on the pool.
///
/// # Key features
///
/// - **Aggregate-free-space guarantee**: fragmentation never fails a request
///   that would fit in total free bytes
/// - **Stable handles**: address-independent names for allocations, with
///   use-after-free and double-free detection
/// - **Lazy compaction**: relocation work happens only when a request would
///   otherwise fail, never speculatively
/// - **Pinning**: individual allocations can be exempted from relocation
/// - **Byte-exact accounting**: bookkeeping lives outside the arena, so N
///   blocks of size S fit exactly in an N×S pool
///
/// # Raw storage only
///
/// The pool hands out uninitialized storage. Constructing payloads in it and
/// running their destructors before deallocation is the caller's
/// responsibility; the pool never inspects payload bytes except to move them
/// verbatim during compaction. Store only payloads for which a bitwise move
/// is safe, or [`pin()`](Self::pin) the ones for which it is not.
///
/// # Example
///
/// ```
/// use std::alloc::Layout;
///
/// use compact_pool::CompactPool;
///
/// let mut pool = CompactPool::builder().capacity(1024).build();
///
/// let handle = pool.allocate(Layout::new::<u64>())?;
///
/// // Construct the payload in place.
/// let address = pool.address_of(handle)?;
/// // SAFETY: The storage is valid for a u64 and exclusively ours.
/// unsafe { address.cast::<u64>().write(0x5a5a_5a5a) };
///
/// // ... later, read it back through the handle ...
/// let address = pool.address_of(handle)?;
/// // SAFETY: The storage holds the u64 we wrote above.
/// assert_eq!(unsafe { address.cast::<u64>().read() }, 0x5a5a_5a5a);
///
/// pool.deallocate(handle)?;
/// # Ok::<(), compact_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) and can be moved between threads, but
/// it is not thread-safe ([`Sync`]) and cannot be shared between threads
/// without external synchronization. Every operation runs to completion
/// before returning; compaction is part of the synchronous cost of
/// [`allocate()`](Self::allocate).
#[derive(Debug)]
pub struct CompactPool {
    arena: Arena,
    extents: ExtentDirectory,
    handles: HandleTable,

    /// Drop policy that determines how the pool handles live allocations
    /// when dropped.
    drop_policy: DropPolicy,
}

impl CompactPool {
    /// Creates a builder for configuring and constructing a [`CompactPool`].
    ///
    /// You must specify a byte capacity via
    /// [`capacity()`](CompactPoolBuilder::capacity) before calling
    /// [`build()`](CompactPoolBuilder::build).
    ///
    /// # Example
    ///
    /// ```
    /// use compact_pool::CompactPool;
    ///
    /// let pool = CompactPool::builder().capacity(4096).build();
    ///
    /// assert_eq!(pool.capacity(), 4096);
    /// assert!(pool.is_empty());
    /// ```
    #[inline]
    pub fn builder() -> CompactPoolBuilder {
        CompactPoolBuilder::new()
    }

    /// Creates a new [`CompactPool`] with the specified configuration.
    ///
    /// This method is used internally by the builder to construct the actual
    /// pool.
    #[must_use]
    pub(crate) fn new_inner(
        capacity: NonZero<usize>,
        alignment: NonZero<usize>,
        drop_policy: DropPolicy,
    ) -> Self {
        Self {
            arena: Arena::new(capacity, alignment),
            extents: ExtentDirectory::new(capacity.get()),
            handles: HandleTable::new(),
            drop_policy,
        }
    }

    /// Acquires a block of storage for the given layout and returns the
    /// handle that names it.
    ///
    /// The block occupies `layout.pad_to_align().size()` bytes of the arena.
    /// Placement is first-fit over the free extents; when no single free
    /// extent is large enough but the aggregate free space is, the pool
    /// compacts itself once and retries, so the request still succeeds.
    ///
    /// The returned handle stays valid until passed to
    /// [`deallocate()`](Self::deallocate), even if the block is later
    /// relocated by compaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfCapacity`] if the padded size exceeds the total
    /// free bytes. The pool is left unchanged and remains fully usable.
    ///
    /// # Panics
    ///
    /// Panics if `layout` has zero size, or if its alignment exceeds the
    /// arena alignment configured at construction (default 16). Both are
    /// caller contract violations, not runtime conditions.
    ///
    /// # Example
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use compact_pool::CompactPool;
    ///
    /// let mut pool = CompactPool::builder().capacity(16).build();
    /// let layout = Layout::from_size_align(8, 1).unwrap();
    ///
    /// let first = pool.allocate(layout)?;
    /// let second = pool.allocate(layout)?;
    ///
    /// // The pool is now byte-exact full.
    /// assert_eq!(pool.total_free(), 0);
    /// assert!(pool.allocate(layout).is_err());
    ///
    /// // Freeing either block makes room again.
    /// pool.deallocate(first)?;
    /// let third = pool.allocate(layout)?;
    /// # pool.deallocate(second)?;
    /// # pool.deallocate(third)?;
    /// # Ok::<(), compact_pool::Error>(())
    /// ```
    ///
    /// Fragmentation does not fail a request that fits in aggregate free
    /// space:
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use compact_pool::CompactPool;
    ///
    /// let mut pool = CompactPool::builder().capacity(28).build();
    /// let seven = Layout::from_size_align(7, 1).unwrap();
    ///
    /// let blocks: Vec<_> = (0..4)
    ///     .map(|_| pool.allocate(seven))
    ///     .collect::<Result<_, _>>()?;
    ///
    /// // Free the first and third block: 14 bytes free, but split in two.
    /// pool.deallocate(blocks[0])?;
    /// pool.deallocate(blocks[2])?;
    /// assert_eq!(pool.total_free(), 14);
    /// assert_eq!(pool.largest_free_run(), 7);
    ///
    /// // A 14-byte request still succeeds: the pool compacts the two
    /// // surviving blocks together first.
    /// let big = pool.allocate(Layout::from_size_align(14, 1).unwrap())?;
    /// assert_eq!(pool.total_free(), 0);
    /// # Ok::<(), compact_pool::Error>(())
    /// ```
    pub fn allocate(&mut self, layout: Layout) -> Result<Handle> {
        assert!(
            layout.size() > 0,
            "CompactPool allocations must have non-zero size"
        );
        assert!(
            layout.align() <= self.arena.alignment().get(),
            "allocation alignment {} exceeds the arena alignment {}",
            layout.align(),
            self.arena.alignment()
        );

        let size = layout.pad_to_align().size();
        let align = layout.align();

        let fit = match self.extents.find_fit(size, align) {
            Some(fit) => fit,
            None => {
                if self.extents.total_free() < size {
                    return Err(Error::OutOfCapacity {
                        requested: size,
                        available: self.extents.total_free(),
                    });
                }

                self.extents.compact(&self.arena, &mut self.handles);

                // The merged run can still fall short when pinned blocks or
                // alignment padding fence off part of the free space.
                self.extents
                    .find_fit(size, align)
                    .ok_or_else(|| Error::OutOfCapacity {
                        requested: size,
                        available: self.extents.total_free(),
                    })?
            }
        };

        let handle = self.handles.issue(fit.aligned_offset());
        self.extents.place(fit, size, handle.index(), align);

        Ok(handle)
    }

    /// Releases the block named by a handle and retires the handle.
    ///
    /// The freed bytes merge immediately with any free neighbors. The handle
    /// (and every copy of it) stops resolving from this moment on.
    ///
    /// If a payload with a destructor lives in the block, the caller must run
    /// that destructor before calling this; the pool only reclaims storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the handle is unknown, was issued
    /// by a different pool, or was already deallocated. The pool state is
    /// left unchanged, so misuse is observable without being destructive.
    ///
    /// # Example
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use compact_pool::CompactPool;
    ///
    /// let mut pool = CompactPool::builder().capacity(64).build();
    ///
    /// let handle = pool.allocate(Layout::new::<u32>())?;
    /// pool.deallocate(handle)?;
    ///
    /// // Deallocating twice is detected, not silently ignored.
    /// assert!(pool.deallocate(handle).is_err());
    /// # Ok::<(), compact_pool::Error>(())
    /// ```
    pub fn deallocate(&mut self, handle: Handle) -> Result<()> {
        let offset = self.handles.retire(handle)?;
        self.extents.release_at(offset);

        Ok(())
    }

    /// Resolves a handle to the current address of its block.
    ///
    /// The address is valid only until the next mutating call
    /// ([`allocate()`](Self::allocate) or [`deallocate()`](Self::deallocate))
    /// on this pool, because that call may compact the arena and relocate the
    /// block. Re-resolve after every such call instead of caching the
    /// address - or [`pin()`](Self::pin) the handle if a stable address is
    /// unavoidable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the handle is unknown, foreign, or
    /// already retired.
    ///
    /// # Example
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use compact_pool::CompactPool;
    ///
    /// let mut pool = CompactPool::builder().capacity(64).build();
    ///
    /// let handle = pool.allocate(Layout::new::<u16>())?;
    ///
    /// let address = pool.address_of(handle)?;
    /// // SAFETY: The storage is valid for a u16 and exclusively ours.
    /// unsafe { address.cast::<u16>().write(7) };
    /// # pool.deallocate(handle)?;
    /// # Ok::<(), compact_pool::Error>(())
    /// ```
    pub fn address_of(&self, handle: Handle) -> Result<NonNull<u8>> {
        let offset = self.handles.resolve(handle)?;

        Ok(self.arena.address(offset))
    }

    /// Exempts the block named by a handle from relocation.
    ///
    /// The address of a pinned block is stable across mutating calls, at the
    /// cost of the block acting as a barrier during compaction: free space on
    /// either side of it cannot be merged, so the aggregate-free-space
    /// guarantee may not hold while pins are outstanding. Unpin as soon as
    /// the stable address is no longer needed.
    ///
    /// Pinning an already-pinned handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the handle is unknown, foreign, or
    /// already retired.
    pub fn pin(&mut self, handle: Handle) -> Result<()> {
        self.handles.set_pinned(handle, true)
    }

    /// Makes the block named by a handle relocatable again after
    /// [`pin()`](Self::pin).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the handle is unknown, foreign, or
    /// already retired.
    pub fn unpin(&mut self, handle: Handle) -> Result<()> {
        self.handles.set_pinned(handle, false)
    }

    /// The pool's fixed byte capacity.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// The arena alignment, which is also the maximum alignment a single
    /// allocation may request.
    #[must_use]
    #[inline]
    pub fn alignment(&self) -> usize {
        self.arena.alignment().get()
    }

    /// Total free bytes, regardless of how they are scattered.
    ///
    /// Any allocation whose padded size is at most this value will succeed
    /// (in the absence of pinned blocks).
    #[must_use]
    #[inline]
    pub fn total_free(&self) -> usize {
        self.extents.total_free()
    }

    /// Length of the largest single free run.
    ///
    /// When this is smaller than [`total_free()`](Self::total_free), the free
    /// space is fragmented; a larger request will trigger compaction.
    #[must_use]
    #[inline]
    pub fn largest_free_run(&self) -> usize {
        self.extents.largest_free_run()
    }

    /// The number of live allocations.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor, mutation only harms diagnostics.
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no live allocations.
    ///
    /// An empty pool still owns its full arena.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.len() == 0
    }
}

impl Drop for CompactPool {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because
        // that will simply obscure whatever the original panic was, leading
        // to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotHaveAllocations) {
            assert!(
                self.is_empty(),
                "dropped a non-empty CompactPool with {} live allocations - this is forbidden \
                 by DropPolicy::MustNotHaveAllocations",
                self.len()
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(CompactPool: Send, std::fmt::Debug);
    assert_not_impl_any!(CompactPool: Sync);

    fn bytes(size: usize) -> Layout {
        Layout::from_size_align(size, 1).expect("valid test layout")
    }

    #[test]
    fn smoke_test() {
        let mut pool = CompactPool::builder().capacity(64).build();

        let a = pool.allocate(bytes(16)).unwrap();
        let b = pool.allocate(bytes(16)).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.total_free(), 32);

        unsafe {
            pool.address_of(a).unwrap().write(1);
            pool.address_of(b).unwrap().write(2);

            assert_eq!(pool.address_of(a).unwrap().read(), 1);
            assert_eq!(pool.address_of(b).unwrap().read(), 2);
        }

        pool.deallocate(a).unwrap();
        pool.deallocate(b).unwrap();

        assert!(pool.is_empty());
        assert_eq!(pool.total_free(), 64);
    }

    #[test]
    fn allocate_when_full_fails_cleanly() {
        let mut pool = CompactPool::builder().capacity(32).build();

        let _a = pool.allocate(bytes(32)).unwrap();

        let error = pool.allocate(bytes(1)).unwrap_err();
        assert!(matches!(
            error,
            Error::OutOfCapacity {
                requested: 1,
                available: 0
            }
        ));

        // The failure changed nothing.
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total_free(), 0);
    }

    #[test]
    fn allocate_compacts_fragmented_pool() {
        let mut pool = CompactPool::builder().capacity(32).build();

        let blocks: Vec<_> = (0..4)
            .map(|_| pool.allocate(bytes(8)).unwrap())
            .collect();

        pool.deallocate(blocks[0]).unwrap();
        pool.deallocate(blocks[2]).unwrap();
        assert_eq!(pool.largest_free_run(), 8);

        // 16 bytes in two runs of 8; the request is only satisfiable by
        // compaction.
        let big = pool.allocate(bytes(16)).unwrap();

        assert_eq!(pool.total_free(), 0);
        assert!(pool.address_of(big).is_ok());
        assert!(pool.address_of(blocks[1]).is_ok());
        assert!(pool.address_of(blocks[3]).is_ok());
    }

    #[test]
    fn compaction_preserves_payload_bytes() {
        let mut pool = CompactPool::builder().capacity(32).build();

        let blocks: Vec<_> = (0..4)
            .map(|_| pool.allocate(bytes(8)).unwrap())
            .collect();

        for (i, handle) in blocks.iter().enumerate() {
            let address = pool.address_of(*handle).unwrap();
            for j in 0..8 {
                unsafe {
                    address.add(j).write(0x5a ^ ((i as u8) << 4) ^ (j as u8));
                }
            }
        }

        pool.deallocate(blocks[0]).unwrap();
        pool.deallocate(blocks[2]).unwrap();

        // Triggers compaction; blocks 1 and 3 relocate.
        _ = pool.allocate(bytes(16)).unwrap();

        for &i in &[1_usize, 3] {
            let address = pool.address_of(blocks[i]).unwrap();
            for j in 0..8 {
                unsafe {
                    assert_eq!(address.add(j).read(), 0x5a ^ ((i as u8) << 4) ^ (j as u8));
                }
            }
        }
    }

    #[test]
    fn invalid_handles_are_detected() {
        let mut pool = CompactPool::builder().capacity(64).build();

        let handle = pool.allocate(bytes(8)).unwrap();
        pool.deallocate(handle).unwrap();

        assert!(matches!(pool.deallocate(handle), Err(Error::InvalidHandle)));
        assert!(matches!(pool.address_of(handle), Err(Error::InvalidHandle)));
        assert!(matches!(pool.pin(handle), Err(Error::InvalidHandle)));
    }

    #[test]
    fn handle_from_another_pool_is_rejected() {
        let mut issuing = CompactPool::builder().capacity(64).build();
        let mut other = CompactPool::builder().capacity(64).build();

        let handle = issuing.allocate(bytes(8)).unwrap();

        assert!(matches!(other.address_of(handle), Err(Error::InvalidHandle)));
        assert!(matches!(other.deallocate(handle), Err(Error::InvalidHandle)));

        // The issuing pool still honors it.
        assert!(issuing.deallocate(handle).is_ok());
    }

    #[test]
    fn pinned_block_does_not_move() {
        let mut pool = CompactPool::builder().capacity(32).build();

        let a = pool.allocate(bytes(8)).unwrap();
        let pinned = pool.allocate(bytes(8)).unwrap();
        pool.pin(pinned).unwrap();

        let address_before = pool.address_of(pinned).unwrap();

        pool.deallocate(a).unwrap();

        // Needs more than any single free run; compacts around the pin.
        let error = pool.allocate(bytes(24)).unwrap_err();
        assert!(matches!(error, Error::OutOfCapacity { .. }));
        assert_eq!(pool.address_of(pinned).unwrap(), address_before);

        // Unpinning lets the next compaction relocate the block.
        pool.unpin(pinned).unwrap();
        let big = pool.allocate(bytes(24)).unwrap();

        assert_eq!(pool.total_free(), 0);
        assert!(pool.address_of(big).is_ok());
    }

    #[test]
    fn aligned_allocations_are_aligned() {
        let mut pool = CompactPool::builder().capacity(64).build();

        _ = pool.allocate(bytes(3)).unwrap();
        let aligned = pool
            .allocate(Layout::from_size_align(8, 8).expect("valid test layout"))
            .unwrap();

        let address = pool.address_of(aligned).unwrap();
        assert_eq!(address.as_ptr() as usize % 8, 0);
    }

    #[test]
    #[should_panic]
    fn zero_size_allocation_panics() {
        let mut pool = CompactPool::builder().capacity(64).build();

        _ = pool.allocate(Layout::from_size_align(0, 1).expect("valid layout"));
    }

    #[test]
    #[should_panic]
    fn over_aligned_allocation_panics() {
        let mut pool = CompactPool::builder().capacity(64).build();

        _ = pool.allocate(Layout::from_size_align(8, 64).expect("valid layout"));
    }

    #[test]
    #[should_panic]
    fn drop_with_live_allocations_panics_under_strict_policy() {
        let mut pool = CompactPool::builder()
            .capacity(64)
            .drop_policy(DropPolicy::MustNotHaveAllocations)
            .build();

        // Allocate but never deallocate before drop.
        _ = pool.allocate(bytes(8)).unwrap();
    }

    #[test]
    fn drop_with_live_allocations_is_fine_by_default() {
        let mut pool = CompactPool::builder().capacity(64).build();

        _ = pool.allocate(bytes(8)).unwrap();
    }
}
