use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{CompactPool, DropPolicy};

/// The arena alignment used when the builder is not told otherwise.
///
/// Sixteen covers every primitive type and matches what general-purpose
/// allocators promise, so most callers never need to think about it.
pub(crate) const DEFAULT_ALIGNMENT: NonZero<usize> = nz!(16);

/// Builder for creating an instance of [`CompactPool`].
///
/// [`CompactPool`] requires its byte capacity to be specified at construction
/// time via [`capacity()`](Self::capacity); the capacity is fixed for the
/// pool's entire lifetime. Other settings are optional.
///
/// # Examples
///
/// ```
/// use compact_pool::CompactPool;
///
/// let pool = CompactPool::builder().capacity(4096).build();
///
/// assert_eq!(pool.capacity(), 4096);
/// assert_eq!(pool.total_free(), 4096);
/// ```
///
/// Raising the arena alignment for over-aligned payloads:
///
/// ```
/// use compact_pool::CompactPool;
///
/// let pool = CompactPool::builder().capacity(4096).alignment(64).build();
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred
/// between threads, allowing pool configuration to happen on different
/// threads than where the pool is used. However, it is not thread-safe
/// ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct CompactPoolBuilder {
    capacity: Option<NonZero<usize>>,
    alignment: NonZero<usize>,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl CompactPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            capacity: None,
            alignment: DEFAULT_ALIGNMENT,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the pool's capacity in bytes.
    ///
    /// This is the exact number of payload bytes the pool will own; no part
    /// of it is consumed by bookkeeping, which lives outside the arena.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. A pool that can never allocate is a
    /// construction bug, not a runtime condition.
    ///
    /// # Examples
    ///
    /// ```
    /// use compact_pool::CompactPool;
    ///
    /// let pool = CompactPool::builder().capacity(256).build();
    /// ```
    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(
            NonZero::new(capacity).expect("CompactPool must have non-zero capacity"),
        );
        self
    }

    /// Sets the arena alignment, which is also the maximum alignment any
    /// single allocation may request.
    ///
    /// Defaults to 16, which satisfies every primitive type. Raise it when
    /// payloads carry `repr(align(..))` requirements beyond that.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is zero or not a power of two.
    ///
    /// # Examples
    ///
    /// ```
    /// use compact_pool::CompactPool;
    ///
    /// let pool = CompactPool::builder().capacity(1024).alignment(64).build();
    /// ```
    #[inline]
    pub fn alignment(mut self, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "CompactPool alignment must be a power of two"
        );
        self.alignment =
            NonZero::new(alignment).expect("a power of two is always non-zero");
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat live allocations when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use compact_pool::{CompactPool, DropPolicy};
    ///
    /// let pool = CompactPool::builder()
    ///     .capacity(1024)
    ///     .drop_policy(DropPolicy::MustNotHaveAllocations)
    ///     .build();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no capacity has been set using [`capacity()`](Self::capacity).
    ///
    /// # Examples
    ///
    /// ```
    /// use compact_pool::CompactPool;
    ///
    /// let pool = CompactPool::builder().capacity(1024).build();
    /// ```
    #[must_use]
    #[inline]
    pub fn build(self) -> CompactPool {
        let capacity = self
            .capacity
            .expect("capacity must be set using .capacity() before calling .build()");

        CompactPool::new_inner(capacity, self.alignment, self.drop_policy)
    }
}
