/// Determines how the pool treats live allocations when the pool is dropped.
///
/// The pool stores raw bytes and never runs payload destructors, so dropping
/// a pool simply discards the backing storage. The strict policy exists to
/// turn that silent discard into a detectable lifecycle bug.
///
/// # Examples
///
/// ```
/// use compact_pool::{CompactPool, DropPolicy};
///
/// // The drop policy is set at pool creation time.
/// let pool = CompactPool::builder()
///     .capacity(1024)
///     .drop_policy(DropPolicy::MustNotHaveAllocations)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped while allocations are still live; their
    /// storage is discarded without further bookkeeping. This is the default.
    #[default]
    MayDiscardAllocations,

    /// The pool will panic if any allocation is still live when it is
    /// dropped.
    ///
    /// This may be valuable when callers are expected to destroy every
    /// payload and deallocate every handle before the pool goes away, for
    /// example because payloads have destructors that must run.
    MustNotHaveAllocations,
}
