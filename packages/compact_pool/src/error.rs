use thiserror::Error;

/// Errors that can occur when allocating from or releasing into a pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request cannot be satisfied because the pool does not have enough
    /// free bytes, even after defragmenting its free space.
    ///
    /// The pool's state is unchanged and it remains fully usable. The same
    /// request will keep failing until the caller deallocates something.
    #[error(
        "pool capacity exhausted: requested {requested} bytes but only {available} bytes are free"
    )]
    OutOfCapacity {
        /// The number of bytes the allocation would have occupied,
        /// including alignment padding.
        requested: usize,

        /// The total number of free bytes in the pool at the time of
        /// the request.
        available: usize,
    },

    /// The handle does not refer to a live allocation in this pool.
    ///
    /// This means the handle was already deallocated, or it was issued by a
    /// different pool. Either way the call signals caller misuse (double
    /// free or use-after-free); the pool's state is unchanged.
    #[error("handle does not refer to a live allocation in this pool")]
    InvalidHandle,
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
