//! A fixed-capacity memory pool that defragments itself, addressing
//! relocatable allocations through stable handles.
//!
//! This crate provides [`CompactPool`], an arena of bytes sized once at
//! construction, from which callers acquire and release variably-sized raw
//! blocks. Unlike a classic free-list allocator, the pool guarantees that
//! **any request no larger than the total free bytes succeeds**: when the
//! free space is too fragmented for a direct placement, the pool relocates
//! live allocations to merge it into one contiguous run.
//!
//! Relocation is why allocations are named by [`Handle`]s instead of
//! addresses. A handle keeps resolving to its allocation no matter how often
//! the underlying bytes move; the current address is obtained on demand via
//! [`address_of()`](CompactPool::address_of) and is stable only until the
//! next mutating call on the pool.
//!
//! # Key features
//!
//! - **Aggregate-free-space guarantee**: fragmentation never fails a request
//!   that fits in total free bytes
//! - **Stable handles**: generation-tagged identities that detect double-free
//!   and use-after-free instead of silently aliasing reused storage
//! - **Lazy compaction**: relocation runs only when a request would otherwise
//!   fail, never speculatively
//! - **Pinning**: [`pin()`](CompactPool::pin) exempts an allocation from
//!   relocation while its address must stay put
//! - **Byte-exact accounting**: all bookkeeping lives outside the arena, so
//!   the full capacity is available to payloads
//!
//! # Examples
//!
//! Basic acquire/use/release lifecycle:
//!
//! ```
//! use std::alloc::Layout;
//!
//! use compact_pool::CompactPool;
//!
//! let mut pool = CompactPool::builder().capacity(1024).build();
//!
//! let handle = pool.allocate(Layout::new::<u32>())?;
//!
//! // The pool hands out raw storage; constructing the payload is on us.
//! let address = pool.address_of(handle)?;
//! // SAFETY: The storage is valid for a u32 and exclusively ours.
//! unsafe { address.cast::<u32>().write(1234) };
//!
//! let address = pool.address_of(handle)?;
//! // SAFETY: The storage holds the u32 we wrote above.
//! assert_eq!(unsafe { address.cast::<u32>().read() }, 1234);
//!
//! pool.deallocate(handle)?;
//! # Ok::<(), compact_pool::Error>(())
//! ```
//!
//! The guarantee that makes this pool different - a fragmented pool still
//! satisfies any request that fits in aggregate free space:
//!
//! ```
//! use std::alloc::Layout;
//!
//! use compact_pool::CompactPool;
//!
//! let mut pool = CompactPool::builder().capacity(40).build();
//! let ten = Layout::from_size_align(10, 1).unwrap();
//!
//! let blocks: Vec<_> = (0..4)
//!     .map(|_| pool.allocate(ten))
//!     .collect::<Result<_, _>>()?;
//!
//! pool.deallocate(blocks[1])?;
//! pool.deallocate(blocks[3])?;
//!
//! // 20 free bytes, but the largest single run is only 10.
//! assert_eq!(pool.total_free(), 20);
//! assert_eq!(pool.largest_free_run(), 10);
//!
//! // A 20-byte block still fits: the pool compacts, then places it.
//! let big = pool.allocate(Layout::from_size_align(20, 1).unwrap())?;
//! assert_eq!(pool.total_free(), 0);
//! # Ok::<(), compact_pool::Error>(())
//! ```
//!
//! # Address stability contract
//!
//! A raw address obtained from [`address_of()`](CompactPool::address_of) (or
//! used right after [`allocate()`](CompactPool::allocate)) is valid only
//! until the next `allocate` or `deallocate` call on the same pool, because
//! that call may compact the arena and move the block. Re-resolve the handle
//! after every mutating call, or [`pin()`](CompactPool::pin) the allocation
//! when a stable address is unavoidable - at the cost of that block fencing
//! off free space during compaction.
//!
//! Compaction moves payloads as opaque byte runs, bypassing any move
//! semantics of the payload type. Store only payloads that tolerate a bitwise
//! move (no self-referential pointers into the block), or pin the ones that
//! do not.

mod arena;
mod builder;
mod drop_policy;
mod error;
mod extents;
mod handles;
mod pool;

pub(crate) use arena::*;
pub use builder::CompactPoolBuilder;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use extents::*;
pub use handles::Handle;
pub(crate) use handles::HandleTable;
pub use pool::CompactPool;
