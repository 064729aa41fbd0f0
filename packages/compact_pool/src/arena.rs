use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr;
use std::ptr::NonNull;

/// The fixed block of storage backing a pool.
///
/// The arena owns exactly the byte range requested at construction and holds
/// it for its entire lifetime. It performs no allocation logic of its own -
/// it is pure storage plus offset/address arithmetic, with one extra duty:
/// moving a run of payload bytes verbatim when the compactor relocates an
/// allocation.
///
/// # Out of band access
///
/// The arena does not create or keep references to the buffer contents, so it
/// is valid for callers to read and write payload bytes through pointers
/// obtained via [`address()`](Self::address) even when not holding an
/// exclusive reference to the arena.
#[derive(Debug)]
pub(crate) struct Arena {
    /// Base address of the buffer. Never changes after construction.
    base: NonNull<u8>,

    /// Total buffer size in bytes; every extent in the pool lies in
    /// `[0, capacity)`.
    capacity: NonZero<usize>,

    /// Alignment of the base address. Also the upper bound on the alignment
    /// of any single allocation, since block placement is computed in
    /// offsets, not addresses.
    alignment: NonZero<usize>,
}

impl Arena {
    /// Allocates the backing buffer.
    ///
    /// The buffer contents start out uninitialized; content semantics are
    /// entirely the caller's concern.
    #[must_use]
    pub(crate) fn new(capacity: NonZero<usize>, alignment: NonZero<usize>) -> Self {
        let layout = Layout::from_size_align(capacity.get(), alignment.get())
            .expect("arena layout is valid for any non-zero capacity and power-of-two alignment");

        // SAFETY: The layout has non-zero size because capacity is non-zero.
        let base = NonNull::new(unsafe { alloc(layout) })
            .expect("we do not intend to handle allocation failure as a real possibility - OOM results in panic");

        Self {
            base,
            capacity,
            alignment,
        }
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.get()
    }

    #[must_use]
    pub(crate) fn alignment(&self) -> NonZero<usize> {
        self.alignment
    }

    /// Computes the address of a byte offset within the arena.
    #[must_use]
    pub(crate) fn address(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(
            offset < self.capacity.get(),
            "offset {offset} out of bounds in arena of capacity {}",
            self.capacity.get()
        );

        // SAFETY: The offset is within the allocated buffer, as asserted
        // above, so the result stays inside the same allocated object.
        unsafe { self.base.add(offset) }
    }

    /// Computes the byte offset of an address known to lie within the arena.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn offset_of(&self, address: NonNull<u8>) -> usize {
        // SAFETY: The caller guarantees the address lies within the arena,
        // so both pointers are derived from the same allocated object.
        let offset = unsafe { address.offset_from(self.base) };

        usize::try_from(offset).expect("addresses within the arena are never below its base")
    }

    /// Moves `len` payload bytes from one offset to another, verbatim.
    ///
    /// The ranges may overlap. The arena treats the payload as an opaque
    /// byte run; no payload semantics are invoked.
    pub(crate) fn relocate(&self, src_offset: usize, dst_offset: usize, len: usize) {
        let end = |offset: usize| {
            offset
                .checked_add(len)
                .expect("extent end calculation cannot overflow for in-bounds extents")
        };

        assert!(
            end(src_offset) <= self.capacity.get() && end(dst_offset) <= self.capacity.get(),
            "relocation of {len} bytes from offset {src_offset} to offset {dst_offset} \
             exceeds arena capacity {}",
            self.capacity.get()
        );

        // SAFETY: Both ranges lie within the allocated buffer, as asserted
        // above, and `ptr::copy` permits overlap.
        unsafe {
            ptr::copy(
                self.base.add(src_offset).as_ptr(),
                self.base.add(dst_offset).as_ptr(),
                len,
            );
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity.get(), self.alignment.get())
            .expect("the same layout was already valid at construction");

        // SAFETY: The buffer was allocated in new() with this exact layout
        // and has not been deallocated since.
        unsafe {
            dealloc(self.base.as_ptr(), layout);
        }
    }
}

// SAFETY: Arena contains a raw pointer but it refers to a buffer the arena
// exclusively owns. The arena does not share the pointer with other threads
// and does not rely on thread-local state; all access is governed by Rust's
// borrowing rules through the &self/&mut self methods of the owning pool.
unsafe impl Send for Arena {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn address_math_round_trips() {
        let arena = Arena::new(nz!(64), nz!(16));

        for offset in [0, 1, 15, 63] {
            let address = arena.address(offset);
            assert_eq!(arena.offset_of(address), offset);
        }
    }

    #[test]
    fn base_honors_alignment() {
        let arena = Arena::new(nz!(64), nz!(32));

        assert_eq!(arena.address(0).as_ptr() as usize % 32, 0);
    }

    #[test]
    fn relocate_moves_bytes_verbatim() {
        let arena = Arena::new(nz!(32), nz!(16));

        for i in 0..8_u8 {
            unsafe {
                arena.address(16 + usize::from(i)).write(0x50 + i);
            }
        }

        arena.relocate(16, 2, 8);

        for i in 0..8_u8 {
            unsafe {
                assert_eq!(arena.address(2 + usize::from(i)).read(), 0x50 + i);
            }
        }
    }

    #[test]
    fn relocate_handles_overlapping_ranges() {
        let arena = Arena::new(nz!(16), nz!(16));

        for i in 0..8_u8 {
            unsafe {
                arena.address(4 + usize::from(i)).write(i);
            }
        }

        // Destination overlaps the source on the left.
        arena.relocate(4, 2, 8);

        for i in 0..8_u8 {
            unsafe {
                assert_eq!(arena.address(2 + usize::from(i)).read(), i);
            }
        }
    }

    #[test]
    #[should_panic]
    fn relocate_out_of_bounds_panics() {
        let arena = Arena::new(nz!(16), nz!(16));

        arena.relocate(8, 12, 8);
    }
}
