use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique pool ID.
fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A stable, address-independent identifier for a live allocation in a
/// [`CompactPool`][crate::CompactPool].
///
/// A handle keeps naming the same allocation even when the pool relocates the
/// underlying bytes during defragmentation, which is why it - and not a raw
/// address - is the durable name for an allocation. Handles are plain values:
/// copy them, store them in collections, send them across threads.
///
/// A handle becomes stale once the allocation is deallocated. Presenting a
/// stale handle (or a handle issued by a different pool) to any pool
/// operation fails with [`Error::InvalidHandle`][crate::Error::InvalidHandle]
/// rather than silently aliasing whatever reuses the storage.
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
///
/// // Handles are Copy; every copy names the same allocation.
/// let stored = handle;
/// assert_eq!(pool.address_of(stored)?, pool.address_of(handle)?);
///
/// pool.deallocate(handle)?;
///
/// // All copies went stale together.
/// assert!(pool.address_of(stored).is_err());
/// # Ok::<(), compact_pool::Error>(())
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Handle {
    /// Slot index in the issuing pool's handle table.
    index: usize,

    /// Generation of the slot at issue time. A retired slot advances its
    /// generation, so a stale handle no longer matches.
    generation: u64,

    /// Identifier of the issuing pool, so a handle presented to the wrong
    /// pool is rejected instead of resolving to an unrelated allocation.
    pool_id: u64,
}

impl Handle {
    #[must_use]
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

/// One entry in the handle table.
#[derive(Debug)]
enum Slot {
    /// The slot backs a live allocation currently at `offset`.
    Occupied {
        generation: u64,
        offset: usize,
        pinned: bool,
    },

    /// The slot is available for reuse, forming part of the intrusive
    /// freelist chain.
    Vacant {
        generation: u64,
        next_free_index: usize,
    },
}

/// Maps stable handle identities to the arena offset currently backing them.
///
/// Slots are reused through an intrusive freelist; each reuse advances the
/// slot's generation so that handles from earlier occupancies are detected
/// as invalid instead of aliasing the new occupant.
#[derive(Debug)]
pub(crate) struct HandleTable {
    /// Identifier baked into every handle this table issues.
    pool_id: u64,

    slots: Vec<Slot>,

    /// Head of the vacant-slot freelist. Points past the end of `slots`
    /// when no retired slot is available for reuse.
    next_free_index: usize,

    /// Number of occupied slots, tracked to avoid scanning.
    live: usize,
}

impl HandleTable {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            pool_id: generate_pool_id(),
            slots: Vec::new(),
            next_free_index: 0,
            live: 0,
        }
    }

    /// The number of live handles.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor, mutation only harms diagnostics.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Issues a fresh handle backed by the extent at `offset`.
    #[must_use]
    pub(crate) fn issue(&mut self, offset: usize) -> Handle {
        let (index, generation) = if self.next_free_index < self.slots.len() {
            let index = self.next_free_index;

            let slot = &mut self.slots[index];
            let (generation, next_free_index) = match *slot {
                Slot::Vacant {
                    generation,
                    next_free_index,
                } => (generation, next_free_index),
                Slot::Occupied { .. } => {
                    panic!("freelist head {index} points to an occupied slot")
                }
            };

            *slot = Slot::Occupied {
                generation,
                offset,
                pinned: false,
            };
            self.next_free_index = next_free_index;

            (index, generation)
        } else {
            let index = self.slots.len();

            self.slots.push(Slot::Occupied {
                generation: 0,
                offset,
                pinned: false,
            });
            // Keep the freelist head one past the end so the next issue()
            // also appends.
            self.next_free_index = self.slots.len();

            (index, 0)
        };

        // Cannot overflow because each live handle occupies a distinct slot.
        self.live = self.live.wrapping_add(1);

        Handle {
            index,
            generation,
            pool_id: self.pool_id,
        }
    }

    /// Resolves a handle to the arena offset of its backing extent.
    pub(crate) fn resolve(&self, handle: Handle) -> Result<usize> {
        self.live_slot(handle).map(|(offset, _)| offset)
    }

    /// Retires a handle, returning the offset its backing extent occupied.
    ///
    /// The slot's generation advances, so the retired handle (and any copy
    /// of it) stops resolving from this moment on.
    pub(crate) fn retire(&mut self, handle: Handle) -> Result<usize> {
        let (offset, _) = self.live_slot(handle)?;

        self.slots[handle.index] = Slot::Vacant {
            // Wrapping is unobservable: a collision needs 2^64 reuses
            // of one slot.
            generation: handle.generation.wrapping_add(1),
            next_free_index: self.next_free_index,
        };
        self.next_free_index = handle.index;

        // Cannot underflow because we just verified the slot was occupied.
        self.live = self.live.wrapping_sub(1);

        Ok(offset)
    }

    /// Repoints a slot at the new offset of its relocated extent.
    ///
    /// Used only by the compactor, which knows the slot index from the extent
    /// it is moving; a vacant slot here means the extent directory and the
    /// handle table disagree, which is a bug.
    pub(crate) fn retarget(&mut self, slot_index: usize, new_offset: usize) {
        match &mut self.slots[slot_index] {
            Slot::Occupied { offset, .. } => *offset = new_offset,
            Slot::Vacant { .. } => {
                panic!("retarget({slot_index}) addressed a vacant slot")
            }
        }
    }

    /// Marks or unmarks the allocation behind a handle as exempt from
    /// relocation.
    pub(crate) fn set_pinned(&mut self, handle: Handle, pinned: bool) -> Result<()> {
        _ = self.live_slot(handle)?;

        match &mut self.slots[handle.index] {
            Slot::Occupied { pinned: slot, .. } => *slot = pinned,
            // live_slot() above already proved occupancy.
            Slot::Vacant { .. } => unreachable!(),
        }

        Ok(())
    }

    /// Whether the slot's allocation is exempt from relocation.
    ///
    /// Only meaningful for occupied slots; the compactor calls this with slot
    /// indices taken from occupied extents.
    #[must_use]
    pub(crate) fn is_pinned(&self, slot_index: usize) -> bool {
        match self.slots[slot_index] {
            Slot::Occupied { pinned, .. } => pinned,
            Slot::Vacant { .. } => {
                panic!("is_pinned({slot_index}) addressed a vacant slot")
            }
        }
    }

    /// Validates a handle and returns its slot's `(offset, pinned)` pair.
    fn live_slot(&self, handle: Handle) -> Result<(usize, bool)> {
        if handle.pool_id != self.pool_id {
            return Err(Error::InvalidHandle);
        }

        match self.slots.get(handle.index) {
            Some(Slot::Occupied {
                generation,
                offset,
                pinned,
            }) if *generation == handle.generation => Ok((*offset, *pinned)),
            _ => Err(Error::InvalidHandle),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;
    use std::hash::Hash;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Handle: Send, Sync, Copy, Debug, Eq, Hash);

    #[test]
    fn issue_and_resolve() {
        let mut table = HandleTable::new();

        let a = table.issue(0);
        let b = table.issue(16);

        assert_eq!(table.resolve(a).unwrap(), 0);
        assert_eq!(table.resolve(b).unwrap(), 16);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn retire_invalidates_handle() {
        let mut table = HandleTable::new();

        let handle = table.issue(8);
        assert_eq!(table.retire(handle).unwrap(), 8);

        assert!(matches!(table.resolve(handle), Err(Error::InvalidHandle)));
        assert!(matches!(table.retire(handle), Err(Error::InvalidHandle)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn reused_slot_rejects_stale_handle() {
        let mut table = HandleTable::new();

        let stale = table.issue(0);
        table.retire(stale).unwrap();

        // The retired slot is reused for the next issue.
        let fresh = table.issue(32);
        assert_eq!(fresh.index(), stale.index());

        // The stale handle must not resolve to the new occupant.
        assert!(matches!(table.resolve(stale), Err(Error::InvalidHandle)));
        assert_eq!(table.resolve(fresh).unwrap(), 32);
    }

    #[test]
    fn freelist_reuses_most_recently_retired_slot_first() {
        let mut table = HandleTable::new();

        let a = table.issue(0);
        let b = table.issue(4);
        let c = table.issue(8);

        table.retire(a).unwrap();
        table.retire(c).unwrap();

        assert_eq!(table.issue(12).index(), c.index());
        assert_eq!(table.issue(16).index(), a.index());

        // No vacancy left; the next slot is appended.
        assert_eq!(table.issue(20).index(), 3);
        assert_eq!(table.resolve(b).unwrap(), 4);
    }

    #[test]
    fn retarget_moves_backing_offset() {
        let mut table = HandleTable::new();

        let handle = table.issue(24);
        table.retarget(handle.index(), 0);

        assert_eq!(table.resolve(handle).unwrap(), 0);
    }

    #[test]
    #[should_panic]
    fn retarget_vacant_slot_panics() {
        let mut table = HandleTable::new();

        let handle = table.issue(0);
        table.retire(handle).unwrap();

        table.retarget(handle.index(), 8);
    }

    #[test]
    fn pinning_round_trips() {
        let mut table = HandleTable::new();

        let handle = table.issue(0);
        assert!(!table.is_pinned(handle.index()));

        table.set_pinned(handle, true).unwrap();
        assert!(table.is_pinned(handle.index()));

        table.set_pinned(handle, false).unwrap();
        assert!(!table.is_pinned(handle.index()));
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let mut issuing = HandleTable::new();
        let other = HandleTable::new();

        let handle = issuing.issue(0);

        assert!(matches!(other.resolve(handle), Err(Error::InvalidHandle)));
    }
}
