use crate::{Arena, HandleTable};

/// The occupancy state of an extent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ExtentState {
    /// The extent's bytes are available for placement.
    Free,

    /// The extent backs a live allocation.
    Occupied {
        /// Handle-table slot of the allocation, so the compactor can repoint
        /// the handle after relocating the extent.
        slot: usize,

        /// Alignment the allocation was placed with. Relocation must keep
        /// honoring it.
        align: usize,
    },
}

/// A contiguous byte range of the arena, either free or backing exactly one
/// allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Extent {
    pub(crate) offset: usize,
    pub(crate) length: usize,
    pub(crate) state: ExtentState,
}

impl Extent {
    fn end(&self) -> usize {
        // Cannot overflow because every extent lies within the arena.
        self.offset.wrapping_add(self.length)
    }

    fn is_free(&self) -> bool {
        self.state == ExtentState::Free
    }
}

/// A placement candidate returned by [`ExtentDirectory::find_fit`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fit {
    /// Index of the free extent to split.
    index: usize,

    /// First offset inside that extent satisfying the requested alignment.
    aligned_offset: usize,
}

impl Fit {
    #[must_use]
    pub(crate) fn aligned_offset(&self) -> usize {
        self.aligned_offset
    }
}

/// An ordered-by-offset catalogue of every extent in the arena.
///
/// The directory tiles `[0, capacity)` completely: adjacent extents meet
/// exactly (no gaps, no overlaps) and no two adjacent extents are both free,
/// because freed extents merge with free neighbors immediately. These
/// invariants are what make first-fit placement and single-pass compaction
/// correct; violating them is a bug, checked in debug builds by
/// [`integrity_check()`](Self::integrity_check).
#[derive(Debug)]
pub(crate) struct ExtentDirectory {
    /// Extents in strictly increasing offset order.
    extents: Vec<Extent>,

    /// Total bytes covered; equal to the arena capacity.
    capacity: usize,

    /// Sum of the lengths of all free extents, maintained on every
    /// placement, release and merge so queries are O(1).
    free_bytes: usize,
}

impl ExtentDirectory {
    #[must_use]
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            extents: vec![Extent {
                offset: 0,
                length: capacity,
                state: ExtentState::Free,
            }],
            capacity,
            free_bytes: capacity,
        }
    }

    /// Total free bytes in the directory, regardless of fragmentation.
    #[must_use]
    pub(crate) fn total_free(&self) -> usize {
        self.free_bytes
    }

    /// Length of the largest single free extent.
    ///
    /// When this is smaller than [`total_free()`](Self::total_free), the free
    /// space is fragmented and only compaction can recover the difference.
    #[must_use]
    pub(crate) fn largest_free_run(&self) -> usize {
        self.extents
            .iter()
            .filter(|extent| extent.is_free())
            .map(|extent| extent.length)
            .max()
            .unwrap_or(0)
    }

    /// Finds the first free extent that can hold `size` bytes at the
    /// requested alignment.
    ///
    /// Scans in offset order and returns the lowest-offset candidate, which
    /// keeps allocations packed toward the arena's start and minimizes future
    /// compaction work. Returning `None` is not an error - it tells the
    /// caller to consult the compactor.
    #[must_use]
    pub(crate) fn find_fit(&self, size: usize, align: usize) -> Option<Fit> {
        self.extents
            .iter()
            .enumerate()
            .filter(|(_, extent)| extent.is_free())
            .find_map(|(index, extent)| {
                let aligned_offset = extent.offset.next_multiple_of(align);
                let padded_end = aligned_offset.checked_add(size)?;

                (padded_end <= extent.end()).then_some(Fit {
                    index,
                    aligned_offset,
                })
            })
    }

    /// Splits the free extent identified by `fit` into an occupied extent of
    /// exactly `size` bytes, keeping any alignment slack and residual space
    /// as free extents.
    pub(crate) fn place(&mut self, fit: Fit, size: usize, slot: usize, align: usize) {
        let chosen = self.extents[fit.index];
        assert!(
            chosen.is_free(),
            "place() addressed an occupied extent at offset {}",
            chosen.offset
        );

        let padding = fit.aligned_offset.wrapping_sub(chosen.offset);
        let occupied_end = fit.aligned_offset.wrapping_add(size);
        assert!(
            occupied_end <= chosen.end(),
            "place() of {size} bytes at offset {} does not fit the free extent ending at {}",
            fit.aligned_offset,
            chosen.end()
        );

        let mut index = fit.index;

        self.extents[index] = Extent {
            offset: fit.aligned_offset,
            length: size,
            state: ExtentState::Occupied { slot, align },
        };

        if padding > 0 {
            self.extents.insert(
                index,
                Extent {
                    offset: chosen.offset,
                    length: padding,
                    state: ExtentState::Free,
                },
            );
            index = index.wrapping_add(1);
        }

        if occupied_end < chosen.end() {
            self.extents.insert(
                index.wrapping_add(1),
                Extent {
                    offset: occupied_end,
                    length: chosen.end().wrapping_sub(occupied_end),
                    state: ExtentState::Free,
                },
            );
        }

        // Cannot underflow: the occupied bytes came out of a free extent.
        self.free_bytes = self.free_bytes.wrapping_sub(size);

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Marks the occupied extent at `offset` free and merges it with free
    /// neighbors, maintaining the no-adjacent-frees invariant.
    pub(crate) fn release_at(&mut self, offset: usize) {
        let index = self
            .extents
            .binary_search_by_key(&offset, |extent| extent.offset)
            .expect("released offset does not start an extent");

        let extent = &mut self.extents[index];
        assert!(
            !extent.is_free(),
            "release_at({offset}) addressed a free extent"
        );

        extent.state = ExtentState::Free;
        self.free_bytes = self.free_bytes.wrapping_add(extent.length);

        // Absorb a free successor, then a free predecessor.
        let next_index = index.wrapping_add(1);
        if self
            .extents
            .get(next_index)
            .is_some_and(Extent::is_free)
        {
            let absorbed = self.extents.remove(next_index).length;
            self.extents[index].length = self.extents[index].length.wrapping_add(absorbed);
        }

        if index > 0 && self.extents[index.wrapping_sub(1)].is_free() {
            let absorbed = self.extents.remove(index).length;
            let prev = &mut self.extents[index.wrapping_sub(1)];
            prev.length = prev.length.wrapping_add(absorbed);
        }

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Relocates occupied extents toward the arena's start so that the free
    /// space scattered between them merges into a single trailing run.
    ///
    /// One pass in offset order: every unpinned occupied extent slides down
    /// to the lowest offset (aligned for that extent) past everything already
    /// packed, its payload bytes are moved verbatim through the arena, and
    /// its handle is repointed at the new offset. Pinned extents never move;
    /// the pass packs around them, which can leave free space split across
    /// the barrier.
    ///
    /// With no pinned extents and uniform alignment the resulting free run
    /// equals [`total_free()`](Self::total_free), the maximum possible, which
    /// is exactly what the aggregate-free-bytes guarantee requires.
    pub(crate) fn compact(&mut self, arena: &Arena, handles: &mut HandleTable) {
        let mut packed: Vec<Extent> = Vec::with_capacity(self.extents.len());
        let mut cursor = 0_usize;

        for extent in &self.extents {
            let ExtentState::Occupied { slot, align } = extent.state else {
                // Free extents dissolve; their bytes reappear behind the
                // packed region.
                continue;
            };

            let destination = if handles.is_pinned(slot) {
                extent.offset
            } else {
                cursor.next_multiple_of(align)
            };

            debug_assert!(
                destination <= extent.offset,
                "compaction must only move extents toward the arena's start"
            );

            if destination > cursor {
                Self::push_free(&mut packed, cursor, destination.wrapping_sub(cursor));
            }

            if destination != extent.offset {
                arena.relocate(extent.offset, destination, extent.length);
                handles.retarget(slot, destination);
            }

            packed.push(Extent {
                offset: destination,
                length: extent.length,
                state: extent.state,
            });
            cursor = destination.wrapping_add(extent.length);
        }

        if cursor < self.capacity {
            Self::push_free(&mut packed, cursor, self.capacity.wrapping_sub(cursor));
        }

        self.extents = packed;

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Appends a free extent, merging it into a trailing free neighbor.
    fn push_free(extents: &mut Vec<Extent>, offset: usize, length: usize) {
        if let Some(last) = extents.last_mut() {
            if last.is_free() {
                last.length = last.length.wrapping_add(length);
                return;
            }
        }

        extents.push(Extent {
            offset,
            length,
            state: ExtentState::Free,
        });
    }

    #[cfg(test)]
    pub(crate) fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Validates the directory invariants: complete tiling of
    /// `[0, capacity)`, no adjacent free extents, an accurate free-byte
    /// counter, and alignment of every occupied extent.
    ///
    /// Only available in debug builds. A failure here is an unrecoverable
    /// programming bug - continuing could corrupt caller data silently.
    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        let mut expected_offset = 0_usize;
        let mut observed_free_bytes = 0_usize;
        let mut previous_was_free = false;

        for extent in &self.extents {
            assert!(
                extent.offset == expected_offset,
                "extent at offset {} leaves a gap or overlap after offset {expected_offset}",
                extent.offset
            );
            assert!(extent.length > 0, "zero-length extent at offset {expected_offset}");

            match extent.state {
                ExtentState::Free => {
                    assert!(
                        !previous_was_free,
                        "adjacent free extents at offset {}",
                        extent.offset
                    );
                    previous_was_free = true;
                    observed_free_bytes += extent.length;
                }
                ExtentState::Occupied { align, .. } => {
                    assert!(
                        extent.offset % align == 0,
                        "occupied extent at offset {} violates its alignment {align}",
                        extent.offset
                    );
                    previous_was_free = false;
                }
            }

            expected_offset = extent.end();
        }

        assert!(
            expected_offset == self.capacity,
            "extents cover {expected_offset} bytes of a {} byte arena",
            self.capacity
        );
        assert!(
            observed_free_bytes == self.free_bytes,
            "free-byte counter {} does not match the observed {observed_free_bytes}",
            self.free_bytes
        );
    }
}
