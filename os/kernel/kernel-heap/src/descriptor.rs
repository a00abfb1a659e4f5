use crate::address::VirtualAddress;
use crate::tag::AllocationTag;
use kernel_sync::ProcessId;

/// Index of a descriptor slot in the pool arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorId(u32);

impl DescriptorId {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A page-granular region obtained from the page supplier in one piece.
///
/// Identified by its start address; blocks never straddle two extents.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapExtent {
    pub start: VirtualAddress,
    pub size: u64,
}

impl HeapExtent {
    /// First address past the extent.
    #[inline]
    #[must_use]
    pub fn end(&self) -> VirtualAddress {
        self.start + self.size
    }
}

/// Bookkeeping record of one used or free block.
///
/// `prev` / `next` chain the blocks of a heap in address order. While the
/// slot sits in the pool, `next` links the pool's free list instead.
#[derive(Clone, Debug, Default)]
pub struct BlockDescriptor {
    pub(crate) used: bool,
    pub(crate) start: VirtualAddress,
    pub(crate) size: u64,
    pub(crate) extent: HeapExtent,
    pub(crate) owner: Option<ProcessId>,
    pub(crate) tag: AllocationTag,
    pub(crate) prev: Option<DescriptorId>,
    pub(crate) next: Option<DescriptorId>,
}

impl BlockDescriptor {
    #[inline]
    #[must_use]
    pub const fn used(&self) -> bool {
        self.used
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> VirtualAddress {
        self.start + self.size
    }

    #[inline]
    #[must_use]
    pub const fn extent(&self) -> HeapExtent {
        self.extent
    }

    #[inline]
    #[must_use]
    pub const fn owner(&self) -> Option<ProcessId> {
        self.owner
    }

    #[inline]
    #[must_use]
    pub const fn tag(&self) -> &AllocationTag {
        &self.tag
    }

    /// Whether `next` directly follows this block inside the same extent.
    #[must_use]
    pub fn is_followed_by(&self, next: &Self) -> bool {
        self.extent.start == next.extent.start && self.end() == next.start
    }
}
