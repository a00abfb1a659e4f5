use crate::address::VirtualAddress;
use crate::descriptor::{BlockDescriptor, HeapExtent};
use crate::tag::AllocationTag;
use kernel_sync::ProcessId;

/// Heap usage counters, kept current by every operation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    /// Descriptor slots ever created; never decreases.
    pub total_descriptor_slots: usize,
    /// Descriptor slots describing a block.
    pub used_descriptor_slots: usize,
    /// Supplier bytes holding the descriptors themselves; never decreases.
    pub descriptor_bytes: u64,
    /// Bytes of all extents currently held, descriptor pages excluded.
    pub total_bytes: u64,
    /// Bytes in used blocks.
    pub used_bytes: u64,
}

impl HeapStatistics {
    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        self.total_bytes - self.used_bytes
    }

    /// Used bytes in percent of the total, or 0 for an empty heap.
    #[must_use]
    pub const fn used_percent(&self) -> u64 {
        if self.total_bytes == 0 {
            0
        } else {
            self.used_bytes * 100 / self.total_bytes
        }
    }
}

/// Snapshot of one block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub start: VirtualAddress,
    pub size: u64,
    pub used: bool,
    pub owner: Option<ProcessId>,
    pub tag: AllocationTag,
    pub extent: HeapExtent,
}

impl From<&BlockDescriptor> for BlockInfo {
    fn from(d: &BlockDescriptor) -> Self {
        Self {
            start: d.start(),
            size: d.size(),
            used: d.used(),
            owner: d.owner(),
            tag: *d.tag(),
            extent: d.extent(),
        }
    }
}
