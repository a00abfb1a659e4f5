//! # Heap configuration

use crate::address::align_up;
use crate::error::HeapError;

/// Size of one page handed out by the page supplier.
pub const MEMORY_PAGE_SIZE: u64 = 4096;

/// Unit by which the descriptor pool grows when it runs dry.
pub const MEMORY_BLOCK_SIZE: u64 = MEMORY_PAGE_SIZE;

/// Default extent granularity of the kernel heap.
pub const KERNEL_HEAP_MULTIPLE: u64 = 1024 * 1024; // 1 MiB

/// Default extent granularity of a user heap.
pub const USER_HEAP_MULTIPLE: u64 = 64 * 1024; // 64 KiB

/// Allocation sizes are rounded up to a multiple of this.
pub const ALLOCATION_ALIGNMENT: u64 = size_of::<u32>() as u64;

/// Allocation tags longer than this are truncated.
pub const MAX_TAG_LENGTH: usize = 31;

const _: () = {
    assert!(MEMORY_PAGE_SIZE.is_power_of_two());
    assert!(MEMORY_BLOCK_SIZE.is_multiple_of(MEMORY_PAGE_SIZE));
    assert!(KERNEL_HEAP_MULTIPLE.is_multiple_of(MEMORY_PAGE_SIZE));
    assert!(USER_HEAP_MULTIPLE.is_multiple_of(MEMORY_PAGE_SIZE));
    assert!(ALLOCATION_ALIGNMENT.is_power_of_two());
    assert!(ALLOCATION_ALIGNMENT <= MEMORY_PAGE_SIZE);
    assert!(MAX_TAG_LENGTH < u8::MAX as usize);
};

/// Per-heap tuning.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Page size of the backing supplier; extents are multiples of it.
    pub page_size: u64,
    /// Minimum size of a new extent.
    pub granularity: u64,
    /// Allocation sizes are rounded up to this.
    pub alignment: u64,
}

impl HeapConfig {
    #[must_use]
    pub const fn kernel() -> Self {
        Self {
            page_size: MEMORY_PAGE_SIZE,
            granularity: KERNEL_HEAP_MULTIPLE,
            alignment: ALLOCATION_ALIGNMENT,
        }
    }

    #[must_use]
    pub const fn user() -> Self {
        Self {
            page_size: MEMORY_PAGE_SIZE,
            granularity: USER_HEAP_MULTIPLE,
            alignment: ALLOCATION_ALIGNMENT,
        }
    }

    #[must_use]
    pub const fn with_granularity(mut self, granularity: u64) -> Self {
        self.granularity = granularity;
        self
    }

    /// Checks that the sizes are usable together.
    ///
    /// # Errors
    /// [`HeapError::InvalidArgument`] unless page size and alignment are powers
    /// of two, the alignment does not exceed a page, and the granularity is at
    /// least one page.
    pub const fn validate(&self) -> Result<(), HeapError> {
        if !self.page_size.is_power_of_two()
            || !self.alignment.is_power_of_two()
            || self.alignment > self.page_size
            || self.granularity < self.page_size
        {
            return Err(HeapError::InvalidArgument);
        }
        Ok(())
    }

    /// Rounds a request up to the allocation alignment.
    #[must_use]
    pub const fn round_request(&self, size: u64) -> Option<u64> {
        align_up(size, self.alignment)
    }

    /// Size of the extent to request when nothing fits `request` bytes.
    #[must_use]
    pub const fn extent_size_for(&self, request: u64) -> Option<u64> {
        let wanted = if request > self.granularity {
            request
        } else {
            self.granularity
        };
        align_up(wanted, self.page_size)
    }

    /// Bytes the descriptor pool requests per growth step: one
    /// [`MEMORY_BLOCK_SIZE`], or one page if pages are larger.
    #[must_use]
    pub const fn pool_block_size(&self) -> u64 {
        if self.page_size > MEMORY_BLOCK_SIZE {
            self.page_size
        } else {
            MEMORY_BLOCK_SIZE
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::kernel()
    }
}
