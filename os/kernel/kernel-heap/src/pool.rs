use crate::address::VirtualAddress;
use crate::descriptor::{BlockDescriptor, DescriptorId};
use crate::error::HeapError;
use crate::supplier::PageSupplier;
use log::{debug, error, warn};

/// Tag under which the pool requests its pages from the supplier.
pub const DESCRIPTOR_POOL_TAG: &str = "heap descriptors";

/// Upper bound on directory blocks, and with it on the pool's capacity.
const MAX_DIRECTORIES: usize = 16;

/// Arena of block descriptors carved from supplier pages.
///
/// The pool takes whole blocks of `block_size` bytes from the heap's
/// [`PageSupplier`] and cuts each into descriptor slots. The addresses of
/// those blocks are recorded in directory blocks, also taken from the
/// supplier, so growing the pool never goes through a general purpose
/// allocator.
///
/// Free slots form a singly linked list through their `next` field. Blocks
/// are only handed back by [`release_blocks`](Self::release_blocks), so
/// [`total_slots`](Self::total_slots) never decreases.
pub struct DescriptorPool {
    block_size: u64,
    slots_per_block: usize,
    blocks_per_directory: usize,
    directories: [VirtualAddress; MAX_DIRECTORIES],
    directory_count: usize,
    blocks: usize,
    free_head: Option<DescriptorId>,
    in_use: usize,
}

impl DescriptorPool {
    /// An empty pool growing by `block_size` bytes at a time.
    ///
    /// `block_size` must be a page multiple accepted by the supplier and hold
    /// at least one descriptor.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(block_size: u64) -> Self {
        let bytes = block_size as usize;
        Self {
            block_size,
            slots_per_block: (bytes / size_of::<BlockDescriptor>()).max(1),
            blocks_per_directory: (bytes / size_of::<VirtualAddress>()).max(1),
            directories: [VirtualAddress::zero(); MAX_DIRECTORIES],
            directory_count: 0,
            blocks: 0,
            free_head: None,
            in_use: 0,
        }
    }

    /// Hands out a zeroed descriptor, growing the pool by one block if needed.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the supplier has no block left or the
    /// pool is at its capacity.
    pub fn obtain<S>(&mut self, supplier: &mut S) -> Result<DescriptorId, HeapError>
    where
        S: PageSupplier + ?Sized,
    {
        if self.free_head.is_none() {
            self.grow(supplier)?;
        }
        let id = self.free_head.ok_or(HeapError::OutOfMemory)?;
        let slot = self.get_mut(id);
        let next = slot.next;
        *slot = BlockDescriptor::default();
        self.free_head = next;
        self.in_use += 1;
        Ok(id)
    }

    /// Zeroes the descriptor and puts it back on the free list.
    pub fn release(&mut self, id: DescriptorId) {
        debug_assert!(self.in_use > 0, "descriptor pool underflow");
        let next = self.free_head;
        *self.get_mut(id) = BlockDescriptor {
            next,
            ..BlockDescriptor::default()
        };
        self.free_head = Some(id);
        self.in_use -= 1;
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: DescriptorId) -> &BlockDescriptor {
        // Safety: `slot` only yields initialized slots of blocks this pool
        // owns, and `&self` keeps them from being written meanwhile.
        unsafe { &*self.slot(id) }
    }

    #[inline]
    pub fn get_mut(&mut self, id: DescriptorId) -> &mut BlockDescriptor {
        // Safety: as for `get`; `&mut self` makes the access exclusive.
        unsafe { &mut *self.slot(id) }
    }

    #[inline]
    #[must_use]
    pub const fn total_slots(&self) -> usize {
        self.blocks * self.slots_per_block
    }

    #[inline]
    #[must_use]
    pub const fn used_slots(&self) -> usize {
        self.in_use
    }

    /// Bytes taken from the supplier for slots and directories.
    #[inline]
    #[must_use]
    pub const fn reserved_bytes(&self) -> u64 {
        (self.blocks + self.directory_count) as u64 * self.block_size
    }

    /// Hands every block and directory back to `supplier`.
    pub fn release_blocks<S>(self, supplier: &mut S)
    where
        S: PageSupplier + ?Sized,
    {
        for block in 0..self.blocks {
            let address = self.block_address(block);
            if let Err(e) = supplier.release(address) {
                error!("heap: could not release descriptor block {address}: {e}");
            }
        }
        for &address in &self.directories[..self.directory_count] {
            if let Err(e) = supplier.release(address) {
                error!("heap: could not release descriptor directory {address}: {e}");
            }
        }
    }

    fn slot(&self, id: DescriptorId) -> *mut BlockDescriptor {
        let index = id.index();
        let block = index / self.slots_per_block;
        assert!(block < self.blocks, "descriptor {index} is not part of this pool");
        let base = self.block_address(block).as_mut_ptr::<BlockDescriptor>();
        // Safety: the remainder stays within the block's slots.
        unsafe { base.add(index % self.slots_per_block) }
    }

    fn block_address(&self, block: usize) -> VirtualAddress {
        let directory = self.directories[block / self.blocks_per_directory];
        // Safety: `grow` wrote the entries of every block below `self.blocks`.
        unsafe {
            directory
                .as_mut_ptr::<VirtualAddress>()
                .add(block % self.blocks_per_directory)
                .read()
        }
    }

    fn grow<S>(&mut self, supplier: &mut S) -> Result<(), HeapError>
    where
        S: PageSupplier + ?Sized,
    {
        let directory = self.blocks / self.blocks_per_directory;
        let first = self.total_slots();
        if directory >= MAX_DIRECTORIES || first + self.slots_per_block > u32::MAX as usize {
            warn!("heap: descriptor pool is full at {first} slots");
            return Err(HeapError::OutOfMemory);
        }

        if directory == self.directory_count {
            self.directories[directory] = self.acquire_block(supplier)?;
            self.directory_count += 1;
        }
        let block = self.acquire_block(supplier)?;

        let base = block.as_mut_ptr::<BlockDescriptor>();
        for i in 0..self.slots_per_block {
            let next = if i + 1 < self.slots_per_block {
                Some(DescriptorId::from_index(first + i + 1))
            } else {
                self.free_head
            };
            // Safety: the supplier handed out `block_size` writable bytes,
            // aligned to a page, and `slots_per_block` slots fit into them.
            unsafe {
                base.add(i).write(BlockDescriptor {
                    next,
                    ..BlockDescriptor::default()
                });
            }
        }
        // Safety: a directory block holds `blocks_per_directory` addresses.
        unsafe {
            self.directories[directory]
                .as_mut_ptr::<VirtualAddress>()
                .add(self.blocks % self.blocks_per_directory)
                .write(block);
        }

        self.blocks += 1;
        self.free_head = Some(DescriptorId::from_index(first));
        debug!(
            "heap: descriptor pool grew by {} to {} slots",
            self.slots_per_block,
            self.total_slots()
        );
        Ok(())
    }

    fn acquire_block<S>(&self, supplier: &mut S) -> Result<VirtualAddress, HeapError>
    where
        S: PageSupplier + ?Sized,
    {
        supplier
            .acquire(self.block_size, DESCRIPTOR_POOL_TAG)
            .map_err(|e| {
                error!("heap: descriptor pool cannot grow: {e}");
                HeapError::OutOfMemory
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_BLOCK_SIZE;
    use crate::supplier::testing::HostPages;

    fn per_block() -> usize {
        DescriptorPool::new(MEMORY_BLOCK_SIZE).slots_per_block
    }

    #[test]
    fn grows_one_block_at_a_time() {
        let mut pages = HostPages::default();
        let mut pool = DescriptorPool::new(MEMORY_BLOCK_SIZE);
        assert_eq!(pool.total_slots(), 0);
        assert_eq!(pages.acquired, 0);

        let n = per_block();
        for _ in 0..n {
            pool.obtain(&mut pages).unwrap();
        }
        assert_eq!(pool.total_slots(), n);
        // one directory and one slot block
        assert_eq!(pages.acquired, 2);

        pool.obtain(&mut pages).unwrap();
        assert_eq!(pool.total_slots(), 2 * n);
        assert_eq!(pool.used_slots(), n + 1);
        assert_eq!(pages.acquired, 3);
        assert_eq!(pool.reserved_bytes(), 3 * MEMORY_BLOCK_SIZE);
    }

    #[test]
    fn released_slots_are_reused_and_zeroed() {
        let mut pages = HostPages::default();
        let mut pool = DescriptorPool::new(MEMORY_BLOCK_SIZE);
        let a = pool.obtain(&mut pages).unwrap();
        {
            let d = pool.get_mut(a);
            d.used = true;
            d.start = VirtualAddress::new(0x1000);
            d.size = 64;
        }
        pool.release(a);
        assert_eq!(pool.used_slots(), 0);

        let b = pool.obtain(&mut pages).unwrap();
        assert_eq!(a, b);
        let d = pool.get(b);
        assert!(!d.used());
        assert_eq!(d.size(), 0);
        assert_eq!(d.start(), VirtualAddress::zero());
        assert!(d.next.is_none());
        assert_eq!(pool.total_slots(), per_block());
    }

    #[test]
    fn capacity_is_kept_until_released() {
        let mut pages = HostPages::default();
        let mut pool = DescriptorPool::new(MEMORY_BLOCK_SIZE);
        let ids: Vec<_> = (0..per_block() + 3)
            .map(|_| pool.obtain(&mut pages).unwrap())
            .collect();
        let total = pool.total_slots();
        for id in ids {
            pool.release(id);
        }
        assert_eq!(pool.total_slots(), total);
        assert_eq!(pool.used_slots(), 0);
        assert_eq!(pages.released, 0);

        pool.release_blocks(&mut pages);
        assert_eq!(pages.released, 3);
        assert!(pages.is_empty());
    }

    #[test]
    fn exhausted_supplier_is_out_of_memory() {
        let mut pages = HostPages::default();
        pages.exhausted = true;
        let mut pool = DescriptorPool::new(MEMORY_BLOCK_SIZE);
        assert_eq!(pool.obtain(&mut pages), Err(HeapError::OutOfMemory));
        assert_eq!(pool.total_slots(), 0);

        pages.exhausted = false;
        assert!(pool.obtain(&mut pages).is_ok());
    }

    #[test]
    fn directory_is_not_acquired_twice_after_a_failed_grow() {
        let mut pages = HostPages::default();
        pages.fail_after = Some(1);
        let mut pool = DescriptorPool::new(MEMORY_BLOCK_SIZE);
        assert_eq!(pool.obtain(&mut pages), Err(HeapError::OutOfMemory));
        assert_eq!(pages.acquired, 1);

        pages.fail_after = None;
        pool.obtain(&mut pages).unwrap();
        assert_eq!(pages.acquired, 2);
        assert_eq!(pool.reserved_bytes(), 2 * MEMORY_BLOCK_SIZE);
    }

    #[test]
    fn slots_span_several_blocks() {
        let mut pages = HostPages::default();
        let mut pool = DescriptorPool::new(MEMORY_BLOCK_SIZE);
        let n = 3 * per_block() + 1;
        let ids: Vec<_> = (0..n).map(|_| pool.obtain(&mut pages).unwrap()).collect();
        for (i, &id) in ids.iter().enumerate() {
            pool.get_mut(id).size = i as u64 + 1;
        }
        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(pool.get(id).size(), i as u64 + 1);
        }
    }
}
