use crate::address::VirtualAddress;
use crate::descriptor::{BlockDescriptor, DescriptorId, HeapExtent};
use crate::error::HeapError;
use crate::pool::DescriptorPool;
use crate::supplier::PageSupplier;

/// Address-ordered chain of all blocks of one heap, used and free.
///
/// # Invariants
/// - Blocks are sorted by start address and never overlap.
/// - The blocks of an extent tile it without gaps.
/// - No two neighbouring blocks of the same extent are both free once
///   [`coalesce`](Self::coalesce) has run on the block that was freed.
pub struct BlockIndex {
    pool: DescriptorPool,
    head: Option<DescriptorId>,
}

impl BlockIndex {
    #[must_use]
    pub const fn new(pool: DescriptorPool) -> Self {
        Self { pool, head: None }
    }

    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: DescriptorId) -> &BlockDescriptor {
        self.pool.get(id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: DescriptorId) -> &mut BlockDescriptor {
        self.pool.get_mut(id)
    }

    #[must_use]
    pub const fn iter(&self) -> Blocks<'_> {
        Blocks {
            index: self,
            cursor: self.head,
        }
    }

    /// Records a new free block covering all of `extent`.
    ///
    /// `supplier` feeds the descriptor pool should it run dry.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if no descriptor can be obtained.
    pub fn add_extent<S>(
        &mut self,
        extent: HeapExtent,
        supplier: &mut S,
    ) -> Result<DescriptorId, HeapError>
    where
        S: PageSupplier + ?Sized,
    {
        let id = self.pool.obtain(supplier)?;
        let d = self.pool.get_mut(id);
        d.start = extent.start;
        d.size = extent.size;
        d.extent = extent;
        self.insert_sorted(id);
        Ok(id)
    }

    /// Links a detached descriptor into the chain by its start address.
    pub fn insert_sorted(&mut self, id: DescriptorId) {
        let start = self.get(id).start;

        let mut prev = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if self.get(c).start > start {
                break;
            }
            prev = cursor;
            cursor = self.get(c).next;
        }

        {
            let d = self.get_mut(id);
            d.prev = prev;
            d.next = cursor;
        }
        match prev {
            Some(p) => self.get_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        if let Some(n) = cursor {
            self.get_mut(n).prev = Some(id);
        }
    }

    /// Unlinks a block and returns its descriptor to the pool.
    pub fn remove(&mut self, id: DescriptorId) {
        self.unlink(id);
        self.pool.release(id);
    }

    fn unlink(&mut self, id: DescriptorId) {
        let (prev, next) = {
            let d = self.get(id);
            (d.prev, d.next)
        };
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.get_mut(n).prev = prev;
        }
        let d = self.get_mut(id);
        d.prev = None;
        d.next = None;
    }

    /// Lowest-addressed free block of at least `size` bytes.
    #[must_use]
    pub fn find_first_fit(&self, size: u64) -> Option<DescriptorId> {
        self.iter()
            .find(|(_, d)| !d.used && d.size >= size)
            .map(|(id, _)| id)
    }

    /// The block starting exactly at `address`, used or free.
    #[must_use]
    pub fn find_by_start(&self, address: VirtualAddress) -> Option<DescriptorId> {
        self.iter()
            .take_while(|(_, d)| d.start <= address)
            .find(|(_, d)| d.start == address)
            .map(|(id, _)| id)
    }

    /// Shrinks a free block to `size` bytes and records the excess as a new
    /// free block right after it.
    ///
    /// Returns the remainder, or `None` if the block was an exact fit.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if no descriptor can be obtained for the
    /// remainder; the block is left unchanged.
    pub fn split<S>(
        &mut self,
        id: DescriptorId,
        size: u64,
        supplier: &mut S,
    ) -> Result<Option<DescriptorId>, HeapError>
    where
        S: PageSupplier + ?Sized,
    {
        let (start, total, extent) = {
            let d = self.get(id);
            (d.start, d.size, d.extent)
        };
        if total <= size {
            return Ok(None);
        }

        let rest = self.pool.obtain(supplier)?;
        {
            let r = self.get_mut(rest);
            r.start = start + size;
            r.size = total - size;
            r.extent = extent;
        }
        self.get_mut(id).size = size;
        self.insert_sorted(rest);
        Ok(Some(rest))
    }

    /// Folds free neighbours of the same extent into the free block `id`.
    ///
    /// `id` stays valid and covers the merged range. Returns the number of
    /// merges done (at most two).
    pub fn coalesce(&mut self, id: DescriptorId) -> usize {
        if self.get(id).used {
            return 0;
        }
        let mut merges = 0;

        if let Some(p) = self.get(id).prev {
            let prev = self.get(p);
            if !prev.used && prev.is_followed_by(self.get(id)) {
                let (start, size) = (prev.start, prev.size);
                self.remove(p);
                let d = self.get_mut(id);
                d.start = start;
                d.size += size;
                merges += 1;
            }
        }

        if let Some(n) = self.get(id).next {
            let next = self.get(n);
            if !next.used && self.get(id).is_followed_by(next) {
                let size = next.size;
                self.remove(n);
                self.get_mut(id).size += size;
                merges += 1;
            }
        }

        merges
    }

    /// Whether `id` is a free block that covers its whole extent.
    #[must_use]
    pub fn spans_whole_extent(&self, id: DescriptorId) -> bool {
        let d = self.get(id);
        !d.used && d.start == d.extent.start && d.size == d.extent.size
    }

    /// Hands the descriptor pool's blocks back to `supplier`.
    pub fn release_descriptors<S>(self, supplier: &mut S)
    where
        S: PageSupplier + ?Sized,
    {
        self.pool.release_blocks(supplier);
    }

    /// Walks the chain and verifies its structural invariants.
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] naming the first violation found.
    pub fn check(&self) -> Result<(), HeapError> {
        let mut count = 0_usize;
        let mut prev: Option<(DescriptorId, &BlockDescriptor)> = None;

        for (id, d) in self.iter() {
            count += 1;
            if count > self.pool.used_slots() {
                return Err(HeapError::Corrupted("block chain is longer than the pool"));
            }
            if d.size == 0 {
                return Err(HeapError::Corrupted("empty block"));
            }
            if d.start < d.extent.start || d.end() > d.extent.end() {
                return Err(HeapError::Corrupted("block exceeds its extent"));
            }
            if d.used != d.owner.is_some() {
                return Err(HeapError::Corrupted("owner does not match usage"));
            }
            if d.prev != prev.map(|(p, _)| p) {
                return Err(HeapError::Corrupted("broken back link"));
            }

            match prev {
                Some((_, p)) if p.extent.start == d.extent.start => {
                    if p.end() != d.start {
                        return Err(HeapError::Corrupted("gap or overlap inside an extent"));
                    }
                    if !p.used && !d.used {
                        return Err(HeapError::Corrupted("adjacent free blocks not merged"));
                    }
                }
                Some((_, p)) => {
                    if p.end() != p.extent.end() {
                        return Err(HeapError::Corrupted("extent not covered to its end"));
                    }
                    if p.extent.end() > d.extent.start {
                        return Err(HeapError::Corrupted("extents overlap or are out of order"));
                    }
                    if d.start != d.extent.start {
                        return Err(HeapError::Corrupted("extent not covered from its start"));
                    }
                }
                None => {
                    if d.start != d.extent.start {
                        return Err(HeapError::Corrupted("extent not covered from its start"));
                    }
                }
            }
            prev = Some((id, d));
        }

        if let Some((_, p)) = prev
            && p.end() != p.extent.end()
        {
            return Err(HeapError::Corrupted("extent not covered to its end"));
        }
        if count != self.pool.used_slots() {
            return Err(HeapError::Corrupted("descriptor leaked from the chain"));
        }
        Ok(())
    }
}

/// Iterator over the blocks of a [`BlockIndex`] in address order.
pub struct Blocks<'a> {
    index: &'a BlockIndex,
    cursor: Option<DescriptorId>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = (DescriptorId, &'a BlockDescriptor);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let d = self.index.get(id);
        self.cursor = d.next;
        Some((id, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_BLOCK_SIZE;
    use crate::supplier::testing::HostPages;
    use kernel_sync::ProcessId;

    const PAGE: u64 = 4096;

    fn extent(start: u64, size: u64) -> HeapExtent {
        HeapExtent {
            start: VirtualAddress::new(start),
            size,
        }
    }

    /// An empty index plus the pages its descriptors come from.
    fn index() -> (BlockIndex, HostPages) {
        (
            BlockIndex::new(DescriptorPool::new(MEMORY_BLOCK_SIZE)),
            HostPages::default(),
        )
    }

    fn mark_used(index: &mut BlockIndex, id: DescriptorId) {
        let d = index.get_mut(id);
        d.used = true;
        d.owner = ProcessId::new(1);
    }

    fn mark_free(index: &mut BlockIndex, id: DescriptorId) {
        let d = index.get_mut(id);
        d.used = false;
        d.owner = None;
    }

    fn starts(index: &BlockIndex) -> Vec<u64> {
        index.iter().map(|(_, d)| d.start.as_u64()).collect()
    }

    #[test]
    fn extents_are_kept_in_address_order() {
        let (mut idx, mut pages) = index();
        idx.add_extent(extent(0x3000, PAGE), &mut pages).unwrap();
        idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        idx.add_extent(extent(0x8000, PAGE), &mut pages).unwrap();
        assert_eq!(starts(&idx), [0x1000, 0x3000, 0x8000]);
        idx.check().unwrap();
    }

    #[test]
    fn first_fit_takes_lowest_address() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        let b = idx.add_extent(extent(0x4000, 2 * PAGE), &mut pages).unwrap();
        assert_eq!(idx.find_first_fit(100), Some(a));
        assert_eq!(idx.find_first_fit(PAGE + 1), Some(b));
        assert_eq!(idx.find_first_fit(3 * PAGE), None);

        mark_used(&mut idx, a);
        assert_eq!(idx.find_first_fit(100), Some(b));
    }

    #[test]
    fn split_carves_remainder_after_block() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        let rest = idx.split(a, 100, &mut pages).unwrap().unwrap();

        assert_eq!(idx.get(a).size(), 100);
        let r = idx.get(rest);
        assert_eq!(r.start().as_u64(), 0x1000 + 100);
        assert_eq!(r.size(), PAGE - 100);
        assert_eq!(r.extent(), idx.get(a).extent());
        assert_eq!(starts(&idx), [0x1000, 0x1064]);

        mark_used(&mut idx, a);
        idx.check().unwrap();
    }

    #[test]
    fn exact_fit_does_not_split() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        assert_eq!(idx.split(a, PAGE, &mut pages).unwrap(), None);
        assert_eq!(idx.pool().used_slots(), 1);
    }

    #[test]
    fn coalesce_merges_both_sides() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        let b = idx.split(a, 100, &mut pages).unwrap().unwrap();
        let c = idx.split(b, 200, &mut pages).unwrap().unwrap();
        for id in [a, b, c] {
            mark_used(&mut idx, id);
        }
        idx.check().unwrap();

        mark_free(&mut idx, a);
        assert_eq!(idx.coalesce(a), 0);
        mark_free(&mut idx, c);
        assert_eq!(idx.coalesce(c), 0);
        mark_free(&mut idx, b);
        assert_eq!(idx.coalesce(b), 2);

        assert_eq!(idx.pool().used_slots(), 1);
        assert!(idx.spans_whole_extent(b));
        idx.check().unwrap();
    }

    #[test]
    fn coalesce_stops_at_extent_boundary() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        let b = idx.add_extent(extent(0x2000, PAGE), &mut pages).unwrap();
        // contiguous addresses, different extents
        assert_eq!(idx.coalesce(a), 0);
        assert_eq!(idx.coalesce(b), 0);
        assert_eq!(idx.pool().used_slots(), 2);
        idx.check().unwrap();
    }

    #[test]
    fn find_by_start_requires_exact_address() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        let b = idx.split(a, 64, &mut pages).unwrap().unwrap();
        assert_eq!(idx.find_by_start(VirtualAddress::new(0x1000)), Some(a));
        assert_eq!(idx.find_by_start(VirtualAddress::new(0x1040)), Some(b));
        assert_eq!(idx.find_by_start(VirtualAddress::new(0x1004)), None);
        assert_eq!(idx.find_by_start(VirtualAddress::new(0x9000)), None);
    }

    #[test]
    fn remove_unlinks_and_recycles() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        let b = idx.add_extent(extent(0x3000, PAGE), &mut pages).unwrap();
        let c = idx.add_extent(extent(0x5000, PAGE), &mut pages).unwrap();
        idx.remove(b);
        assert_eq!(starts(&idx), [0x1000, 0x5000]);
        assert_eq!(idx.get(a).next, Some(c));
        assert_eq!(idx.get(c).prev, Some(a));
        idx.check().unwrap();
    }

    #[test]
    fn check_detects_unmerged_free_neighbours() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        idx.split(a, 128, &mut pages).unwrap();
        assert_eq!(
            idx.check(),
            Err(HeapError::Corrupted("adjacent free blocks not merged"))
        );
    }

    #[test]
    fn check_detects_gaps() {
        let (mut idx, mut pages) = index();
        let a = idx.add_extent(extent(0x1000, PAGE), &mut pages).unwrap();
        idx.get_mut(a).size -= 4;
        assert!(matches!(idx.check(), Err(HeapError::Corrupted(_))));
    }
}
