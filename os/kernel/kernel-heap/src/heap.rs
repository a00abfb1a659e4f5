use crate::address::VirtualAddress;
use crate::config::HeapConfig;
use crate::descriptor::{DescriptorId, HeapExtent};
use crate::error::HeapError;
use crate::index::BlockIndex;
use crate::pool::DescriptorPool;
use crate::stats::{BlockInfo, HeapStatistics};
use crate::supplier::PageSupplier;
use crate::tag::AllocationTag;
use alloc::vec::Vec;
use kernel_sync::{InterruptGate, ProcessId, ProcessMutex, ProcessMutexGuard, ProcessOracle};
use log::{debug, error, info, warn};

/// A first-fit heap on top of a [`PageSupplier`].
///
/// Every operation runs under the heap's [`ProcessMutex`]; `O` names the
/// caller and `G` masks interrupts around the lock's claim. Memory is zeroed
/// when freed, and since the supplier hands out zeroed pages, every
/// allocation starts out zeroed.
///
/// Extents are requested in multiples of [`HeapConfig::granularity`] and
/// returned to the supplier as soon as they hold no used block. The
/// descriptors that track the blocks live in pages from the same supplier,
/// which are kept until [`teardown`](Self::teardown).
///
/// # Abandoned operations
///
/// A process the oracle reports as sleeping, stopped, finished or a zombie
/// loses the heap lock to the next caller. The oracle must therefore not
/// report a process in one of those states while it is inside a heap call
/// unless it never resumes that call, as with a terminated process.
pub struct Heap<S, O, G> {
    config: HeapConfig,
    state: ProcessMutex<HeapState<S>>,
    oracle: O,
    gate: G,
}

struct HeapState<S> {
    index: BlockIndex,
    supplier: S,
    total_bytes: u64,
    used_bytes: u64,
}

impl<S, O, G> Heap<S, O, G>
where
    S: PageSupplier,
    O: ProcessOracle,
    G: InterruptGate,
{
    /// Creates an empty heap. No memory is requested until the first
    /// allocation.
    ///
    /// # Errors
    /// [`HeapError::InvalidArgument`] if `config` does not validate.
    pub fn new(config: HeapConfig, supplier: S, oracle: O, gate: G) -> Result<Self, HeapError> {
        config.validate()?;
        let pool = DescriptorPool::new(config.pool_block_size());
        Ok(Self {
            config,
            state: ProcessMutex::new(HeapState {
                index: BlockIndex::new(pool),
                supplier,
                total_bytes: 0,
                used_bytes: 0,
            }),
            oracle,
            gate,
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Allocates `size` bytes, rounded up to the allocation alignment, on
    /// behalf of the current process.
    ///
    /// # Errors
    /// - [`HeapError::InvalidArgument`] for a zero-sized request.
    /// - [`HeapError::NoProcess`] if there is no current process.
    /// - [`HeapError::OutOfMemory`] if neither the heap nor the supplier can
    ///   satisfy the request.
    /// - [`HeapError::Lock`] if the heap lock is unavailable.
    pub fn allocate(&self, size: u64, tag: &str) -> Result<VirtualAddress, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidArgument);
        }
        let size = self
            .config
            .round_request(size)
            .ok_or(HeapError::OutOfMemory)?;

        let mut guard = self.lock()?;
        let owner = guard.owner();
        guard.allocate(&self.config, size, owner, tag)
    }

    /// Frees the block starting at `address`.
    ///
    /// # Errors
    /// - [`HeapError::NoSuchBlock`] if no block starts at `address`.
    /// - [`HeapError::AlreadyFree`] if the block is not in use.
    /// - [`HeapError::NoProcess`] / [`HeapError::Lock`] as for allocation.
    pub fn deallocate(&self, address: VirtualAddress, tag: &str) -> Result<(), HeapError> {
        self.lock()?.deallocate(address, tag)
    }

    /// Current usage counters.
    ///
    /// # Errors
    /// [`HeapError::NoProcess`] / [`HeapError::Lock`] if the heap lock is
    /// unavailable.
    pub fn statistics(&self) -> Result<HeapStatistics, HeapError> {
        Ok(self.lock()?.statistics())
    }

    /// Describes the block starting at `address`.
    ///
    /// # Errors
    /// [`HeapError::NoSuchBlock`] if no block starts there.
    pub fn describe_block(&self, address: VirtualAddress) -> Result<BlockInfo, HeapError> {
        let state = self.lock()?;
        let id = state
            .index
            .find_by_start(address)
            .ok_or(HeapError::NoSuchBlock(address))?;
        Ok(BlockInfo::from(state.index.get(id)))
    }

    /// Snapshot of every block in address order.
    ///
    /// The snapshot is stored through `alloc`, so this is not for use while
    /// the heap serves as the global allocator.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the snapshot cannot be stored, or a lock
    /// failure.
    pub fn blocks(&self) -> Result<Vec<BlockInfo>, HeapError> {
        let state = self.lock()?;
        let mut out = Vec::new();
        out.try_reserve_exact(state.index.pool().used_slots())
            .map_err(|_| HeapError::OutOfMemory)?;
        out.extend(state.index.iter().map(|(_, d)| BlockInfo::from(d)));
        Ok(out)
    }

    /// Verifies the block chain and the counters.
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] on the first inconsistency, or a lock failure.
    pub fn check(&self) -> Result<(), HeapError> {
        let state = self.lock()?;
        let result = state.check();
        if let Err(e) = result {
            error!("heap: {e}");
        }
        result
    }

    /// Logs every block and the overall usage.
    ///
    /// # Errors
    /// A lock failure.
    pub fn dump(&self) -> Result<(), HeapError> {
        let state = self.lock()?;
        for (_, d) in state.index.iter() {
            if d.used() {
                info!(
                    "heap: {} {:>10} bytes used by {} ({})",
                    d.start(),
                    d.size(),
                    d.owner().map_or(0, ProcessId::as_u32),
                    d.tag()
                );
            } else {
                info!("heap: {} {:>10} bytes free", d.start(), d.size());
            }
        }
        let stats = state.statistics();
        info!(
            "heap: {}/{} bytes used ({}%), {}/{} descriptors used",
            stats.used_bytes,
            stats.total_bytes,
            stats.used_percent(),
            stats.used_descriptor_slots,
            stats.total_descriptor_slots
        );
        Ok(())
    }

    /// Returns every extent to the supplier and hands the supplier back.
    ///
    /// Blocks still in use are reported and freed with their extent.
    #[must_use]
    pub fn teardown(self) -> S {
        let HeapState {
            index,
            mut supplier,
            used_bytes,
            ..
        } = self.state.into_inner();

        if used_bytes > 0 {
            let leaked = index.iter().filter(|(_, d)| d.used()).count();
            warn!("heap: tearing down with {leaked} blocks ({used_bytes} bytes) in use");
        }

        let mut last: Option<HeapExtent> = None;
        for (_, d) in index.iter() {
            let extent = d.extent();
            if last.is_some_and(|l| l.start == extent.start) {
                continue;
            }
            last = Some(extent);
            if let Err(e) = supplier.release(extent.start) {
                error!("heap: could not release extent {}: {e}", extent.start);
            }
        }
        index.release_descriptors(&mut supplier);
        supplier
    }

    fn lock(&self) -> Result<ProcessMutexGuard<'_, HeapState<S>>, HeapError> {
        // Safety: guards never leave the heap call that created them and are
        // not held across a yield. A holder that loses the lock is one the
        // oracle does not resume inside that call (see the type docs).
        Ok(unsafe { self.state.lock(&self.oracle, &self.gate) }?)
    }
}

impl<S: PageSupplier> HeapState<S> {
    fn statistics(&self) -> HeapStatistics {
        HeapStatistics {
            total_descriptor_slots: self.index.pool().total_slots(),
            used_descriptor_slots: self.index.pool().used_slots(),
            descriptor_bytes: self.index.pool().reserved_bytes(),
            total_bytes: self.total_bytes,
            used_bytes: self.used_bytes,
        }
    }

    fn allocate(
        &mut self,
        config: &HeapConfig,
        size: u64,
        owner: ProcessId,
        tag: &str,
    ) -> Result<VirtualAddress, HeapError> {
        let (id, grown) = match self.index.find_first_fit(size) {
            Some(id) => (id, false),
            None => {
                self.grow(config, size, tag)?;
                let id = self
                    .index
                    .find_first_fit(size)
                    .ok_or(HeapError::OutOfMemory)?;
                (id, true)
            }
        };

        if let Err(e) = self.index.split(id, size, &mut self.supplier) {
            // Only an extent grown for this request is handed back; an
            // existing free block is left as it was.
            if grown {
                self.reclaim_extent(id);
            }
            return Err(e);
        }
        let d = self.index.get_mut(id);
        d.used = true;
        d.owner = Some(owner);
        d.tag = AllocationTag::new(tag);
        self.used_bytes += size;
        Ok(d.start)
    }

    fn deallocate(&mut self, address: VirtualAddress, tag: &str) -> Result<(), HeapError> {
        let Some(id) = self.index.find_by_start(address) else {
            warn!("heap: {tag} freed unknown block {address}");
            return Err(HeapError::NoSuchBlock(address));
        };
        let d = self.index.get_mut(id);
        if !d.used {
            warn!("heap: {tag} freed block {address} twice");
            return Err(HeapError::AlreadyFree(address));
        }

        let size = d.size;
        let len = usize::try_from(size).map_err(|_| HeapError::Corrupted("block size"))?;
        // Safety: the block lies inside an extent obtained from the supplier,
        // which guarantees the memory is ours and writable until released.
        unsafe {
            core::ptr::write_bytes(d.start.as_mut_ptr::<u8>(), 0, len);
        }
        d.used = false;
        d.owner = None;
        d.tag = AllocationTag::default();
        self.used_bytes -= size;

        self.index.coalesce(id);
        self.reclaim_extent(id);
        Ok(())
    }

    /// Requests a new extent able to hold `request` bytes.
    fn grow(&mut self, config: &HeapConfig, request: u64, tag: &str) -> Result<(), HeapError> {
        let size = config
            .extent_size_for(request)
            .ok_or(HeapError::OutOfMemory)?;
        let start = self.supplier.acquire(size, tag).map_err(|e| {
            error!("heap: no {size} byte extent for {tag}: {e}");
            HeapError::OutOfMemory
        })?;
        let extent = HeapExtent { start, size };

        let added = if start.checked_add(size).is_none() {
            error!("heap: extent {start} of {size} bytes wraps the address space");
            Err(HeapError::OutOfMemory)
        } else {
            self.index.add_extent(extent, &mut self.supplier)
        };
        if let Err(e) = added {
            if let Err(re) = self.supplier.release(start) {
                error!("heap: could not hand back extent {start}: {re}");
            }
            return Err(e);
        }
        self.total_bytes += size;
        debug!("heap: added extent {start} of {size} bytes for a {request} byte request");
        Ok(())
    }

    /// Returns the extent of `id` to the supplier if `id` is all that is left
    /// of it.
    fn reclaim_extent(&mut self, id: DescriptorId) {
        if !self.index.spans_whole_extent(id) {
            return;
        }
        let extent = self.index.get(id).extent();
        match self.supplier.release(extent.start) {
            Ok(()) => {
                self.index.remove(id);
                self.total_bytes -= extent.size;
                debug!(
                    "heap: released extent {} of {} bytes",
                    extent.start, extent.size
                );
            }
            Err(e) => {
                warn!("heap: keeping extent {}: {e}", extent.start);
            }
        }
    }

    fn check(&self) -> Result<(), HeapError> {
        self.index.check()?;

        let mut used = 0_u64;
        let mut total = 0_u64;
        let mut last: Option<VirtualAddress> = None;
        for (_, d) in self.index.iter() {
            if d.used() {
                used += d.size();
            }
            if last != Some(d.extent().start) {
                total += d.extent().size;
                last = Some(d.extent().start);
            }
        }
        if used != self.used_bytes {
            return Err(HeapError::Corrupted("used bytes do not match the blocks"));
        }
        if total != self.total_bytes {
            return Err(HeapError::Corrupted("total bytes do not match the extents"));
        }
        Ok(())
    }
}
