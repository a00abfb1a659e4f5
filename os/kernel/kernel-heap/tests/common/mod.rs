#![allow(dead_code)]

use kernel_heap::{DESCRIPTOR_POOL_TAG, PageSupplier, SupplierError, VirtualAddress};
use kernel_sync::{OracleError, Priority, ProcessId, ProcessOracle, ProcessState};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const PAGE: u64 = 4096;

thread_local! {
    static CURRENT: Cell<u32> = const { Cell::new(1) };
}

/// Every thread is a running process; pid 1 unless switched.
#[derive(Default)]
pub struct ThreadOracle;

impl ThreadOracle {
    pub fn switch_to(&self, pid: u32) {
        CURRENT.with(|c| c.set(pid));
    }

    pub fn pid(n: u32) -> ProcessId {
        ProcessId::new(n).expect("non-zero pid")
    }
}

impl ProcessOracle for ThreadOracle {
    fn current_process_id(&self) -> Result<ProcessId, OracleError> {
        ProcessId::new(CURRENT.with(Cell::get)).ok_or(OracleError::NoProcess)
    }

    fn priority(&self, _pid: ProcessId) -> Result<Priority, OracleError> {
        Ok(Priority::new(3))
    }

    fn set_priority(&self, _pid: ProcessId, _priority: Priority) -> Result<(), OracleError> {
        Ok(())
    }

    fn state(&self, _pid: ProcessId) -> Result<ProcessState, OracleError> {
        Ok(ProcessState::Running)
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

#[derive(Default)]
struct Regions {
    /// Extents handed to the heap.
    live: HashMap<u64, Layout>,
    /// Pages holding the heap's descriptors.
    descriptors: HashMap<u64, Layout>,
    acquired: usize,
    released: usize,
    descriptor_pages_acquired: usize,
    exhausted: bool,
    no_descriptor_pages: bool,
    refuse_release: bool,
}

/// Page supplier on top of the host allocator.
///
/// Clones share the same region table, so a test can keep a handle to watch
/// what the heap does with its copy. Pages requested for the heap's
/// descriptors are counted apart from extents.
#[derive(Clone, Default)]
pub struct HostPageSupplier {
    regions: Arc<Mutex<Regions>>,
}

impl HostPageSupplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.regions.lock().unwrap().live.len()
    }

    pub fn outstanding_bytes(&self) -> u64 {
        self.regions
            .lock()
            .unwrap()
            .live
            .values()
            .map(|l| l.size() as u64)
            .sum()
    }

    pub fn acquired(&self) -> usize {
        self.regions.lock().unwrap().acquired
    }

    pub fn released(&self) -> usize {
        self.regions.lock().unwrap().released
    }

    /// Descriptor pages currently held by the heap.
    pub fn descriptor_pages(&self) -> usize {
        self.regions.lock().unwrap().descriptors.len()
    }

    /// Descriptor pages ever requested.
    pub fn descriptor_pages_acquired(&self) -> usize {
        self.regions.lock().unwrap().descriptor_pages_acquired
    }

    /// Makes every further `acquire` fail.
    pub fn set_exhausted(&self, exhausted: bool) {
        self.regions.lock().unwrap().exhausted = exhausted;
    }

    /// Makes every further descriptor page request fail.
    pub fn fail_descriptor_pages(&self, fail: bool) {
        self.regions.lock().unwrap().no_descriptor_pages = fail;
    }

    /// Makes every further `release` fail.
    pub fn set_refuse_release(&self, refuse: bool) {
        self.regions.lock().unwrap().refuse_release = refuse;
    }
}

unsafe impl PageSupplier for HostPageSupplier {
    fn acquire(&mut self, size: u64, tag: &str) -> Result<VirtualAddress, SupplierError> {
        let mut regions = self.regions.lock().unwrap();
        if regions.exhausted || (regions.no_descriptor_pages && tag == DESCRIPTOR_POOL_TAG) {
            return Err(SupplierError::OutOfMemory);
        }
        assert_eq!(size % PAGE, 0, "extents are page multiples");
        let size = usize::try_from(size).map_err(|_| SupplierError::OutOfMemory)?;
        let layout = Layout::from_size_align(size, 4096).map_err(|_| SupplierError::OutOfMemory)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(SupplierError::OutOfMemory);
        }
        let va = VirtualAddress::from_ptr(ptr);
        if tag == DESCRIPTOR_POOL_TAG {
            regions.descriptors.insert(va.as_u64(), layout);
            regions.descriptor_pages_acquired += 1;
        } else {
            regions.live.insert(va.as_u64(), layout);
            regions.acquired += 1;
        }
        Ok(va)
    }

    fn release(&mut self, address: VirtualAddress) -> Result<(), SupplierError> {
        let mut regions = self.regions.lock().unwrap();
        if regions.refuse_release {
            return Err(SupplierError::NoSuchRegion(address));
        }
        if let Some(layout) = regions.descriptors.remove(&address.as_u64()) {
            unsafe { dealloc(address.as_mut_ptr(), layout) };
            return Ok(());
        }
        let layout = regions
            .live
            .remove(&address.as_u64())
            .ok_or(SupplierError::NoSuchRegion(address))?;
        unsafe { dealloc(address.as_mut_ptr(), layout) };
        regions.released += 1;
        Ok(())
    }
}

impl Drop for Regions {
    fn drop(&mut self) {
        for (addr, layout) in self.live.drain().chain(self.descriptors.drain()) {
            unsafe { dealloc(VirtualAddress::new(addr).as_mut_ptr(), layout) };
        }
    }
}

/// Reads `len` bytes at `address`.
pub fn read(address: VirtualAddress, len: usize) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(address.as_mut_ptr::<u8>(), len).to_vec() }
}

/// Fills `len` bytes at `address` with `byte`.
pub fn fill(address: VirtualAddress, len: usize, byte: u8) {
    unsafe { std::ptr::write_bytes(address.as_mut_ptr::<u8>(), byte, len) };
}
