//! # Kernel and user heaps
//!
//! Both share [`Heap`]; they differ in extent granularity and in that the
//! kernel heap refuses callers that do not run in [`Ring::Ring0`].

use crate::address::VirtualAddress;
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::heap::Heap;
use crate::stats::{BlockInfo, HeapStatistics};
use crate::supplier::PageSupplier;
use kernel_sync::{InterruptGate, ProcessOracle};
use log::warn;

/// x86 privilege level of the running code.
///
/// Only rings 0 (kernel) and 3 (user) are used.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Ring {
    Ring0 = 0,
    Ring3 = 3,
}

impl Ring {
    #[inline]
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Extracts the requested privilege level from a code segment selector.
    #[inline]
    #[must_use]
    pub const fn from_selector(cs: u16) -> Self {
        if cs & 0b11 == 0 {
            Self::Ring0
        } else {
            Self::Ring3
        }
    }
}

impl From<Ring> for u8 {
    #[inline]
    fn from(r: Ring) -> Self {
        r.to_u8()
    }
}

impl TryFrom<u8> for Ring {
    type Error = u8;

    #[inline]
    fn try_from(r: u8) -> Result<Self, Self::Error> {
        match r {
            0 => Ok(Self::Ring0),
            3 => Ok(Self::Ring3),
            _ => Err(r),
        }
    }
}

/// Tells which ring the caller of a heap entry point runs in.
pub trait PrivilegeProbe {
    fn current_ring(&self) -> Ring;
}

/// A fixed ring, for contexts whose privilege never changes.
impl PrivilegeProbe for Ring {
    fn current_ring(&self) -> Ring {
        *self
    }
}

impl<T> PrivilegeProbe for &T
where
    T: PrivilegeProbe + ?Sized,
{
    fn current_ring(&self) -> Ring {
        (**self).current_ring()
    }
}

/// Reads the privilege level from the `cs` register.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Copy, Clone)]
pub struct CpuPrivilegeProbe;

#[cfg(target_arch = "x86_64")]
impl PrivilegeProbe for CpuPrivilegeProbe {
    fn current_ring(&self) -> Ring {
        let cs: u16;
        unsafe {
            core::arch::asm!("mov {0:x}, cs", out(reg) cs, options(nomem, nostack, preserves_flags));
        }
        Ring::from_selector(cs)
    }
}

/// The allocation entry points shared by kernel and user heaps.
pub trait HeapInterface {
    /// See [`Heap::allocate`].
    ///
    /// # Errors
    /// As [`Heap::allocate`], plus [`HeapError::PermissionDenied`] where
    /// the heap restricts its callers.
    fn allocate(&self, size: u64, tag: &str) -> Result<VirtualAddress, HeapError>;

    /// See [`Heap::deallocate`].
    ///
    /// # Errors
    /// As [`Heap::deallocate`], plus [`HeapError::PermissionDenied`].
    fn deallocate(&self, address: VirtualAddress, tag: &str) -> Result<(), HeapError>;

    /// See [`Heap::statistics`].
    ///
    /// # Errors
    /// As [`Heap::statistics`], plus [`HeapError::PermissionDenied`].
    fn statistics(&self) -> Result<HeapStatistics, HeapError>;

    /// See [`Heap::describe_block`].
    ///
    /// # Errors
    /// As [`Heap::describe_block`], plus [`HeapError::PermissionDenied`].
    fn describe_block(&self, address: VirtualAddress) -> Result<BlockInfo, HeapError>;
}

/// The kernel's heap: 1 MiB extents, ring 0 callers only.
pub struct KernelHeap<S, O, G, P> {
    heap: Heap<S, O, G>,
    probe: P,
}

impl<S, O, G, P> KernelHeap<S, O, G, P>
where
    S: PageSupplier,
    O: ProcessOracle,
    G: InterruptGate,
    P: PrivilegeProbe,
{
    /// # Errors
    /// Never with the kernel preset; see [`Heap::new`].
    pub fn new(supplier: S, oracle: O, gate: G, probe: P) -> Result<Self, HeapError> {
        Self::with_config(HeapConfig::kernel(), supplier, oracle, gate, probe)
    }

    /// # Errors
    /// [`HeapError::InvalidArgument`] if `config` does not validate.
    pub fn with_config(
        config: HeapConfig,
        supplier: S,
        oracle: O,
        gate: G,
        probe: P,
    ) -> Result<Self, HeapError> {
        Ok(Self {
            heap: Heap::new(config, supplier, oracle, gate)?,
            probe,
        })
    }

    /// The underlying heap, for diagnostics.
    #[must_use]
    pub const fn heap(&self) -> &Heap<S, O, G> {
        &self.heap
    }

    #[must_use]
    pub fn teardown(self) -> S {
        self.heap.teardown()
    }

    fn ensure_privileged(&self) -> Result<(), HeapError> {
        match self.probe.current_ring() {
            Ring::Ring0 => Ok(()),
            ring => {
                warn!("heap: kernel heap called from {ring:?}");
                Err(HeapError::PermissionDenied)
            }
        }
    }
}

impl<S, O, G, P> HeapInterface for KernelHeap<S, O, G, P>
where
    S: PageSupplier,
    O: ProcessOracle,
    G: InterruptGate,
    P: PrivilegeProbe,
{
    fn allocate(&self, size: u64, tag: &str) -> Result<VirtualAddress, HeapError> {
        self.ensure_privileged()?;
        self.heap.allocate(size, tag)
    }

    fn deallocate(&self, address: VirtualAddress, tag: &str) -> Result<(), HeapError> {
        self.ensure_privileged()?;
        self.heap.deallocate(address, tag)
    }

    fn statistics(&self) -> Result<HeapStatistics, HeapError> {
        self.ensure_privileged()?;
        self.heap.statistics()
    }

    fn describe_block(&self, address: VirtualAddress) -> Result<BlockInfo, HeapError> {
        self.ensure_privileged()?;
        self.heap.describe_block(address)
    }
}

/// A process-local heap: 64 KiB extents, open to any caller.
pub struct UserHeap<S, O, G> {
    heap: Heap<S, O, G>,
}

impl<S, O, G> UserHeap<S, O, G>
where
    S: PageSupplier,
    O: ProcessOracle,
    G: InterruptGate,
{
    /// # Errors
    /// Never with the user preset; see [`Heap::new`].
    pub fn new(supplier: S, oracle: O, gate: G) -> Result<Self, HeapError> {
        Self::with_config(HeapConfig::user(), supplier, oracle, gate)
    }

    /// # Errors
    /// [`HeapError::InvalidArgument`] if `config` does not validate.
    pub fn with_config(
        config: HeapConfig,
        supplier: S,
        oracle: O,
        gate: G,
    ) -> Result<Self, HeapError> {
        Ok(Self {
            heap: Heap::new(config, supplier, oracle, gate)?,
        })
    }

    #[must_use]
    pub const fn heap(&self) -> &Heap<S, O, G> {
        &self.heap
    }

    #[must_use]
    pub fn teardown(self) -> S {
        self.heap.teardown()
    }
}

impl<S, O, G> HeapInterface for UserHeap<S, O, G>
where
    S: PageSupplier,
    O: ProcessOracle,
    G: InterruptGate,
{
    fn allocate(&self, size: u64, tag: &str) -> Result<VirtualAddress, HeapError> {
        self.heap.allocate(size, tag)
    }

    fn deallocate(&self, address: VirtualAddress, tag: &str) -> Result<(), HeapError> {
        self.heap.deallocate(address, tag)
    }

    fn statistics(&self) -> Result<HeapStatistics, HeapError> {
        self.heap.statistics()
    }

    fn describe_block(&self, address: VirtualAddress) -> Result<BlockInfo, HeapError> {
        self.heap.describe_block(address)
    }
}
