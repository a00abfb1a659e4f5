//! The calling process's heap, backed by the memory system calls.

use crate::syscall;
use crate::syscall_abi::SyscallError;
use kernel_heap::{HeapError, PageSupplier, SupplierError, UserHeap, VirtualAddress};
use kernel_sync::{NoInterruptGate, OracleError, Priority, ProcessId, ProcessOracle, ProcessState};

/// Pages from [`Sysno::MemoryGet`](crate::syscall_abi::Sysno::MemoryGet).
#[derive(Debug, Default)]
pub struct SyscallPageSupplier;

// Safety: the kernel maps fresh zeroed pages for the caller on MemoryGet and
// unmaps them only on MemoryRelease.
unsafe impl PageSupplier for SyscallPageSupplier {
    fn acquire(&mut self, size: u64, tag: &str) -> Result<VirtualAddress, SupplierError> {
        syscall::memory_get(size, tag)
            .map(VirtualAddress::new)
            .map_err(|_| SupplierError::OutOfMemory)
    }

    fn release(&mut self, address: VirtualAddress) -> Result<(), SupplierError> {
        syscall::memory_release(address.as_u64()).map_err(|_| SupplierError::NoSuchRegion(address))
    }
}

/// Scheduler queries through the process system calls.
#[derive(Debug, Default)]
pub struct SyscallOracle;

const fn oracle_error(e: SyscallError, pid: ProcessId) -> OracleError {
    match e {
        SyscallError::NoSuchProcess => OracleError::NoSuchProcess(pid),
        _ => OracleError::NoProcess,
    }
}

impl ProcessOracle for SyscallOracle {
    fn current_process_id(&self) -> Result<ProcessId, OracleError> {
        let pid = syscall::current_process_id().map_err(|_| OracleError::NoProcess)?;
        ProcessId::new(pid).ok_or(OracleError::NoProcess)
    }

    fn priority(&self, pid: ProcessId) -> Result<Priority, OracleError> {
        syscall::priority(pid.as_u32())
            .map(Priority::new)
            .map_err(|e| oracle_error(e, pid))
    }

    fn set_priority(&self, pid: ProcessId, priority: Priority) -> Result<(), OracleError> {
        syscall::set_priority(pid.as_u32(), priority.level()).map_err(|e| oracle_error(e, pid))
    }

    fn state(&self, pid: ProcessId) -> Result<ProcessState, OracleError> {
        let raw = syscall::process_state(pid.as_u32()).map_err(|e| oracle_error(e, pid))?;
        ProcessState::try_from(raw).map_err(|_| OracleError::NoSuchProcess(pid))
    }

    fn yield_now(&self) {
        syscall::yield_now();
    }
}

/// User code cannot mask interrupts; the kernel serializes the claim.
pub type ProcessHeap = UserHeap<SyscallPageSupplier, SyscallOracle, NoInterruptGate>;

/// Creates a heap for the calling process.
///
/// # Errors
/// Never with the default configuration.
pub fn process_heap() -> Result<ProcessHeap, HeapError> {
    UserHeap::new(SyscallPageSupplier, SyscallOracle, NoInterruptGate)
}
