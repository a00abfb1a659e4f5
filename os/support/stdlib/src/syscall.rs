//! Raw `syscall` stubs and their typed wrappers.

use crate::syscall_abi::{Sysno, SyscallError, decode};

#[inline(always)]
#[allow(clippy::inline_always)]
unsafe fn syscall3(n: Sysno, a0: u64, a1: u64, a2: u64) -> u64 {
    let ret: u64;
    unsafe {
        core::arch::asm!(
            "syscall",
            inlateout("rax") n as u64 => ret,
            in("rdi") a0,
            in("rsi") a1,
            in("rdx") a2,
            lateout("rcx") _, // clobbered by SYSCALL
            lateout("r11") _, // clobbered by SYSCALL
            options(nostack)
        );
    }
    ret
}

#[inline(always)]
#[allow(clippy::inline_always)]
fn call(n: Sysno, a0: u64, a1: u64, a2: u64) -> Result<u64, SyscallError> {
    // Safety: the kernel validates every argument it dereferences.
    decode(unsafe { syscall3(n, a0, a1, a2) })
}

#[inline(always)]
#[allow(clippy::inline_always)]
pub fn debug_byte(b: u8) {
    call(Sysno::DebugWrite, u64::from(b), 0, 0).ok();
}

/// Requests `size` bytes (a page multiple) of zeroed memory.
///
/// # Errors
/// As reported by the kernel, usually [`SyscallError::OutOfMemory`].
pub fn memory_get(size: u64, tag: &str) -> Result<u64, SyscallError> {
    call(
        Sysno::MemoryGet,
        size,
        tag.as_ptr().expose_provenance() as u64,
        tag.len() as u64,
    )
}

/// # Errors
/// [`SyscallError::NoSuchRegion`] if `address` did not come from [`memory_get`].
pub fn memory_release(address: u64) -> Result<(), SyscallError> {
    call(Sysno::MemoryRelease, address, 0, 0).map(|_| ())
}

/// # Errors
/// [`SyscallError::NoProcess`] outside of a process.
pub fn current_process_id() -> Result<u32, SyscallError> {
    let pid = call(Sysno::CurrentProcessId, 0, 0, 0)?;
    u32::try_from(pid).map_err(|_| SyscallError::NoProcess)
}

/// # Errors
/// [`SyscallError::NoSuchProcess`] for an unknown pid.
pub fn priority(pid: u32) -> Result<u8, SyscallError> {
    let level = call(Sysno::GetPriority, u64::from(pid), 0, 0)?;
    u8::try_from(level).map_err(|_| SyscallError::InvalidArgument)
}

/// # Errors
/// [`SyscallError::NoSuchProcess`] for an unknown pid,
/// [`SyscallError::InvalidArgument`] for an out-of-range level,
/// [`SyscallError::PermissionDenied`] for a level above the caller's own.
pub fn set_priority(pid: u32, level: u8) -> Result<(), SyscallError> {
    call(Sysno::SetPriority, u64::from(pid), u64::from(level), 0).map(|_| ())
}

/// # Errors
/// [`SyscallError::NoSuchProcess`] for an unknown pid.
pub fn process_state(pid: u32) -> Result<u8, SyscallError> {
    let state = call(Sysno::GetState, u64::from(pid), 0, 0)?;
    u8::try_from(state).map_err(|_| SyscallError::InvalidArgument)
}

pub fn yield_now() {
    call(Sysno::Yield, 0, 0, 0).ok();
}
