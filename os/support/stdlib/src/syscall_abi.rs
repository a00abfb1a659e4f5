//! # System call numbers and status words
//!
//! Arguments travel in `rdi`, `rsi`, `rdx`; the number goes in `rax` and the
//! status word comes back in `rax`. A status word is either a plain value or,
//! for the topmost [`MAX_ERROR_CODE`] values, a negated [`SyscallError`]
//! code.

/// Largest error code; status words above `u64::MAX - MAX_ERROR_CODE` are errors.
pub const MAX_ERROR_CODE: u64 = 4095;

#[repr(u64)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysno {
    /// Write a single byte to a kernel-chosen "debug" sink.
    DebugWrite = 1,
    /// `(size, tag_ptr, tag_len) -> address` of zeroed, page-aligned memory.
    MemoryGet = 0x10,
    /// `(address) -> 0`; hands back memory from [`Sysno::MemoryGet`].
    MemoryRelease = 0x11,
    /// `() -> pid` of the caller.
    CurrentProcessId = 0x20,
    /// `(pid) -> priority level`.
    GetPriority = 0x21,
    /// `(pid, level) -> 0`; `level` may not be more urgent than the caller's.
    SetPriority = 0x22,
    /// `(pid) -> process state` as its `u8` representation.
    GetState = 0x23,
    /// `() -> 0` once the caller is scheduled again.
    Yield = 0x24,
}

impl TryFrom<u64> for Sysno {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::DebugWrite,
            0x10 => Self::MemoryGet,
            0x11 => Self::MemoryRelease,
            0x20 => Self::CurrentProcessId,
            0x21 => Self::GetPriority,
            0x22 => Self::SetPriority,
            0x23 => Self::GetState,
            0x24 => Self::Yield,
            other => return Err(other),
        })
    }
}

#[repr(u64)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SyscallError {
    #[error("no such system call")]
    NoSuchCall = 1,
    #[error("invalid argument")]
    InvalidArgument = 2,
    #[error("no current process")]
    NoProcess = 3,
    #[error("no such process")]
    NoSuchProcess = 4,
    #[error("out of memory")]
    OutOfMemory = 5,
    #[error("no such memory region")]
    NoSuchRegion = 6,
    #[error("permission denied")]
    PermissionDenied = 7,
    #[error("bad user address")]
    BadAddress = 8,
}

impl SyscallError {
    #[inline]
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::NoSuchCall,
            2 => Self::InvalidArgument,
            3 => Self::NoProcess,
            4 => Self::NoSuchProcess,
            5 => Self::OutOfMemory,
            6 => Self::NoSuchRegion,
            7 => Self::PermissionDenied,
            8 => Self::BadAddress,
            _ => return None,
        })
    }
}

/// Packs a result into a status word.
///
/// Values that would read back as an error are reported as
/// [`SyscallError::InvalidArgument`].
#[must_use]
pub const fn encode(result: Result<u64, SyscallError>) -> u64 {
    match result {
        Ok(value) if value <= u64::MAX - MAX_ERROR_CODE => value,
        Ok(_) => SyscallError::InvalidArgument.code().wrapping_neg(),
        Err(e) => e.code().wrapping_neg(),
    }
}

/// Unpacks a status word.
///
/// # Errors
/// The error carried by the word; unknown codes read as
/// [`SyscallError::NoSuchCall`].
pub const fn decode(status: u64) -> Result<u64, SyscallError> {
    if status <= u64::MAX - MAX_ERROR_CODE {
        return Ok(status);
    }
    match SyscallError::from_code(status.wrapping_neg()) {
        Some(e) => Err(e),
        None => Err(SyscallError::NoSuchCall),
    }
}
