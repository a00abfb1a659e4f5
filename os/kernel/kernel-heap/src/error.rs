use crate::address::VirtualAddress;
use kernel_sync::LockError;

/// Failures of the heap operations.
///
/// A failed operation leaves the heap exactly as it was.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no current process")]
    NoProcess,
    #[error("block at {0} is already free")]
    AlreadyFree(VirtualAddress),
    #[error("no block starts at {0}")]
    NoSuchBlock(VirtualAddress),
    #[error("out of memory")]
    OutOfMemory,
    #[error("operation requires kernel privilege")]
    PermissionDenied,
    #[error("heap lock: {0}")]
    Lock(LockError),
    #[error("heap corrupted: {0}")]
    Corrupted(&'static str),
}

impl From<LockError> for HeapError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::NoProcess => Self::NoProcess,
            other => Self::Lock(other),
        }
    }
}
