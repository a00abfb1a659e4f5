use kernel_heap::config::MAX_TAG_LENGTH;
use kernel_heap::{SupplierError, VirtualAddress};
use kernel_sync::{OracleError, Priority, ProcessId, ProcessOracle};
use log::{trace, warn};
use stdlib::syscall_abi::{Sysno, SyscallError, encode};

/// Kernel services behind the system calls.
pub trait SyscallHost {
    type Oracle: ProcessOracle;

    fn oracle(&self) -> &Self::Oracle;

    /// Maps `size` bytes of zeroed memory into `owner`'s address space.
    ///
    /// # Errors
    /// [`SupplierError::OutOfMemory`] if no memory is left.
    fn memory_get(
        &self,
        owner: ProcessId,
        size: u64,
        tag: &str,
    ) -> Result<VirtualAddress, SupplierError>;

    /// Unmaps memory previously returned by [`memory_get`](Self::memory_get).
    ///
    /// # Errors
    /// [`SupplierError::NoSuchRegion`] if `owner` holds no region at `address`.
    fn memory_release(&self, owner: ProcessId, address: VirtualAddress)
    -> Result<(), SupplierError>;

    /// Copies `dst.len()` bytes from the caller's memory at `src`.
    ///
    /// # Errors
    /// [`SyscallError::BadAddress`] if the range is not readable user memory.
    fn copy_from_user(&self, src: VirtualAddress, dst: &mut [u8]) -> Result<(), SyscallError>;

    fn debug_write(&self, byte: u8);

    /// Page size that memory requests must be a multiple of.
    fn page_size(&self) -> u64 {
        kernel_heap::config::MEMORY_PAGE_SIZE
    }
}

/// Registers saved by the system call entry stub.
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// Runs the call described by `tf` and stores the status word in `rax`.
pub fn dispatch_frame<H: SyscallHost + ?Sized>(host: &H, tf: &mut TrapFrame) {
    tf.rax = dispatch(host, tf.rax, [tf.rdi, tf.rsi, tf.rdx]);
}

/// Runs one system call and returns its status word.
#[must_use]
pub fn dispatch<H: SyscallHost + ?Sized>(host: &H, sysno: u64, args: [u64; 3]) -> u64 {
    let result = match Sysno::try_from(sysno) {
        Ok(n) => handle(host, n, args),
        Err(n) => {
            warn!("syscall: unknown number {n:#x}");
            Err(SyscallError::NoSuchCall)
        }
    };
    encode(result)
}

fn handle<H: SyscallHost + ?Sized>(
    host: &H,
    sysno: Sysno,
    [a0, a1, a2]: [u64; 3],
) -> Result<u64, SyscallError> {
    trace!("syscall: {sysno:?}({a0:#x}, {a1:#x}, {a2:#x})");
    let oracle = host.oracle();

    match sysno {
        Sysno::DebugWrite => {
            #[allow(clippy::cast_possible_truncation)]
            host.debug_write((a0 & 0xFF) as u8);
            Ok(0)
        }
        Sysno::MemoryGet => {
            let caller = caller(oracle)?;
            if a0 == 0 || !a0.is_multiple_of(host.page_size()) {
                return Err(SyscallError::InvalidArgument);
            }
            let mut buf = [0_u8; MAX_TAG_LENGTH];
            let tag = read_tag(host, VirtualAddress::new(a1), a2, &mut buf)?;
            host.memory_get(caller, a0, tag)
                .map(VirtualAddress::as_u64)
                .map_err(supplier_error)
        }
        Sysno::MemoryRelease => {
            let caller = caller(oracle)?;
            host.memory_release(caller, VirtualAddress::new(a0))
                .map(|()| 0)
                .map_err(supplier_error)
        }
        Sysno::CurrentProcessId => caller(oracle).map(|pid| u64::from(pid.as_u32())),
        Sysno::GetPriority => {
            let pid = target(a0)?;
            oracle
                .priority(pid)
                .map(|p| u64::from(p.level()))
                .map_err(oracle_error)
        }
        Sysno::SetPriority => {
            let pid = target(a0)?;
            let level = u8::try_from(a1).map_err(|_| SyscallError::InvalidArgument)?;
            if level > Priority::LOWEST.level() {
                return Err(SyscallError::InvalidArgument);
            }
            let me = caller(oracle)?;
            let own = oracle.priority(me).map_err(oracle_error)?;
            if level < own.level() {
                warn!("syscall: {me} at priority {} asked for {level} on {pid}", own.level());
                return Err(SyscallError::PermissionDenied);
            }
            oracle
                .set_priority(pid, Priority::new(level))
                .map(|()| 0)
                .map_err(oracle_error)
        }
        Sysno::GetState => {
            let pid = target(a0)?;
            oracle
                .state(pid)
                .map(|s| u64::from(s as u8))
                .map_err(oracle_error)
        }
        Sysno::Yield => {
            oracle.yield_now();
            Ok(0)
        }
    }
}

fn caller<O: ProcessOracle + ?Sized>(oracle: &O) -> Result<ProcessId, SyscallError> {
    oracle.current_process_id().map_err(oracle_error)
}

fn target(raw: u64) -> Result<ProcessId, SyscallError> {
    u32::try_from(raw)
        .ok()
        .and_then(ProcessId::new)
        .ok_or(SyscallError::NoSuchProcess)
}

/// Copies at most [`MAX_TAG_LENGTH`] bytes of the tag and cuts it at the
/// last whole character.
fn read_tag<'b, H: SyscallHost + ?Sized>(
    host: &H,
    src: VirtualAddress,
    len: u64,
    buf: &'b mut [u8; MAX_TAG_LENGTH],
) -> Result<&'b str, SyscallError> {
    let len = usize::try_from(len).map_or(MAX_TAG_LENGTH, |l| l.min(MAX_TAG_LENGTH));
    if len == 0 {
        return Ok("");
    }
    host.copy_from_user(src, &mut buf[..len])?;
    match core::str::from_utf8(&buf[..len]) {
        Ok(s) => Ok(s),
        Err(e) if e.error_len().is_none() => {
            // truncated inside a multi-byte character
            core::str::from_utf8(&buf[..e.valid_up_to()]).map_err(|_| SyscallError::InvalidArgument)
        }
        Err(_) => Err(SyscallError::InvalidArgument),
    }
}

const fn oracle_error(e: OracleError) -> SyscallError {
    match e {
        OracleError::NoProcess => SyscallError::NoProcess,
        OracleError::NoSuchProcess(_) => SyscallError::NoSuchProcess,
    }
}

const fn supplier_error(e: SupplierError) -> SyscallError {
    match e {
        SupplierError::OutOfMemory => SyscallError::OutOfMemory,
        SupplierError::NoSuchRegion(_) => SyscallError::NoSuchRegion,
    }
}
